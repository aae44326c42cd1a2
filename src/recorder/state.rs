//! Recorder state management
//!
//! Defines the recorder state machine and recording session tracking.

use crate::encoder::EncoderConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Current state of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// Constructed, no preview surface yet
    Idle,
    /// Camera frames reach the preview
    Previewing,
    /// Frames also reach the encoder
    Recording,
    /// Preview surface went away, capture closed
    Stopped,
    /// Terminal: every resource is gone
    Released,
}

impl Default for RecorderState {
    fn default() -> Self {
        Self::Idle
    }
}

impl RecorderState {
    /// Whether the capture session is expected to be running
    pub fn is_live(&self) -> bool {
        matches!(self, RecorderState::Previewing | RecorderState::Recording)
    }
}

/// Information about one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: Uuid,

    pub output_path: PathBuf,

    /// Video bitrate in bits per second
    pub bitrate: u32,

    pub frame_rate: u32,

    pub mute: bool,

    pub width: u32,

    pub height: u32,

    pub started_at: DateTime<Utc>,
}

impl RecordingSession {
    /// Create a session for an encoder that just started
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            output_path: config.output_path.clone(),
            bitrate: config.video_bitrate,
            frame_rate: config.frame_rate,
            mute: !config.audio_enabled,
            width: config.width,
            height: config.height,
            started_at: Utc::now(),
        }
    }
}

/// Result of a cleanly finalized recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutcome {
    pub session: RecordingSession,

    /// Frames the render engine presented into the encoder surface
    pub frames_written: u64,

    pub stopped_at: DateTime<Utc>,
}

impl RecordingOutcome {
    /// Wall-clock length of the recording in milliseconds
    pub fn duration_ms(&self) -> i64 {
        (self.stopped_at - self.session.started_at).num_milliseconds()
    }
}
