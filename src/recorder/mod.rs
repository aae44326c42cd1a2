//! Recorder module
//!
//! This module implements the recording side of the pipeline:
//! - CameraRecorder facade and its state machine
//! - RecordingSessionController owning the hardware encoder
//! - RecordListener contract and broadcast events

pub mod camera_recorder;
pub mod config;
pub mod controller;
pub mod listener;
pub mod state;

pub use camera_recorder::{CameraRecorder, Collaborators, PipelineChanges};
pub use config::RecorderConfig;
pub use controller::{ControllerPhase, RecordingSessionController};
pub use listener::{RecordListener, RecorderEvent};
pub use state::{RecorderState, RecordingOutcome, RecordingSession};
