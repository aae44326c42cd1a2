//! Capture trait definitions
//!
//! Platform-agnostic traits for the camera capture session.

use crate::surface::NativeSurface;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Create a resolution, rejecting zero-sized dimensions
    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self { width, height })
    }

    /// Whether the frame is wider than it is tall
    pub fn is_landscape(&self) -> bool {
        self.width > self.height
    }

    /// Ratio of the long side to the short side (always >= 1.0)
    pub fn long_side_ratio(&self) -> f32 {
        let w = self.width as f32;
        let h = self.height as f32;
        if w > h {
            w / h
        } else {
            h / w
        }
    }

    /// Same resolution with width and height exchanged
    pub fn swapped(&self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which physical camera to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    Front,
    Back,
}

impl Default for LensFacing {
    fn default() -> Self {
        Self::Front
    }
}

/// Parameters handed to the capture session when it is started
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// GPU-consumable surface the camera writes frames into
    pub target: NativeSurface,

    /// Requested capture resolution (the session may negotiate another)
    pub resolution: Resolution,

    /// Camera to open
    pub lens_facing: LensFacing,
}

/// Callbacks the capture session delivers into the core.
///
/// Called from the capture session's own thread.
pub trait CaptureEvents: Send + Sync {
    /// The session is running with the negotiated resolution
    fn on_session_started(&self, resolution: Resolution, flash_available: bool);

    /// A new frame has been written into the camera input surface
    fn on_frame_available(&self, timestamp_ns: i64);

    /// The session failed
    fn on_session_error(&self, cause: anyhow::Error);
}

/// The camera capture session black box
pub trait CaptureSession: Send + Sync {
    /// Open the camera and begin delivering frames into `request.target`
    fn start(&self, request: CaptureRequest, events: Arc<dyn CaptureEvents>) -> anyhow::Result<()>;

    /// Stop delivering frames and close the camera
    fn stop(&self);

    /// Focus on a point of the on-screen view
    fn change_manual_focus_point(&self, x: f32, y: f32, view_width: u32, view_height: u32);

    /// Return to continuous auto focus
    fn change_auto_focus(&self);

    /// Toggle the torch
    fn switch_flash_mode(&self);
}
