//! Capture-session boundary
//!
//! The physical camera and its capture session live outside this crate.
//! This module describes what the core needs from them and what it
//! reports back.

pub mod traits;

// Re-export traits
pub use traits::{CaptureEvents, CaptureRequest, CaptureSession, LensFacing, Resolution};
