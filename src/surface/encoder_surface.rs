//! Encoder input surface handle

use super::registry::{NativeSurface, SurfaceId};
use crate::capture::Resolution;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle to the live encoder input surface.
///
/// Created by the recording session controller, cloned into the render
/// engine while attached. The frame counter is shared so the controller can
/// tell whether anything was ever written before it stops the encoder.
#[derive(Debug, Clone)]
pub struct EncoderSurface {
    pub id: SurfaceId,
    pub native: NativeSurface,
    pub size: Resolution,
    frames_written: Arc<AtomicU64>,
}

impl EncoderSurface {
    pub fn new(id: SurfaceId, native: NativeSurface, size: Resolution) -> Self {
        Self {
            id,
            native,
            size,
            frames_written: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Frames presented into this surface so far
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Acquire)
    }

    pub(crate) fn record_frame(&self) {
        self.frames_written.fetch_add(1, Ordering::AcqRel);
    }
}
