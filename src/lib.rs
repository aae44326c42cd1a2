//! Camera Recorder - camera preview and recording core.
//!
//! This is the main library crate. It connects a camera capture session, a
//! GPU compositing engine with swappable filters, and a hardware encoder
//! behind one state machine. The platform pieces (camera, GPU API, encoder,
//! view system) are supplied by the host through the traits in `capture`,
//! `render::gpu` and `encoder`.

pub mod capture;
pub mod encoder;
pub mod recorder;
pub mod render;
pub mod surface;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use recorder::{
    CameraRecorder, Collaborators, PipelineChanges, RecordListener, RecorderConfig, RecorderEvent, RecorderState,
    RecordingOutcome, RecordingSession,
};
pub use render::{FilterChain, GpuFilter, ShaderFilter};
pub use utils::{ErrorResponse, RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the default tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Calling this more than once is
/// harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camera_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    tracing::debug!("Camera recorder v{} tracing ready", env!("CARGO_PKG_VERSION"));
}
