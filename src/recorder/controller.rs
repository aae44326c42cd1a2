//! Recording session controller
//!
//! Owns the hardware encoder and its input surface for one recording at a
//! time: prepare (allocate + configure), start, stop (finalize) and release.
//! The render engine only ever borrows the input surface through the
//! surface registry; release refuses to destroy a surface that is still
//! bound.

use super::state::{RecordingOutcome, RecordingSession};
use crate::capture::Resolution;
use crate::encoder::{EncoderBackend, EncoderConfig, EncoderProfile, HardwareEncoder};
use crate::surface::{EncoderSurface, SurfaceOwner, SurfaceRegistry, SurfaceRole};
use crate::utils::error::{RecorderError, RecorderResult};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the controller is in the encoder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    /// Nothing allocated
    Idle,
    /// Input surface allocated, encoder configured
    Prepared,
    /// Encoder running
    Active,
    /// Encoder stopped, resources not yet released
    Finished,
}

pub struct RecordingSessionController {
    backend: Arc<dyn EncoderBackend>,
    registry: Arc<SurfaceRegistry>,
    profile: EncoderProfile,
    discard_invalid_output: bool,
    phase: ControllerPhase,
    encoder: Option<Box<dyn HardwareEncoder>>,
    surface: Option<EncoderSurface>,
    config: Option<EncoderConfig>,
    session: Option<RecordingSession>,
}

impl RecordingSessionController {
    pub fn new(
        backend: Arc<dyn EncoderBackend>,
        registry: Arc<SurfaceRegistry>,
        profile: EncoderProfile,
        discard_invalid_output: bool,
    ) -> Self {
        Self {
            backend,
            registry,
            profile,
            discard_invalid_output,
            phase: ControllerPhase::Idle,
            encoder: None,
            surface: None,
            config: None,
            session: None,
        }
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    pub fn is_prepared(&self) -> bool {
        self.phase == ControllerPhase::Prepared
    }

    pub fn is_active(&self) -> bool {
        self.phase == ControllerPhase::Active
    }

    /// Input surface of the prepared or running encoder
    pub fn encoder_surface(&self) -> Option<EncoderSurface> {
        self.surface.clone()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.config.as_ref().map(|c| c.output_path.as_path())
    }

    /// Running session, if any
    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Allocate the encoder input surface and configure the encoder for
    /// `output_path`. Any failure leaves nothing allocated.
    pub async fn prepare(&mut self, output_path: &Path, size: Resolution, mute: bool) -> RecorderResult<EncoderSurface> {
        if self.phase != ControllerPhase::Idle {
            return Err(RecorderError::InvalidState(format!(
                "encoder already {:?}, release it first",
                self.phase
            )));
        }
        if output_path.as_os_str().is_empty() {
            return Err(RecorderError::InvalidArgument("nothing output file path".to_string()));
        }

        tracing::info!("Preparing encoder for {:?} at {}", output_path, size);

        let native = self
            .backend
            .create_input_surface(size)
            .map_err(|e| RecorderError::EncoderConfig(format!("input surface: {:#}", e)))?;
        let id = match self.registry.register(
            SurfaceRole::EncoderInput,
            SurfaceOwner::RecordingController,
            native,
            Some(size),
        ) {
            Ok(id) => id,
            Err(e) => {
                self.backend.destroy_input_surface(native);
                return Err(e);
            }
        };

        let config = EncoderConfig::new(output_path.to_path_buf(), size, mute, &self.profile);
        let mut encoder = self.backend.create_encoder();
        if let Err(e) = encoder.configure(&config, native).await {
            if let Err(release) = encoder.release().await {
                tracing::warn!("Encoder release after failed configure: {:#}", release);
            }
            if let Err(release) = self.registry.release(id, SurfaceOwner::RecordingController) {
                tracing::warn!("Encoder surface release: {}", release);
            }
            self.backend.destroy_input_surface(native);
            return Err(RecorderError::EncoderConfig(format!("{:#}", e)));
        }

        let surface = EncoderSurface::new(id, native, size);
        self.encoder = Some(encoder);
        self.surface = Some(surface.clone());
        self.config = Some(config);
        self.phase = ControllerPhase::Prepared;
        tracing::debug!("Encoder prepared on {}", id);
        Ok(surface)
    }

    /// Allocate the session for the prepared encoder without starting it.
    /// Calling it again before `start` returns the same session.
    pub fn begin_session(&mut self) -> RecorderResult<RecordingSession> {
        if self.phase != ControllerPhase::Prepared {
            return Err(RecorderError::EncoderStart(format!(
                "session requested while encoder is {:?}",
                self.phase
            )));
        }
        let Some(config) = self.config.as_ref() else {
            return Err(RecorderError::EncoderStart("encoder missing".to_string()));
        };
        let session = self.session.get_or_insert_with(|| RecordingSession::new(config));
        Ok(session.clone())
    }

    /// Start the prepared encoder and mark its session active
    pub async fn start(&mut self) -> RecorderResult<RecordingSession> {
        let session = self.begin_session()?;
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(RecorderError::EncoderStart("encoder missing".to_string()));
        };

        if let Err(e) = encoder.start().await {
            self.session = None;
            return Err(RecorderError::EncoderStart(format!("{:#}", e)));
        }

        tracing::info!("Recording {} started to {:?}", session.id, session.output_path);
        self.phase = ControllerPhase::Active;
        Ok(session)
    }

    /// Stop the running encoder and finalize the output file.
    ///
    /// The render engine must already be detached from the input surface.
    pub async fn stop(&mut self) -> RecorderResult<RecordingOutcome> {
        if self.phase != ControllerPhase::Active {
            return Err(RecorderError::InvalidState(format!(
                "stop requested while encoder is {:?}",
                self.phase
            )));
        }
        self.phase = ControllerPhase::Finished;

        let frames_written = self.surface.as_ref().map(|s| s.frames_written()).unwrap_or(0);
        let output_path = self.output_path().map(Path::to_path_buf).unwrap_or_default();
        if frames_written == 0 {
            tracing::warn!("Stopping encoder before any frame reached it");
        }

        let Some(encoder) = self.encoder.as_mut() else {
            return Err(self.stop_failed(output_path, frames_written, "encoder missing".to_string()));
        };
        if let Err(e) = encoder.stop().await {
            return Err(self.stop_failed(output_path, frames_written, format!("{:#}", e)));
        }

        let session = self
            .session
            .take()
            .ok_or_else(|| RecorderError::InvalidState("no session for running encoder".to_string()))?;
        tracing::info!(
            "Recording {} finalized with {} frames",
            session.id,
            frames_written
        );
        Ok(RecordingOutcome {
            session,
            frames_written,
            stopped_at: Utc::now(),
        })
    }

    fn stop_failed(&mut self, output_path: PathBuf, frames_written: u64, reason: String) -> RecorderError {
        self.session = None;
        if self.discard_invalid_output && output_path.exists() {
            match std::fs::remove_file(&output_path) {
                Ok(()) => tracing::info!("Discarded invalid output {:?}", output_path),
                Err(e) => tracing::warn!("Failed to discard {:?}: {}", output_path, e),
            }
        }
        RecorderError::EncoderStop {
            output_path,
            frames_written,
            reason,
        }
    }

    /// Release the encoder and its input surface. Idempotent, never fails.
    pub async fn release(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            if let Err(e) = encoder.release().await {
                tracing::warn!("Encoder release failed: {:#}", e);
            }
        }

        if let Some(surface) = self.surface.take() {
            match self.registry.release(surface.id, SurfaceOwner::RecordingController) {
                Ok(_) => {
                    self.backend.destroy_input_surface(surface.native);
                    tracing::debug!("Encoder surface {} destroyed", surface.id);
                }
                // Still bound means a context may write into it; leaking beats a use-after-free
                Err(e) => tracing::error!("Encoder surface {} not destroyed: {}", surface.id, e),
            }
        }

        if self.phase != ControllerPhase::Idle {
            tracing::info!("Encoder released");
        }
        self.config = None;
        self.session = None;
        self.phase = ControllerPhase::Idle;
    }
}
