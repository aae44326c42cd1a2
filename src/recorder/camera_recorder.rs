//! Camera recorder facade
//!
//! Public surface of the crate. Owns the state machine and wires the capture
//! session, the render engine and the recording session controller together.
//!
//! Every control operation (start, stop, pipeline changes, view lifecycle,
//! release) runs under one async gate, so at most one of them is in flight
//! at a time. The authoritative state lives behind a `RwLock` so `state()`
//! and `is_started()` never wait on the gate. The encoder start itself runs
//! as a task that holds the controller lock; `stop()` and `release()` wait
//! on that lock, which is what makes them safe to call mid-start.
//!
//! Listener notifications raised under the gate are queued on it and
//! delivered once the gate and the controller lock are released.

use super::config::RecorderConfig;
use super::controller::RecordingSessionController;
use super::listener::{Notifier, RecordListener, RecorderEvent};
use super::state::{RecorderState, RecordingOutcome, RecordingSession};
use crate::capture::{CaptureEvents, CaptureRequest, CaptureSession, Resolution};
use crate::encoder::EncoderBackend;
use crate::render::{FilterChain, FrameSignal, GpuContext, RenderEngine, RenderOptions, RenderStats};
use crate::surface::{NativeSurface, SurfaceRegistry};
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Mutex as AsyncMutex, MutexGuard, OwnedMutexGuard};
use tokio::task::JoinHandle;

/// Platform collaborators handed to the recorder
pub struct Collaborators {
    pub gpu: Box<dyn GpuContext>,
    pub capture: Arc<dyn CaptureSession>,
    pub encoder: Arc<dyn EncoderBackend>,
    pub listener: Option<Arc<dyn RecordListener>>,
}

/// Several pipeline changes applied with a single rebuild
#[derive(Debug, Default)]
pub struct PipelineChanges {
    pub filter: Option<FilterChain>,
    pub output_path: Option<PathBuf>,
}

/// Notification held back until the gate is released
enum Notice {
    Started(RecordingSession),
    Complete(RecordingOutcome),
    Error(RecorderError),
}

/// State only touched under the control gate
struct Control {
    output_path: Option<PathBuf>,
    notices: Vec<Notice>,
}

impl Control {
    fn report(&mut self, error: &RecorderError) {
        self.notices.push(Notice::Error(error.clone()));
    }
}

struct Inner {
    config: RecorderConfig,
    file_size: Resolution,
    camera_size: Resolution,
    runtime: Handle,
    state: RwLock<RecorderState>,
    gate: AsyncMutex<Control>,
    controller: Arc<AsyncMutex<RecordingSessionController>>,
    engine: RenderEngine,
    capture: Arc<dyn CaptureSession>,
    notifier: Notifier,
    flash_support: AtomicBool,
    capture_running: AtomicBool,
    view_size: Mutex<Option<Resolution>>,
}

/// Camera preview + recording pipeline
#[derive(Clone)]
pub struct CameraRecorder {
    inner: Arc<Inner>,
}

impl CameraRecorder {
    /// Build the recorder. Must be called from inside a tokio runtime.
    pub fn new(config: RecorderConfig, collaborators: Collaborators) -> RecorderResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|_| RecorderError::InvalidState("camera recorder requires a tokio runtime".to_string()))?;
        let (Some(file_size), Some(camera_size)) = (config.file_resolution(), config.camera_resolution()) else {
            return Err(RecorderError::Config("zero-sized resolution".to_string()));
        };

        let registry = Arc::new(SurfaceRegistry::new());
        let engine = RenderEngine::spawn(
            collaborators.gpu,
            Arc::clone(&registry),
            RenderOptions {
                settings: config.render.clone(),
                preview_orientation: config.preview_orientation(),
                record_no_filter: config.record_no_filter,
                frame_rate: config.encoder.frame_rate,
            },
        )?;
        let controller = RecordingSessionController::new(
            collaborators.encoder,
            registry,
            config.encoder.clone(),
            config.discard_invalid_output,
        );

        tracing::info!(
            "Camera recorder created: file {} camera {} lens {:?}",
            file_size,
            camera_size,
            config.lens_facing
        );

        Ok(Self {
            inner: Arc::new(Inner {
                file_size,
                camera_size,
                runtime,
                state: RwLock::new(RecorderState::Idle),
                gate: AsyncMutex::new(Control {
                    output_path: config.output_path.clone(),
                    notices: Vec::new(),
                }),
                controller: Arc::new(AsyncMutex::new(controller)),
                engine,
                capture: collaborators.capture,
                notifier: Notifier::new(collaborators.listener),
                flash_support: AtomicBool::new(false),
                capture_running: AtomicBool::new(false),
                view_size: Mutex::new(None),
                config,
            }),
        })
    }

    /// The on-screen surface exists: attach the preview and open the camera
    pub fn on_surface_created(&self, surface: NativeSurface) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move { inner.start_preview(surface).await })
    }

    /// The on-screen surface was resized
    pub fn on_surface_changed(&self, width: u32, height: u32) {
        let Some(size) = Resolution::new(width, height) else {
            tracing::warn!("Ignoring preview size {}x{}", width, height);
            return;
        };
        *self.inner.view_size.lock() = Some(size);
        if let Err(e) = self.inner.engine.resize_preview(size) {
            tracing::debug!("Preview resize skipped: {}", e);
        }
    }

    /// The on-screen surface is going away: stop any recording, close the
    /// camera and detach the preview
    pub fn on_surface_destroyed(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move { inner.stop_preview().await })
    }

    /// Start recording into the current output path.
    ///
    /// Returns once frames are routed to the encoder; the encoder itself
    /// starts in the background and reports failure through the listener.
    /// A second call while recording is a no-op.
    pub async fn start(&self) -> RecorderResult<()> {
        self.inner.start().await
    }

    /// Stop recording and finalize the file. `Ok(None)` when nothing was
    /// recording.
    pub async fn stop(&self) -> RecorderResult<Option<RecordingOutcome>> {
        let mut control = self.inner.gate.lock().await;
        let result = self.inner.stop_locked(&mut control).await;
        self.inner.unlock(control);
        result
    }

    /// Replace the active filter chain
    pub async fn set_filter(&self, filter: FilterChain) -> RecorderResult<()> {
        self.update_pipeline(PipelineChanges {
            filter: Some(filter),
            output_path: None,
        })
        .await
    }

    /// Set the file the next recording writes to
    pub async fn set_output_path(&self, path: impl Into<PathBuf>) -> RecorderResult<()> {
        self.update_pipeline(PipelineChanges {
            filter: None,
            output_path: Some(path.into()),
        })
        .await
    }

    /// Apply several pipeline changes with a single rebuild
    pub async fn update_pipeline(&self, changes: PipelineChanges) -> RecorderResult<()> {
        self.inner.update_pipeline(changes).await
    }

    /// Tear down and re-prepare the encoder for the current output path
    pub async fn rebuild_recording_pipeline(&self) -> RecorderResult<()> {
        let mut control = self.inner.gate.lock().await;
        let result = match self.inner.check_pipeline_change() {
            Ok(()) => self.inner.rebuild_locked(&mut control).await,
            Err(e) => Err(e),
        };
        self.inner.unlock(control);
        result
    }

    /// Pinch zoom factor applied to every destination
    pub fn set_gesture_scale(&self, scale: f32) {
        if let Err(e) = self.inner.engine.set_gesture_scale(scale) {
            tracing::debug!("Gesture scale ignored: {}", e);
        }
    }

    /// Focus on a point of the on-screen view
    pub fn change_manual_focus_point(&self, x: f32, y: f32, view_width: u32, view_height: u32) {
        if self.inner.capture_running.load(Ordering::Acquire) {
            self.inner
                .capture
                .change_manual_focus_point(x, y, view_width, view_height);
        }
    }

    pub fn change_auto_focus(&self) {
        if self.inner.capture_running.load(Ordering::Acquire) {
            self.inner.capture.change_auto_focus();
        }
    }

    /// Toggle the torch. Ignored unless the camera reported a flash.
    pub fn switch_flash_mode(&self) {
        if !self.is_flash_support() {
            tracing::debug!("Flash toggle ignored: no flash");
            return;
        }
        if self.inner.capture_running.load(Ordering::Acquire) {
            self.inner.capture.switch_flash_mode();
        }
    }

    pub fn is_flash_support(&self) -> bool {
        self.inner.flash_support.load(Ordering::Acquire)
    }

    /// Whether a recording is in progress
    pub fn is_started(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    pub fn state(&self) -> RecorderState {
        *self.inner.state.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.inner.notifier.subscribe()
    }

    pub fn render_stats(&self) -> RenderStats {
        self.inner.engine.stats()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.inner.config
    }

    /// Release every resource. Safe at any time, repeatable, never fails.
    pub async fn release(&self) {
        self.inner.release().await
    }
}

/// Capture callbacks, holding the recorder weakly so a forgotten session
/// cannot keep it alive
struct CaptureEventSink {
    inner: Weak<Inner>,
}

impl CaptureEvents for CaptureEventSink {
    fn on_session_started(&self, resolution: Resolution, flash_available: bool) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        tracing::info!(
            "Capture session running at {} (flash: {})",
            resolution,
            flash_available
        );
        if let Err(e) = inner.engine.set_camera_resolution(resolution) {
            tracing::debug!("Camera resolution not forwarded: {}", e);
        }
        inner.flash_support.store(flash_available, Ordering::Release);
        inner.notifier.flash_support(flash_available);
    }

    fn on_frame_available(&self, timestamp_ns: i64) {
        if let Some(inner) = self.inner.upgrade() {
            inner.engine.on_frame_available(FrameSignal { timestamp_ns });
        }
    }

    fn on_session_error(&self, cause: anyhow::Error) {
        if let Some(inner) = self.inner.upgrade() {
            inner.notifier.error(&RecorderError::Capture(format!("{:#}", cause)));
        }
    }
}

impl Inner {
    fn state(&self) -> RecorderState {
        *self.state.read()
    }

    fn set_state(&self, next: RecorderState) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, next)
        };
        if previous != next {
            tracing::info!("Recorder state: {:?} -> {:?}", previous, next);
            self.notifier.state_changed(next);
        }
    }

    /// Release the gate, then deliver what was queued under it
    fn unlock(&self, mut control: MutexGuard<'_, Control>) {
        let notices = std::mem::take(&mut control.notices);
        drop(control);
        for notice in notices {
            match notice {
                Notice::Started(session) => self.notifier.recording_started(&session),
                Notice::Complete(outcome) => self.notifier.record_complete(&outcome),
                Notice::Error(error) => self.notifier.error(&error),
            }
        }
    }

    async fn start_preview(self: &Arc<Self>, surface: NativeSurface) {
        let mut control = self.gate.lock().await;
        if let Err(e) = self.start_preview_locked(&mut control, surface).await {
            control.report(&e);
        }
        self.unlock(control);
    }

    async fn start_preview_locked(self: &Arc<Self>, control: &mut Control, surface: NativeSurface) -> RecorderResult<()> {
        let state = self.state();
        if state == RecorderState::Released {
            tracing::debug!("Surface created after release");
            return Ok(());
        }

        // Unknown until the view reports its size; the engine sizes from the camera meanwhile
        let view_size = *self.view_size.lock();
        let camera_surface = self.engine.attach_preview(surface, view_size).await?;
        if state.is_live() {
            // New window surface for a running pipeline
            return Ok(());
        }

        let events: Arc<dyn CaptureEvents> = Arc::new(CaptureEventSink {
            inner: Arc::downgrade(self),
        });
        let request = CaptureRequest {
            target: camera_surface,
            resolution: self.camera_size,
            lens_facing: self.config.lens_facing,
        };
        self.capture
            .start(request, events)
            .map_err(|e| RecorderError::Capture(format!("{:#}", e)))?;
        self.capture_running.store(true, Ordering::Release);
        self.set_state(RecorderState::Previewing);

        if control.output_path.is_some() {
            // Failure is already queued; preview keeps running
            let _ = self.rebuild_locked(control).await;
        }
        Ok(())
    }

    async fn stop_preview(&self) {
        let mut control = self.gate.lock().await;
        match self.state() {
            RecorderState::Released | RecorderState::Stopped => return,
            RecorderState::Recording => {
                let _ = self.stop_locked(&mut control).await;
            }
            RecorderState::Idle | RecorderState::Previewing => {}
        }

        self.controller.lock().await.release().await;
        if self.capture_running.swap(false, Ordering::AcqRel) {
            self.capture.stop();
            tracing::info!("Capture session stopped");
        }
        if let Err(e) = self.engine.detach_preview().await {
            tracing::warn!("Preview detach: {}", e);
        }
        if self.state() != RecorderState::Idle {
            self.set_state(RecorderState::Stopped);
        }
        self.unlock(control);
    }

    async fn start(self: &Arc<Self>) -> RecorderResult<()> {
        let mut control = self.gate.lock().await;
        let result = self.start_locked(&mut control).await;
        self.unlock(control);

        if let Some(controller) = result? {
            let inner = Arc::clone(self);
            self.runtime.spawn(async move { inner.start_encoder(controller).await });
        }
        Ok(())
    }

    /// Allocates the session and routes frames to the encoder surface.
    /// Returns the controller lock for the encoder start, or `None` when
    /// already recording.
    async fn start_locked(
        &self,
        control: &mut Control,
    ) -> RecorderResult<Option<OwnedMutexGuard<RecordingSessionController>>> {
        match self.state() {
            RecorderState::Recording => {
                tracing::debug!("Start ignored: already recording");
                return Ok(None);
            }
            RecorderState::Released => return Err(RecorderError::Released),
            RecorderState::Idle | RecorderState::Stopped => {
                return Err(RecorderError::InvalidState("preview is not running".to_string()));
            }
            RecorderState::Previewing => {}
        }

        let Some(output_path) = control.output_path.clone() else {
            let err = RecorderError::InvalidArgument("nothing output file path".to_string());
            control.report(&err);
            return Err(err);
        };

        let mut controller = Arc::clone(&self.controller).lock_owned().await;
        if !controller.is_prepared() {
            controller.release().await;
            if let Err(e) = controller
                .prepare(&output_path, self.file_size, self.config.mute)
                .await
            {
                control.report(&e);
                return Err(e);
            }
        }

        let attached = match (controller.begin_session(), controller.encoder_surface()) {
            (Ok(session), Some(surface)) => self
                .engine
                .attach_encoder_surface(surface, self.config.encoder_orientation())
                .await
                .map(|()| session),
            (Ok(_), None) => Err(RecorderError::SurfaceLifecycle(
                "prepared encoder has no surface".to_string(),
            )),
            (Err(e), _) => Err(e),
        };
        let session = match attached {
            Ok(session) => session,
            Err(e) => {
                controller.release().await;
                control.report(&e);
                return Err(e);
            }
        };

        self.set_state(RecorderState::Recording);
        control.notices.push(Notice::Started(session));
        Ok(Some(controller))
    }

    /// Runs off the caller's path holding the controller lock, never the gate
    async fn start_encoder(self: Arc<Self>, mut controller: OwnedMutexGuard<RecordingSessionController>) {
        match controller.start().await {
            Ok(session) => tracing::debug!("Encoder running for session {}", session.id),
            Err(e) => {
                if let Err(detach) = self.engine.detach_encoder_surface().await {
                    tracing::warn!("Encoder detach after failed start: {}", detach);
                }
                controller.release().await;
                drop(controller);

                let rolled_back = {
                    let mut state = self.state.write();
                    if *state == RecorderState::Recording {
                        *state = RecorderState::Previewing;
                        true
                    } else {
                        false
                    }
                };
                if rolled_back {
                    tracing::info!("Recorder state: Recording -> Previewing");
                    self.notifier.state_changed(RecorderState::Previewing);
                }
                self.notifier.error(&e);
            }
        }
    }

    /// Caller holds the gate
    async fn stop_locked(&self, control: &mut Control) -> RecorderResult<Option<RecordingOutcome>> {
        if self.state() != RecorderState::Recording {
            tracing::debug!("Stop ignored: not recording");
            return Ok(None);
        }

        // No frame reaches the encoder once this resolves
        if let Err(e) = self.engine.detach_encoder_surface().await {
            tracing::warn!("Encoder detach: {}", e);
        }

        let mut controller = self.controller.lock().await;
        if !controller.is_active() {
            // Encoder start failed and was already reported
            controller.release().await;
            drop(controller);
            if self.state() == RecorderState::Recording {
                self.set_state(RecorderState::Previewing);
            }
            return Ok(None);
        }

        let result = controller.stop().await;
        controller.release().await;
        drop(controller);

        // A finished recording consumes its output path
        control.output_path = None;
        self.set_state(RecorderState::Previewing);

        match result {
            Ok(outcome) => {
                control.notices.push(Notice::Complete(outcome.clone()));
                Ok(Some(outcome))
            }
            Err(e) => {
                control.report(&e);
                Err(e)
            }
        }
    }

    fn check_pipeline_change(&self) -> RecorderResult<()> {
        match self.state() {
            RecorderState::Released => Err(RecorderError::Released),
            RecorderState::Recording => Err(RecorderError::InvalidState(
                "pipeline cannot change while recording".to_string(),
            )),
            _ => Ok(()),
        }
    }

    async fn update_pipeline(&self, changes: PipelineChanges) -> RecorderResult<()> {
        let mut control = self.gate.lock().await;
        let result = self.update_pipeline_locked(&mut control, changes).await;
        self.unlock(control);
        result
    }

    async fn update_pipeline_locked(&self, control: &mut Control, changes: PipelineChanges) -> RecorderResult<()> {
        self.check_pipeline_change()?;

        if let Some(path) = changes.output_path {
            if path.as_os_str().is_empty() {
                return Err(RecorderError::InvalidArgument("output path is empty".to_string()));
            }
            tracing::info!("Output path set to {:?}", path);
            control.output_path = Some(path);
        }

        if let Some(filter) = changes.filter {
            if let Err(e) = self.engine.set_filter(filter).await {
                // Nothing may stay attached to a half-swapped pipeline
                self.controller.lock().await.release().await;
                control.report(&e);
                return Err(e);
            }
        }

        self.rebuild_locked(control).await
    }

    /// Release the prepared encoder and, while previewing with a known
    /// output path, prepare a fresh one. Caller holds the gate.
    async fn rebuild_locked(&self, control: &mut Control) -> RecorderResult<()> {
        let mut controller = self.controller.lock().await;
        controller.release().await;

        if self.state() != RecorderState::Previewing {
            return Ok(());
        }
        let Some(path) = control.output_path.clone() else {
            return Ok(());
        };

        match controller.prepare(&path, self.file_size, self.config.mute).await {
            Ok(surface) => {
                tracing::debug!("Recording pipeline rebuilt on {}", surface.id);
                Ok(())
            }
            Err(e) => {
                control.report(&e);
                Err(e)
            }
        }
    }

    async fn release(&self) {
        let mut control = self.gate.lock().await;
        if self.state() == RecorderState::Released {
            return;
        }
        tracing::info!("Releasing camera recorder");

        if self.state() == RecorderState::Recording {
            // Finalize what was recorded; the outcome is queued for the listener
            let _ = self.stop_locked(&mut control).await;
        }
        if let Err(e) = self.engine.detach_encoder_surface().await {
            tracing::debug!("Encoder detach on release: {}", e);
        }
        self.controller.lock().await.release().await;
        if self.capture_running.swap(false, Ordering::AcqRel) {
            self.capture.stop();
        }
        self.engine.shutdown().await;
        self.set_state(RecorderState::Released);
        self.unlock(control);
    }
}
