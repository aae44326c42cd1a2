//! Render engine
//!
//! Owns the single GPU context on a dedicated thread. Every camera frame
//! signal is composited through the active filter chain onto the preview
//! surface and, while a recording is attached, onto the encoder surface.
//!
//! Control commands arrive on a bounded queue and are drained at the start
//! of each composite cycle, so a command never interleaves with a
//! composite in flight. Commands that callers must be able to rely on
//! (filter swap, encoder detach, preview attach, shutdown) are acknowledged
//! through a oneshot reply.
//!
//! Nothing is written to the encoder surface until the preview has been
//! presented at least once, and every destination is scaled for the
//! on-screen view size.

use super::filter::FilterChain;
use super::gpu::{GpuContext, RenderTarget, TextureId};
use super::transform::{destination_matrix, Orientation};
use crate::capture::Resolution;
use crate::surface::{EncoderSurface, NativeSurface, SurfaceId, SurfaceOwner, SurfaceRegistry, SurfaceRole};
use crate::utils::error::{RecorderError, RecorderResult};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// Queue sizing for the render thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderSettings {
    /// Frame signals the render thread may fall behind by before new ones are dropped
    pub frame_queue_depth: usize,

    /// Pending control commands
    pub command_queue_depth: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frame_queue_depth: 8,
            command_queue_depth: 32,
        }
    }
}

/// Options fixed for the lifetime of the engine
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub settings: RenderSettings,

    /// Orientation applied to the on-screen preview
    pub preview_orientation: Orientation,

    /// Render the encoder destination without the active filter
    pub record_no_filter: bool,

    /// Used to bound how long a frame signal may block its caller
    pub frame_rate: u32,
}

/// One frame delivered by the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSignal {
    pub timestamp_ns: i64,
}

/// Snapshot of render counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Frame signals taken off the queue
    pub frames_received: u64,
    /// Frames presented on the preview surface
    pub preview_frames: u64,
    /// Frames presented on an encoder surface
    pub encoder_frames: u64,
    /// Frame signals dropped because the queue stayed full for a frame interval
    pub dropped_frames: u64,
    /// Composite attempts that failed on the GPU
    pub failed_frames: u64,
}

#[derive(Default)]
struct Counters {
    frames_received: AtomicU64,
    preview_frames: AtomicU64,
    encoder_frames: AtomicU64,
    dropped_frames: AtomicU64,
    failed_frames: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> RenderStats {
        RenderStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            preview_frames: self.preview_frames.load(Ordering::Relaxed),
            encoder_frames: self.encoder_frames.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            failed_frames: self.failed_frames.load(Ordering::Relaxed),
        }
    }
}

enum RenderCommand {
    AttachPreview {
        surface: NativeSurface,
        size: Option<Resolution>,
        reply: oneshot::Sender<RecorderResult<NativeSurface>>,
    },
    ResizePreview(Resolution),
    DetachPreview {
        reply: oneshot::Sender<()>,
    },
    SetCameraResolution(Resolution),
    SetGestureScale(f32),
    SetFilter {
        chain: FilterChain,
        reply: oneshot::Sender<RecorderResult<()>>,
    },
    AttachEncoder {
        surface: EncoderSurface,
        orientation: Orientation,
        reply: oneshot::Sender<RecorderResult<()>>,
    },
    DetachEncoder {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: Option<oneshot::Sender<()>>,
    },
}

/// Action returned by a loop step to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopAction {
    Continue,
    Stop,
}

/// Handle to the render thread
pub struct RenderEngine {
    commands: Sender<RenderCommand>,
    frames: Sender<FrameSignal>,
    frame_interval: Duration,
    counters: Arc<Counters>,
    thread: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl RenderEngine {
    /// Start the render thread. The GPU context moves onto it and is never
    /// touched from anywhere else.
    pub fn spawn(
        gpu: Box<dyn GpuContext>,
        registry: Arc<SurfaceRegistry>,
        options: RenderOptions,
    ) -> RecorderResult<Self> {
        let (command_tx, command_rx) = crossbeam_channel::bounded(options.settings.command_queue_depth.max(1));
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(options.settings.frame_queue_depth.max(1));
        let counters = Arc::new(Counters::default());
        let frame_interval = Duration::from_secs_f64(1.0 / options.frame_rate.max(1) as f64);

        let render_loop = RenderLoop {
            gpu,
            registry,
            counters: Arc::clone(&counters),
            options,
            camera: None,
            camera_resolution: None,
            preview: None,
            preview_presented: false,
            encoder: None,
            chain: FilterChain::passthrough(),
            encoder_chain: None,
            gesture_scale: 1.0,
            shutdown_reply: None,
        };

        let thread = std::thread::Builder::new()
            .name("render-engine".to_string())
            .spawn(move || render_loop.run(command_rx, frame_rx))?;

        tracing::info!("Render engine started");

        Ok(Self {
            commands: command_tx,
            frames: frame_tx,
            frame_interval,
            counters,
            thread: Mutex::new(Some(thread)),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Signal that the camera delivered a frame.
    ///
    /// Never blocks longer than one frame interval. Each call is composited
    /// exactly once unless the render thread is a full queue behind, in
    /// which case the signal is dropped and counted.
    pub fn on_frame_available(&self, frame: FrameSignal) {
        match self.frames.send_timeout(frame, self.frame_interval) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(frame)) => {
                self.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Render queue full, dropping frame at {}ns", frame.timestamp_ns);
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                tracing::debug!("Frame signal after render engine shutdown");
            }
        }
    }

    /// Attach the on-screen surface. Resolves to the camera input surface the
    /// capture session must write into.
    pub async fn attach_preview(&self, surface: NativeSurface, size: Option<Resolution>) -> RecorderResult<NativeSurface> {
        let (reply, rx) = oneshot::channel();
        self.send(RenderCommand::AttachPreview { surface, size, reply })?;
        rx.await.map_err(|_| engine_gone())?
    }

    pub fn resize_preview(&self, size: Resolution) -> RecorderResult<()> {
        self.send(RenderCommand::ResizePreview(size))
    }

    /// Stop drawing to the on-screen surface and release it
    pub async fn detach_preview(&self) -> RecorderResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RenderCommand::DetachPreview { reply })?;
        rx.await.map_err(|_| engine_gone())
    }

    pub fn set_camera_resolution(&self, resolution: Resolution) -> RecorderResult<()> {
        self.send(RenderCommand::SetCameraResolution(resolution))
    }

    pub fn set_gesture_scale(&self, scale: f32) -> RecorderResult<()> {
        self.send(RenderCommand::SetGestureScale(scale))
    }

    /// Swap the active filter chain. The previous chain's GPU resources are
    /// released before the new chain is set up; resolves once the swap took
    /// effect, so every later composite uses the new chain.
    pub async fn set_filter(&self, chain: FilterChain) -> RecorderResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RenderCommand::SetFilter { chain, reply })?;
        rx.await.map_err(|_| engine_gone())?
    }

    /// Begin writing composited frames to the encoder surface as well
    pub async fn attach_encoder_surface(&self, surface: EncoderSurface, orientation: Orientation) -> RecorderResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RenderCommand::AttachEncoder {
            surface,
            orientation,
            reply,
        })?;
        rx.await.map_err(|_| engine_gone())?
    }

    /// Stop writing to the encoder surface. When this resolves no further
    /// frame will be written to it.
    pub async fn detach_encoder_surface(&self) -> RecorderResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RenderCommand::DetachEncoder { reply })?;
        rx.await.map_err(|_| engine_gone())
    }

    /// Release every GPU resource and stop the render thread. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let (reply, rx) = oneshot::channel();
        let mut command = RenderCommand::Shutdown { reply: Some(reply) };
        loop {
            match self.commands.try_send(command) {
                Ok(()) => {
                    let _ = rx.await;
                    break;
                }
                Err(TrySendError::Full(back)) => {
                    command = back;
                    tokio::time::sleep(self.frame_interval).await;
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
        self.join();
        tracing::info!("Render engine stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.shut_down.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RenderStats {
        self.counters.snapshot()
    }

    /// Post a command without blocking the caller
    fn send(&self, command: RenderCommand) -> RecorderResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(engine_gone());
        }
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => {
                tracing::warn!("Render command queue full");
                RecorderError::Render("render command queue full".to_string())
            }
            TrySendError::Disconnected(_) => engine_gone(),
        })
    }

    fn join(&self) {
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Render thread panicked");
            }
        }
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            // Dropping the sender also ends the loop if the queue is full
            let _ = self.commands.try_send(RenderCommand::Shutdown { reply: None });
            self.join();
        }
    }
}

fn engine_gone() -> RecorderError {
    RecorderError::Render("render engine is not running".to_string())
}

struct CameraInput {
    texture: TextureId,
    surface_id: SurfaceId,
    native: NativeSurface,
}

struct PreviewOutput {
    surface_id: SurfaceId,
    native: NativeSurface,
    target: Option<RenderTarget>,
}

struct EncoderOutput {
    surface: EncoderSurface,
    target: RenderTarget,
    orientation: Orientation,
}

/// State living on the render thread
struct RenderLoop {
    gpu: Box<dyn GpuContext>,
    registry: Arc<SurfaceRegistry>,
    counters: Arc<Counters>,
    options: RenderOptions,
    camera: Option<CameraInput>,
    camera_resolution: Option<Resolution>,
    preview: Option<PreviewOutput>,
    /// Set once a frame reached the current preview surface
    preview_presented: bool,
    encoder: Option<EncoderOutput>,
    chain: FilterChain,
    encoder_chain: Option<FilterChain>,
    gesture_scale: f32,
    shutdown_reply: Option<oneshot::Sender<()>>,
}

impl RenderLoop {
    fn run(mut self, commands: Receiver<RenderCommand>, frames: Receiver<FrameSignal>) {
        tracing::debug!("Render thread started");

        self.setup_chains();

        loop {
            crossbeam_channel::select! {
                recv(commands) -> msg => match msg {
                    Ok(command) => {
                        if self.apply(command) == LoopAction::Stop {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(frames) -> msg => match msg {
                    Ok(frame) => {
                        // Draining point: pending commands apply before this composite
                        if self.drain(&commands) == LoopAction::Stop {
                            break;
                        }
                        self.composite(frame);
                    }
                    Err(_) => break,
                },
            }
        }

        self.teardown();
        if let Some(reply) = self.shutdown_reply.take() {
            let _ = reply.send(());
        }
        tracing::debug!("Render thread exiting");
    }

    fn setup_chains(&mut self) {
        if let Err(e) = self.chain.setup(self.gpu.as_mut()) {
            tracing::error!("Failed to set up default filter: {:#}", e);
        }
        if self.options.record_no_filter {
            let mut chain = FilterChain::passthrough();
            match chain.setup(self.gpu.as_mut()) {
                Ok(()) => self.encoder_chain = Some(chain),
                Err(e) => tracing::error!("Failed to set up encoder passthrough: {:#}", e),
            }
        }
    }

    fn drain(&mut self, commands: &Receiver<RenderCommand>) -> LoopAction {
        while let Ok(command) = commands.try_recv() {
            if self.apply(command) == LoopAction::Stop {
                return LoopAction::Stop;
            }
        }
        LoopAction::Continue
    }

    fn apply(&mut self, command: RenderCommand) -> LoopAction {
        match command {
            RenderCommand::AttachPreview { surface, size, reply } => {
                let _ = reply.send(self.attach_preview(surface, size));
            }
            RenderCommand::ResizePreview(size) => self.resize_preview(size),
            RenderCommand::DetachPreview { reply } => {
                self.detach_preview();
                let _ = reply.send(());
            }
            RenderCommand::SetCameraResolution(resolution) => {
                tracing::debug!("Camera resolution {}", resolution);
                self.camera_resolution = Some(resolution);
            }
            RenderCommand::SetGestureScale(scale) => {
                if scale.is_finite() && scale > 0.0 {
                    self.gesture_scale = scale;
                } else {
                    tracing::warn!("Ignoring gesture scale {}", scale);
                }
            }
            RenderCommand::SetFilter { chain, reply } => {
                let _ = reply.send(self.swap_filter(chain));
            }
            RenderCommand::AttachEncoder {
                surface,
                orientation,
                reply,
            } => {
                let _ = reply.send(self.attach_encoder(surface, orientation));
            }
            RenderCommand::DetachEncoder { reply } => {
                self.detach_encoder();
                let _ = reply.send(());
            }
            RenderCommand::Shutdown { reply } => {
                self.shutdown_reply = reply;
                return LoopAction::Stop;
            }
        }
        LoopAction::Continue
    }

    fn attach_preview(&mut self, surface: NativeSurface, size: Option<Resolution>) -> RecorderResult<NativeSurface> {
        if self.preview.is_some() {
            tracing::debug!("Replacing preview surface");
            self.detach_preview();
        }

        let surface_id = self.registry.register(
            SurfaceRole::PreviewOutput,
            SurfaceOwner::RenderEngine,
            surface,
            size,
        )?;
        self.registry.bind(surface_id, SurfaceOwner::RenderEngine)?;
        self.preview = Some(PreviewOutput {
            surface_id,
            native: surface,
            target: None,
        });
        if let Some(size) = size {
            self.resize_preview(size);
        }

        let camera_surface = match &self.camera {
            Some(camera) => camera.native,
            None => {
                let (texture, native) = self
                    .gpu
                    .create_external_texture()
                    .map_err(|e| RecorderError::Render(format!("camera texture: {:#}", e)))?;
                let surface_id = self.registry.register(
                    SurfaceRole::CameraInput,
                    SurfaceOwner::RenderEngine,
                    native,
                    None,
                )?;
                self.registry.bind(surface_id, SurfaceOwner::RenderEngine)?;
                self.camera = Some(CameraInput {
                    texture,
                    surface_id,
                    native,
                });
                native
            }
        };

        tracing::info!("Preview attached");
        Ok(camera_surface)
    }

    fn resize_preview(&mut self, size: Resolution) {
        let Some(preview) = self.preview.as_mut() else {
            tracing::debug!("Preview resize to {} without a surface", size);
            return;
        };

        if let Some(old) = preview.target.take() {
            self.gpu.release_target(old.id);
        }
        match self.gpu.create_surface_target(preview.native, size) {
            Ok(id) => {
                preview.target = Some(RenderTarget { id, size });
                tracing::debug!("Preview surface sized {}", size);
            }
            Err(e) => tracing::error!("Failed to create preview target: {:#}", e),
        }
    }

    /// A preview attached before its size is known is sized from the camera
    /// until the view reports its own size
    fn ensure_preview_target(&mut self) {
        let needs_target = self.preview.as_ref().is_some_and(|p| p.target.is_none());
        if !needs_target {
            return;
        }
        let Some(camera) = self.camera_resolution else {
            return;
        };
        let size = if self.options.preview_orientation.swaps_axes() {
            camera.swapped()
        } else {
            camera
        };
        tracing::debug!("Preview size unknown, using camera size {}", size);
        self.resize_preview(size);
    }

    fn detach_preview(&mut self) {
        let Some(preview) = self.preview.take() else {
            return;
        };
        self.preview_presented = false;
        if let Some(target) = preview.target {
            self.gpu.release_target(target.id);
        }
        if let Err(e) = self.registry.release(preview.surface_id, SurfaceOwner::RenderEngine) {
            tracing::warn!("Preview release: {}", e);
        }
        tracing::info!("Preview detached");
    }

    fn swap_filter(&mut self, mut chain: FilterChain) -> RecorderResult<()> {
        // Old chain is fully detached before the new one attaches
        self.chain.release(self.gpu.as_mut());

        match chain.setup(self.gpu.as_mut()) {
            Ok(()) => {
                tracing::info!("Filter chain set to {:?}", chain.names());
                self.chain = chain;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Filter setup failed, restoring previous chain: {:#}", e);
                if let Err(restore) = self.chain.setup(self.gpu.as_mut()) {
                    tracing::error!("Previous chain could not be restored: {:#}", restore);
                    self.chain = FilterChain::passthrough();
                    if let Err(e) = self.chain.setup(self.gpu.as_mut()) {
                        tracing::error!("Passthrough setup failed: {:#}", e);
                    }
                }
                Err(RecorderError::Render(format!("filter setup failed: {:#}", e)))
            }
        }
    }

    fn attach_encoder(&mut self, surface: EncoderSurface, orientation: Orientation) -> RecorderResult<()> {
        if self.encoder.is_some() {
            return Err(RecorderError::SurfaceLifecycle(
                "an encoder surface is already attached".to_string(),
            ));
        }

        let native = self.registry.bind(surface.id, SurfaceOwner::RenderEngine)?;
        let target = match self.gpu.create_surface_target(native, surface.size) {
            Ok(id) => RenderTarget { id, size: surface.size },
            Err(e) => {
                let _ = self.registry.unbind(surface.id, SurfaceOwner::RenderEngine);
                return Err(RecorderError::Render(format!("encoder target: {:#}", e)));
            }
        };

        tracing::info!("Encoder surface {} attached at {}", surface.id, surface.size);
        self.encoder = Some(EncoderOutput {
            surface,
            target,
            orientation,
        });
        Ok(())
    }

    fn detach_encoder(&mut self) {
        let Some(encoder) = self.encoder.take() else {
            return;
        };
        self.gpu.release_target(encoder.target.id);
        if let Err(e) = self.registry.unbind(encoder.surface.id, SurfaceOwner::RenderEngine) {
            tracing::warn!("Encoder surface unbind: {}", e);
        }
        tracing::info!(
            "Encoder surface {} detached after {} frames",
            encoder.surface.id,
            encoder.surface.frames_written()
        );
    }

    fn composite(&mut self, frame: FrameSignal) {
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);

        let Some(camera) = &self.camera else {
            tracing::debug!("Frame at {}ns before camera texture exists", frame.timestamp_ns);
            return;
        };
        let texture = camera.texture;

        if let Err(e) = self.gpu.update_external_texture(texture) {
            self.counters.failed_frames.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Failed to latch camera frame: {:#}", e);
            return;
        }

        // Preview first, so the screen never lags behind the recording
        self.ensure_preview_target();
        let view = self.preview.as_ref().and_then(|p| p.target);
        if let Some(target) = view {
            let mvp = destination_matrix(&self.options.preview_orientation, target.size, self.gesture_scale);
            let result = self
                .chain
                .apply(self.gpu.as_mut(), texture, target, &mvp)
                .and_then(|_| self.gpu.present(target.id, frame.timestamp_ns));
            match result {
                Ok(()) => {
                    self.preview_presented = true;
                    self.counters.preview_frames.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.failed_frames.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Preview composite failed: {:#}", e);
                }
            }
        }

        let Some(encoder) = &self.encoder else {
            return;
        };
        let (Some(view), true) = (view, self.preview_presented) else {
            tracing::debug!("Frame at {}ns held back from encoder until preview shows", frame.timestamp_ns);
            return;
        };
        let mvp = destination_matrix(&encoder.orientation, view.size, self.gesture_scale);
        let chain = match self.encoder_chain.as_mut() {
            Some(chain) => chain,
            None => &mut self.chain,
        };
        let result = chain
            .apply(self.gpu.as_mut(), texture, encoder.target, &mvp)
            .and_then(|_| self.gpu.present(encoder.target.id, frame.timestamp_ns));
        match result {
            Ok(()) => {
                encoder.surface.record_frame();
                self.counters.encoder_frames.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.failed_frames.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Encoder composite failed: {:#}", e);
            }
        }
    }

    fn teardown(&mut self) {
        self.detach_encoder();
        self.detach_preview();

        self.chain.release(self.gpu.as_mut());
        if let Some(mut chain) = self.encoder_chain.take() {
            chain.release(self.gpu.as_mut());
        }

        if let Some(camera) = self.camera.take() {
            self.gpu.release_texture(camera.texture);
            if let Err(e) = self.registry.release(camera.surface_id, SurfaceOwner::RenderEngine) {
                tracing::warn!("Camera surface release: {}", e);
            }
        }
    }
}
