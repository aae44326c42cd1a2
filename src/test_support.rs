//! Recording fakes for the platform collaborators

use crate::capture::{CaptureEvents, CaptureRequest, CaptureSession, Resolution};
use crate::encoder::{EncoderBackend, EncoderConfig, HardwareEncoder};
use crate::recorder::RecordListener;
use crate::render::gpu::{GpuContext, ProgramId, TargetId, TextureId, Uniform};
use crate::render::transform::Mat4;
use crate::surface::NativeSurface;
use crate::utils::error::RecorderError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Poll `condition` until it holds, panicking after two seconds
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within 2s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    CreateExternal(TextureId),
    UpdateExternal(TextureId),
    CreateSurfaceTarget(TargetId, NativeSurface),
    CreateOffscreen(TargetId),
    Bind(TargetId),
    Compile(ProgramId, String),
    Draw {
        program: ProgramId,
        input: TextureId,
        target: Option<TargetId>,
        mvp: Mat4,
    },
    Present(TargetId, i64),
    DeleteProgram(ProgramId),
    ReleaseTarget(TargetId),
    ReleaseTexture(TextureId),
}

#[derive(Default)]
struct GpuState {
    next_id: u64,
    log: Vec<GpuCall>,
    bound: Option<TargetId>,
    fragments: HashMap<ProgramId, String>,
    live_programs: HashSet<ProgramId>,
    live_targets: HashSet<TargetId>,
    surfaces: HashMap<TargetId, NativeSurface>,
    fail_compile: Vec<String>,
}

impl GpuState {
    fn mint(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// GPU context that records every call
#[derive(Clone)]
pub struct FakeGpu {
    state: Arc<Mutex<GpuState>>,
}

impl FakeGpu {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GpuState {
                next_id: 100,
                ..Default::default()
            })),
        }
    }

    pub fn log(&self) -> Vec<GpuCall> {
        self.state.lock().log.clone()
    }

    /// Make `compile_program` fail for fragment sources containing `needle`
    pub fn fail_compile_containing(&self, needle: &str) {
        self.state.lock().fail_compile.push(needle.to_string());
    }

    pub fn live_programs(&self) -> usize {
        self.state.lock().live_programs.len()
    }

    pub fn live_targets(&self) -> usize {
        self.state.lock().live_targets.len()
    }

    /// Presentation timestamps of every present into targets wrapping `surface`
    pub fn presents_to_surface(&self, surface: NativeSurface) -> Vec<i64> {
        let state = self.state.lock();
        state
            .log
            .iter()
            .filter_map(|call| match call {
                GpuCall::Present(target, ts) if state.surfaces.get(target) == Some(&surface) => Some(*ts),
                _ => None,
            })
            .collect()
    }

    /// Surfaces in the order they were presented
    pub fn present_order(&self) -> Vec<NativeSurface> {
        let state = self.state.lock();
        state
            .log
            .iter()
            .filter_map(|call| match call {
                GpuCall::Present(target, _) => state.surfaces.get(target).copied(),
                _ => None,
            })
            .collect()
    }

    /// Fragment sources of the draws that landed in targets wrapping `surface`
    pub fn fragments_drawn_to(&self, surface: NativeSurface) -> Vec<String> {
        let state = self.state.lock();
        state
            .log
            .iter()
            .filter_map(|call| match call {
                GpuCall::Draw {
                    program,
                    target: Some(target),
                    ..
                } if state.surfaces.get(target) == Some(&surface) => state.fragments.get(program).cloned(),
                _ => None,
            })
            .collect()
    }

    /// Matrices of the draws that landed in targets wrapping `surface`
    pub fn matrices_drawn_to(&self, surface: NativeSurface) -> Vec<Mat4> {
        let state = self.state.lock();
        state
            .log
            .iter()
            .filter_map(|call| match call {
                GpuCall::Draw {
                    target: Some(target),
                    mvp,
                    ..
                } if state.surfaces.get(target) == Some(&surface) => Some(*mvp),
                _ => None,
            })
            .collect()
    }

    /// Whether some program was deleted before the one with `fragment` was compiled
    pub fn deleted_before_compiled(&self, fragment: &str) -> bool {
        let log = self.log();
        let Some(compiled_at) = log
            .iter()
            .position(|call| matches!(call, GpuCall::Compile(_, source) if source == fragment))
        else {
            return false;
        };
        log[..compiled_at]
            .iter()
            .any(|call| matches!(call, GpuCall::DeleteProgram(_)))
    }
}

impl GpuContext for FakeGpu {
    fn create_external_texture(&mut self) -> anyhow::Result<(TextureId, NativeSurface)> {
        let mut state = self.state.lock();
        let texture = TextureId(state.mint());
        let surface = NativeSurface(state.mint());
        state.log.push(GpuCall::CreateExternal(texture));
        Ok((texture, surface))
    }

    fn update_external_texture(&mut self, texture: TextureId) -> anyhow::Result<()> {
        self.state.lock().log.push(GpuCall::UpdateExternal(texture));
        Ok(())
    }

    fn create_surface_target(&mut self, surface: NativeSurface, _size: Resolution) -> anyhow::Result<TargetId> {
        let mut state = self.state.lock();
        let target = TargetId(state.mint());
        state.live_targets.insert(target);
        state.surfaces.insert(target, surface);
        state.log.push(GpuCall::CreateSurfaceTarget(target, surface));
        Ok(target)
    }

    fn create_offscreen_target(&mut self, _size: Resolution) -> anyhow::Result<(TargetId, TextureId)> {
        let mut state = self.state.lock();
        let target = TargetId(state.mint());
        let texture = TextureId(state.mint());
        state.live_targets.insert(target);
        state.log.push(GpuCall::CreateOffscreen(target));
        Ok((target, texture))
    }

    fn bind_target(&mut self, target: TargetId, _size: Resolution) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.bound = Some(target);
        state.log.push(GpuCall::Bind(target));
        Ok(())
    }

    fn compile_program(&mut self, _vertex_source: &str, fragment_source: &str) -> anyhow::Result<ProgramId> {
        let mut state = self.state.lock();
        if state.fail_compile.iter().any(|n| fragment_source.contains(n.as_str())) {
            anyhow::bail!("compile error");
        }
        let program = ProgramId(state.mint());
        state.fragments.insert(program, fragment_source.to_string());
        state.live_programs.insert(program);
        state.log.push(GpuCall::Compile(program, fragment_source.to_string()));
        Ok(program)
    }

    fn draw(&mut self, program: ProgramId, input: TextureId, mvp: &Mat4, _uniforms: &[Uniform]) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if !state.live_programs.contains(&program) {
            anyhow::bail!("draw with deleted program {:?}", program);
        }
        let target = state.bound;
        state.log.push(GpuCall::Draw {
            program,
            input,
            target,
            mvp: *mvp,
        });
        Ok(())
    }

    fn present(&mut self, target: TargetId, timestamp_ns: i64) -> anyhow::Result<()> {
        self.state.lock().log.push(GpuCall::Present(target, timestamp_ns));
        Ok(())
    }

    fn delete_program(&mut self, program: ProgramId) {
        let mut state = self.state.lock();
        state.live_programs.remove(&program);
        state.log.push(GpuCall::DeleteProgram(program));
    }

    fn release_target(&mut self, target: TargetId) {
        let mut state = self.state.lock();
        state.live_targets.remove(&target);
        state.log.push(GpuCall::ReleaseTarget(target));
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.state.lock().log.push(GpuCall::ReleaseTexture(texture));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncoderCall {
    Configure(PathBuf),
    Start,
    Stop,
    Release,
}

#[derive(Default)]
struct EncoderState {
    next_surface: u64,
    live_surfaces: HashSet<NativeSurface>,
    surfaces_created: usize,
    encoders_created: usize,
    calls: Vec<EncoderCall>,
    configs: Vec<EncoderConfig>,
    fail_configure: bool,
    fail_start: bool,
    fail_stop: bool,
    start_delay: Option<Duration>,
}

/// Encoder backend whose encoders write a small file on a clean stop
#[derive(Clone, Default)]
pub struct FakeEncoderBackend {
    state: Arc<Mutex<EncoderState>>,
}

impl FakeEncoderBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_configure(&self, fail: bool) {
        self.state.lock().fail_configure = fail;
    }

    pub fn fail_start(&self, fail: bool) {
        self.state.lock().fail_start = fail;
    }

    pub fn fail_stop(&self, fail: bool) {
        self.state.lock().fail_stop = fail;
    }

    pub fn delay_start(&self, delay: Duration) {
        self.state.lock().start_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<EncoderCall> {
        self.state.lock().calls.clone()
    }

    pub fn configs(&self) -> Vec<EncoderConfig> {
        self.state.lock().configs.clone()
    }

    pub fn count(&self, call: &EncoderCall) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn live_surfaces(&self) -> usize {
        self.state.lock().live_surfaces.len()
    }

    pub fn surfaces_created(&self) -> usize {
        self.state.lock().surfaces_created
    }

    pub fn encoders_created(&self) -> usize {
        self.state.lock().encoders_created
    }

    /// Most recently created input surface
    pub fn last_surface(&self) -> Option<NativeSurface> {
        let state = self.state.lock();
        (state.next_surface > 0).then(|| NativeSurface(5_000 + state.next_surface))
    }
}

impl EncoderBackend for FakeEncoderBackend {
    fn create_input_surface(&self, _size: Resolution) -> anyhow::Result<NativeSurface> {
        let mut state = self.state.lock();
        state.next_surface += 1;
        state.surfaces_created += 1;
        let surface = NativeSurface(5_000 + state.next_surface);
        state.live_surfaces.insert(surface);
        Ok(surface)
    }

    fn destroy_input_surface(&self, surface: NativeSurface) {
        self.state.lock().live_surfaces.remove(&surface);
    }

    fn create_encoder(&self) -> Box<dyn HardwareEncoder> {
        self.state.lock().encoders_created += 1;
        Box::new(FakeEncoder {
            state: Arc::clone(&self.state),
            output_path: None,
        })
    }
}

struct FakeEncoder {
    state: Arc<Mutex<EncoderState>>,
    output_path: Option<PathBuf>,
}

#[async_trait]
impl HardwareEncoder for FakeEncoder {
    async fn configure(&mut self, config: &EncoderConfig, _input: NativeSurface) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(EncoderCall::Configure(config.output_path.clone()));
        if state.fail_configure {
            anyhow::bail!("unsupported encoder configuration");
        }
        state.configs.push(config.clone());
        self.output_path = Some(config.output_path.clone());
        // Muxers create the file as soon as they are configured
        std::fs::write(&config.output_path, b"")?;
        Ok(())
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        let delay = self.state.lock().start_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.calls.push(EncoderCall::Start);
        if state.fail_start {
            anyhow::bail!("codec refused to start");
        }
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        let fail = {
            let mut state = self.state.lock();
            state.calls.push(EncoderCall::Stop);
            state.fail_stop
        };
        if fail {
            anyhow::bail!("stop() called immediately after start()");
        }
        if let Some(path) = &self.output_path {
            std::fs::write(path, b"ftypmp42")?;
        }
        Ok(())
    }

    async fn release(&mut self) -> anyhow::Result<()> {
        self.state.lock().calls.push(EncoderCall::Release);
        Ok(())
    }
}

#[derive(Default)]
struct CaptureState {
    events: Option<Arc<dyn CaptureEvents>>,
    requests: Vec<CaptureRequest>,
    stops: usize,
    focus_points: Vec<(f32, f32, u32, u32)>,
    auto_focus: usize,
    flash_toggles: usize,
    fail_start: bool,
}

/// Capture session driven by the test
#[derive(Clone, Default)]
pub struct FakeCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_start(&self, fail: bool) {
        self.state.lock().fail_start = fail;
    }

    pub fn requests(&self) -> Vec<CaptureRequest> {
        self.state.lock().requests.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn focus_points(&self) -> Vec<(f32, f32, u32, u32)> {
        self.state.lock().focus_points.clone()
    }

    pub fn auto_focus_calls(&self) -> usize {
        self.state.lock().auto_focus
    }

    pub fn flash_toggles(&self) -> usize {
        self.state.lock().flash_toggles
    }

    fn events(&self) -> Option<Arc<dyn CaptureEvents>> {
        self.state.lock().events.clone()
    }

    /// Report the session as running
    pub fn session_started(&self, resolution: Resolution, flash_available: bool) {
        if let Some(events) = self.events() {
            events.on_session_started(resolution, flash_available);
        }
    }

    pub fn deliver_frame(&self, timestamp_ns: i64) {
        if let Some(events) = self.events() {
            events.on_frame_available(timestamp_ns);
        }
    }

    pub fn session_error(&self, message: &str) {
        if let Some(events) = self.events() {
            events.on_session_error(anyhow::anyhow!(message.to_string()));
        }
    }
}

impl CaptureSession for FakeCapture {
    fn start(&self, request: CaptureRequest, events: Arc<dyn CaptureEvents>) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_start {
            anyhow::bail!("camera in use");
        }
        state.requests.push(request);
        state.events = Some(events);
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.stops += 1;
        state.events = None;
    }

    fn change_manual_focus_point(&self, x: f32, y: f32, view_width: u32, view_height: u32) {
        self.state.lock().focus_points.push((x, y, view_width, view_height));
    }

    fn change_auto_focus(&self) {
        self.state.lock().auto_focus += 1;
    }

    fn switch_flash_mode(&self) {
        self.state.lock().flash_toggles += 1;
    }
}

/// Listener that remembers every callback
#[derive(Default)]
pub struct RecordingListener {
    flash: Mutex<Vec<bool>>,
    completed: Mutex<usize>,
    errors: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn flash_reports(&self) -> Vec<bool> {
        self.flash.lock().clone()
    }

    pub fn completed(&self) -> usize {
        *self.completed.lock()
    }

    /// Error codes in the order they were reported
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl RecordListener for RecordingListener {
    fn on_flash_support_detected(&self, supported: bool) {
        self.flash.lock().push(supported);
    }

    fn on_record_complete(&self) {
        *self.completed.lock() += 1;
    }

    fn on_error(&self, error: &RecorderError) {
        self.errors.lock().push(error.code().to_string());
    }
}
