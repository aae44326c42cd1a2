//! GPU context boundary
//!
//! The GPU API itself (GL, Vulkan, Metal...) is a platform collaborator.
//! The render engine moves one `GpuContext` onto its own thread and is the
//! only caller, so implementations never see concurrent calls.

use super::transform::Mat4;
use crate::capture::Resolution;
use crate::surface::NativeSurface;

/// Texture handle issued by the GPU context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Render target handle (window surface, encoder surface or offscreen buffer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

/// Compiled shader program handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u64);

/// Named scalar uniform passed to a draw call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniform {
    pub name: &'static str,
    pub value: f32,
}

/// A bound destination: target handle plus viewport size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub id: TargetId,
    pub size: Resolution,
}

/// The GPU black box, owned by the render thread
pub trait GpuContext: Send {
    /// Create the external texture the camera writes into, plus the surface
    /// handle given to the capture session
    fn create_external_texture(&mut self) -> anyhow::Result<(TextureId, NativeSurface)>;

    /// Latch the most recent camera frame into the external texture
    fn update_external_texture(&mut self, texture: TextureId) -> anyhow::Result<()>;

    /// Wrap a window or encoder surface as a render target
    fn create_surface_target(&mut self, surface: NativeSurface, size: Resolution) -> anyhow::Result<TargetId>;

    /// Allocate an offscreen target whose color attachment can be sampled
    fn create_offscreen_target(&mut self, size: Resolution) -> anyhow::Result<(TargetId, TextureId)>;

    /// Make `target` current and set the viewport
    fn bind_target(&mut self, target: TargetId, size: Resolution) -> anyhow::Result<()>;

    fn compile_program(&mut self, vertex_source: &str, fragment_source: &str) -> anyhow::Result<ProgramId>;

    /// Draw a full-screen quad sampling `input` into the bound target
    fn draw(&mut self, program: ProgramId, input: TextureId, mvp: &Mat4, uniforms: &[Uniform]) -> anyhow::Result<()>;

    /// Swap/publish the target with the frame's presentation time
    fn present(&mut self, target: TargetId, timestamp_ns: i64) -> anyhow::Result<()>;

    fn delete_program(&mut self, program: ProgramId);

    fn release_target(&mut self, target: TargetId);

    fn release_texture(&mut self, texture: TextureId);
}
