//! Render engine module
//!
//! GPU compositing of camera frames onto the preview and encoder surfaces.

pub mod engine;
pub mod filter;
pub mod gpu;
pub mod transform;

pub use engine::{FrameSignal, RenderEngine, RenderOptions, RenderSettings, RenderStats};
pub use filter::{FilterChain, GpuFilter, ShaderFilter};
pub use gpu::{GpuContext, ProgramId, RenderTarget, TargetId, TextureId, Uniform};
pub use transform::{Mat4, Orientation};
