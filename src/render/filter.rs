//! Filter chain
//!
//! A filter is an opaque compositing program plus its parameters. The chain
//! runs its stages in order: the first stage samples the camera texture with
//! the destination transform, every later stage samples the previous
//! stage's offscreen output, and the last stage draws into the destination.

use super::gpu::{GpuContext, ProgramId, RenderTarget, TargetId, TextureId, Uniform};
use super::transform::{Mat4, IDENTITY};
use crate::capture::Resolution;
use std::collections::HashMap;
use std::fmt;

/// Contract a filter must satisfy to be composable in the chain.
///
/// All methods run on the render thread.
pub trait GpuFilter: Send {
    fn name(&self) -> &str;

    /// Allocate GPU resources (compile programs, load lookup textures)
    fn setup(&mut self, gpu: &mut dyn GpuContext) -> anyhow::Result<()>;

    /// Draw `input` into the currently bound target
    fn draw(&mut self, gpu: &mut dyn GpuContext, input: TextureId, mvp: &Mat4) -> anyhow::Result<()>;

    /// Free everything allocated in `setup`
    fn release(&mut self, gpu: &mut dyn GpuContext);
}

const PASSTHROUGH_VERTEX: &str = "\
uniform mat4 uMVPMatrix;
attribute vec4 aPosition;
attribute vec4 aTextureCoord;
varying vec2 vTextureCoord;
void main() {
    gl_Position = uMVPMatrix * aPosition;
    vTextureCoord = aTextureCoord.xy;
}
";

const PASSTHROUGH_FRAGMENT: &str = "\
precision mediump float;
varying vec2 vTextureCoord;
uniform sampler2D sTexture;
void main() {
    gl_FragColor = texture2D(sTexture, vTextureCoord);
}
";

/// Filter made of a single shader program and a fixed parameter set
pub struct ShaderFilter {
    name: String,
    vertex_source: String,
    fragment_source: String,
    uniforms: Vec<Uniform>,
    program: Option<ProgramId>,
}

impl ShaderFilter {
    pub fn new(
        name: impl Into<String>,
        vertex_source: impl Into<String>,
        fragment_source: impl Into<String>,
        uniforms: Vec<Uniform>,
    ) -> Self {
        Self {
            name: name.into(),
            vertex_source: vertex_source.into(),
            fragment_source: fragment_source.into(),
            uniforms,
            program: None,
        }
    }

    /// Copies the input unchanged
    pub fn passthrough() -> Self {
        Self::new("passthrough", PASSTHROUGH_VERTEX, PASSTHROUGH_FRAGMENT, Vec::new())
    }

    /// Passthrough vertex stage with a custom fragment program
    pub fn fragment(name: impl Into<String>, fragment_source: impl Into<String>, uniforms: Vec<Uniform>) -> Self {
        Self::new(name, PASSTHROUGH_VERTEX, fragment_source, uniforms)
    }
}

impl GpuFilter for ShaderFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, gpu: &mut dyn GpuContext) -> anyhow::Result<()> {
        if self.program.is_none() {
            self.program = Some(gpu.compile_program(&self.vertex_source, &self.fragment_source)?);
        }
        Ok(())
    }

    fn draw(&mut self, gpu: &mut dyn GpuContext, input: TextureId, mvp: &Mat4) -> anyhow::Result<()> {
        let program = self
            .program
            .ok_or_else(|| anyhow::anyhow!("filter '{}' drawn before setup", self.name))?;
        gpu.draw(program, input, mvp, &self.uniforms)
    }

    fn release(&mut self, gpu: &mut dyn GpuContext) {
        if let Some(program) = self.program.take() {
            gpu.delete_program(program);
        }
    }
}

/// Ordered, swappable sequence of filter stages
pub struct FilterChain {
    stages: Vec<Box<dyn GpuFilter>>,
    intermediates: HashMap<Resolution, Vec<(TargetId, TextureId)>>,
    ready: bool,
}

impl FilterChain {
    pub fn new(stages: Vec<Box<dyn GpuFilter>>) -> Self {
        Self {
            stages,
            intermediates: HashMap::new(),
            ready: false,
        }
    }

    /// Chain with one stage
    pub fn single(filter: impl GpuFilter + 'static) -> Self {
        Self::new(vec![Box::new(filter)])
    }

    /// Chain that copies the camera frame unchanged
    pub fn passthrough() -> Self {
        Self::single(ShaderFilter::passthrough())
    }

    /// Append a stage (only before the chain is handed to the engine)
    pub fn push(&mut self, filter: impl GpuFilter + 'static) {
        self.stages.push(Box::new(filter));
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in draw order
    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Set up every stage. An empty chain becomes a passthrough chain.
    ///
    /// On failure the stages already set up are released again.
    pub fn setup(&mut self, gpu: &mut dyn GpuContext) -> anyhow::Result<()> {
        if self.ready {
            return Ok(());
        }
        if self.stages.is_empty() {
            self.stages.push(Box::new(ShaderFilter::passthrough()));
        }

        for index in 0..self.stages.len() {
            if let Err(e) = self.stages[index].setup(gpu) {
                for stage in self.stages[..index].iter_mut() {
                    stage.release(gpu);
                }
                return Err(e.context(format!("setting up filter '{}'", self.stages[index].name())));
            }
        }

        self.ready = true;
        Ok(())
    }

    /// Composite `input` through every stage into `target`
    pub fn apply(
        &mut self,
        gpu: &mut dyn GpuContext,
        input: TextureId,
        target: RenderTarget,
        mvp: &Mat4,
    ) -> anyhow::Result<()> {
        if !self.ready {
            anyhow::bail!("filter chain applied before setup");
        }

        let intermediates = self.intermediates_for(gpu, target.size)?;
        let last = self.stages.len() - 1;
        let mut source = input;

        for (index, stage) in self.stages.iter_mut().enumerate() {
            let stage_mvp = if index == 0 { mvp } else { &IDENTITY };
            if index == last {
                gpu.bind_target(target.id, target.size)?;
                stage.draw(gpu, source, stage_mvp)?;
            } else {
                let (offscreen, texture) = intermediates[index];
                gpu.bind_target(offscreen, target.size)?;
                stage.draw(gpu, source, stage_mvp)?;
                source = texture;
            }
        }

        Ok(())
    }

    fn intermediates_for(
        &mut self,
        gpu: &mut dyn GpuContext,
        size: Resolution,
    ) -> anyhow::Result<Vec<(TargetId, TextureId)>> {
        let needed = self.stages.len().saturating_sub(1);
        let buffers = self.intermediates.entry(size).or_default();
        while buffers.len() < needed {
            buffers.push(gpu.create_offscreen_target(size)?);
        }
        Ok(buffers.clone())
    }

    /// Release every stage and cached offscreen buffer
    pub fn release(&mut self, gpu: &mut dyn GpuContext) {
        for stage in self.stages.iter_mut() {
            stage.release(gpu);
        }
        for (_, buffers) in self.intermediates.drain() {
            for (target, texture) in buffers {
                gpu.release_target(target);
                gpu.release_texture(texture);
            }
        }
        self.ready = false;
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::passthrough()
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("stages", &self.names())
            .field("ready", &self.ready)
            .finish()
    }
}
