//! Top-level render chain.

use std::borrow::Cow;
use std::fmt;

use postfx_config::{ChainSettings, PassDesc, ScaleDesc, ShaderPreset, ShaderRef};

use crate::backend::{BufferId, BufferKind, GpuBackend, ProgramId, SamplerKey, TexelFormat};
use crate::binder::{BindContext, BindingTable};
use crate::convert::PixelFormat;
use crate::error::{ChainError, Result};
use crate::geometry::{GeometryCache, QUAD_BYTES};
use crate::pool::TexturePool;
use crate::reflect::ProgramReflection;
use crate::scale;
use crate::sequencer::{CompiledPass, FrameInputs, FrameReport, PassSequencer, Viewport};
use crate::tracker::{StateTracker, TrackedValue};

/// Playback direction reported to pass programs as `frame_direction`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameDirection {
    #[default]
    Forward,
    Rewind,
}

impl FrameDirection {
    fn sign(self) -> i32 {
        match self {
            FrameDirection::Forward => 1,
            FrameDirection::Rewind => -1,
        }
    }
}

/// Chain construction failure. Hands the backend back so the caller can
/// retry with [`RenderChain::passthrough`].
pub struct BuildError<B> {
    pub error: ChainError,
    pub backend: B,
}

impl<B> BuildError<B> {
    pub fn into_parts(self) -> (ChainError, B) {
        (self.error, self.backend)
    }
}

impl<B> fmt::Debug for BuildError<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildError").field("error", &self.error).finish()
    }
}

impl<B> fmt::Display for BuildError<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to build render chain: {}", self.error)
    }
}

impl<B> std::error::Error for BuildError<B> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Resources created while building, released again if building fails.
#[derive(Default)]
struct Partial {
    programs: Vec<ProgramId>,
    buffers: Vec<BufferId>,
    pool: Option<TexturePool>,
}

impl Partial {
    fn release<B: GpuBackend>(mut self, backend: &mut B) {
        for program in self.programs.drain(..) {
            backend.release_program(program);
        }
        for buffer in self.buffers.drain(..) {
            backend.release_buffer(buffer);
        }
        if let Some(mut pool) = self.pool.take() {
            pool.release_all(backend);
        }
    }
}

fn shader_source(desc: &PassDesc) -> Result<(String, Cow<'static, str>)> {
    match &desc.shader {
        ShaderRef::File(path) => {
            let source = std::fs::read_to_string(path).map_err(|e| {
                ChainError::Config(format!("cannot read shader {}: {}", path.display(), e))
            })?;
            Ok((path.display().to_string(), Cow::Owned(source)))
        }
        ShaderRef::Builtin { builtin } => postfx_shaders::builtin(builtin)
            .map(|src| (format!("builtin:{}", builtin), Cow::Borrowed(src)))
            .ok_or_else(|| ChainError::Config(format!("unknown builtin shader `{}`", builtin))),
        ShaderRef::Inline { inline } => Ok(("inline".to_string(), Cow::Owned(inline.clone()))),
    }
}

/// Multi-pass post-processing chain over a [`GpuBackend`].
pub struct RenderChain<B: GpuBackend> {
    backend: B,
    settings: ChainSettings,
    descs: Vec<PassDesc>,
    passes: Vec<CompiledPass>,
    programs: Vec<ProgramId>,
    stock: ProgramId,
    pool: TexturePool,
    sequencer: PassSequencer,
    viewport: Viewport,
    rotation: u32,
    direction: FrameDirection,
    frame_count: u64,
    frame_pending: bool,
    variable_ids: Vec<String>,
    tracker: Option<Box<dyn StateTracker>>,
    tracked_values: Vec<TrackedValue>,
    tracked: Vec<f32>,
    last_report: Option<FrameReport>,
}

impl<B: GpuBackend> RenderChain<B> {
    /// Compile every pass, load LUTs and allocate the history ring.
    pub fn new(
        mut backend: B,
        preset: &ShaderPreset,
        settings: &ChainSettings,
    ) -> std::result::Result<Self, BuildError<B>> {
        let mut partial = Partial::default();
        match Self::build(&mut backend, preset, settings, &mut partial) {
            Ok((stock, passes)) => {
                let pool = match partial.pool.take() {
                    Some(pool) => pool,
                    None => {
                        partial.release(&mut backend);
                        return Err(BuildError {
                            error: ChainError::Logic("texture pool missing after build".into()),
                            backend,
                        });
                    }
                };
                backend.bind_resting_program(stock);
                log::info!(
                    "render chain built: passes={} luts={} variables={}",
                    passes.len(),
                    pool.luts().len(),
                    preset.variables.len()
                );
                Ok(Self {
                    backend,
                    settings: settings.clone(),
                    descs: preset.passes.clone(),
                    passes,
                    programs: std::mem::take(&mut partial.programs),
                    stock,
                    pool,
                    sequencer: PassSequencer::new(),
                    viewport: Viewport::default(),
                    rotation: 0,
                    direction: FrameDirection::Forward,
                    frame_count: 0,
                    frame_pending: false,
                    variable_ids: preset.variables.iter().map(|v| v.id.clone()).collect(),
                    tracker: None,
                    tracked_values: Vec::new(),
                    tracked: vec![0.0; preset.variables.len()],
                    last_report: None,
                })
            }
            Err(error) => {
                log::error!("render chain build failed: error={}", error);
                partial.release(&mut backend);
                Err(BuildError { error, backend })
            }
        }
    }

    /// One stock pass straight to the viewport; the fallback when a preset
    /// cannot be built.
    pub fn passthrough(
        backend: B,
        settings: &ChainSettings,
    ) -> std::result::Result<Self, BuildError<B>> {
        let preset = ShaderPreset::single(ShaderRef::Builtin {
            builtin: "stock".into(),
        });
        Self::new(backend, &preset, settings)
    }

    fn build(
        backend: &mut B,
        preset: &ShaderPreset,
        settings: &ChainSettings,
        partial: &mut Partial,
    ) -> Result<(ProgramId, Vec<CompiledPass>)> {
        preset.validate()?;
        let count = preset.passes.len();
        if count > settings.max_passes {
            return Err(ChainError::Config(format!(
                "preset has {} passes, limit is {}",
                count, settings.max_passes
            )));
        }

        let stock_reflection = ProgramReflection::from_wgsl("stock", postfx_shaders::STOCK_WGSL)?;
        let stock = backend.create_program("stock", postfx_shaders::STOCK_WGSL, &stock_reflection)?;
        partial.programs.push(stock);

        let mut compiled = Vec::with_capacity(count);
        for (index, desc) in preset.passes.iter().enumerate() {
            let is_final = index + 1 == count;
            let (label, source) = shader_source(desc)?;
            let reflection = ProgramReflection::from_wgsl(&label, &source)?;
            let program = backend.create_program(&label, &source, &reflection)?;
            partial.programs.push(program);

            let scale = desc.scale_rules(is_final);
            scale::validate(scale.0)?;
            scale::validate(scale.1)?;
            let viewport = ScaleDesc::Viewport { factor: 1.0 };
            if is_final && scale != (viewport, viewport) {
                log::warn!(
                    "final pass renders at viewport size, ignoring scale: index={} scale_x={:?} scale_y={:?}",
                    index,
                    scale.0,
                    scale.1
                );
            }
            let format = if desc.float_framebuffer {
                TexelFormat::Rgba16Float
            } else {
                TexelFormat::Rgba8
            };
            let sampler = SamplerKey::resolve(desc.filter, desc.wrap, settings.smooth);
            log::info!(
                "render pass info: index={} shader={} scale_x={:?} scale_y={:?} filter={} wrap={:?} format={:?} frame_count_mod={}",
                index,
                label,
                scale.0,
                scale.1,
                if sampler.linear { "linear" } else { "nearest" },
                desc.wrap,
                if is_final { None } else { Some(format) },
                desc.frame_count_mod
            );

            compiled.push((label, program, reflection, scale, format, sampler, desc.frame_count_mod));
        }

        let pool = partial.pool.insert(TexturePool::new(
            backend,
            count.saturating_sub(1),
            (settings.max_input_width, settings.max_input_height),
            settings.pow2_targets,
        )?);
        for lut in &preset.luts {
            pool.load_lut(backend, lut)?;
        }
        let pool = &*pool;

        let variable_ids: Vec<String> = preset.variables.iter().map(|v| v.id.clone()).collect();
        let ctx = BindContext {
            luts: pool.luts(),
            variable_ids: &variable_ids,
            smooth: settings.smooth,
        };

        let mut passes = Vec::with_capacity(count);
        for (index, (label, program, reflection, scale, format, sampler, frame_count_mod)) in
            compiled.into_iter().enumerate()
        {
            let table = BindingTable::new(&reflection, index, frame_count_mod, sampler, &ctx);
            let vertex_buffer =
                backend.create_buffer(&format!("pass{}-vertices", index), BufferKind::Vertex, QUAD_BYTES)?;
            partial.buffers.push(vertex_buffer);
            let uniform_buffer = backend.create_buffer(
                &format!("pass{}-uniforms", index),
                BufferKind::Uniform,
                table.uniform_size() as u64,
            )?;
            partial.buffers.push(uniform_buffer);

            passes.push(CompiledPass {
                label,
                program,
                uniforms: vec![0; table.uniform_size()],
                table,
                geometry: GeometryCache::new(settings.texel_alignment),
                scale,
                format,
                vertex_buffer,
                uniform_buffer,
            });
        }
        Ok((stock, passes))
    }

    /// Upload the next input frame. At most one frame is rendered per
    /// [`render`](Self::render); a second submit replaces the first.
    pub fn submit_frame(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
        format: PixelFormat,
    ) -> Result<()> {
        self.pool
            .write_input_frame(&mut self.backend, pixels, width, height, pitch, format)?;
        self.frame_pending = true;
        Ok(())
    }

    pub fn set_viewport(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        full_width: u32,
        full_height: u32,
    ) {
        self.viewport = Viewport {
            x,
            y,
            width,
            height,
            full_width,
            full_height,
        };
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Display rotation in counter-clockwise quarter turns.
    pub fn set_rotation(&mut self, quarter_turns: u32) {
        self.rotation = quarter_turns % 4;
    }

    pub fn set_frame_direction(&mut self, direction: FrameDirection) {
        self.direction = direction;
    }

    pub fn set_state_tracker(&mut self, tracker: Box<dyn StateTracker>) {
        self.tracker = Some(tracker);
    }

    fn refresh_tracked(&mut self) {
        let Some(tracker) = self.tracker.as_mut() else {
            return;
        };
        tracker.refresh(self.frame_count, &mut self.tracked_values);
        for value in &self.tracked_values {
            if let Some(index) = self.variable_ids.iter().position(|id| *id == value.id) {
                self.tracked[index] = value.value;
            }
        }
    }

    /// Run the chain for the submitted frame. Returns `false` when the frame
    /// was aborted; the chain stays usable and the same input is retried on
    /// the next call unless a new frame is submitted.
    pub fn render(&mut self) -> bool {
        if !self.frame_pending {
            self.last_report = Some(FrameReport::repeated());
            return true;
        }

        self.refresh_tracked();
        let inputs = FrameInputs {
            viewport: self.viewport,
            rotation: self.rotation,
            frame_count: self.frame_count,
            frame_direction: self.direction.sign(),
            tracked: &self.tracked,
        };
        let report = self.sequencer.run(
            &mut self.backend,
            &mut self.pool,
            &mut self.passes,
            self.stock,
            &inputs,
        );

        let presented = report.is_presented();
        if presented {
            self.frame_pending = false;
            self.frame_count += 1;
        }
        self.last_report = Some(report);
        presented
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn passes(&self) -> &[PassDesc] {
        &self.descs
    }

    pub fn pass_labels(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().map(|p| p.label.as_str())
    }

    pub fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    pub fn last_report(&self) -> Option<&FrameReport> {
        self.last_report.as_ref()
    }

    pub fn pool(&self) -> &TexturePool {
        &self.pool
    }

    pub fn stock_program(&self) -> ProgramId {
        self.stock
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: GpuBackend> Drop for RenderChain<B> {
    fn drop(&mut self) {
        for pass in &self.passes {
            self.backend.release_buffer(pass.vertex_buffer);
            self.backend.release_buffer(pass.uniform_buffer);
        }
        for program in &self.programs {
            self.backend.release_program(*program);
        }
        self.pool.release_all(&mut self.backend);
    }
}
