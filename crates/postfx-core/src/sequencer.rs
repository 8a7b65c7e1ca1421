//! Per-frame pass ordering.
//!
//! Pass `i` samples the output of pass `i - 1` (the input frame for pass 0)
//! and renders into its own offscreen target, except the last pass, which
//! renders into the backbuffer at viewport size with display rotation.
//! History rotation happens only once the final pass has been submitted.

use postfx_config::ScaleDesc;

use crate::backend::{
    BufferId, DrawCall, GpuBackend, ProgramId, Rect, RenderDest, TexelFormat, TextureBinding,
};
use crate::binder::{BindingTable, FrameParams, TextureState};
use crate::error::ChainError;
use crate::geometry::{self, GeometryCache};
use crate::history::PREV_TEXTURES;
use crate::pool::TexturePool;
use crate::scale;

/// Final on-screen destination.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub full_width: u32,
    pub full_height: u32,
}

impl Viewport {
    /// Viewport covering a whole `width` x `height` backbuffer.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            full_width: width,
            full_height: height,
        }
    }

    fn rect(&self) -> Rect {
        Rect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// A pass ready to draw: program, resolved bindings and GPU buffers.
#[derive(Debug)]
pub struct CompiledPass {
    pub(crate) label: String,
    pub(crate) program: ProgramId,
    pub(crate) table: BindingTable,
    pub(crate) geometry: GeometryCache,
    pub(crate) scale: (ScaleDesc, ScaleDesc),
    pub(crate) format: TexelFormat,
    pub(crate) vertex_buffer: BufferId,
    pub(crate) uniform_buffer: BufferId,
    pub(crate) uniforms: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    RenderingPass(usize),
    RenderingFinalPass,
    Presented,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Every pass ran and the frame was submitted.
    Presented,
    /// No new input; nothing was drawn and the previous output stays.
    Repeated,
    /// A pass failed; nothing reached the backbuffer.
    Aborted { pass: usize, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub passes_drawn: usize,
    pub outcome: FrameOutcome,
}

impl FrameReport {
    pub fn repeated() -> Self {
        Self {
            passes_drawn: 0,
            outcome: FrameOutcome::Repeated,
        }
    }

    pub fn is_presented(&self) -> bool {
        self.outcome == FrameOutcome::Presented
    }
}

/// Inputs shared by every pass of one frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameInputs<'a> {
    pub viewport: Viewport,
    pub rotation: u32,
    pub frame_count: u64,
    pub frame_direction: i32,
    pub tracked: &'a [f32],
}

/// Runs the passes of one frame in order.
#[derive(Debug)]
pub struct PassSequencer {
    state: SequencerState,
    history: Vec<TextureState>,
    outputs: Vec<TextureState>,
    bindings: Vec<TextureBinding>,
}

impl Default for PassSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl PassSequencer {
    pub fn new() -> Self {
        Self {
            state: SequencerState::Idle,
            history: Vec::with_capacity(PREV_TEXTURES),
            outputs: Vec::new(),
            bindings: Vec::new(),
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Draw every pass for the frame currently in the pool's write slot.
    ///
    /// On success the frame is submitted and history advanced. On failure
    /// the frame is dropped before reaching the backbuffer; in both cases
    /// the stock program is left as the resting program.
    pub fn run<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        pool: &mut TexturePool,
        passes: &mut [CompiledPass],
        stock: ProgramId,
        inputs: &FrameInputs<'_>,
    ) -> FrameReport {
        debug_assert_eq!(self.state, SequencerState::Idle);
        let mut drawn = 0;
        let result = match backend.begin_frame() {
            Ok(()) => self.draw_passes(backend, pool, passes, inputs, &mut drawn),
            Err(err) => Err((0, err)),
        };

        let outcome = match result.and_then(|()| {
            backend
                .end_frame()
                .map_err(|err| (passes.len().saturating_sub(1), err))
        }) {
            Ok(()) => {
                self.state = SequencerState::Presented;
                let slot = pool.advance_history();
                log::trace!("frame presented: passes={} history_slot={}", drawn, slot);
                FrameOutcome::Presented
            }
            Err((pass, err)) => {
                backend.abort_frame();
                debug_assert!(
                    !matches!(err, ChainError::Logic(_)),
                    "render chain invariant violated: {}",
                    err
                );
                log::warn!(
                    "frame aborted: pass={} drawn={} recoverable={} error={}",
                    pass,
                    drawn,
                    err.is_recoverable(),
                    err
                );
                FrameOutcome::Aborted {
                    pass,
                    reason: err.to_string(),
                }
            }
        };

        backend.bind_resting_program(stock);
        self.state = SequencerState::Idle;
        FrameReport {
            passes_drawn: drawn,
            outcome,
        }
    }

    fn draw_passes<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        pool: &mut TexturePool,
        passes: &mut [CompiledPass],
        inputs: &FrameInputs<'_>,
        drawn: &mut usize,
    ) -> std::result::Result<(), (usize, ChainError)> {
        let viewport = inputs.viewport;
        if viewport.width == 0 || viewport.height == 0 {
            return Err((0, ChainError::Config("viewport has no area".into())));
        }

        let ring = pool.history();
        let texel = ring.texel_size();
        let current = ring.current();
        let orig = TextureState {
            texture: current.texture,
            video_size: (current.width, current.height),
            texture_size: texel,
        };
        self.history.clear();
        self.history.extend((0..PREV_TEXTURES).filter_map(|n| {
            ring.back(n).map(|slot| TextureState {
                texture: slot.texture,
                video_size: (slot.width, slot.height),
                texture_size: texel,
            })
        }));
        self.outputs.clear();

        let mut source = orig;
        let last = passes.len().saturating_sub(1);
        for (index, pass) in passes.iter_mut().enumerate() {
            let fail = |err: ChainError| (index, err);
            let is_final = index == last;
            self.state = if is_final {
                SequencerState::RenderingFinalPass
            } else {
                SequencerState::RenderingPass(index)
            };

            let (output, dest, rect, mvp, clear, target_texel) = if is_final {
                let size = (viewport.width, viewport.height);
                (
                    size,
                    RenderDest::Backbuffer,
                    viewport.rect(),
                    geometry::mvp(size.0, size.1, inputs.rotation),
                    false,
                    size,
                )
            } else {
                let size = scale::resolve(
                    pass.scale,
                    source.video_size,
                    (viewport.width, viewport.height),
                )
                .map_err(fail)?;
                let (target, status) = pool
                    .ensure_render_target(backend, index, size, pass.format)
                    .map_err(fail)?;
                (
                    size,
                    RenderDest::Target(target.texture),
                    Rect {
                        x: 0,
                        y: 0,
                        width: size.0,
                        height: size.1,
                    },
                    geometry::mvp(size.0, size.1, 0),
                    status.is_fresh(),
                    target.texel,
                )
            };

            if pass
                .geometry
                .update(source.video_size, source.texture_size, output)
            {
                let vertices = bytemuck::cast_slice(pass.geometry.vertices());
                if let Err(err) = backend.write_buffer(pass.vertex_buffer, vertices) {
                    // The buffer still holds the old quad.
                    pass.geometry.invalidate();
                    return Err(fail(err));
                }
            }

            let params = FrameParams {
                mvp,
                source,
                output_size: output,
                frame_count: inputs.frame_count,
                frame_direction: inputs.frame_direction,
                orig,
                history: &self.history,
                pass_outputs: &self.outputs,
                tracked: inputs.tracked,
                fallback: pool.fallback(),
            };
            pass.table.write(&params, &mut pass.uniforms);
            pass.table.texture_bindings(&params, &mut self.bindings);
            backend
                .write_buffer(pass.uniform_buffer, &pass.uniforms)
                .map_err(fail)?;

            backend
                .draw(&DrawCall {
                    pass_index: index,
                    program: pass.program,
                    dest,
                    viewport: rect,
                    clear,
                    vertex_buffer: pass.vertex_buffer,
                    uniform_buffer: pass.uniform_buffer,
                    textures: &self.bindings,
                })
                .map_err(fail)?;
            *drawn += 1;

            if let RenderDest::Target(texture) = dest {
                let produced = TextureState {
                    texture,
                    video_size: output,
                    texture_size: target_texel,
                };
                self.outputs.push(produced);
                source = produced;
            }
        }
        Ok(())
    }
}
