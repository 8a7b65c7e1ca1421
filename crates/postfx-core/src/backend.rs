//! GPU seam used by the render chain.
//!
//! The chain only ever talks to the GPU through [`GpuBackend`] and refers to
//! resources by opaque ids, so the same sequencing code drives a real wgpu
//! device or the recording [`HeadlessBackend`](crate::HeadlessBackend).

use postfx_config::{FilterMode, WrapMode};

use crate::error::Result;
use crate::reflect::ProgramReflection;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Texel formats the chain allocates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TexelFormat {
    /// Input frames and history slots.
    Bgra8,
    /// Fixed-point intermediate targets and LUTs.
    Rgba8,
    /// Floating-point intermediate targets.
    Rgba16Float,
}

impl TexelFormat {
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TexelFormat::Bgra8 | TexelFormat::Rgba8 => 4,
            TexelFormat::Rgba16Float => 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TexelFormat,
    /// Also usable as a colour attachment.
    pub render_target: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Uniform,
}

/// Resolved sampling state; `FilterMode::Unspecified` never reaches a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerKey {
    pub linear: bool,
    pub wrap: WrapMode,
}

impl SamplerKey {
    pub fn resolve(filter: FilterMode, wrap: WrapMode, smooth: bool) -> Self {
        let linear = match filter {
            FilterMode::Linear => true,
            FilterMode::Nearest => false,
            FilterMode::Unspecified => smooth,
        };
        Self { linear, wrap }
    }
}

/// One texture (and optional sampler) bound for a draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    pub binding: u32,
    pub sampler_binding: Option<u32>,
    pub texture: TextureId,
    pub sampler: SamplerKey,
}

/// Where a draw lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderDest {
    Target(TextureId),
    Backbuffer,
}

/// Pixel rectangle of the destination a draw is restricted to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A single full-quad draw of one pass.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall<'a> {
    pub pass_index: usize,
    pub program: ProgramId,
    pub dest: RenderDest,
    pub viewport: Rect,
    /// Clear the destination before drawing (freshly allocated targets).
    pub clear: bool,
    pub vertex_buffer: BufferId,
    pub uniform_buffer: BufferId,
    pub textures: &'a [TextureBinding],
}

/// Everything the chain needs from a GPU.
///
/// Frames are bracketed by [`begin_frame`](Self::begin_frame) and either
/// [`end_frame`](Self::end_frame) or [`abort_frame`](Self::abort_frame); no
/// draw recorded in an aborted frame may reach the backbuffer.
pub trait GpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId>;
    fn release_texture(&mut self, id: TextureId);
    /// Upload tightly packed rows into the top-left `width` x `height` region.
    fn write_texture(&mut self, id: TextureId, width: u32, height: u32, data: &[u8]) -> Result<()>;
    /// Zero the whole texture.
    fn clear_texture(&mut self, id: TextureId) -> Result<()>;

    fn create_buffer(&mut self, label: &str, kind: BufferKind, size: u64) -> Result<BufferId>;
    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<()>;
    fn release_buffer(&mut self, id: BufferId);

    /// Build a program from validated WGSL and its reflection.
    fn create_program(
        &mut self,
        label: &str,
        source: &str,
        reflection: &ProgramReflection,
    ) -> Result<ProgramId>;
    fn release_program(&mut self, id: ProgramId);

    fn begin_frame(&mut self) -> Result<()>;
    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()>;
    fn end_frame(&mut self) -> Result<()>;
    fn abort_frame(&mut self);

    /// Make `program` the resting program once the chain is done with the frame.
    fn bind_resting_program(&mut self, program: ProgramId);

    /// Largest texture edge the device accepts.
    fn max_texture_dimension(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_filter_follows_smooth() {
        let smooth = SamplerKey::resolve(FilterMode::Unspecified, WrapMode::Edge, true);
        assert!(smooth.linear);
        let sharp = SamplerKey::resolve(FilterMode::Unspecified, WrapMode::Edge, false);
        assert!(!sharp.linear);
        let forced = SamplerKey::resolve(FilterMode::Nearest, WrapMode::Repeat, true);
        assert!(!forced.linear);
        assert_eq!(forced.wrap, WrapMode::Repeat);
    }
}
