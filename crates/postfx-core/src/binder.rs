//! Per-pass parameter binding.
//!
//! A [`BindingTable`] is built once per pass from its program reflection:
//! every recognised uniform member and texture is resolved to a value source
//! up front, so filling the uniform block each frame is a flat list of
//! indexed writes.

use crate::backend::{SamplerKey, TextureBinding, TextureId};
use crate::history::PREV_TEXTURES;
use crate::pool::LutTexture;
use crate::reflect::{ProgramReflection, SizeKind, TextureRef, UniformRole};

/// A texture as seen by a pass: handle plus logical and allocated sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureState {
    pub texture: TextureId,
    pub video_size: (u32, u32),
    pub texture_size: (u32, u32),
}

/// Everything that changes per frame and per pass.
#[derive(Clone, Copy, Debug)]
pub struct FrameParams<'a> {
    pub mvp: [[f32; 4]; 4],
    pub source: TextureState,
    pub output_size: (u32, u32),
    pub frame_count: u64,
    /// +1 forward, -1 rewinding.
    pub frame_direction: i32,
    /// This frame's untouched input.
    pub orig: TextureState,
    /// Previous input frames, `history[0]` = `prev`.
    pub history: &'a [TextureState],
    /// Outputs of the passes already drawn this frame, by pass index.
    pub pass_outputs: &'a [TextureState],
    /// Tracked variable values, by variable index.
    pub tracked: &'a [f32],
    pub fallback: TextureId,
}

/// Where a bound texture comes from, resolved at build time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TextureSource {
    Source,
    Orig,
    History(usize),
    PassOutput(usize),
    Lut {
        texture: TextureId,
        size: (u32, u32),
    },
    Missing,
}

impl TextureSource {
    fn resolve(self, params: &FrameParams<'_>) -> Option<TextureState> {
        match self {
            TextureSource::Source => Some(params.source),
            TextureSource::Orig => Some(params.orig),
            TextureSource::History(n) => params.history.get(n).copied(),
            TextureSource::PassOutput(i) => params.pass_outputs.get(i).copied(),
            TextureSource::Lut { texture, size } => Some(TextureState {
                texture,
                video_size: size,
                texture_size: size,
            }),
            TextureSource::Missing => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Value {
    Mvp,
    Size(TextureSource, SizeKind),
    OutputSize,
    FrameCount,
    FrameDirection,
    Tracked(usize),
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct UniformWrite {
    offset: usize,
    value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct TextureWrite {
    binding: u32,
    sampler_binding: Option<u32>,
    source: TextureSource,
    sampler: SamplerKey,
}

/// Resolved parameter layout of one pass.
#[derive(Clone, Debug, PartialEq)]
pub struct BindingTable {
    pass_index: usize,
    frame_count_mod: u32,
    uniform_size: usize,
    uniforms: Vec<UniformWrite>,
    textures: Vec<TextureWrite>,
}

/// Pass-independent inputs to [`BindingTable::new`].
pub struct BindContext<'a> {
    pub luts: &'a [LutTexture],
    pub variable_ids: &'a [String],
    /// Chain-wide default for unspecified filters.
    pub smooth: bool,
}

fn texture_source(reference: &TextureRef, pass_index: usize, ctx: &BindContext<'_>) -> TextureSource {
    match reference {
        TextureRef::Source => TextureSource::Source,
        TextureRef::Orig => TextureSource::Orig,
        TextureRef::Prev(n) if *n < PREV_TEXTURES => TextureSource::History(*n),
        TextureRef::Prev(_) => TextureSource::Missing,
        TextureRef::Pass(n) => {
            // 1-based; only passes already drawn this frame.
            if *n >= 1 && *n - 1 < pass_index {
                TextureSource::PassOutput(*n - 1)
            } else {
                TextureSource::Missing
            }
        }
        TextureRef::PassPrev(n) => {
            if *n == 0 || *n > pass_index + 1 {
                TextureSource::Missing
            } else if *n == pass_index + 1 {
                TextureSource::Orig
            } else {
                TextureSource::PassOutput(pass_index - *n)
            }
        }
        TextureRef::Lut(id) => ctx
            .luts
            .iter()
            .find(|l| l.id == *id)
            .map(|l| TextureSource::Lut {
                texture: l.texture,
                size: l.size,
            })
            .unwrap_or(TextureSource::Missing),
    }
}

impl BindingTable {
    /// Resolve `reflection` for the pass at `pass_index`. `sampler` is the
    /// pass's own sampling state; LUTs sample with their own.
    pub fn new(
        reflection: &ProgramReflection,
        pass_index: usize,
        frame_count_mod: u32,
        sampler: SamplerKey,
        ctx: &BindContext<'_>,
    ) -> Self {
        let mut uniforms = Vec::with_capacity(reflection.fields.len());
        for field in &reflection.fields {
            let value = match &field.role {
                UniformRole::Mvp => Value::Mvp,
                UniformRole::Size(reference, kind) => {
                    Value::Size(texture_source(reference, pass_index, ctx), *kind)
                }
                UniformRole::OutputSize => Value::OutputSize,
                UniformRole::FrameCount => Value::FrameCount,
                UniformRole::FrameDirection => Value::FrameDirection,
                UniformRole::Tracked(id) => {
                    match ctx.variable_ids.iter().position(|v| v == id) {
                        Some(index) => Value::Tracked(index),
                        None => {
                            log::debug!(
                                "uniform left unbound: program={} member={}",
                                reflection.label,
                                id
                            );
                            continue;
                        }
                    }
                }
            };
            uniforms.push(UniformWrite {
                offset: field.offset as usize,
                value,
            });
        }

        let textures = reflection
            .textures
            .iter()
            .map(|slot| {
                let source = texture_source(&slot.texture, pass_index, ctx);
                let sampler = match &slot.texture {
                    TextureRef::Lut(id) => ctx
                        .luts
                        .iter()
                        .find(|l| l.id == *id)
                        .map(|l| SamplerKey::resolve(l.filter, l.wrap, ctx.smooth))
                        .unwrap_or(sampler),
                    _ => sampler,
                };
                if source == TextureSource::Missing {
                    log::warn!(
                        "texture unresolved, binding fallback: program={} pass={} name={}",
                        reflection.label,
                        pass_index,
                        slot.name
                    );
                }
                TextureWrite {
                    binding: slot.binding,
                    sampler_binding: slot.sampler_binding,
                    source,
                    sampler,
                }
            })
            .collect();

        Self {
            pass_index,
            frame_count_mod,
            uniform_size: reflection.uniform_size as usize,
            uniforms,
            textures,
        }
    }

    pub fn pass_index(&self) -> usize {
        self.pass_index
    }

    pub fn uniform_size(&self) -> usize {
        self.uniform_size
    }

    /// Frame counter as this pass sees it.
    pub fn frame_count(&self, frame_count: u64) -> u64 {
        if self.frame_count_mod == 0 {
            frame_count
        } else {
            frame_count % self.frame_count_mod as u64
        }
    }

    /// Fill the pass's uniform block. `out` must be `uniform_size()` bytes.
    pub fn write(&self, params: &FrameParams<'_>, out: &mut [u8]) {
        for write in &self.uniforms {
            let at = write.offset;
            match write.value {
                Value::Mvp => put(out, at, bytemuck::cast_slice(&params.mvp)),
                Value::Size(source, kind) => {
                    let size = source
                        .resolve(params)
                        .map(|t| match kind {
                            SizeKind::Video => t.video_size,
                            SizeKind::Texture => t.texture_size,
                        })
                        .unwrap_or((0, 0));
                    put_size(out, at, size);
                }
                Value::OutputSize => put_size(out, at, params.output_size),
                Value::FrameCount => {
                    let count = self.frame_count(params.frame_count) as f32;
                    put(out, at, bytemuck::bytes_of(&count));
                }
                Value::FrameDirection => {
                    let dir = params.frame_direction as f32;
                    put(out, at, bytemuck::bytes_of(&dir));
                }
                Value::Tracked(index) => {
                    let value = params.tracked.get(index).copied().unwrap_or(0.0);
                    put(out, at, bytemuck::bytes_of(&value));
                }
            }
        }
    }

    /// Textures and samplers for this frame, in binding order.
    pub fn texture_bindings(&self, params: &FrameParams<'_>, out: &mut Vec<TextureBinding>) {
        out.clear();
        out.extend(self.textures.iter().map(|t| TextureBinding {
            binding: t.binding,
            sampler_binding: t.sampler_binding,
            texture: t
                .source
                .resolve(params)
                .map(|s| s.texture)
                .unwrap_or(params.fallback),
            sampler: t.sampler,
        }));
    }
}

fn put(out: &mut [u8], at: usize, bytes: &[u8]) {
    if let Some(dst) = out.get_mut(at..at + bytes.len()) {
        dst.copy_from_slice(bytes);
    }
}

fn put_size(out: &mut [u8], at: usize, size: (u32, u32)) {
    put(out, at, bytemuck::cast_slice(&[size.0 as f32, size.1 as f32]));
}
