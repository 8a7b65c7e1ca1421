//! Ownership of every texture the chain uses: input history, per-pass
//! render targets, lookup textures and a fallback for unresolved bindings.

use postfx_config::{FilterMode, LutDesc, WrapMode};

use crate::backend::{GpuBackend, TexelFormat, TextureDesc, TextureId};
use crate::convert::{FrameConverter, PixelFormat};
use crate::error::{ChainError, Result};
use crate::history::{HISTORY_SLOTS, HistoryRing};

/// Intermediate render target of one pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTarget {
    pub texture: TextureId,
    /// Size the pass renders at.
    pub logical: (u32, u32),
    /// Allocated size; larger than `logical` when padded to powers of two.
    pub texel: (u32, u32),
    pub format: TexelFormat,
}

/// Outcome of [`TexturePool::ensure_render_target`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetStatus {
    Reused,
    Created,
    Resized,
}

impl TargetStatus {
    /// Whether the target holds undefined contents and must be cleared.
    pub fn is_fresh(self) -> bool {
        !matches!(self, TargetStatus::Reused)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LutTexture {
    pub id: String,
    pub texture: TextureId,
    pub size: (u32, u32),
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

pub struct TexturePool {
    history: HistoryRing,
    targets: Vec<Option<RenderTarget>>,
    luts: Vec<LutTexture>,
    fallback: TextureId,
    converter: FrameConverter,
    pow2_targets: bool,
}

impl TexturePool {
    /// Allocate the history ring at `max_input` size and the fallback texture.
    /// `target_count` is the number of passes that render offscreen.
    pub fn new<B: GpuBackend>(
        backend: &mut B,
        target_count: usize,
        max_input: (u32, u32),
        pow2_targets: bool,
    ) -> Result<Self> {
        let (max_w, max_h) = max_input;
        let limit = backend.max_texture_dimension();
        if max_w == 0 || max_h == 0 || max_w > limit || max_h > limit {
            return Err(ChainError::Config(format!(
                "maximum input size {}x{} outside 1..={}",
                max_w, max_h, limit
            )));
        }

        let mut slots = [TextureId(0); HISTORY_SLOTS];
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = backend.create_texture(&TextureDesc {
                label: format!("history{}", i),
                width: max_w,
                height: max_h,
                format: TexelFormat::Bgra8,
                render_target: false,
            })?;
        }

        let fallback = backend.create_texture(&TextureDesc {
            label: "fallback".into(),
            width: 1,
            height: 1,
            format: TexelFormat::Rgba8,
            render_target: false,
        })?;
        backend.write_texture(fallback, 1, 1, &[0, 0, 0, 0xff])?;

        Ok(Self {
            history: HistoryRing::new(slots, max_input),
            targets: vec![None; target_count],
            luts: Vec::new(),
            fallback,
            converter: FrameConverter::new(),
            pow2_targets,
        })
    }

    /// Make sure pass `index` has a target of `logical` size and `format`.
    ///
    /// The replacement is allocated before the old target is released, so an
    /// allocation failure leaves the previous target in place.
    pub fn ensure_render_target<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        index: usize,
        logical: (u32, u32),
        format: TexelFormat,
    ) -> Result<(RenderTarget, TargetStatus)> {
        let slot = self.targets.get(index).ok_or_else(|| {
            ChainError::Logic(format!("no render target slot for pass {}", index))
        })?;

        if let Some(target) = slot {
            if target.logical == logical && target.format == format {
                return Ok((*target, TargetStatus::Reused));
            }
        }

        let texel = if self.pow2_targets {
            (logical.0.next_power_of_two(), logical.1.next_power_of_two())
        } else {
            logical
        };
        let limit = backend.max_texture_dimension();
        if texel.0 > limit || texel.1 > limit {
            return Err(ChainError::Resource(format!(
                "pass {} target {}x{} exceeds device limit {}",
                index, texel.0, texel.1, limit
            )));
        }

        let texture = backend.create_texture(&TextureDesc {
            label: format!("pass{}-target", index),
            width: texel.0,
            height: texel.1,
            format,
            render_target: true,
        })?;
        let target = RenderTarget {
            texture,
            logical,
            texel,
            format,
        };

        let status = match self.targets[index].replace(target) {
            Some(old) => {
                backend.release_texture(old.texture);
                TargetStatus::Resized
            }
            None => TargetStatus::Created,
        };
        log::debug!(
            "render target: pass={} logical={}x{} texel={}x{} format={:?} status={:?}",
            index,
            logical.0,
            logical.1,
            texel.0,
            texel.1,
            format,
            status
        );
        Ok((target, status))
    }

    pub fn target(&self, index: usize) -> Option<&RenderTarget> {
        self.targets.get(index).and_then(|t| t.as_ref())
    }

    /// Convert and upload a raw frame into the current history slot,
    /// clearing the slot first when its previous contents had another size.
    pub fn write_input_frame<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        pixels: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
        format: PixelFormat,
    ) -> Result<()> {
        let (max_w, max_h) = self.history.texel_size();
        if width == 0 || height == 0 || width > max_w || height > max_h {
            return Err(ChainError::Config(format!(
                "frame {}x{} outside the {}x{} input limit",
                width, height, max_w, max_h
            )));
        }

        let bgra = self.converter.convert(pixels, width, height, pitch, format)?;
        let slot = self.history.current_mut();
        if slot.width != width || slot.height != height {
            backend.clear_texture(slot.texture)?;
        }
        backend.write_texture(slot.texture, width, height, bgra)?;
        slot.width = width;
        slot.height = height;
        Ok(())
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Commit the current input frame to history.
    pub fn advance_history(&mut self) -> usize {
        self.history.advance()
    }

    /// Load a LUT image from disk as RGBA8.
    pub fn load_lut<B: GpuBackend>(&mut self, backend: &mut B, desc: &LutDesc) -> Result<()> {
        let rgba = image::open(&desc.path)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        self.insert_lut(backend, desc, width, height, rgba.as_raw())?;
        log::info!(
            "lut loaded: id={} path={} size={}x{} filter={:?} wrap={:?}",
            desc.id,
            desc.path.display(),
            width,
            height,
            desc.filter,
            desc.wrap
        );
        Ok(())
    }

    /// Register already decoded RGBA8 pixels under the LUT's id.
    pub fn insert_lut<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        desc: &LutDesc,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<()> {
        if self.lut(&desc.id).is_some() {
            return Err(ChainError::Config(format!("lut `{}` loaded twice", desc.id)));
        }
        let limit = backend.max_texture_dimension();
        if width == 0 || height == 0 || width > limit || height > limit {
            return Err(ChainError::Resource(format!(
                "lut `{}` size {}x{} unsupported (limit {})",
                desc.id, width, height, limit
            )));
        }
        let texture = backend.create_texture(&TextureDesc {
            label: format!("lut:{}", desc.id),
            width,
            height,
            format: TexelFormat::Rgba8,
            render_target: false,
        })?;
        if let Err(err) = backend.write_texture(texture, width, height, rgba) {
            backend.release_texture(texture);
            return Err(err);
        }
        self.luts.push(LutTexture {
            id: desc.id.clone(),
            texture,
            size: (width, height),
            filter: desc.filter,
            wrap: desc.wrap,
        });
        Ok(())
    }

    pub fn lut(&self, id: &str) -> Option<&LutTexture> {
        self.luts.iter().find(|l| l.id == id)
    }

    pub fn luts(&self) -> &[LutTexture] {
        &self.luts
    }

    /// Opaque black 1x1 texture bound for references that resolve to nothing.
    pub fn fallback(&self) -> TextureId {
        self.fallback
    }

    /// Release every texture back to the backend.
    pub fn release_all<B: GpuBackend>(&mut self, backend: &mut B) {
        for slot in self.history.slots() {
            backend.release_texture(slot.texture);
        }
        for target in self.targets.iter_mut().filter_map(Option::take) {
            backend.release_texture(target.texture);
        }
        for lut in self.luts.drain(..) {
            backend.release_texture(lut.texture);
        }
        backend.release_texture(self.fallback);
    }
}
