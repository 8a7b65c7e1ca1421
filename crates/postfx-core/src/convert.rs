//! Raw frame conversion into the BGRA8 layout of the history textures.

use crate::error::{ChainError, Result};

/// Pixel layouts a host can submit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit little-endian `0x00RRGGBB`.
    Xrgb8888,
    /// 16-bit little-endian `RRRRRGGG GGGBBBBB`.
    Rgb565,
    /// 16-bit little-endian `xRRRRRGG GGGBBBBB`.
    Xrgb1555,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Xrgb8888 => 4,
            PixelFormat::Rgb565 | PixelFormat::Xrgb1555 => 2,
        }
    }
}

#[inline]
fn expand5(c: u16) -> u8 {
    ((c << 3) | (c >> 2)) as u8
}

#[inline]
fn expand6(c: u16) -> u8 {
    ((c << 2) | (c >> 4)) as u8
}

/// Widen a 1555 pixel to 565 so both 16-bit formats share one expansion.
#[inline]
fn widen_1555(p: u16) -> u16 {
    let r = (p >> 10) & 0x1f;
    let g = (p >> 5) & 0x1f;
    let b = p & 0x1f;
    (r << 11) | (((g << 1) | (g >> 4)) << 5) | b
}

#[inline]
fn rgb565_to_bgra(p: u16) -> [u8; 4] {
    let r = (p >> 11) & 0x1f;
    let g = (p >> 5) & 0x3f;
    let b = p & 0x1f;
    [expand5(b), expand6(g), expand5(r), 0xff]
}

/// Reusable staging buffer for tightly packed BGRA8 rows.
#[derive(Debug, Default)]
pub struct FrameConverter {
    staging: Vec<u8>,
}

impl FrameConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert `height` rows of `width` pixels, `pitch` bytes apart, into
    /// BGRA8 rows of exactly `width * 4` bytes.
    pub fn convert(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
        format: PixelFormat,
    ) -> Result<&[u8]> {
        let bpp = format.bytes_per_pixel();
        let row_bytes = width as usize * bpp;
        if pitch < row_bytes {
            return Err(ChainError::Config(format!(
                "pitch {} is shorter than a {}-pixel row",
                pitch, width
            )));
        }
        let needed = if height == 0 {
            0
        } else {
            pitch * (height as usize - 1) + row_bytes
        };
        if pixels.len() < needed {
            return Err(ChainError::Config(format!(
                "frame buffer holds {} bytes, {}x{} at pitch {} needs {}",
                pixels.len(),
                width,
                height,
                pitch,
                needed
            )));
        }

        let out_row = width as usize * 4;
        self.staging.clear();
        self.staging.resize(out_row * height as usize, 0);

        for y in 0..height as usize {
            let src = &pixels[y * pitch..y * pitch + row_bytes];
            let dst = &mut self.staging[y * out_row..(y + 1) * out_row];
            match format {
                PixelFormat::Xrgb8888 => {
                    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                        d.copy_from_slice(&[s[0], s[1], s[2], 0xff]);
                    }
                }
                PixelFormat::Rgb565 => {
                    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(2)) {
                        d.copy_from_slice(&rgb565_to_bgra(u16::from_le_bytes([s[0], s[1]])));
                    }
                }
                PixelFormat::Xrgb1555 => {
                    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(2)) {
                        let p = widen_1555(u16::from_le_bytes([s[0], s[1]]));
                        d.copy_from_slice(&rgb565_to_bgra(p));
                    }
                }
            }
        }
        Ok(&self.staging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xrgb8888_forces_opaque_alpha() {
        let mut conv = FrameConverter::new();
        let px = 0x0012_3456u32.to_le_bytes();
        let out = conv.convert(&px, 1, 1, 4, PixelFormat::Xrgb8888).unwrap();
        assert_eq!(out, &[0x56, 0x34, 0x12, 0xff]);
    }

    #[test]
    fn rgb565_extremes_expand_to_full_range() {
        let mut conv = FrameConverter::new();
        let mut px = Vec::new();
        px.extend_from_slice(&0xf800u16.to_le_bytes()); // red
        px.extend_from_slice(&0x07e0u16.to_le_bytes()); // green
        px.extend_from_slice(&0x001fu16.to_le_bytes()); // blue
        let out = conv.convert(&px, 3, 1, 6, PixelFormat::Rgb565).unwrap();
        assert_eq!(&out[0..4], &[0, 0, 255, 255]);
        assert_eq!(&out[4..8], &[0, 255, 0, 255]);
        assert_eq!(&out[8..12], &[255, 0, 0, 255]);
    }

    #[test]
    fn xrgb1555_matches_565_expansion() {
        let mut conv = FrameConverter::new();
        let white = 0x7fffu16.to_le_bytes();
        let out = conv.convert(&white, 1, 1, 2, PixelFormat::Xrgb1555).unwrap();
        assert_eq!(out, &[255, 255, 255, 255]);

        let green = 0x03e0u16.to_le_bytes();
        let out = conv.convert(&green, 1, 1, 2, PixelFormat::Xrgb1555).unwrap();
        assert_eq!(out, &[0, 255, 0, 255]);
    }

    #[test]
    fn pitch_padding_is_skipped() {
        let mut conv = FrameConverter::new();
        // 2x2 frame, pitch of 12 bytes (one padding pixel per row).
        let mut px = vec![0u8; 12 + 8];
        px[0..4].copy_from_slice(&[1, 2, 3, 0]);
        px[8..12].copy_from_slice(&[9, 9, 9, 9]);
        px[12..16].copy_from_slice(&[4, 5, 6, 0]);
        let out = conv.convert(&px, 2, 2, 12, PixelFormat::Xrgb8888).unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[0..4], &[1, 2, 3, 255]);
        assert_eq!(&out[8..12], &[4, 5, 6, 255]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let mut conv = FrameConverter::new();
        let px = vec![0u8; 10];
        assert!(conv.convert(&px, 2, 2, 8, PixelFormat::Xrgb8888).is_err());
        assert!(conv.convert(&px, 4, 1, 4, PixelFormat::Rgb565).is_err());
    }
}
