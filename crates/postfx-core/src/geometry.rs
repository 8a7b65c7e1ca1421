//! Quad geometry and projection for a single pass.
//!
//! Each pass draws one textured quad as a four-vertex triangle strip in
//! output pixel space (`0..out_w`, `0..out_h`, y up). The projection maps that
//! space to clip space and applies display rotation, so rotating the final
//! image never touches vertex data.

use bytemuck::{Pod, Zeroable};

/// Vertex layout shared by every pass program:
/// `@location(0) position`, `@location(1) tex_coord`, `@location(2) lut_tex_coord`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
    pub lut_tex_coord: [f32; 2],
}

/// Size of one quad's vertex data in bytes.
pub const QUAD_BYTES: u64 = (std::mem::size_of::<QuadVertex>() * 4) as u64;

/// Build the strip `top-left, top-right, bottom-left, bottom-right`.
///
/// `input` is the logical content size inside a texture allocated at
/// `texel` size, so texture coordinates stop at `input / texel`. LUT
/// coordinates always span the whole lookup texture.
pub fn build_quad(
    input: (u32, u32),
    texel: (u32, u32),
    output: (u32, u32),
    texel_alignment: bool,
) -> [QuadVertex; 4] {
    let u = input.0 as f32 / texel.0.max(1) as f32;
    let v = input.1 as f32 / texel.1.max(1) as f32;
    let (w, h) = (output.0 as f32, output.1 as f32);

    let mut quad = [
        QuadVertex {
            position: [0.0, h],
            tex_coord: [0.0, 0.0],
            lut_tex_coord: [0.0, 0.0],
        },
        QuadVertex {
            position: [w, h],
            tex_coord: [u, 0.0],
            lut_tex_coord: [1.0, 0.0],
        },
        QuadVertex {
            position: [0.0, 0.0],
            tex_coord: [0.0, v],
            lut_tex_coord: [0.0, 1.0],
        },
        QuadVertex {
            position: [w, 0.0],
            tex_coord: [u, v],
            lut_tex_coord: [1.0, 1.0],
        },
    ];

    if texel_alignment {
        for vert in &mut quad {
            vert.position[0] -= 0.5;
            vert.position[1] += 0.5;
        }
    }
    quad
}

/// Column-major model-view-projection: orthographic projection of
/// `0..width` x `0..height` followed by a rotation of `rotation` quarter
/// turns counter-clockwise about the centre of the target.
pub fn mvp(width: u32, height: u32, rotation: u32) -> [[f32; 4]; 4] {
    let sx = 2.0 / width.max(1) as f32;
    let sy = 2.0 / height.max(1) as f32;
    // Exact values for quarter turns.
    let (c, s) = match rotation % 4 {
        0 => (1.0, 0.0),
        1 => (0.0, 1.0),
        2 => (-1.0, 0.0),
        _ => (0.0, -1.0),
    };
    [
        [c * sx, s * sx, 0.0, 0.0],
        [-s * sy, c * sy, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [s - c, -s - c, 0.0, 1.0],
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct QuadKey {
    input: (u32, u32),
    texel: (u32, u32),
    output: (u32, u32),
}

/// Last-built quad for one pass; rebuilt only when its sizes change.
#[derive(Debug, Clone)]
pub struct GeometryCache {
    key: Option<QuadKey>,
    vertices: [QuadVertex; 4],
    texel_alignment: bool,
}

impl GeometryCache {
    pub fn new(texel_alignment: bool) -> Self {
        Self {
            key: None,
            vertices: [QuadVertex::default(); 4],
            texel_alignment,
        }
    }

    /// Returns `true` when the vertices were rebuilt and need uploading.
    pub fn update(&mut self, input: (u32, u32), texel: (u32, u32), output: (u32, u32)) -> bool {
        let key = QuadKey {
            input,
            texel,
            output,
        };
        if self.key == Some(key) {
            return false;
        }
        self.vertices = build_quad(input, texel, output, self.texel_alignment);
        self.key = Some(key);
        true
    }

    /// Force a rebuild on the next update.
    pub fn invalidate(&mut self) {
        self.key = None;
    }

    pub fn vertices(&self) -> &[QuadVertex; 4] {
        &self.vertices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(m: &[[f32; 4]; 4], x: f32, y: f32) -> (f32, f32) {
        (
            m[0][0] * x + m[1][0] * y + m[3][0],
            m[0][1] * x + m[1][1] * y + m[3][1],
        )
    }

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-5 && (a.1 - b.1).abs() < 1e-5
    }

    #[test]
    fn quad_uv_stops_at_logical_content() {
        let quad = build_quad((256, 224), (1024, 1024), (512, 448), false);
        assert_eq!(quad[0].position, [0.0, 448.0]);
        assert_eq!(quad[3].position, [512.0, 0.0]);
        assert_eq!(quad[3].tex_coord, [0.25, 0.21875]);
        assert_eq!(quad[0].tex_coord, [0.0, 0.0]);
        assert_eq!(quad[1].lut_tex_coord, [1.0, 0.0]);
        assert_eq!(quad[2].lut_tex_coord, [0.0, 1.0]);
    }

    #[test]
    fn texel_alignment_biases_half_a_pixel() {
        let plain = build_quad((64, 64), (64, 64), (128, 128), false);
        let aligned = build_quad((64, 64), (64, 64), (128, 128), true);
        for (p, a) in plain.iter().zip(aligned.iter()) {
            assert_eq!(a.position[0], p.position[0] - 0.5);
            assert_eq!(a.position[1], p.position[1] + 0.5);
            assert_eq!(a.tex_coord, p.tex_coord);
        }
    }

    #[test]
    fn unrotated_projection_maps_corners() {
        let m = mvp(640, 480, 0);
        assert!(close(apply(&m, 0.0, 0.0), (-1.0, -1.0)));
        assert!(close(apply(&m, 640.0, 480.0), (1.0, 1.0)));
        assert!(close(apply(&m, 320.0, 240.0), (0.0, 0.0)));
    }

    #[test]
    fn quarter_turn_rotates_about_centre() {
        let m = mvp(640, 480, 1);
        // Bottom-right corner (1, -1) turns to (1, 1).
        assert!(close(apply(&m, 640.0, 0.0), (1.0, 1.0)));
        assert!(close(apply(&m, 320.0, 240.0), (0.0, 0.0)));
        let half = mvp(640, 480, 2);
        assert!(close(apply(&half, 0.0, 0.0), (1.0, 1.0)));
        assert_eq!(mvp(640, 480, 4), mvp(640, 480, 0));
    }

    #[test]
    fn cache_rebuilds_only_on_change() {
        let mut cache = GeometryCache::new(true);
        assert!(cache.update((256, 224), (1024, 1024), (512, 448)));
        assert!(!cache.update((256, 224), (1024, 1024), (512, 448)));
        assert!(cache.update((320, 240), (1024, 1024), (640, 480)));
        cache.invalidate();
        assert!(cache.update((320, 240), (1024, 1024), (640, 480)));
        assert_eq!(cache.vertices()[3].tex_coord, [0.3125, 0.234375]);
    }
}
