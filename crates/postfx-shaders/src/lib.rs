//! postfx-shaders: WGSL pass programs for the post-processing chain.
//!
//! Every pass program follows the same interface: a `vs_main`/`fs_main` pair,
//! one group-0 uniform struct carrying at least `mvp: mat4x4<f32>`, and
//! textures that are recognised by name (`source`, `orig`, `prev1`,
//! `pass2`, `passprev1`, LUT ids ...) each paired with a `<name>_sampler`.

/// Pass-through program. Used as the resting program after every frame and
/// as the single pass of the fallback chain when a preset cannot be built.
pub const STOCK_WGSL: &str = r#"
struct VsIn {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
    @location(2) lut_tex_coord: vec2<f32>,
};

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

struct StockParams {
    mvp: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> params: StockParams;
@group(0) @binding(1) var source: texture_2d<f32>;
@group(0) @binding(2) var source_sampler: sampler;

@vertex
fn vs_main(vin: VsIn) -> VsOut {
    var out: VsOut;
    out.pos = params.mvp * vec4<f32>(vin.position, 0.0, 1.0);
    out.uv = vin.tex_coord;
    return out;
}

@fragment
fn fs_main(inp: VsOut) -> @location(0) vec4<f32> {
    return textureSample(source, source_sampler, inp.uv);
}
"#;

/// Darkens every other output line, phase-shifted by the frame counter so a
/// `frame_count_mod` of 2 produces interlace flicker.
pub const SCANLINES_WGSL: &str = r#"
struct VsIn {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
    @location(2) lut_tex_coord: vec2<f32>,
};

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

struct PassParams {
    mvp: mat4x4<f32>,
    video_size: vec2<f32>,
    texture_size: vec2<f32>,
    output_size: vec2<f32>,
    frame_count: f32,
    frame_direction: f32,
};

@group(0) @binding(0) var<uniform> params: PassParams;
@group(0) @binding(1) var source: texture_2d<f32>;
@group(0) @binding(2) var source_sampler: sampler;

@vertex
fn vs_main(vin: VsIn) -> VsOut {
    var out: VsOut;
    out.pos = params.mvp * vec4<f32>(vin.position, 0.0, 1.0);
    out.uv = vin.tex_coord;
    return out;
}

@fragment
fn fs_main(inp: VsOut) -> @location(0) vec4<f32> {
    let c = textureSample(source, source_sampler, inp.uv);
    // One source line covers output_size.y / video_size.y output lines.
    let line = floor(inp.uv.y * params.texture_size.y * params.output_size.y / max(params.video_size.y, 1.0));
    let phase = (line + params.frame_count) % 2.0;
    let weight = select(1.0, 0.6, phase >= 1.0);
    return vec4<f32>(c.rgb * weight, c.a);
}
"#;

/// Blends the current frame with the previous two, giving an LCD-ghosting
/// look. Exercises the `prev` and `prev1` history bindings.
pub const GHOSTING_WGSL: &str = r#"
struct VsIn {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
    @location(2) lut_tex_coord: vec2<f32>,
};

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

struct GhostParams {
    mvp: mat4x4<f32>,
    video_size: vec2<f32>,
    texture_size: vec2<f32>,
    prev_texture_size: vec2<f32>,
    prev1_texture_size: vec2<f32>,
};

@group(0) @binding(0) var<uniform> params: GhostParams;
@group(0) @binding(1) var source: texture_2d<f32>;
@group(0) @binding(2) var source_sampler: sampler;
@group(0) @binding(3) var prev: texture_2d<f32>;
@group(0) @binding(4) var prev_sampler: sampler;
@group(0) @binding(5) var prev1: texture_2d<f32>;
@group(0) @binding(6) var prev1_sampler: sampler;

@vertex
fn vs_main(vin: VsIn) -> VsOut {
    var out: VsOut;
    out.pos = params.mvp * vec4<f32>(vin.position, 0.0, 1.0);
    out.uv = vin.tex_coord;
    return out;
}

@fragment
fn fs_main(inp: VsOut) -> @location(0) vec4<f32> {
    // History slots share the input's texel size, so the same UV addresses them.
    let cur = textureSample(source, source_sampler, inp.uv);
    let p0 = textureSample(prev, prev_sampler, inp.uv);
    let p1 = textureSample(prev1, prev1_sampler, inp.uv);
    return cur * 0.6 + p0 * 0.25 + p1 * 0.15;
}
"#;

/// Remaps colour through a 2D lookup texture registered under the id
/// `color_lut` (red on the x axis, green on the y axis).
pub const LUT_GRADE_WGSL: &str = r#"
struct VsIn {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
    @location(2) lut_tex_coord: vec2<f32>,
};

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) lut_uv: vec2<f32>,
};

struct GradeParams {
    mvp: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> params: GradeParams;
@group(0) @binding(1) var source: texture_2d<f32>;
@group(0) @binding(2) var source_sampler: sampler;
@group(0) @binding(3) var color_lut: texture_2d<f32>;
@group(0) @binding(4) var color_lut_sampler: sampler;

@vertex
fn vs_main(vin: VsIn) -> VsOut {
    var out: VsOut;
    out.pos = params.mvp * vec4<f32>(vin.position, 0.0, 1.0);
    out.uv = vin.tex_coord;
    out.lut_uv = vin.lut_tex_coord;
    return out;
}

@fragment
fn fs_main(inp: VsOut) -> @location(0) vec4<f32> {
    let c = textureSample(source, source_sampler, inp.uv);
    let graded = textureSample(color_lut, color_lut_sampler, c.rg);
    return vec4<f32>(graded.rgb, c.a);
}
"#;

/// Looks up a bundled program by the name used in presets (`builtin:<name>`).
pub fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "stock" => Some(STOCK_WGSL),
        "scanlines" => Some(SCANLINES_WGSL),
        "ghosting" => Some(GHOSTING_WGSL),
        "lut_grade" => Some(LUT_GRADE_WGSL),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_resolve() {
        assert!(builtin("stock").is_some());
        assert!(builtin("scanlines").is_some());
        assert!(builtin("ghosting").is_some());
        assert!(builtin("lut_grade").is_some());
        assert!(builtin("missing").is_none());
    }

    /// `(binding, name, is_texture)` for each texture or sampler global.
    fn resources(src: &str) -> Vec<(u32, &str, bool)> {
        src.lines()
            .filter_map(|line| {
                let rest = line.trim().strip_prefix("@group(0) @binding(")?;
                let (binding, decl) = rest.split_once(')')?;
                let (name, ty) = decl.trim().strip_prefix("var ")?.split_once(':')?;
                let texture = match ty.trim().trim_end_matches(';') {
                    "texture_2d<f32>" => true,
                    "sampler" => false,
                    _ => return None,
                };
                Some((binding.parse().ok()?, name.trim(), texture))
            })
            .collect()
    }

    #[test]
    fn every_texture_sits_next_to_its_sampler() {
        for name in ["stock", "scanlines", "ghosting", "lut_grade"] {
            let src = builtin(name).unwrap();
            let found = resources(src);
            assert!(found.iter().any(|r| r.1 == "source"), "{name}: no source");
            for &(binding, texture, _) in found.iter().filter(|r| r.2) {
                let sampler = format!("{texture}_sampler");
                assert!(
                    found.contains(&(binding + 1, sampler.as_str(), false)),
                    "{name}: `{texture}` at {binding} lacks `{sampler}` at {}",
                    binding + 1
                );
            }
            let samplers = found.iter().filter(|r| !r.2).count();
            assert_eq!(samplers * 2, found.len(), "{name}: unpaired sampler");
        }
    }
}
