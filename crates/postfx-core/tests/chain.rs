use std::sync::{Arc, RwLock};

use anyhow::Result;
use postfx_config::{
    ChainSettings, LutDesc, PassDesc, ScaleDesc, ShaderPreset, ShaderRef, VariableDesc,
    VariableKind, VariableWidth,
};
use postfx_core::{
    ChainError, FrameDirection, FrameOutcome, HeadlessBackend, MemoryTracker, PixelFormat,
    RecordedDraw, RenderChain, RenderDest, geometry,
};

const FRAME_COUNT_OFFSET: usize = 88;
const FRAME_DIRECTION_OFFSET: usize = 92;

fn builtin(name: &str) -> PassDesc {
    PassDesc::new(ShaderRef::Builtin {
        builtin: name.into(),
    })
}

fn preset(passes: Vec<PassDesc>) -> ShaderPreset {
    ShaderPreset {
        passes,
        ..Default::default()
    }
}

fn build(preset: &ShaderPreset) -> Result<RenderChain<HeadlessBackend>> {
    let mut chain = RenderChain::new(HeadlessBackend::new(), preset, &ChainSettings::default())?;
    chain.set_viewport(0, 0, 1024, 768, 1024, 768);
    Ok(chain)
}

fn submit(chain: &mut RenderChain<HeadlessBackend>, width: u32, height: u32) -> Result<()> {
    let pixels = vec![0x80u8; (width * height * 4) as usize];
    chain.submit_frame(&pixels, width, height, width as usize * 4, PixelFormat::Xrgb8888)?;
    Ok(())
}

fn draw_mvp(draw: &RecordedDraw) -> Vec<f32> {
    (0..16)
        .map(|i| draw.uniform_f32(i * 4).expect("mvp in uniforms"))
        .collect()
}

fn flat(matrix: [[f32; 4]; 4]) -> Vec<f32> {
    matrix.iter().flatten().copied().collect()
}

fn floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[test]
fn two_pass_chain_scales_then_fills_viewport() -> Result<()> {
    let mut chain = build(&preset(vec![
        builtin("scanlines").with_scale(ScaleDesc::Input { factor: 2.0 }),
        builtin("stock"),
    ]))?;

    submit(&mut chain, 256, 224)?;
    assert!(chain.render());

    let target = chain.pool().target(0).expect("pass 0 target");
    assert_eq!(target.logical, (512, 448));

    let draws = chain.backend().last_frame().expect("a submitted frame");
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].dest, RenderDest::Target(target.texture));
    assert_eq!(draws[0].viewport.width, 512);
    assert_eq!(draws[1].dest, RenderDest::Backbuffer);
    assert_eq!(draws[1].viewport.width, 1024);
    assert_eq!(draws[1].viewport.height, 768);

    // Nothing new submitted: repeat mode, no draws.
    let draws_before = chain.backend().stats().draws;
    assert!(chain.render());
    assert_eq!(chain.backend().stats().draws, draws_before);
    assert_eq!(chain.last_report().map(|r| r.passes_drawn), Some(0));
    Ok(())
}

#[test]
fn each_pass_samples_the_previous_output() -> Result<()> {
    let mut chain = build(&preset(vec![
        builtin("stock"),
        builtin("scanlines"),
        builtin("stock"),
    ]))?;
    submit(&mut chain, 256, 224)?;
    let input_slot = chain.pool().history().current().texture;
    assert!(chain.render());

    let draws = chain.backend().last_frame().expect("a submitted frame");
    assert_eq!(draws[0].texture_at(1), Some(input_slot));
    for i in 1..draws.len() {
        let previous = chain.pool().target(i - 1).expect("target").texture;
        assert_eq!(draws[i].texture_at(1), Some(previous), "pass {}", i);
    }
    // The frame just drawn is now the newest history entry.
    assert_eq!(chain.pool().history().back(0).map(|s| s.texture), Some(input_slot));
    Ok(())
}

#[test]
fn single_pass_goes_straight_to_backbuffer() -> Result<()> {
    let mut chain = build(&preset(vec![builtin("scanlines")]))?;
    submit(&mut chain, 320, 240)?;
    assert!(chain.render());

    let draws = chain.backend().last_frame().expect("a submitted frame");
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].dest, RenderDest::Backbuffer);
    assert!(chain.pool().target(0).is_none());
    assert_eq!(chain.backend().backbuffer_generation(), 1);
    Ok(())
}

#[test]
fn frame_count_mod_wraps_per_pass() -> Result<()> {
    let mut wrapped = builtin("scanlines").with_scale(ScaleDesc::Input { factor: 1.0 });
    wrapped.frame_count_mod = 5;
    let mut chain = build(&preset(vec![wrapped, builtin("scanlines")]))?;

    for frame in 0..12u64 {
        submit(&mut chain, 64, 64)?;
        assert!(chain.render());
        let draws = chain.backend().last_frame().expect("a submitted frame");
        assert_eq!(
            draws[0].uniform_f32(FRAME_COUNT_OFFSET),
            Some((frame % 5) as f32)
        );
        assert_eq!(draws[1].uniform_f32(FRAME_COUNT_OFFSET), Some(frame as f32));
    }
    assert_eq!(chain.frame_count(), 12);
    Ok(())
}

#[test]
fn rewind_flips_frame_direction() -> Result<()> {
    let mut chain = build(&preset(vec![builtin("scanlines")]))?;
    submit(&mut chain, 64, 64)?;
    chain.render();
    let forward = chain.backend().last_frame().expect("frame")[0].uniform_f32(FRAME_DIRECTION_OFFSET);
    assert_eq!(forward, Some(1.0));

    chain.set_frame_direction(FrameDirection::Rewind);
    submit(&mut chain, 64, 64)?;
    chain.render();
    let rewind = chain.backend().last_frame().expect("frame")[0].uniform_f32(FRAME_DIRECTION_OFFSET);
    assert_eq!(rewind, Some(-1.0));
    Ok(())
}

#[test]
fn failed_pass_leaves_backbuffer_and_history_untouched() -> Result<()> {
    let mut chain = build(&preset(vec![
        builtin("stock"),
        builtin("stock"),
        builtin("stock"),
    ]))?;
    submit(&mut chain, 256, 224)?;
    assert!(chain.render());
    assert_eq!(chain.backend().backbuffer_generation(), 1);

    // A new input size forces both intermediate targets to be reallocated.
    chain.backend_mut().fail_allocations_matching("pass1-target");
    submit(&mut chain, 320, 240)?;
    let write_index = chain.pool().history().write_index();
    assert!(!chain.render());

    let report = chain.last_report().expect("report");
    assert_eq!(report.passes_drawn, 1);
    assert!(matches!(report.outcome, FrameOutcome::Aborted { pass: 1, .. }));
    assert_eq!(chain.backend().backbuffer_generation(), 1);
    assert_eq!(chain.backend().stats().frames_aborted, 1);
    assert_eq!(chain.pool().history().write_index(), write_index);
    assert_eq!(chain.frame_count(), 1);
    assert_eq!(
        chain.backend().resting_program(),
        Some(chain.stock_program())
    );

    // The same input is retried once the fault clears.
    chain.backend_mut().clear_faults();
    assert!(chain.render());
    assert_eq!(chain.last_report().map(|r| r.passes_drawn), Some(3));
    assert_eq!(chain.backend().backbuffer_generation(), 2);
    assert_eq!(chain.pool().target(1).map(|t| t.logical), Some((320, 240)));
    Ok(())
}

#[test]
fn targets_reallocate_only_on_size_change() -> Result<()> {
    let mut chain = build(&preset(vec![
        builtin("stock").with_scale(ScaleDesc::Viewport { factor: 0.5 }),
        builtin("stock"),
    ]))?;
    let baseline = chain.backend().stats().textures_created;

    for _ in 0..4 {
        submit(&mut chain, 256, 224)?;
        assert!(chain.render());
    }
    assert_eq!(chain.backend().stats().textures_created, baseline + 1);
    assert_eq!(chain.pool().target(0).map(|t| t.logical), Some((512, 384)));

    chain.set_viewport(0, 0, 800, 600, 800, 600);
    submit(&mut chain, 256, 224)?;
    assert!(chain.render());
    let stats = chain.backend().stats();
    assert_eq!(stats.textures_created, baseline + 2);
    assert_eq!(stats.textures_released, 1);
    assert_eq!(chain.pool().target(0).map(|t| t.logical), Some((400, 300)));
    Ok(())
}

#[test]
fn history_textures_follow_the_ring() -> Result<()> {
    let mut chain = build(&preset(vec![builtin("ghosting")]))?;
    let mut inputs = Vec::new();
    for _ in 0..4 {
        submit(&mut chain, 128, 128)?;
        inputs.push(chain.pool().history().current().texture);
        assert!(chain.render());
    }

    let draws = chain.backend().submitted_frames();
    for frame in 2..4 {
        let draw = &draws[frame][0];
        assert_eq!(draw.texture_at(1), Some(inputs[frame]));
        assert_eq!(draw.texture_at(3), Some(inputs[frame - 1]), "prev");
        assert_eq!(draw.texture_at(5), Some(inputs[frame - 2]), "prev1");
    }
    Ok(())
}

#[test]
fn build_failure_hands_backend_back_for_passthrough() -> Result<()> {
    let broken = preset(vec![PassDesc::new(ShaderRef::Inline {
        inline: "fn vs_main( {".into(),
    })]);
    let settings = ChainSettings::default();
    let failure = RenderChain::new(HeadlessBackend::new(), &broken, &settings)
        .err()
        .expect("broken program must not build");
    let (error, backend) = failure.into_parts();
    assert!(matches!(error, ChainError::Compile { .. }), "{}", error);
    assert_eq!(backend.live_textures(), 0);
    assert_eq!(backend.live_buffers(), 0);

    let mut chain = RenderChain::passthrough(backend, &settings)?;
    chain.set_viewport(0, 0, 640, 480, 640, 480);
    submit(&mut chain, 256, 224)?;
    assert!(chain.render());
    let draws = chain.backend().last_frame().expect("a submitted frame");
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].dest, RenderDest::Backbuffer);
    Ok(())
}

#[test]
fn pass_limit_is_enforced() {
    let settings = ChainSettings {
        max_passes: 2,
        ..Default::default()
    };
    let three = preset(vec![builtin("stock"), builtin("stock"), builtin("stock")]);
    let err = RenderChain::new(HeadlessBackend::new(), &three, &settings)
        .err()
        .expect("too many passes");
    assert!(matches!(err.error, ChainError::Config(_)));
}

#[test]
fn render_without_viewport_aborts_and_retries() -> Result<()> {
    let mut chain = RenderChain::new(
        HeadlessBackend::new(),
        &preset(vec![builtin("stock")]),
        &ChainSettings::default(),
    )?;
    submit(&mut chain, 64, 64)?;
    assert!(!chain.render());
    assert_eq!(chain.backend().stats().draws, 0);

    chain.set_viewport(0, 0, 320, 240, 320, 240);
    assert!(chain.render());
    assert_eq!(chain.frame_count(), 1);
    Ok(())
}

#[test]
fn lut_is_bound_under_its_id() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("grade.png");
    image::RgbaImage::from_pixel(16, 1, image::Rgba([10, 20, 30, 255])).save(&path)?;

    let mut grade = preset(vec![builtin("lut_grade")]);
    grade.luts.push(LutDesc {
        id: "color_lut".into(),
        path,
        filter: Default::default(),
        wrap: Default::default(),
    });
    let mut chain = build(&grade)?;
    let lut = chain.pool().lut("color_lut").expect("lut loaded").texture;
    assert_eq!(chain.pool().lut("color_lut").map(|l| l.size), Some((16, 1)));

    submit(&mut chain, 64, 64)?;
    assert!(chain.render());
    let draws = chain.backend().last_frame().expect("a submitted frame");
    assert_eq!(draws[0].texture_at(3), Some(lut));
    Ok(())
}

#[test]
fn missing_lut_file_fails_the_build() {
    let mut grade = preset(vec![builtin("lut_grade")]);
    grade.luts.push(LutDesc {
        id: "color_lut".into(),
        path: "/nonexistent/grade.png".into(),
        filter: Default::default(),
        wrap: Default::default(),
    });
    let failure = RenderChain::new(HeadlessBackend::new(), &grade, &ChainSettings::default())
        .err()
        .expect("missing LUT");
    let (_, backend) = failure.into_parts();
    assert_eq!(backend.live_textures(), 0);
}

const TRACKED_WGSL: &str = r#"
struct Params {
    mvp: mat4x4<f32>,
    intensity: f32,
};

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var source: texture_2d<f32>;
@group(0) @binding(2) var source_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) tex_coord: vec2<f32>) -> VsOut {
    var out: VsOut;
    out.pos = params.mvp * vec4<f32>(position, 0.0, 1.0);
    out.uv = tex_coord;
    return out;
}

@fragment
fn fs_main(inp: VsOut) -> @location(0) vec4<f32> {
    return textureSample(source, source_sampler, inp.uv) * params.intensity;
}
"#;

#[test]
fn tracked_variables_reach_uniforms() -> Result<()> {
    let mut tracked = preset(vec![PassDesc::new(ShaderRef::Inline {
        inline: TRACKED_WGSL.into(),
    })]);
    tracked.variables.push(VariableDesc {
        id: "intensity".into(),
        kind: VariableKind::Capture,
        address: 4,
        width: VariableWidth::U8,
        mask: 0,
        equal: 0,
    });
    let memory = Arc::new(RwLock::new(vec![0u8; 16]));
    let mut chain = build(&tracked)?;
    chain.set_state_tracker(Box::new(MemoryTracker::new(
        memory.clone(),
        &tracked.variables,
    )?));

    memory.write().expect("memory lock")[4] = 42;
    submit(&mut chain, 64, 64)?;
    assert!(chain.render());
    let draws = chain.backend().last_frame().expect("a submitted frame");
    assert_eq!(draws[0].uniform_f32(64), Some(42.0));

    memory.write().expect("memory lock")[4] = 7;
    submit(&mut chain, 64, 64)?;
    assert!(chain.render());
    let draws = chain.backend().last_frame().expect("a submitted frame");
    assert_eq!(draws[0].uniform_f32(64), Some(7.0));
    Ok(())
}

#[test]
fn rotation_applies_to_the_final_pass_only() -> Result<()> {
    let mut chain = build(&preset(vec![
        builtin("stock"),
        builtin("stock"),
        builtin("stock"),
    ]))?;
    chain.set_viewport(0, 0, 800, 600, 800, 600);
    chain.set_rotation(1);
    submit(&mut chain, 256, 224)?;
    assert!(chain.render());

    let first = chain.pool().target(0).expect("pass 0 target").logical;
    let second = chain.pool().target(1).expect("pass 1 target").logical;
    assert_eq!(first, (256, 224));
    let draws = chain.backend().last_frame().expect("a submitted frame");
    assert_eq!(draws.len(), 3);
    assert_eq!(draw_mvp(&draws[0]), flat(geometry::mvp(first.0, first.1, 0)));
    assert_eq!(draw_mvp(&draws[1]), flat(geometry::mvp(second.0, second.1, 0)));
    assert_eq!(draw_mvp(&draws[2]), flat(geometry::mvp(800, 600, 1)));
    assert_ne!(draw_mvp(&draws[2]), flat(geometry::mvp(800, 600, 0)));

    // Five quarter turns wrap to one.
    chain.set_rotation(5);
    submit(&mut chain, 256, 224)?;
    assert!(chain.render());
    let draws = chain.backend().last_frame().expect("a submitted frame");
    assert_eq!(draw_mvp(&draws[2]), flat(geometry::mvp(800, 600, 1)));
    Ok(())
}

const NAMED_INPUTS_WGSL: &str = r#"
struct Params {
    mvp: mat4x4<f32>,
};

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var source: texture_2d<f32>;
@group(0) @binding(2) var source_sampler: sampler;
@group(0) @binding(3) var orig: texture_2d<f32>;
@group(0) @binding(4) var orig_sampler: sampler;
@group(0) @binding(5) var pass1: texture_2d<f32>;
@group(0) @binding(6) var pass1_sampler: sampler;
@group(0) @binding(7) var passprev2: texture_2d<f32>;
@group(0) @binding(8) var passprev2_sampler: sampler;
@group(0) @binding(9) var passprev3: texture_2d<f32>;
@group(0) @binding(10) var passprev3_sampler: sampler;
@group(0) @binding(11) var pass3: texture_2d<f32>;
@group(0) @binding(12) var pass3_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) tex_coord: vec2<f32>) -> VsOut {
    var out: VsOut;
    out.pos = params.mvp * vec4<f32>(position, 0.0, 1.0);
    out.uv = tex_coord;
    return out;
}

@fragment
fn fs_main(inp: VsOut) -> @location(0) vec4<f32> {
    let a = textureSample(source, source_sampler, inp.uv);
    let b = textureSample(orig, orig_sampler, inp.uv);
    let c = textureSample(pass1, pass1_sampler, inp.uv);
    let d = textureSample(passprev2, passprev2_sampler, inp.uv);
    let e = textureSample(passprev3, passprev3_sampler, inp.uv);
    let f = textureSample(pass3, pass3_sampler, inp.uv);
    return (a + b + c + d + e + f) / 6.0;
}
"#;

#[test]
fn named_inputs_bind_frame_and_earlier_pass_outputs() -> Result<()> {
    let mut chain = build(&preset(vec![
        builtin("stock"),
        builtin("scanlines"),
        PassDesc::new(ShaderRef::Inline {
            inline: NAMED_INPUTS_WGSL.into(),
        }),
    ]))?;
    submit(&mut chain, 256, 224)?;
    let orig = chain.pool().history().current().texture;
    assert!(chain.render());

    let first = chain.pool().target(0).expect("pass 0 target").texture;
    let second = chain.pool().target(1).expect("pass 1 target").texture;
    let draws = chain.backend().last_frame().expect("a submitted frame");
    let last = &draws[2];
    assert_eq!(last.texture_at(1), Some(second), "source");
    assert_eq!(last.texture_at(3), Some(orig), "orig");
    assert_eq!(last.texture_at(5), Some(first), "pass1");
    assert_eq!(last.texture_at(7), Some(first), "passprev2");
    assert_eq!(last.texture_at(9), Some(orig), "passprev3");
    // Pass 3 is the one drawing; its output does not exist yet.
    assert_eq!(last.texture_at(11), Some(chain.pool().fallback()), "pass3");
    Ok(())
}

#[test]
fn failed_vertex_upload_is_retried() -> Result<()> {
    let mut chain = build(&preset(vec![builtin("stock"), builtin("stock")]))?;
    submit(&mut chain, 256, 224)?;
    assert!(chain.render());

    chain.backend_mut().fail_buffer_writes_matching("pass0-vertices");
    submit(&mut chain, 320, 240)?;
    assert!(!chain.render());
    let report = chain.last_report().expect("report");
    assert!(matches!(report.outcome, FrameOutcome::Aborted { pass: 0, .. }));

    chain.backend_mut().clear_faults();
    assert!(chain.render());

    let texel = chain.pool().history().texel_size();
    let output = chain.pool().target(0).expect("pass 0 target").logical;
    let expected: Vec<f32> = geometry::build_quad((320, 240), texel, output, true)
        .iter()
        .flat_map(|v| [v.position, v.tex_coord, v.lut_tex_coord])
        .flatten()
        .collect();
    let draws = chain.backend().last_frame().expect("a submitted frame");
    assert_eq!(floats(&draws[0].vertices), expected);
    Ok(())
}
