use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use pollster::FutureExt;
use postfx_config::{PostFxConfig, ShaderPreset};
use postfx_core::{PixelFormat, RenderChain, WgpuBackend};

const BACKBUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

fn arg_value(name: &str) -> Option<String> {
    let prefix = format!("--{}=", name);
    std::env::args().find_map(|a| a.strip_prefix(&prefix).map(str::to_string))
}

/// Moving diagonal gradient in XRGB8888 so history-sampling passes see motion.
fn synthetic_frame(width: u32, height: u32, frame: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = ((x + frame * 8) % 256) as u8;
            let g = ((y * 255) / height.max(1)) as u8;
            let b = if (x / 16 + y / 16 + frame) % 2 == 0 { 0xe0 } else { 0x20 };
            let xrgb = u32::from_be_bytes([0xff, r, g, b]);
            pixels.extend_from_slice(&xrgb.to_le_bytes());
        }
    }
    pixels
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = PostFxConfig::load();
    if let Some(preset) = arg_value("preset") {
        config.chain.preset = Some(PathBuf::from(preset));
    }
    if let Some(output) = arg_value("output") {
        config.demo.output = PathBuf::from(output);
    }
    let demo = config.demo.clone();
    let settings = config.chain.clone();

    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        })
        .block_on()
        .context("no suitable GPU adapter found")?;
    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("postfx-device"),
                required_features: adapter.features()
                    & wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER,
                required_limits: wgpu::Limits::default(),
            },
            None,
        )
        .block_on()
        .context("failed to open GPU device")?;
    let device = Arc::new(device);
    let queue = Arc::new(queue);

    let backbuffer = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("postfx-backbuffer"),
        size: wgpu::Extent3d {
            width: demo.viewport_width,
            height: demo.viewport_height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: BACKBUFFER_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let mut backend = WgpuBackend::new(device.clone(), queue.clone(), BACKBUFFER_FORMAT);
    backend.set_backbuffer(backbuffer.create_view(&wgpu::TextureViewDescriptor::default()));

    let preset = match &settings.preset {
        Some(path) => Some(
            ShaderPreset::load_from_file(path)
                .with_context(|| format!("loading preset {}", path.display()))?,
        ),
        None => None,
    };
    let mut chain = match preset {
        Some(preset) => match RenderChain::new(backend, &preset, &settings) {
            Ok(chain) => chain,
            Err(failure) => {
                let (error, backend) = failure.into_parts();
                log::warn!("preset rejected, falling back to pass-through: {}", error);
                RenderChain::passthrough(backend, &settings)
                    .map_err(|failure| anyhow!("{}", failure))?
            }
        },
        None => RenderChain::passthrough(backend, &settings)
            .map_err(|failure| anyhow!("{}", failure))?,
    };
    chain.set_viewport(
        0,
        0,
        demo.viewport_width,
        demo.viewport_height,
        demo.viewport_width,
        demo.viewport_height,
    );

    for frame in 0..demo.frames {
        let pixels = synthetic_frame(demo.input_width, demo.input_height, frame);
        chain.submit_frame(
            &pixels,
            demo.input_width,
            demo.input_height,
            demo.input_width as usize * 4,
            PixelFormat::Xrgb8888,
        )?;
        if !chain.render() {
            log::warn!("frame {} was not presented: {:?}", frame, chain.last_report());
        }
    }
    log::info!(
        "rendered {} frames through {} passes",
        chain.frame_count(),
        chain.passes().len()
    );

    let rgba = chain.backend().read_texture(&backbuffer)?;
    let image = image::RgbaImage::from_raw(demo.viewport_width, demo.viewport_height, rgba)
        .context("readback size mismatch")?;
    image
        .save(&demo.output)
        .with_context(|| format!("writing {}", demo.output.display()))?;
    log::info!("wrote {}", demo.output.display());
    Ok(())
}
