//! [`GpuBackend`] over a wgpu device.
//!
//! Each program gets one bind group layout derived from its reflection and a
//! pipeline per colour format it can render into. Bind groups are built per
//! draw since the textures bound to a pass change every frame (history ring).

use std::collections::HashMap;
use std::sync::Arc;

use postfx_config::WrapMode;

use crate::backend::{
    BufferId, BufferKind, DrawCall, GpuBackend, ProgramId, RenderDest, SamplerKey, TexelFormat,
    TextureDesc, TextureId,
};
use crate::error::{ChainError, Result};
use crate::geometry::QuadVertex;
use crate::reflect::ProgramReflection;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

struct GpuProgram {
    label: String,
    layout: wgpu::BindGroupLayout,
    uniform_binding: u32,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

/// Maps the chain's texel formats onto wgpu formats.
pub fn texture_format(format: TexelFormat) -> wgpu::TextureFormat {
    match format {
        TexelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        TexelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TexelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

/// Border falls back to edge clamping on devices without border support.
pub fn address_mode(wrap: WrapMode, border_supported: bool) -> wgpu::AddressMode {
    match wrap {
        WrapMode::Border if border_supported => wgpu::AddressMode::ClampToBorder,
        WrapMode::Border | WrapMode::Edge => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

/// Row pitch for texture-to-buffer copies.
pub fn padded_bytes_per_row(width: u32, bytes_per_texel: u32) -> u32 {
    let unpadded = width * bytes_per_texel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 3] = [
    wgpu::VertexAttribute {
        offset: 0,
        shader_location: 0,
        format: wgpu::VertexFormat::Float32x2,
    },
    wgpu::VertexAttribute {
        offset: 8,
        shader_location: 1,
        format: wgpu::VertexFormat::Float32x2,
    },
    wgpu::VertexAttribute {
        offset: 16,
        shader_location: 2,
        format: wgpu::VertexFormat::Float32x2,
    },
];

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    backbuffer_format: wgpu::TextureFormat,
    backbuffer: Option<wgpu::TextureView>,
    border_supported: bool,
    next_id: u32,
    textures: HashMap<TextureId, GpuTexture>,
    buffers: HashMap<BufferId, GpuBuffer>,
    programs: HashMap<ProgramId, GpuProgram>,
    samplers: HashMap<SamplerKey, wgpu::Sampler>,
    encoder: Option<wgpu::CommandEncoder>,
    resting: Option<ProgramId>,
}

impl WgpuBackend {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        backbuffer_format: wgpu::TextureFormat,
    ) -> Self {
        let border_supported = device
            .features()
            .contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);
        if !border_supported {
            log::info!("clamp-to-border unsupported; border wrap falls back to edge clamping");
        }
        Self {
            device,
            queue,
            backbuffer_format,
            backbuffer: None,
            border_supported,
            next_id: 0,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            samplers: HashMap::new(),
            encoder: None,
            resting: None,
        }
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Set the view the final pass renders into. Must match the format given
    /// to [`WgpuBackend::new`].
    pub fn set_backbuffer(&mut self, view: wgpu::TextureView) {
        self.backbuffer = Some(view);
    }

    pub fn resting_program(&self) -> Option<ProgramId> {
        self.resting
    }

    /// Copy a 4-byte-per-texel texture back to tightly packed rows.
    pub fn read_texture(&self, texture: &wgpu::Texture) -> Result<Vec<u8>> {
        let size = texture.size();
        let padded = padded_bytes_per_row(size.width, 4);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("postfx-readback"),
            size: padded as u64 * size.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("postfx-readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(size.height),
                },
            },
            size,
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|err| ChainError::Resource(format!("readback channel closed: {}", err)))?
            .map_err(|err| ChainError::Resource(format!("readback map failed: {}", err)))?;

        let row = (size.width * 4) as usize;
        let mut pixels = Vec::with_capacity(row * size.height as usize);
        {
            let mapped = slice.get_mapped_range();
            for chunk in mapped.chunks(padded as usize) {
                pixels.extend_from_slice(&chunk[..row]);
            }
        }
        readback.unmap();
        Ok(pixels)
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push_scope(&self) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
    }

    /// Pops the two scopes pushed by [`push_scope`](Self::push_scope).
    fn pop_scope(&self) -> Option<wgpu::Error> {
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        validation.or(oom)
    }

    fn ensure_sampler(&mut self, key: SamplerKey) {
        if self.samplers.contains_key(&key) {
            return;
        }
        let address = address_mode(key.wrap, self.border_supported);
        let filter = if key.linear {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("postfx-sampler"),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            border_color: (address == wgpu::AddressMode::ClampToBorder)
                .then_some(wgpu::SamplerBorderColor::TransparentBlack),
            ..Default::default()
        });
        self.samplers.insert(key, sampler);
    }

    fn layout_entries(reflection: &ProgramReflection) -> Vec<wgpu::BindGroupLayoutEntry> {
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: reflection.uniform_binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: std::num::NonZeroU64::new(reflection.uniform_size as u64),
            },
            count: None,
        }];
        for slot in &reflection.textures {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            if let Some(sampler) = slot.sampler_binding {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: sampler,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                });
            }
        }
        entries
    }

    fn build_pipeline(
        &self,
        label: &str,
        module: &wgpu::ShaderModule,
        layout: &wgpu::PipelineLayout,
        format: wgpu::TextureFormat,
    ) -> wgpu::RenderPipeline {
        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: "vs_main",
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<QuadVertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &QUAD_ATTRIBUTES,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
    }

    fn dest_format(&self, dest: RenderDest) -> Result<wgpu::TextureFormat> {
        match dest {
            RenderDest::Backbuffer => Ok(self.backbuffer_format),
            RenderDest::Target(id) => self
                .textures
                .get(&id)
                .map(|t| texture_format(t.desc.format))
                .ok_or_else(|| ChainError::Logic(format!("draw into unknown texture {:?}", id))),
        }
    }
}

impl GpuBackend for WgpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if desc.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        self.push_scope();
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage,
            view_formats: &[],
        });
        if let Some(err) = self.pop_scope() {
            return Err(ChainError::Resource(format!(
                "texture `{}` ({}x{}): {}",
                desc.label, desc.width, desc.height, err
            )));
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(self.alloc_id());
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                desc: desc.clone(),
            },
        );
        Ok(id)
    }

    fn release_texture(&mut self, id: TextureId) {
        if let Some(tex) = self.textures.remove(&id) {
            tex.texture.destroy();
        }
    }

    fn write_texture(&mut self, id: TextureId, width: u32, height: u32, data: &[u8]) -> Result<()> {
        let tex = self
            .textures
            .get(&id)
            .ok_or_else(|| ChainError::Logic(format!("write to unknown texture {:?}", id)))?;
        let bpt = tex.desc.format.bytes_per_texel();
        if width > tex.desc.width || height > tex.desc.height {
            return Err(ChainError::Logic(format!(
                "{}x{} upload exceeds texture `{}` ({}x{})",
                width, height, tex.desc.label, tex.desc.width, tex.desc.height
            )));
        }
        if data.len() < (width * height * bpt) as usize {
            return Err(ChainError::Logic(format!(
                "upload to `{}` is short: {} bytes",
                tex.desc.label,
                data.len()
            )));
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * bpt),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn clear_texture(&mut self, id: TextureId) -> Result<()> {
        let (width, height, bpt) = {
            let tex = self
                .textures
                .get(&id)
                .ok_or_else(|| ChainError::Logic(format!("clear of unknown texture {:?}", id)))?;
            (
                tex.desc.width,
                tex.desc.height,
                tex.desc.format.bytes_per_texel(),
            )
        };
        let zeros = vec![0u8; (width * height * bpt) as usize];
        self.write_texture(id, width, height, &zeros)
    }

    fn create_buffer(&mut self, label: &str, kind: BufferKind, size: u64) -> Result<BufferId> {
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
        } | wgpu::BufferUsages::COPY_DST;
        let size = size.max(16).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        self.push_scope();
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });
        if let Some(err) = self.pop_scope() {
            return Err(ChainError::Resource(format!("buffer `{}`: {}", label, err)));
        }
        let id = BufferId(self.alloc_id());
        self.buffers.insert(id, GpuBuffer { buffer, size });
        Ok(id)
    }

    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<()> {
        let buf = self
            .buffers
            .get(&id)
            .ok_or_else(|| ChainError::Logic(format!("write to unknown buffer {:?}", id)))?;
        if data.len() as u64 > buf.size {
            return Err(ChainError::Logic(format!(
                "{} bytes written to {}-byte buffer {:?}",
                data.len(),
                buf.size,
                id
            )));
        }
        self.queue.write_buffer(&buf.buffer, 0, data);
        Ok(())
    }

    fn release_buffer(&mut self, id: BufferId) {
        if let Some(buf) = self.buffers.remove(&id) {
            buf.buffer.destroy();
        }
    }

    fn create_program(
        &mut self,
        label: &str,
        source: &str,
        reflection: &ProgramReflection,
    ) -> Result<ProgramId> {
        self.push_scope();
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{}-bgl", label)),
                entries: &Self::layout_entries(reflection),
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{}-pipeline-layout", label)),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });

        let mut pipelines = HashMap::new();
        for format in [
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureFormat::Rgba16Float,
            self.backbuffer_format,
        ] {
            if pipelines.contains_key(&format) {
                continue;
            }
            let pipeline = self.build_pipeline(
                &format!("{}-{:?}", label, format),
                &module,
                &pipeline_layout,
                format,
            );
            pipelines.insert(format, pipeline);
        }
        if let Some(err) = self.pop_scope() {
            return Err(ChainError::compile(label, err.to_string()));
        }

        let id = ProgramId(self.alloc_id());
        self.programs.insert(
            id,
            GpuProgram {
                label: label.to_string(),
                layout,
                uniform_binding: reflection.uniform_binding,
                pipelines,
            },
        );
        Ok(id)
    }

    fn release_program(&mut self, id: ProgramId) {
        self.programs.remove(&id);
        if self.resting == Some(id) {
            self.resting = None;
        }
    }

    fn begin_frame(&mut self) -> Result<()> {
        if self.encoder.is_some() {
            return Err(ChainError::Logic("frame already in progress".into()));
        }
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("postfx-frame"),
                }),
        );
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        for binding in call.textures {
            self.ensure_sampler(binding.sampler);
        }
        let format = self.dest_format(call.dest)?;

        let program = self
            .programs
            .get(&call.program)
            .ok_or_else(|| ChainError::Logic(format!("unknown program {:?}", call.program)))?;
        let pipeline = program.pipelines.get(&format).ok_or_else(|| {
            ChainError::Logic(format!(
                "program `{}` has no pipeline for {:?}",
                program.label, format
            ))
        })?;
        let uniforms = self
            .buffers
            .get(&call.uniform_buffer)
            .ok_or_else(|| ChainError::Logic("unknown uniform buffer".into()))?;
        let vertices = self
            .buffers
            .get(&call.vertex_buffer)
            .ok_or_else(|| ChainError::Logic("unknown vertex buffer".into()))?;

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: program.uniform_binding,
            resource: uniforms.buffer.as_entire_binding(),
        }];
        for binding in call.textures {
            let tex = self.textures.get(&binding.texture).ok_or_else(|| {
                ChainError::Logic(format!("bound texture {:?} was released", binding.texture))
            })?;
            entries.push(wgpu::BindGroupEntry {
                binding: binding.binding,
                resource: wgpu::BindingResource::TextureView(&tex.view),
            });
            if let Some(sampler_binding) = binding.sampler_binding {
                let sampler = self.samplers.get(&binding.sampler).ok_or_else(|| {
                    ChainError::Logic(format!("sampler {:?} missing", binding.sampler))
                })?;
                entries.push(wgpu::BindGroupEntry {
                    binding: sampler_binding,
                    resource: wgpu::BindingResource::Sampler(sampler),
                });
            }
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("pass{}-bind-group", call.pass_index)),
            layout: &program.layout,
            entries: &entries,
        });

        let view = match call.dest {
            RenderDest::Backbuffer => self
                .backbuffer
                .as_ref()
                .ok_or_else(|| ChainError::Resource("no backbuffer attached".into()))?,
            RenderDest::Target(id) => &self
                .textures
                .get(&id)
                .ok_or_else(|| ChainError::Logic(format!("unknown target {:?}", id)))?
                .view,
        };
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| ChainError::Logic("draw outside of a frame".into()))?;

        let load = if call.clear {
            wgpu::LoadOp::Clear(wgpu::Color::BLACK)
        } else {
            wgpu::LoadOp::Load
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&format!("pass{}", call.pass_index)),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        let rect = call.viewport;
        pass.set_viewport(
            rect.x as f32,
            rect.y as f32,
            rect.width as f32,
            rect.height as f32,
            0.0,
            1.0,
        );
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, vertices.buffer.slice(..));
        pass.draw(0..4, 0..1);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| ChainError::Logic("end_frame without begin_frame".into()))?;
        let commands = encoder.finish();
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ChainError::Resource(format!("frame rejected: {}", err)));
        }
        self.queue.submit(Some(commands));
        Ok(())
    }

    fn abort_frame(&mut self) {
        if self.encoder.take().is_some() {
            if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
                log::debug!("aborted frame carried a validation error: {}", err);
            }
        }
    }

    fn bind_resting_program(&mut self, program: ProgramId) {
        self.resting = Some(program);
    }

    fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }
}
