//! Recording backend with no GPU behind it.
//!
//! Keeps enough state to check what the chain asked for (live resources,
//! every draw with its bindings and uniform bytes, submitted versus aborted
//! frames) and can be told to fail allocations or buffer uploads to
//! exercise per-frame recovery.

use std::collections::HashMap;

use crate::backend::{
    BufferId, BufferKind, DrawCall, GpuBackend, ProgramId, Rect, RenderDest, TextureBinding,
    TextureDesc, TextureId,
};
use crate::error::{ChainError, Result};
use crate::reflect::ProgramReflection;

/// Running totals of backend calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub textures_created: u64,
    pub textures_released: u64,
    pub texture_writes: u64,
    pub clears: u64,
    pub buffers_created: u64,
    pub buffer_writes: u64,
    pub programs_created: u64,
    pub draws: u64,
    pub frames_submitted: u64,
    pub frames_aborted: u64,
}

/// A draw as the backend received it.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedDraw {
    pub pass_index: usize,
    pub program: ProgramId,
    pub program_label: String,
    pub dest: RenderDest,
    pub viewport: Rect,
    pub clear: bool,
    pub textures: Vec<TextureBinding>,
    /// Uniform buffer contents at draw time.
    pub uniforms: Vec<u8>,
    /// Vertex buffer contents at draw time.
    pub vertices: Vec<u8>,
}

impl RecordedDraw {
    /// Texture bound at `binding`, if any.
    pub fn texture_at(&self, binding: u32) -> Option<TextureId> {
        self.textures
            .iter()
            .find(|t| t.binding == binding)
            .map(|t| t.texture)
    }

    /// Read the `f32` at byte `offset` of the uniform block.
    pub fn uniform_f32(&self, offset: usize) -> Option<f32> {
        let bytes = self.uniforms.get(offset..offset + 4)?;
        Some(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[derive(Debug)]
struct HeadlessBuffer {
    label: String,
    kind: BufferKind,
    data: Vec<u8>,
}

pub struct HeadlessBackend {
    next_id: u32,
    textures: HashMap<TextureId, TextureDesc>,
    buffers: HashMap<BufferId, HeadlessBuffer>,
    programs: HashMap<ProgramId, String>,
    in_frame: bool,
    pending: Vec<RecordedDraw>,
    frames: Vec<Vec<RecordedDraw>>,
    backbuffer_generation: u64,
    resting: Option<ProgramId>,
    failing_labels: Vec<String>,
    failing_writes: Vec<String>,
    max_dimension: u32,
    stats: BackendStats,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            in_frame: false,
            pending: Vec::new(),
            frames: Vec::new(),
            backbuffer_generation: 0,
            resting: None,
            failing_labels: Vec::new(),
            failing_writes: Vec::new(),
            max_dimension: 8192,
            stats: BackendStats::default(),
        }
    }

    pub fn with_max_texture_dimension(mut self, max: u32) -> Self {
        self.max_dimension = max;
        self
    }

    /// Fail every texture or buffer allocation whose label contains `label`
    /// until [`clear_faults`](Self::clear_faults) is called.
    pub fn fail_allocations_matching(&mut self, label: &str) {
        self.failing_labels.push(label.to_string());
    }

    /// Fail uploads into buffers whose label contains `label`.
    pub fn fail_buffer_writes_matching(&mut self, label: &str) {
        self.failing_writes.push(label.to_string());
    }

    pub fn clear_faults(&mut self) {
        self.failing_labels.clear();
        self.failing_writes.clear();
    }

    pub fn stats(&self) -> BackendStats {
        self.stats
    }

    pub fn is_live(&self, id: TextureId) -> bool {
        self.textures.contains_key(&id)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn texture_desc(&self, id: TextureId) -> Option<&TextureDesc> {
        self.textures.get(&id)
    }

    /// Draws of every submitted frame, oldest first.
    pub fn submitted_frames(&self) -> &[Vec<RecordedDraw>] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&[RecordedDraw]> {
        self.frames.last().map(Vec::as_slice)
    }

    /// Bumped each time a submitted frame drew to the backbuffer.
    pub fn backbuffer_generation(&self) -> u64 {
        self.backbuffer_generation
    }

    pub fn resting_program(&self) -> Option<ProgramId> {
        self.resting
    }

    pub fn program_label(&self, id: ProgramId) -> Option<&str> {
        self.programs.get(&id).map(String::as_str)
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer_bytes(&self, id: BufferId, kind: BufferKind) -> Result<Vec<u8>> {
        match self.buffers.get(&id) {
            Some(buffer) if buffer.kind == kind => Ok(buffer.data.clone()),
            Some(buffer) => Err(ChainError::Logic(format!(
                "draw binds `{}` as a {:?} buffer",
                buffer.label, kind
            ))),
            None => Err(ChainError::Logic(format!("draw uses unknown buffer {:?}", id))),
        }
    }
}

fn injected_fault(patterns: &[String], label: &str, what: &str) -> Result<()> {
    match patterns.iter().find(|p| label.contains(p.as_str())) {
        Some(pattern) => Err(ChainError::Resource(format!(
            "injected {} failure for `{}` (matched `{}`)",
            what, label, pattern
        ))),
        None => Ok(()),
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        injected_fault(&self.failing_labels, &desc.label, "allocation")?;
        if desc.width == 0
            || desc.height == 0
            || desc.width > self.max_dimension
            || desc.height > self.max_dimension
        {
            return Err(ChainError::Resource(format!(
                "texture `{}` size {}x{} unsupported",
                desc.label, desc.width, desc.height
            )));
        }
        let id = TextureId(self.next());
        self.textures.insert(id, desc.clone());
        self.stats.textures_created += 1;
        Ok(id)
    }

    fn release_texture(&mut self, id: TextureId) {
        if self.textures.remove(&id).is_some() {
            self.stats.textures_released += 1;
        }
    }

    fn write_texture(&mut self, id: TextureId, width: u32, height: u32, data: &[u8]) -> Result<()> {
        let desc = self
            .textures
            .get(&id)
            .ok_or_else(|| ChainError::Logic(format!("write to unknown texture {:?}", id)))?;
        if width > desc.width || height > desc.height {
            return Err(ChainError::Logic(format!(
                "write of {}x{} into {}x{} texture `{}`",
                width, height, desc.width, desc.height, desc.label
            )));
        }
        let expected = (width * height * desc.format.bytes_per_texel()) as usize;
        if data.len() != expected {
            return Err(ChainError::Logic(format!(
                "write of {} bytes, {}x{} needs {}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        self.stats.texture_writes += 1;
        Ok(())
    }

    fn clear_texture(&mut self, id: TextureId) -> Result<()> {
        if !self.textures.contains_key(&id) {
            return Err(ChainError::Logic(format!("clear of unknown texture {:?}", id)));
        }
        self.stats.clears += 1;
        Ok(())
    }

    fn create_buffer(&mut self, label: &str, kind: BufferKind, size: u64) -> Result<BufferId> {
        injected_fault(&self.failing_labels, label, "allocation")?;
        let id = BufferId(self.next());
        self.buffers.insert(
            id,
            HeadlessBuffer {
                label: label.to_string(),
                kind,
                data: vec![0; size as usize],
            },
        );
        self.stats.buffers_created += 1;
        Ok(id)
    }

    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| ChainError::Logic(format!("write to unknown buffer {:?}", id)))?;
        injected_fault(&self.failing_writes, &buffer.label, "upload")?;
        let contents = &mut buffer.data;
        if data.len() > contents.len() {
            return Err(ChainError::Logic(format!(
                "write of {} bytes into {}-byte buffer",
                data.len(),
                contents.len()
            )));
        }
        contents[..data.len()].copy_from_slice(data);
        self.stats.buffer_writes += 1;
        Ok(())
    }

    fn release_buffer(&mut self, id: BufferId) {
        self.buffers.remove(&id);
    }

    fn create_program(
        &mut self,
        label: &str,
        _source: &str,
        _reflection: &ProgramReflection,
    ) -> Result<ProgramId> {
        let id = ProgramId(self.next());
        self.programs.insert(id, label.to_string());
        self.stats.programs_created += 1;
        Ok(id)
    }

    fn release_program(&mut self, id: ProgramId) {
        self.programs.remove(&id);
        if self.resting == Some(id) {
            self.resting = None;
        }
    }

    fn begin_frame(&mut self) -> Result<()> {
        if self.in_frame {
            return Err(ChainError::Logic("begin_frame inside an open frame".into()));
        }
        self.in_frame = true;
        self.pending.clear();
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        if !self.in_frame {
            return Err(ChainError::Logic("draw outside a frame".into()));
        }
        let program_label = self
            .programs
            .get(&call.program)
            .cloned()
            .ok_or_else(|| ChainError::Logic(format!("draw with unknown program {:?}", call.program)))?;
        if let RenderDest::Target(target) = call.dest {
            match self.textures.get(&target) {
                Some(desc) if desc.render_target => {}
                _ => {
                    return Err(ChainError::Logic(format!(
                        "draw into {:?}, which is not a live render target",
                        target
                    )));
                }
            }
        }
        for binding in call.textures {
            if !self.textures.contains_key(&binding.texture) {
                return Err(ChainError::Logic(format!(
                    "binding {} samples released texture {:?}",
                    binding.binding, binding.texture
                )));
            }
        }
        let uniforms = self.buffer_bytes(call.uniform_buffer, BufferKind::Uniform)?;
        let vertices = self.buffer_bytes(call.vertex_buffer, BufferKind::Vertex)?;
        self.pending.push(RecordedDraw {
            pass_index: call.pass_index,
            program: call.program,
            program_label,
            dest: call.dest,
            viewport: call.viewport,
            clear: call.clear,
            textures: call.textures.to_vec(),
            uniforms,
            vertices,
        });
        self.stats.draws += 1;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        if !self.in_frame {
            return Err(ChainError::Logic("end_frame without begin_frame".into()));
        }
        self.in_frame = false;
        let draws = std::mem::take(&mut self.pending);
        if draws.iter().any(|d| d.dest == RenderDest::Backbuffer) {
            self.backbuffer_generation += 1;
        }
        self.frames.push(draws);
        self.stats.frames_submitted += 1;
        Ok(())
    }

    fn abort_frame(&mut self) {
        if self.in_frame {
            self.in_frame = false;
            self.pending.clear();
            self.stats.frames_aborted += 1;
        }
    }

    fn bind_resting_program(&mut self, program: ProgramId) {
        self.resting = Some(program);
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }
}
