//! postfx-core: multi-pass post-processing chain for emulator frames.
//!
//! A [`RenderChain`] takes raw frames from the host, keeps a short history of
//! them, and draws an ordered list of shader passes where each pass samples
//! the previous pass's output and the last one lands in the backbuffer.
//! GPU access goes through [`GpuBackend`]; [`WgpuBackend`] drives a real
//! device and [`HeadlessBackend`] records draws for tests and tooling.

/// Re-export wgpu for downstream crates while avoiding direct dependency leakage.
pub use wgpu;

pub use postfx_config::{ChainSettings, PassDesc, ScaleDesc, ShaderPreset};

mod backend;
pub use backend::{
    BufferId, BufferKind, DrawCall, GpuBackend, ProgramId, Rect, RenderDest, SamplerKey,
    TexelFormat, TextureBinding, TextureDesc, TextureId,
};

mod binder;
pub use binder::{BindContext, BindingTable, FrameParams, TextureState};

mod chain;
pub use chain::{BuildError, FrameDirection, RenderChain};

mod convert;
pub use convert::{FrameConverter, PixelFormat};

mod error;
pub use error::{ChainError, Result};

pub mod geometry;
pub use geometry::{GeometryCache, QuadVertex};

mod headless;
pub use headless::{BackendStats, HeadlessBackend, RecordedDraw};

mod history;
pub use history::{HISTORY_SLOTS, HistoryRing, HistorySlot, PREV_TEXTURES};

mod pool;
pub use pool::{LutTexture, RenderTarget, TargetStatus, TexturePool};

pub mod reflect;
pub use reflect::ProgramReflection;

pub mod scale;

mod sequencer;
pub use sequencer::{
    CompiledPass, FrameInputs, FrameOutcome, FrameReport, PassSequencer, SequencerState, Viewport,
};

mod tracker;
pub use tracker::{MemorySource, MemoryTracker, StateTracker, TrackedValue};

mod wgpu_backend;
pub use wgpu_backend::WgpuBackend;
