//! Shader preset description.
//!
//! A preset is the in-memory form of a multi-pass shader configuration:
//! an ordered list of passes, the lookup textures they sample by id, and
//! the tracked variables exposed to them. Presets are written in TOML:
//!
//! ```toml
//! [[passes]]
//! shader = "crt.wgsl"
//! filter = "nearest"
//! scale = { type = "input", factor = 2.0 }
//!
//! [[passes]]
//! shader = { builtin = "scanlines" }
//! frame_count_mod = 2
//!
//! [[luts]]
//! id = "color_lut"
//! path = "grade.png"
//! filter = "linear"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading or validating a preset.
#[derive(Error, Debug)]
pub enum PresetError {
    /// Preset file could not be read.
    #[error("failed to read preset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Preset file is not valid TOML for the preset schema.
    #[error("failed to parse preset: {0}")]
    Parse(#[from] toml::de::Error),

    /// Preset parsed but describes something unusable.
    #[error("invalid preset: {0}")]
    Invalid(String),
}

/// How a pass derives its output size along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScaleDesc {
    /// Multiple of the pass's input size.
    Input { factor: f32 },
    /// Multiple of the final viewport size.
    Viewport { factor: f32 },
    /// Fixed size in pixels.
    Absolute { size: u32 },
}

/// Texture filtering requested by a pass or lookup texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Follow the chain-wide `smooth` setting.
    #[default]
    Unspecified,
    Linear,
    Nearest,
}

/// Texture addressing outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapMode {
    #[default]
    Border,
    Edge,
    Repeat,
    MirroredRepeat,
}

/// Where a pass's program comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShaderRef {
    /// WGSL file on disk.
    File(PathBuf),
    /// Program bundled with the chain, by name.
    Builtin { builtin: String },
    /// WGSL source embedded in the preset.
    Inline { inline: String },
}

/// One stage of the chain as written in the preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassDesc {
    pub shader: ShaderRef,
    /// Sets both axes; `scale_x`/`scale_y` override it per axis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleDesc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_x: Option<ScaleDesc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_y: Option<ScaleDesc>,
    #[serde(default)]
    pub filter: FilterMode,
    #[serde(default)]
    pub wrap: WrapMode,
    /// Frame counter modulo seen by this pass; 0 leaves it unbounded.
    #[serde(default)]
    pub frame_count_mod: u32,
    /// Request a floating-point render target for this pass's output.
    #[serde(default)]
    pub float_framebuffer: bool,
}

/// A static image sampled by passes under a symbolic id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LutDesc {
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub filter: FilterMode,
    #[serde(default)]
    pub wrap: WrapMode,
}

/// How a tracked variable derives its value from memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    /// The value read this frame.
    Capture,
    /// The value read on the previous frame.
    CapturePrev,
    /// Frame count at which the value last changed.
    Transition,
    /// Number of times the value has changed.
    TransitionCount,
    /// Frame count of the change before the last one.
    TransitionPrev,
}

/// Width of the memory read behind a tracked variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableWidth {
    #[default]
    U8,
    U16,
}

/// A named value read from emulated memory and exposed as a uniform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDesc {
    pub id: String,
    pub kind: VariableKind,
    pub address: u32,
    #[serde(default)]
    pub width: VariableWidth,
    /// Bit mask applied to the read value; 0 means no mask.
    #[serde(default)]
    pub mask: u32,
    /// When non-zero the value becomes 1 if it equals this, else 0.
    #[serde(default)]
    pub equal: u32,
}

/// Complete preset: passes run in order, LUTs and variables shared by all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShaderPreset {
    #[serde(default)]
    pub passes: Vec<PassDesc>,
    #[serde(default)]
    pub luts: Vec<LutDesc>,
    #[serde(default)]
    pub variables: Vec<VariableDesc>,
}

impl PassDesc {
    /// Pass with default scale, filter and wrap.
    pub fn new(shader: ShaderRef) -> Self {
        Self {
            shader,
            scale: None,
            scale_x: None,
            scale_y: None,
            filter: FilterMode::Unspecified,
            wrap: WrapMode::Border,
            frame_count_mod: 0,
            float_framebuffer: false,
        }
    }

    pub fn with_scale(mut self, scale: ScaleDesc) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Effective scale rules for both axes. Unscaled passes keep their input
    /// size, except the last pass which fills the viewport.
    pub fn scale_rules(&self, is_last: bool) -> (ScaleDesc, ScaleDesc) {
        let fallback = if is_last {
            ScaleDesc::Viewport { factor: 1.0 }
        } else {
            ScaleDesc::Input { factor: 1.0 }
        };
        let both = self.scale.unwrap_or(fallback);
        (self.scale_x.unwrap_or(both), self.scale_y.unwrap_or(both))
    }
}

impl ShaderPreset {
    /// One-pass preset running `shader` straight to the viewport.
    pub fn single(shader: ShaderRef) -> Self {
        Self {
            passes: vec![PassDesc::new(shader)],
            ..Default::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, PresetError> {
        let preset: ShaderPreset = toml::from_str(content)?;
        preset.validate()?;
        Ok(preset)
    }

    /// Read a preset file; relative shader and LUT paths are resolved
    /// against the file's directory.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PresetError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PresetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut preset = Self::from_toml_str(&content)?;
        if let Some(dir) = path.parent() {
            preset.resolve_relative(dir);
        }
        Ok(preset)
    }

    /// Rewrite relative file references so they are relative to `base`.
    pub fn resolve_relative(&mut self, base: &Path) {
        for pass in &mut self.passes {
            if let ShaderRef::File(file) = &mut pass.shader {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
        for lut in &mut self.luts {
            if lut.path.is_relative() {
                lut.path = base.join(&lut.path);
            }
        }
    }

    /// Structural checks that do not need a GPU.
    pub fn validate(&self) -> Result<(), PresetError> {
        if self.passes.is_empty() {
            return Err(PresetError::Invalid("preset declares no passes".into()));
        }
        for (i, lut) in self.luts.iter().enumerate() {
            if lut.id.is_empty() {
                return Err(PresetError::Invalid(format!("lut #{} has an empty id", i)));
            }
            if self.luts[..i].iter().any(|other| other.id == lut.id) {
                return Err(PresetError::Invalid(format!("duplicate lut id `{}`", lut.id)));
            }
        }
        for (i, var) in self.variables.iter().enumerate() {
            if var.id.is_empty() {
                return Err(PresetError::Invalid(format!("variable #{} has an empty id", i)));
            }
            if self.variables[..i].iter().any(|other| other.id == var.id) {
                return Err(PresetError::Invalid(format!("duplicate variable id `{}`", var.id)));
            }
        }
        Ok(())
    }
}
