//! PostFX configuration system
//!
//! Loads chain settings from `postfx.toml` with environment variable
//! overrides, and describes shader presets (ordered passes, lookup textures
//! and tracked variables) as plain data for the render chain to consume.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod preset;

pub use preset::{
    FilterMode, LutDesc, PassDesc, PresetError, ScaleDesc, ShaderPreset, ShaderRef,
    VariableDesc, VariableKind, VariableWidth, WrapMode,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PostFxConfig {
    /// Render chain construction settings
    pub chain: ChainSettings,
    /// Headless demo settings
    pub demo: DemoConfig,
}

/// Render chain construction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// Preset file to load; `None` renders with the pass-through chain
    pub preset: Option<PathBuf>,
    /// Filter used by passes whose preset entry leaves the filter unspecified
    pub smooth: bool,
    /// Upper bound on the number of passes a preset may declare
    pub max_passes: usize,
    /// Size of each history ring slot; submitted frames may not exceed it
    pub max_input_width: u32,
    pub max_input_height: u32,
    /// Bias quad vertices by half a texel so texel centres land on pixel centres
    pub texel_alignment: bool,
    /// Round intermediate render target allocations up to powers of two
    pub pow2_targets: bool,
}

/// Headless demo configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Where the final frame is written
    pub output: PathBuf,
    /// Number of synthetic frames pushed through the chain
    pub frames: u32,
    /// Synthetic input frame size
    pub input_width: u32,
    pub input_height: u32,
    /// Offscreen backbuffer size
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            preset: None,
            smooth: false,
            max_passes: 16,
            max_input_width: 1024,
            max_input_height: 1024,
            texel_alignment: true,
            pow2_targets: false,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("postfx-out.png"),
            frames: 4,
            input_width: 256,
            input_height: 224,
            viewport_width: 1024,
            viewport_height: 768,
        }
    }
}

fn env_flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}

impl PostFxConfig {
    /// Load configuration from a TOML file
    ///
    /// # Returns
    /// * `Ok(PostFxConfig)` - Successfully loaded configuration
    /// * `Err(String)` - Error message if loading failed
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {}", e))
    }

    /// Load configuration from `postfx.toml` in the current directory,
    /// or return defaults if the file doesn't exist
    pub fn load_or_default() -> Self {
        Self::load_from_file("postfx.toml").unwrap_or_default()
    }

    /// Merge configuration with environment variables
    ///
    /// Environment variables take precedence over configuration file values.
    pub fn merge_with_env(&mut self) {
        if let Ok(path) = std::env::var("POSTFX_PRESET") {
            self.chain.preset = Some(PathBuf::from(path));
        }
        if let Ok(val) = std::env::var("POSTFX_SMOOTH") {
            self.chain.smooth = env_flag(&val);
        }
        if let Ok(val) = std::env::var("POSTFX_MAX_PASSES") {
            if let Ok(max) = val.parse::<usize>() {
                self.chain.max_passes = max;
            }
        }
        if let Ok(val) = std::env::var("POSTFX_TEXEL_ALIGN") {
            self.chain.texel_alignment = env_flag(&val);
        }
        if let Ok(val) = std::env::var("POSTFX_POW2_TARGETS") {
            self.chain.pow2_targets = env_flag(&val);
        }
        if let Ok(out) = std::env::var("POSTFX_OUTPUT") {
            self.demo.output = PathBuf::from(out);
        }
    }

    /// Load configuration with environment variable overrides
    ///
    /// 1. Load from postfx.toml (or use defaults if not found)
    /// 2. Override with environment variables if present
    pub fn load() -> Self {
        let mut config = Self::load_or_default();
        config.merge_with_env();
        config
    }
}
