//! One-time reflection of a WGSL pass program.
//!
//! Pass programs expose their parameters by name: one group-0 uniform buffer
//! whose struct members are matched against known roles, and group-0
//! textures (each optionally paired with a `<name>_sampler`). Reflection
//! runs once when the chain is built; per-frame binding only uses the
//! offsets and binding numbers recorded here.

use naga::{AddressSpace, ImageDimension, ScalarKind, ShaderStage, TypeInner, VectorSize};

use crate::error::{ChainError, Result};
use crate::history::PREV_TEXTURES;

/// Size or texel-size pair of a referenced texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SizeKind {
    /// Logical content size (`*_video_size`).
    Video,
    /// Allocated size (`*_texture_size`).
    Texture,
}

/// Textures a program can reference besides LUTs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureRef {
    /// Input of the current pass.
    Source,
    /// Untouched input frame of this frame.
    Orig,
    /// Input frame committed `n` frames ago, 0 = `prev`.
    Prev(usize),
    /// Output of absolute pass `n`, 1-based.
    Pass(usize),
    /// Output `n` passes back from the current pass; 1 = the current source.
    PassPrev(usize),
    /// Lookup texture by id.
    Lut(String),
}

/// What a uniform member receives each frame.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformRole {
    Mvp,
    /// `video_size`, `texture_size`, `orig_video_size`, `prev1_texture_size`...
    Size(TextureRef, SizeKind),
    OutputSize,
    FrameCount,
    FrameDirection,
    /// Any other `f32` member; matched against tracked variable ids.
    Tracked(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniformField {
    pub name: String,
    pub role: UniformRole,
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureSlot {
    pub name: String,
    pub texture: TextureRef,
    pub binding: u32,
    pub sampler_binding: Option<u32>,
}

/// Binding layout of a validated pass program.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgramReflection {
    pub label: String,
    pub uniform_binding: u32,
    /// Uniform buffer size, padded to 16 bytes.
    pub uniform_size: u32,
    pub fields: Vec<UniformField>,
    pub textures: Vec<TextureSlot>,
    /// Members the chain does not recognise; left zeroed.
    pub ignored: Vec<String>,
}

#[derive(Clone, Copy)]
enum MemberType {
    Mat4,
    Vec2,
    Float,
    Other,
}

fn member_type(inner: &TypeInner) -> MemberType {
    let float = inner.scalar_kind() == Some(ScalarKind::Float);
    match inner {
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            ..
        } if float => MemberType::Mat4,
        TypeInner::Vector {
            size: VectorSize::Bi,
            ..
        } if float => MemberType::Vec2,
        TypeInner::Scalar { .. } if float => MemberType::Float,
        _ => MemberType::Other,
    }
}

/// Parse a texture name into the reference it denotes.
pub fn texture_ref(name: &str) -> TextureRef {
    match name {
        "source" => return TextureRef::Source,
        "orig" => return TextureRef::Orig,
        "prev" => return TextureRef::Prev(0),
        _ => {}
    }
    if let Some(n) = numbered(name, "prev") {
        if (1..PREV_TEXTURES).contains(&n) {
            return TextureRef::Prev(n);
        }
    }
    if let Some(n) = numbered(name, "passprev") {
        if n >= 1 {
            return TextureRef::PassPrev(n);
        }
    }
    if let Some(n) = numbered(name, "pass") {
        if n >= 1 {
            return TextureRef::Pass(n);
        }
    }
    TextureRef::Lut(name.to_string())
}

fn numbered(name: &str, prefix: &str) -> Option<usize> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Role of a uniform member, or `None` when the name is not recognised and
/// the type rules out a tracked variable.
fn uniform_role(name: &str, ty: MemberType) -> Result<Option<UniformRole>> {
    let expect = |want: &str, ok: bool| -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(ChainError::Config(format!(
                "uniform `{}` must be {}",
                name, want
            )))
        }
    };

    let fixed = match name {
        "mvp" => {
            expect("mat4x4<f32>", matches!(ty, MemberType::Mat4))?;
            return Ok(Some(UniformRole::Mvp));
        }
        "output_size" => Some(UniformRole::OutputSize),
        "video_size" => Some(UniformRole::Size(TextureRef::Source, SizeKind::Video)),
        "texture_size" => Some(UniformRole::Size(TextureRef::Source, SizeKind::Texture)),
        "frame_count" | "frame_direction" => {
            expect("f32", matches!(ty, MemberType::Float))?;
            return Ok(Some(if name == "frame_count" {
                UniformRole::FrameCount
            } else {
                UniformRole::FrameDirection
            }));
        }
        _ => None,
    };
    if let Some(role) = fixed {
        expect("vec2<f32>", matches!(ty, MemberType::Vec2))?;
        return Ok(Some(role));
    }

    let sized = [("_video_size", SizeKind::Video), ("_texture_size", SizeKind::Texture)]
        .into_iter()
        .find_map(|(suffix, kind)| name.strip_suffix(suffix).map(|stem| (stem, kind)));
    if let Some((stem, kind)) = sized {
        let texture = texture_ref(stem);
        if !matches!(texture, TextureRef::Lut(_)) {
            expect("vec2<f32>", matches!(ty, MemberType::Vec2))?;
            return Ok(Some(UniformRole::Size(texture, kind)));
        }
    }

    Ok(match ty {
        MemberType::Float => Some(UniformRole::Tracked(name.to_string())),
        _ => None,
    })
}

impl ProgramReflection {
    /// Parse, validate and reflect a WGSL pass program.
    pub fn from_wgsl(label: &str, source: &str) -> Result<Self> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| ChainError::compile(label, e.emit_to_string(source)))?;
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| ChainError::compile(label, format!("{:?}", e)))?;

        Self::from_module(label, &module).map_err(|e| match e {
            ChainError::Config(message) => ChainError::compile(label, message),
            other => other,
        })
    }

    fn from_module(label: &str, module: &naga::Module) -> Result<Self> {
        for (entry, stage) in [("vs_main", ShaderStage::Vertex), ("fs_main", ShaderStage::Fragment)] {
            if !module
                .entry_points
                .iter()
                .any(|ep| ep.name == entry && ep.stage == stage)
            {
                return Err(ChainError::Config(format!("missing entry point `{}`", entry)));
            }
        }

        let mut uniform: Option<(u32, naga::Handle<naga::Type>)> = None;
        let mut textures: Vec<(String, u32)> = Vec::new();
        let mut samplers: Vec<(String, u32)> = Vec::new();

        for (_, var) in module.global_variables.iter() {
            let Some(binding) = &var.binding else {
                continue;
            };
            let name = var.name.clone().unwrap_or_default();
            if binding.group != 0 {
                return Err(ChainError::Config(format!(
                    "`{}` is in bind group {}; pass programs use group 0 only",
                    name, binding.group
                )));
            }
            match (&var.space, &module.types[var.ty].inner) {
                (AddressSpace::Uniform, _) => {
                    if uniform.is_some() {
                        return Err(ChainError::Config(
                            "more than one uniform buffer declared".into(),
                        ));
                    }
                    uniform = Some((binding.binding, var.ty));
                }
                (
                    AddressSpace::Handle,
                    TypeInner::Image {
                        dim: ImageDimension::D2,
                        arrayed: false,
                        ..
                    },
                ) => textures.push((name, binding.binding)),
                (AddressSpace::Handle, TypeInner::Sampler { comparison: false }) => {
                    samplers.push((name, binding.binding))
                }
                _ => {
                    return Err(ChainError::Config(format!(
                        "unsupported resource `{}` at binding {}",
                        name, binding.binding
                    )));
                }
            }
        }

        let (uniform_binding, uniform_ty) =
            uniform.ok_or_else(|| ChainError::Config("no uniform buffer; `mvp` is required".into()))?;
        let TypeInner::Struct { members, span } = &module.types[uniform_ty].inner else {
            return Err(ChainError::Config("uniform buffer must be a struct".into()));
        };

        let mut fields = Vec::new();
        let mut ignored = Vec::new();
        for member in members {
            let name = member.name.clone().unwrap_or_default();
            let ty = member_type(&module.types[member.ty].inner);
            match uniform_role(&name, ty)? {
                Some(role) => fields.push(UniformField {
                    name,
                    role,
                    offset: member.offset,
                }),
                None => ignored.push(name),
            }
        }
        if !fields.iter().any(|f| f.role == UniformRole::Mvp) {
            return Err(ChainError::Config("uniform struct has no `mvp` member".into()));
        }

        let mut slots = Vec::with_capacity(textures.len());
        for (name, binding) in textures {
            let sampler_name = format!("{}_sampler", name);
            let sampler_binding = samplers
                .iter()
                .position(|(s, _)| *s == sampler_name)
                .map(|i| samplers.swap_remove(i).1);
            slots.push(TextureSlot {
                texture: texture_ref(&name),
                name,
                binding,
                sampler_binding,
            });
        }
        if let Some((orphan, _)) = samplers.first() {
            return Err(ChainError::Config(format!(
                "sampler `{}` has no matching texture",
                orphan
            )));
        }
        slots.sort_by_key(|s| s.binding);

        let reflection = Self {
            label: label.to_string(),
            uniform_binding,
            uniform_size: (*span).div_ceil(16) * 16,
            fields,
            textures: slots,
            ignored,
        };
        log::debug!(
            "program reflected: label={} uniform_size={} fields={} textures={} ignored={:?}",
            reflection.label,
            reflection.uniform_size,
            reflection.fields.len(),
            reflection.textures.len(),
            reflection.ignored
        );
        Ok(reflection)
    }

    /// Offset of the `mvp` member.
    pub fn mvp_offset(&self) -> u32 {
        self.fields
            .iter()
            .find(|f| f.role == UniformRole::Mvp)
            .map(|f| f.offset)
            .unwrap_or(0)
    }

    pub fn texture(&self, name: &str) -> Option<&TextureSlot> {
        self.textures.iter().find(|t| t.name == name)
    }
}
