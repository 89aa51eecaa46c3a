//! Shader baking with naga.
//!
//! A bake parses one stage, validates it and emits code for every backend the
//! runtime might pick, so a cached module never needs recompiling when the
//! host switches graphics API.

use std::{collections::BTreeMap, fmt};

use anyhow::{Context, Result, anyhow};
use naga::{back, front, valid};

use crate::error::{CompositorError, CompositorResult};

use super::{
    reflect::ShaderInterface,
    source::{ShaderLanguage, ShaderSource, ShaderStage},
};

/// Backend representations produced by every bake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BakeTarget {
    /// SPIR-V 1.0 for Vulkan.
    SpirV,
    Wgsl,
    /// Metal Shading Language 1.2.
    Msl,
    /// HLSL shader model 5.1.
    Hlsl,
    /// GLSL 330 core, desktop OpenGL.
    Glsl330,
    GlslEs300,
    GlslEs310,
}

impl BakeTarget {
    pub const ALL: [BakeTarget; 7] = [
        BakeTarget::SpirV,
        BakeTarget::Wgsl,
        BakeTarget::Msl,
        BakeTarget::Hlsl,
        BakeTarget::Glsl330,
        BakeTarget::GlslEs300,
        BakeTarget::GlslEs310,
    ];

    pub fn label(self) -> &'static str {
        match self {
            BakeTarget::SpirV => "spirv-1.0",
            BakeTarget::Wgsl => "wgsl",
            BakeTarget::Msl => "msl-1.2",
            BakeTarget::Hlsl => "hlsl-5.1",
            BakeTarget::Glsl330 => "glsl-330",
            BakeTarget::GlslEs300 => "glsl-300es",
            BakeTarget::GlslEs310 => "glsl-310es",
        }
    }

    fn glsl_version(self) -> Option<back::glsl::Version> {
        match self {
            BakeTarget::Glsl330 => Some(back::glsl::Version::Desktop(330)),
            BakeTarget::GlslEs300 => Some(back::glsl::Version::Embedded {
                version: 300,
                is_webgl: false,
            }),
            BakeTarget::GlslEs310 => Some(back::glsl::Version::Embedded {
                version: 310,
                is_webgl: false,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for BakeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BakedCode {
    Text(String),
    SpirV(Vec<u32>),
}

/// One shader stage compiled for every [`BakeTarget`].
#[derive(Debug)]
pub struct CompiledModule {
    stage: ShaderStage,
    origin: String,
    entry_point: String,
    interface: ShaderInterface,
    interface_issues: Vec<String>,
    outputs: BTreeMap<BakeTarget, BakedCode>,
}

impl CompiledModule {
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Where the source came from (path or inline hash).
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn interface(&self) -> &ShaderInterface {
        &self.interface
    }

    /// Bindings that fall outside the compositor slot layout.
    pub fn interface_issues(&self) -> &[String] {
        &self.interface_issues
    }

    pub fn code(&self, target: BakeTarget) -> Option<&BakedCode> {
        self.outputs.get(&target)
    }

    pub fn wgsl(&self) -> Option<&str> {
        match self.outputs.get(&BakeTarget::Wgsl)? {
            BakedCode::Text(text) => Some(text),
            BakedCode::SpirV(_) => None,
        }
    }

    pub fn spirv(&self) -> Option<&[u32]> {
        match self.outputs.get(&BakeTarget::SpirV)? {
            BakedCode::SpirV(words) => Some(words),
            BakedCode::Text(_) => None,
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = BakeTarget> + '_ {
        self.outputs.keys().copied()
    }
}

/// Compile `source` for every bake target.
pub fn bake(source: &ShaderSource) -> CompositorResult<CompiledModule> {
    bake_module(source).map_err(|e| CompositorError::Compile {
        stage: source.stage(),
        origin: source.origin(),
        message: format!("{e:#}"),
    })
}

fn bake_module(source: &ShaderSource) -> Result<CompiledModule> {
    let module = parse(source)?;
    let info = valid::Validator::new(valid::ValidationFlags::all(), valid::Capabilities::all())
        .validate(&module)
        .map_err(|e| anyhow!("validation failed:\n{}", e.emit_to_string(source.text())))?;

    let stage = source.stage().to_naga();
    let entry_point = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == stage)
        .map(|ep| ep.name.clone())
        .ok_or_else(|| anyhow!("no {} entry point", source.stage()))?;

    let (interface, interface_issues) = ShaderInterface::reflect(&module);

    let mut outputs = BTreeMap::new();
    for target in BakeTarget::ALL {
        let code = emit(&module, &info, target, stage, &entry_point)
            .with_context(|| format!("{target} output"))?;
        outputs.insert(target, code);
    }

    Ok(CompiledModule {
        stage: source.stage(),
        origin: source.origin(),
        entry_point,
        interface,
        interface_issues,
        outputs,
    })
}

fn parse(source: &ShaderSource) -> Result<naga::Module> {
    match source.language() {
        ShaderLanguage::Glsl => {
            let mut frontend = front::glsl::Frontend::default();
            let options = front::glsl::Options::from(source.stage().to_naga());
            frontend
                .parse(&options, source.text())
                .map_err(|e| anyhow!("GLSL parse failed: {e:?}"))
        }
        ShaderLanguage::Wgsl => front::wgsl::parse_str(source.text())
            .map_err(|e| anyhow!("WGSL parse failed:\n{}", e.emit_to_string(source.text()))),
    }
}

fn emit(
    module: &naga::Module,
    info: &valid::ModuleInfo,
    target: BakeTarget,
    stage: naga::ShaderStage,
    entry_point: &str,
) -> Result<BakedCode> {
    match target {
        BakeTarget::SpirV => {
            let words = back::spv::write_vec(module, info, &back::spv::Options::default(), None)
                .map_err(|e| anyhow!("{e}"))?;
            Ok(BakedCode::SpirV(words))
        }
        BakeTarget::Wgsl => {
            let text = back::wgsl::write_string(module, info, back::wgsl::WriterFlags::EXPLICIT_TYPES)
                .map_err(|e| anyhow!("{e}"))?;
            Ok(BakedCode::Text(text))
        }
        BakeTarget::Msl => {
            let options = back::msl::Options {
                lang_version: (1, 2),
                ..Default::default()
            };
            let (text, _) = back::msl::write_string(
                module,
                info,
                &options,
                &back::msl::PipelineOptions::default(),
            )
            .map_err(|e| anyhow!("{e}"))?;
            Ok(BakedCode::Text(text))
        }
        BakeTarget::Hlsl => {
            let options = back::hlsl::Options::default();
            let mut text = String::new();
            {
                let mut writer = back::hlsl::Writer::new(&mut text, &options);
                writer.write(module, info).map_err(|e| anyhow!("{e}"))?;
            }
            Ok(BakedCode::Text(text))
        }
        BakeTarget::Glsl330 | BakeTarget::GlslEs300 | BakeTarget::GlslEs310 => {
            let Some(version) = target.glsl_version() else {
                return Err(anyhow!("{target} is not a GLSL profile"));
            };
            let options = back::glsl::Options {
                version,
                binding_map: glsl_binding_map(module),
                ..Default::default()
            };
            let pipeline_options = back::glsl::PipelineOptions {
                shader_stage: stage,
                entry_point: entry_point.to_string(),
                multiview: None,
            };
            let mut text = String::new();
            {
                let mut writer = back::glsl::Writer::new(
                    &mut text,
                    module,
                    info,
                    &options,
                    &pipeline_options,
                    naga::proc::BoundsCheckPolicies::default(),
                )
                .map_err(|e| anyhow!("{e}"))?;
                writer.write().map_err(|e| anyhow!("{e}"))?;
            }
            Ok(BakedCode::Text(text))
        }
    }
}

/// Keep binding numbers stable on GLSL profiles that support explicit
/// `layout(binding = N)`.
fn glsl_binding_map(module: &naga::Module) -> back::glsl::BindingMap {
    module
        .global_variables
        .iter()
        .filter_map(|(_, var)| var.binding.clone())
        .filter_map(|rb| u8::try_from(rb.binding).ok().map(|slot| (rb, slot)))
        .collect()
}
