//! Effect manifests (`metadata.json`).
//!
//! An effect directory holds its shaders plus a manifest naming them, the
//! buffer pass setup and the defaults for custom parameter slots.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{CompositorError, CompositorResult},
    params::{CUSTOM_COLOR_COUNT, CUSTOM_PARAM_COUNT},
    pass_graph::{EdgeWrap, PassSpec},
    shader::ShaderLocation,
};

pub const MANIFEST_FILE_NAME: &str = "metadata.json";
pub const DEFAULT_VERTEX_SHADER: &str = "zone.vert";
pub const DEFAULT_FRAGMENT_SHADER: &str = "effect.frag";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EffectManifest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_vertex_shader", rename = "vertexShader")]
    pub vertex_shader: String,
    #[serde(default = "default_fragment_shader", rename = "fragmentShader")]
    pub fragment_shader: String,
    #[serde(default, rename = "bufferShaders")]
    pub buffer_shaders: Vec<String>,
    #[serde(default, rename = "bufferFeedback")]
    pub buffer_feedback: bool,
    #[serde(default = "default_buffer_scale", rename = "bufferScale")]
    pub buffer_scale: f32,
    #[serde(default, rename = "bufferWrap")]
    pub buffer_wrap: WrapMode,
    #[serde(default)]
    pub parameters: Vec<EffectParameter>,

    /// Directory the manifest was loaded from; shader paths resolve here.
    #[serde(skip)]
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    #[default]
    Clamp,
    Repeat,
}

impl From<WrapMode> for EdgeWrap {
    fn from(mode: WrapMode) -> Self {
        match mode {
            WrapMode::Clamp => EdgeWrap::Clamp,
            WrapMode::Repeat => EdgeWrap::Repeat,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Float,
    Color,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EffectParameter {
    pub id: String,
    pub slot: usize,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    #[serde(default)]
    pub default: Option<Value>,
}

/// A validated default for one custom slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterValue {
    Float { slot: usize, value: f32 },
    Color { slot: usize, rgba: [f32; 4] },
}

fn default_vertex_shader() -> String {
    DEFAULT_VERTEX_SHADER.to_string()
}

fn default_fragment_shader() -> String {
    DEFAULT_FRAGMENT_SHADER.to_string()
}

fn default_buffer_scale() -> f32 {
    1.0
}

impl EffectManifest {
    /// Load `metadata.json` from an effect directory, or a manifest file
    /// given directly.
    pub fn load(path: impl AsRef<Path>) -> CompositorResult<Self> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            path.join(MANIFEST_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        let text = std::fs::read_to_string(&file).map_err(|e| CompositorError::Manifest {
            path: file.clone(),
            message: e.to_string(),
        })?;
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, dir).map_err(|e| match e {
            CompositorError::Manifest { message, .. } => CompositorError::Manifest {
                path: file.clone(),
                message,
            },
            other => other,
        })
    }

    /// Parse manifest text whose shaders live in `dir`.
    pub fn parse(text: &str, dir: impl Into<PathBuf>) -> CompositorResult<Self> {
        let dir = dir.into();
        parse_manifest(text, dir.clone()).map_err(|e| CompositorError::Manifest {
            path: dir.join(MANIFEST_FILE_NAME),
            message: format!("{e:#}"),
        })
    }

    pub fn vertex_path(&self) -> PathBuf {
        self.dir.join(&self.vertex_shader)
    }

    pub fn fragment_path(&self) -> PathBuf {
        self.dir.join(&self.fragment_shader)
    }

    pub fn pass_spec(&self) -> PassSpec {
        let buffers = self
            .buffer_shaders
            .iter()
            .map(|name| ShaderLocation::file(self.dir.join(name)))
            .collect();
        PassSpec::new(buffers)
            .with_feedback(self.buffer_feedback)
            .with_scale(self.buffer_scale)
            .with_wrap(self.buffer_wrap.into())
    }

    /// Defaults for every parameter that declares one. Validated at load.
    pub fn parameter_defaults(&self) -> Vec<ParameterValue> {
        self.parameters
            .iter()
            .filter_map(|p| p.default_value().ok().flatten())
            .collect()
    }
}

impl EffectParameter {
    pub fn default_value(&self) -> Result<Option<ParameterValue>> {
        let Some(default) = &self.default else {
            return Ok(None);
        };
        let value = match self.kind {
            ParameterKind::Float => ParameterValue::Float {
                slot: self.slot,
                value: default
                    .as_f64()
                    .ok_or_else(|| anyhow!("expected a number, got {default}"))?
                    as f32,
            },
            ParameterKind::Color => ParameterValue::Color {
                slot: self.slot,
                rgba: parse_color(default)?,
            },
        };
        Ok(Some(value))
    }

    fn validate(&self) -> Result<()> {
        let limit = match self.kind {
            ParameterKind::Float => CUSTOM_PARAM_COUNT,
            ParameterKind::Color => CUSTOM_COLOR_COUNT,
        };
        if self.slot >= limit {
            bail!(
                "parameter '{}' uses {:?} slot {} (valid slots are 0..{limit})",
                self.id,
                self.kind,
                self.slot
            );
        }
        self.default_value()
            .with_context(|| format!("parameter '{}' default", self.id))?;
        Ok(())
    }
}

fn parse_manifest(text: &str, dir: PathBuf) -> Result<EffectManifest> {
    let mut manifest: EffectManifest =
        serde_json::from_str(text).context("failed to parse effect manifest json")?;
    if manifest.id.trim().is_empty() {
        bail!("effect id is empty");
    }
    for parameter in &manifest.parameters {
        parameter.validate()?;
    }
    manifest.dir = dir;
    Ok(manifest)
}

/// `#rrggbb`, `#rrggbbaa`, or `[r, g, b]` / `[r, g, b, a]` with components
/// in 0..1.
pub fn parse_color(value: &Value) -> Result<[f32; 4]> {
    match value {
        Value::String(text) => parse_hex_color(text),
        Value::Array(items) => {
            if !(3..=4).contains(&items.len()) {
                bail!("color array needs 3 or 4 components, got {}", items.len());
            }
            let mut rgba = [0.0, 0.0, 0.0, 1.0];
            for (channel, item) in rgba.iter_mut().zip(items) {
                *channel = item
                    .as_f64()
                    .ok_or_else(|| anyhow!("color component {item} is not a number"))?
                    as f32;
            }
            Ok(rgba)
        }
        other => bail!("unsupported color value: {other}"),
    }
}

fn parse_hex_color(text: &str) -> Result<[f32; 4]> {
    let hex = text
        .strip_prefix('#')
        .ok_or_else(|| anyhow!("color '{text}' must start with '#'"))?;
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        bail!("color '{text}' must be #rrggbb or #rrggbbaa");
    }
    let mut rgba = [0.0, 0.0, 0.0, 1.0];
    for (i, channel) in rgba.iter_mut().enumerate().take(hex.len() / 2) {
        let byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .with_context(|| format!("color '{text}' has invalid hex digits"))?;
        *channel = byte as f32 / 255.0;
    }
    Ok(rgba)
}
