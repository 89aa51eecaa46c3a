use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::UNIX_EPOCH,
};

use crate::error::{CompositorError, CompositorResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Source language accepted by the baker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderLanguage {
    /// Vulkan-flavoured GLSL 450 (`layout(set = 0, binding = N)`).
    Glsl,
    Wgsl,
}

impl ShaderLanguage {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("wgsl") => ShaderLanguage::Wgsl,
            _ => ShaderLanguage::Glsl,
        }
    }
}

/// What makes two sources "the same" for caching purposes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceIdentity {
    File { path: PathBuf, modified_ms: i64 },
    Inline { hash: u64 },
}

impl SourceIdentity {
    /// Stat a shader file without reading it.
    pub fn probe(path: &Path) -> CompositorResult<Self> {
        let (path, modified_ms) = stat_file(path)?;
        Ok(SourceIdentity::File { path, modified_ms })
    }

    /// The (path, mtime) pair that feeds the composite cache key.
    pub fn key_components(&self) -> (String, i64) {
        match self {
            SourceIdentity::File { path, modified_ms } => {
                (path.to_string_lossy().into_owned(), *modified_ms)
            }
            SourceIdentity::Inline { hash } => (format!("inline:{hash:016x}"), 0),
        }
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceIdentity::File { path, .. } => write!(f, "{}", path.display()),
            SourceIdentity::Inline { hash } => write!(f, "<inline {hash:016x}>"),
        }
    }
}

/// Shader text plus the identity it was loaded under. Immutable once built.
#[derive(Clone, Debug)]
pub struct ShaderSource {
    identity: SourceIdentity,
    stage: ShaderStage,
    language: ShaderLanguage,
    text: Arc<str>,
}

impl ShaderSource {
    /// Read a shader file. Missing or unreadable files are reported with the
    /// attempted path.
    pub fn load(path: impl AsRef<Path>, stage: ShaderStage) -> CompositorResult<Self> {
        let (abs, modified_ms) = stat_file(path.as_ref())?;
        let text = std::fs::read_to_string(&abs).map_err(|e| missing(&abs, e))?;
        Ok(Self {
            language: ShaderLanguage::from_path(&abs),
            identity: SourceIdentity::File {
                path: abs,
                modified_ms,
            },
            stage,
            text: Arc::from(text),
        })
    }

    pub fn inline(text: impl Into<String>, stage: ShaderStage, language: ShaderLanguage) -> Self {
        let text: String = text.into();
        Self {
            identity: SourceIdentity::Inline {
                hash: content_hash(text.as_bytes()),
            },
            stage,
            language,
            text: Arc::from(text),
        }
    }

    pub fn identity(&self) -> &SourceIdentity {
        &self.identity
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn language(&self) -> ShaderLanguage {
        self.language
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> String {
        self.identity.to_string()
    }
}

/// Where a shader comes from before it is loaded. File paths may be relative;
/// they resolve against a base directory chosen by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderLocation {
    File(PathBuf),
    Inline {
        text: Arc<str>,
        language: ShaderLanguage,
    },
}

impl ShaderLocation {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        ShaderLocation::File(path.into())
    }

    pub fn inline(text: impl Into<String>, language: ShaderLanguage) -> Self {
        let text: String = text.into();
        ShaderLocation::Inline {
            text: Arc::from(text),
            language,
        }
    }

    /// The path a file location resolves to under `base`.
    pub fn resolve(&self, base: Option<&Path>) -> Option<PathBuf> {
        match self {
            ShaderLocation::File(path) => Some(resolve_file(path, base)),
            ShaderLocation::Inline { .. } => None,
        }
    }

    /// Current identity, without reading file contents.
    pub fn probe(&self, base: Option<&Path>) -> CompositorResult<SourceIdentity> {
        match self {
            ShaderLocation::Inline { text, .. } => Ok(SourceIdentity::Inline {
                hash: content_hash(text.as_bytes()),
            }),
            ShaderLocation::File(path) => SourceIdentity::probe(&resolve_file(path, base)),
        }
    }

    pub fn load(&self, base: Option<&Path>, stage: ShaderStage) -> CompositorResult<ShaderSource> {
        match self {
            ShaderLocation::Inline { text, language } => Ok(ShaderSource {
                identity: SourceIdentity::Inline {
                    hash: content_hash(text.as_bytes()),
                },
                stage,
                language: *language,
                text: text.clone(),
            }),
            ShaderLocation::File(path) => ShaderSource::load(resolve_file(path, base), stage),
        }
    }
}

fn resolve_file(path: &Path, base: Option<&Path>) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

fn stat_file(path: &Path) -> CompositorResult<(PathBuf, i64)> {
    let abs = std::fs::canonicalize(path).map_err(|e| missing(path, e))?;
    let metadata = std::fs::metadata(&abs).map_err(|e| missing(&abs, e))?;
    let modified_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok((abs, modified_ms))
}

fn missing(path: &Path, err: std::io::Error) -> CompositorError {
    CompositorError::MissingAsset {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// 64-bit FNV-1a over the shader text.
pub(crate) fn content_hash(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
