//! Error and readiness types shared by every compositor component.
//!
//! Errors never cross the frame boundary as panics or propagated results: the
//! compositor records the latest one as a message plus a [`CompositorStatus`]
//! and hosts poll readiness before trusting the output.

use std::path::PathBuf;

use crate::shader::ShaderStage;

pub type CompositorResult<T> = Result<T, CompositorError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CompositorError {
    /// Shader text failed to compile for at least one bake target.
    #[error("{stage} shader {origin} failed to compile: {message}")]
    Compile {
        stage: ShaderStage,
        origin: String,
        message: String,
    },

    /// A GPU object could not be created. The frame is skipped and creation
    /// is attempted again on the next frame.
    #[error("failed to create {what}: {message}")]
    ResourceCreation { what: String, message: String },

    /// A required shader file is missing or unreadable.
    #[error("required asset {} is unavailable: {message}", path.display())]
    MissingAsset { path: PathBuf, message: String },

    /// Compiled shaders declare bindings the compositor cannot satisfy.
    #[error("shader interface mismatch: {message}")]
    ConfigurationMismatch { message: String },

    /// An effect manifest could not be read or parsed.
    #[error("invalid effect manifest {}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },
}

impl CompositorError {
    pub fn resource(what: impl Into<String>, message: impl ToString) -> Self {
        Self::ResourceCreation {
            what: what.into(),
            message: message.to_string(),
        }
    }

    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::ConfigurationMismatch {
            message: message.into(),
        }
    }

    /// Errors that only invalidate the current frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ResourceCreation { .. })
    }
}

/// Readiness of a compositor, mirrored to the host after every frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompositorStatus {
    /// No shaders configured.
    #[default]
    Null,
    /// Shaders configured but not baked yet.
    Loading,
    Ready,
    Error,
}

impl CompositorStatus {
    pub fn label(self) -> &'static str {
        match self {
            CompositorStatus::Null => "null",
            CompositorStatus::Loading => "loading",
            CompositorStatus::Ready => "ready",
            CompositorStatus::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_resource_errors_are_transient() {
        assert!(CompositorError::resource("uniform buffer", "out of memory").is_transient());
        assert!(!CompositorError::mismatch("no uniform block").is_transient());
        assert!(
            !CompositorError::MissingAsset {
                path: PathBuf::from("/nope/zone.vert"),
                message: "not found".to_string(),
            }
            .is_transient()
        );
    }

    #[test]
    fn missing_asset_message_names_the_path() {
        let err = CompositorError::MissingAsset {
            path: PathBuf::from("/effects/aurora/zone.vert"),
            message: "No such file or directory".to_string(),
        };
        assert!(err.to_string().contains("/effects/aurora/zone.vert"));
    }
}
