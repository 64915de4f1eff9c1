use std::path::PathBuf;
use thiserror::Error;

/// Why a [`super::TeamConfig`] could not be produced.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {} does not exist", .0.display())]
    FileNotFound(PathBuf),

    /// The `config` crate failed to merge or deserialize the layers.
    #[error("could not build configuration: {0}")]
    Build(#[from] config::ConfigError),

    #[error("could not encode built-in defaults: {0}")]
    Defaults(#[from] serde_json::Error),

    #[error("invalid `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.into(),
        }
    }
}
