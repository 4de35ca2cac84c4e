use std::path::PathBuf;

use thiserror::Error;

/// Core error type for Reflexion.
#[derive(Debug, Error)]
pub enum ReflexionError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A caller broke a transcript invariant. Always a programming error.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReflexionError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation(reason.into())
    }
}
