use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by (or while talking to) the package-manager capability.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityError {
    /// The operation ran and the package manager reported failure.
    #[error("operation failed: {0}")]
    Operation(String),

    /// The binding itself broke (dropped handle, transport failure, panic in the binding).
    #[error("capability interface error: {0}")]
    Interface(String),

    #[error("unknown generation {0}")]
    UnknownGeneration(u64),
}

impl CapabilityError {
    /// Interface-level errors are the ones eligible for automatic compensation.
    pub fn is_interface(&self) -> bool {
        matches!(self, CapabilityError::Interface(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-action error classification carried in `ExecutionResult`.
///
/// `ParseFailure`, `AmbiguousReference` and `PolicyBlocked` never surface as
/// Rust errors; they exist here so presentation layers can label outcomes
/// uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "cause")]
pub enum ErrorKind {
    ParseFailure,
    AmbiguousReference,
    PolicyBlocked,
    CapabilityError(String),
    Timeout,
    CancellationRequested,
}

impl From<&CapabilityError> for ErrorKind {
    fn from(err: &CapabilityError) -> Self {
        ErrorKind::CapabilityError(err.to_string())
    }
}
