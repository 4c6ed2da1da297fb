use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::merge::MergeError;
use crate::model::ComponentIdentity;
use crate::processing::ProcessingError;
use crate::reference::ReferenceError;
use crate::traits::{RegistryError, SigningError, ValidationError};

/// Errors that abort a transport run. None of them is retried; a run that
/// returns one has committed nothing callers may rely on.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing failed: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("Invalid image reference: {0}")]
    Reference(#[from] ReferenceError),

    /// Digest pinning or signing was requested but the upload reported no digest
    #[error("No content digest returned for {origin} ({target})")]
    MissingDigest { origin: String, target: String },

    #[error("Schema validation for component descriptor {component} failed: {source}")]
    Validation {
        component: ComponentIdentity,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("Not implemented: {0}")]
    Unimplemented(String),

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("Failed to serialize component descriptor: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Component descriptor YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to write '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
