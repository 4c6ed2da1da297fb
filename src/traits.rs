use crate::model::{ComponentDescriptor, ComponentIdentity, ReplicationMode, UploadMode};
use crate::platform::PlatformFilter;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry request for '{reference}' failed: {message}")]
    Request { reference: String, message: String },
    #[error("Target '{0}' already exists")]
    AlreadyExists(String),
    #[error("Component descriptor {0} not found")]
    DescriptorNotFound(ComponentIdentity),
}

#[derive(Error, Debug)]
#[error("Schema validation failed: {0}")]
pub struct ValidationError(pub String);

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Signing requires a digest reference, got '{0}'")]
    NotDigestReferenced(String),
    #[error("Signer failed: {0}")]
    Failed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Copy of one image from `source_ref` to `target_ref`.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub source_ref: String,
    pub target_ref: String,
    /// Paths to drop from every layer while copying.
    pub remove_files: Vec<String>,
    /// Platforms of a multi-arch source to copy; `None` copies all.
    pub platform_filter: Option<PlatformFilter>,
    pub replication_mode: ReplicationMode,
}

#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    /// Content digest of the pushed manifest, if the registry reported one.
    pub digest: Option<String>,
    pub response_metadata: BTreeMap<String, String>,
}

/// Registry I/O. Implementations own the wire protocol; the engine only
/// decides what to call and in which order.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Returns the manifest digest of `image_reference`, or `None` if absent.
    async fn head_manifest(&self, image_reference: &str) -> Result<Option<String>, RegistryError>;

    async fn push_filtered(&self, request: &PushRequest) -> Result<PushOutcome, RegistryError>;

    /// Copies the OCI artifact holding `identity`'s descriptor from
    /// `source_base_url` to the patched descriptor's current repository,
    /// swapping in the patched descriptor body.
    async fn replicate_with_patched_descriptor(
        &self,
        source_base_url: &str,
        identity: &ComponentIdentity,
        patched: &ComponentDescriptor,
        on_exist: UploadMode,
    ) -> Result<(), RegistryError>;

    /// Publishes `descriptor` to its current repository context.
    async fn upload_descriptor(
        &self,
        descriptor: &ComponentDescriptor,
        on_exist: UploadMode,
    ) -> Result<(), RegistryError>;

    /// Fetches a descriptor; `Ok(None)` when it does not exist.
    async fn download_descriptor(
        &self,
        base_url: &str,
        identity: &ComponentIdentity,
    ) -> Result<Option<ComponentDescriptor>, RegistryError>;
}

/// Component-descriptor schema validation on the plain-data form.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, descriptor: &serde_json::Value) -> Result<(), ValidationError>;
}

/// Signer key files as produced by [`Signer::import_key_pair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

/// Cosign-style image signing. Every image reference handed in must be
/// digest-referenced.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Signs and uploads; returns the signature reference.
    async fn sign(&self, image_reference: &str, key: &KeyPair) -> Result<String, SigningError>;

    async fn attach_signature(
        &self,
        image_reference: &str,
        payload: &[u8],
        signature: &[u8],
    ) -> Result<String, SigningError>;

    async fn import_key_pair(&self, pem_private_key: &str) -> Result<KeyPair, SigningError>;
}
