//! Fixtures and mock collaborators shared by the unit tests.

use crate::model::{
    Access, Component, ComponentDescriptor, ComponentIdentity, RepositoryContext, Resource,
    UploadMode,
};
use crate::processing::{Filter, ProcessingError, ProcessingJob, Uploader};
use crate::reference::{descriptor_oci_ref, ImageReference};
use crate::traits::{
    KeyPair, PushOutcome, PushRequest, RegistryClient, RegistryError, SchemaValidator, Signer,
    SigningError, ValidationError,
};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) const SOURCE_BASE_URL: &str = "src.example";

// ============================================================================
// Model fixtures
// ============================================================================

/// Component living in [`SOURCE_BASE_URL`].
pub(crate) fn component(name: &str, version: &str, resources: Vec<Resource>) -> Component {
    Component {
        name: name.to_string(),
        version: version.to_string(),
        repository_contexts: vec![RepositoryContext::oci_registry(SOURCE_BASE_URL)],
        resources,
        component_references: vec![],
        extra: BTreeMap::new(),
    }
}

pub(crate) fn oci_resource(name: &str, image_reference: &str) -> Resource {
    Resource {
        name: name.to_string(),
        version: Some("1.0.0".to_string()),
        resource_type: "ociImage".to_string(),
        extra_identity: BTreeMap::new(),
        access: Access::oci_registry(image_reference),
        labels: vec![],
        extra: BTreeMap::new(),
    }
}

// ============================================================================
// Stage mocks
// ============================================================================

/// Filter with a fixed verdict.
pub(crate) struct StaticFilter(pub bool);

impl Filter for StaticFilter {
    fn matches(&self, _component: &Component, _resource: &Resource) -> bool {
        self.0
    }

    fn filter_name(&self) -> &'static str {
        "StaticFilter"
    }
}

/// Uploader that swaps the registry host of its source for `prefix` and
/// remembers every source it saw.
pub(crate) struct RecordingUploader {
    prefix: String,
    sources: Mutex<Vec<String>>,
}

impl RecordingUploader {
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            sources: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }
}

impl Uploader for RecordingUploader {
    fn process(&self, job: ProcessingJob) -> Result<ProcessingJob, ProcessingError> {
        let source = job.upload_request.source_ref.clone().ok_or_else(|| {
            ProcessingError::MissingSourceReference {
                resource: job.resource.identity().to_string(),
            }
        })?;
        self.sources.lock().unwrap().push(source.clone());

        let path = source.split_once('/').map(|(_, rest)| rest).unwrap_or(&source);
        let target = format!("{}/{}", self.prefix, path);
        let processed = job.current_resource().with_access(Access::oci_registry(&target));
        Ok(job.with_target_ref(target).with_processed_resource(processed))
    }

    fn uploader_name(&self) -> &'static str {
        "RecordingUploader"
    }
}

// ============================================================================
// Registry mock
// ============================================================================

/// In-memory registry. Images map reference to digest; descriptors are
/// keyed by their OCI reference.
#[derive(Default)]
pub(crate) struct MockRegistry {
    images: Mutex<BTreeMap<String, String>>,
    descriptors: Mutex<BTreeMap<String, ComponentDescriptor>>,
    pushed: Mutex<Vec<String>>,
    descriptor_writes: Mutex<Vec<ComponentIdentity>>,
    replications: Mutex<Vec<(String, ComponentIdentity)>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    no_digests: bool,
    delay: Option<Duration>,
}

impl MockRegistry {
    pub(crate) fn without_digests() -> Self {
        Self {
            no_digests: true,
            ..Default::default()
        }
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub(crate) fn add_image(&self, reference: &str, digest: &str) {
        self.images
            .lock()
            .unwrap()
            .insert(reference.to_string(), digest.to_string());
    }

    pub(crate) fn add_descriptor(&self, descriptor: ComponentDescriptor) {
        let base_url = descriptor
            .component
            .current_base_url()
            .unwrap_or_default()
            .to_string();
        let key = descriptor_oci_ref(&base_url, &descriptor.component.identity());
        self.descriptors.lock().unwrap().insert(key, descriptor);
    }

    pub(crate) fn descriptor(
        &self,
        base_url: &str,
        identity: &ComponentIdentity,
    ) -> Option<ComponentDescriptor> {
        self.descriptors
            .lock()
            .unwrap()
            .get(&descriptor_oci_ref(base_url, identity))
            .cloned()
    }

    pub(crate) fn digest_of(&self, reference: &str) -> Option<String> {
        self.images.lock().unwrap().get(reference).cloned()
    }

    pub(crate) fn pushed_targets(&self) -> Vec<String> {
        self.pushed.lock().unwrap().clone()
    }

    /// Identities written by `upload_descriptor` or a replication.
    pub(crate) fn descriptor_writes(&self) -> Vec<ComponentIdentity> {
        self.descriptor_writes.lock().unwrap().clone()
    }

    pub(crate) fn replications(&self) -> Vec<(String, ComponentIdentity)> {
        self.replications.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent_pushes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn fake_digest(reference: &str) -> String {
        let mut hasher = DefaultHasher::new();
        reference.hash(&mut hasher);
        format!("sha256:{:064x}", hasher.finish())
    }

    /// Stores `descriptor` honouring `on_exist`. Returns whether it was written.
    fn store_descriptor(
        &self,
        descriptor: &ComponentDescriptor,
        on_exist: UploadMode,
    ) -> Result<bool, RegistryError> {
        let base_url = descriptor.component.current_base_url().ok_or_else(|| {
            RegistryError::Request {
                reference: descriptor.component.identity().to_string(),
                message: "no repository context".to_string(),
            }
        })?;
        let key = descriptor_oci_ref(base_url, &descriptor.component.identity());

        let mut descriptors = self.descriptors.lock().unwrap();
        if descriptors.contains_key(&key) {
            match on_exist {
                UploadMode::Skip => return Ok(false),
                UploadMode::Fail => return Err(RegistryError::AlreadyExists(key)),
                UploadMode::Overwrite | UploadMode::Append => {}
            }
        }
        descriptors.insert(key, descriptor.clone());
        self.descriptor_writes
            .lock()
            .unwrap()
            .push(descriptor.component.identity());
        Ok(true)
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn head_manifest(&self, image_reference: &str) -> Result<Option<String>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.digest_of(image_reference))
    }

    async fn push_filtered(&self, request: &PushRequest) -> Result<PushOutcome, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let digest = Self::fake_digest(&request.target_ref);
        self.add_image(&request.target_ref, &digest);
        self.pushed.lock().unwrap().push(request.target_ref.clone());

        Ok(PushOutcome {
            digest: (!self.no_digests).then_some(digest),
            response_metadata: BTreeMap::new(),
        })
    }

    async fn replicate_with_patched_descriptor(
        &self,
        source_base_url: &str,
        identity: &ComponentIdentity,
        patched: &ComponentDescriptor,
        on_exist: UploadMode,
    ) -> Result<(), RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.descriptor(source_base_url, identity).is_none() {
            return Err(RegistryError::DescriptorNotFound(identity.clone()));
        }
        if self.store_descriptor(patched, on_exist)? {
            self.replications
                .lock()
                .unwrap()
                .push((source_base_url.to_string(), identity.clone()));
        }
        Ok(())
    }

    async fn upload_descriptor(
        &self,
        descriptor: &ComponentDescriptor,
        on_exist: UploadMode,
    ) -> Result<(), RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.store_descriptor(descriptor, on_exist).map(|_| ())
    }

    async fn download_descriptor(
        &self,
        base_url: &str,
        identity: &ComponentIdentity,
    ) -> Result<Option<ComponentDescriptor>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.descriptor(base_url, identity))
    }
}

// ============================================================================
// Validator and signer mocks
// ============================================================================

pub(crate) struct AcceptingValidator;

impl SchemaValidator for AcceptingValidator {
    fn validate(&self, _descriptor: &serde_json::Value) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Rejects descriptors whose component name is listed.
pub(crate) struct RejectingValidator(pub BTreeSet<String>);

impl SchemaValidator for RejectingValidator {
    fn validate(&self, descriptor: &serde_json::Value) -> Result<(), ValidationError> {
        let name = descriptor
            .pointer("/component/name")
            .and_then(|n| n.as_str())
            .unwrap_or_default();
        if self.0.contains(name) {
            return Err(ValidationError(format!("component '{}' rejected", name)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockSigner {
    signed: Mutex<Vec<String>>,
}

impl MockSigner {
    pub(crate) fn key_pair() -> KeyPair {
        KeyPair {
            private_key: PathBuf::from("/keys/cosign.key"),
            public_key: PathBuf::from("/keys/cosign.pub"),
        }
    }

    pub(crate) fn signed(&self) -> Vec<String> {
        self.signed.lock().unwrap().clone()
    }
}

/// `<name>:<algorithm>-<hex>.sig`, the tag cosign stores the signature of a
/// digest-referenced image under.
pub(crate) fn cosign_signature_ref(image_reference: &str) -> Result<String, SigningError> {
    let not_digest = || SigningError::NotDigestReferenced(image_reference.to_string());
    let parsed = ImageReference::parse(image_reference).map_err(|_| not_digest())?;
    let (algorithm, hex) = parsed
        .digest
        .as_deref()
        .and_then(|digest| digest.split_once(':'))
        .ok_or_else(not_digest)?;
    Ok(format!("{}:{}-{}.sig", parsed.name, algorithm, hex))
}

#[async_trait]
impl Signer for MockSigner {
    async fn sign(&self, image_reference: &str, _key: &KeyPair) -> Result<String, SigningError> {
        self.signed.lock().unwrap().push(image_reference.to_string());
        cosign_signature_ref(image_reference)
    }

    async fn attach_signature(
        &self,
        image_reference: &str,
        _payload: &[u8],
        _signature: &[u8],
    ) -> Result<String, SigningError> {
        cosign_signature_ref(image_reference)
    }

    async fn import_key_pair(&self, _pem_private_key: &str) -> Result<KeyPair, SigningError> {
        Ok(Self::key_pair())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosign_signature_ref() {
        assert_eq!(
            cosign_signature_ref("r.example/img@sha256:abcd").unwrap(),
            "r.example/img:sha256-abcd.sig"
        );
        assert!(matches!(
            cosign_signature_ref("r.example/img:1.0"),
            Err(SigningError::NotDigestReferenced(_))
        ));
    }
}
