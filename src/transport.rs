//! Run orchestration: match, execute, merge, republish.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::bom::{self, BomEntry};
use crate::config::{ConfigError, RootSource};
use crate::error::TransportError;
use crate::executor::{ExecutionSettings, JobExecutor, SigningSettings};
use crate::merge::{find_root, merge_components, propagate_repository_contexts};
use crate::model::{Component, ComponentDescriptor, ProcessingMode, ReplicationMode, UploadMode};
use crate::platform::{PlatformFilter, PlatformMatchMode};
use crate::processing::{enumerate_jobs, ProcessingPipeline};
use crate::publish::{PublishSettings, Publisher};
use crate::resolve::{load_root_descriptor, resolve_components, write_descriptor_file};
use crate::traits::{KeyPair, RegistryClient, SchemaValidator, Signer};

pub const DEFAULT_WORKERS: usize = 16;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone)]
pub enum SigningKey {
    /// PEM private key, imported through the signer at the start of a run.
    Pem(String),
    Imported(KeyPair),
}

#[derive(Clone)]
pub struct SigningOptions {
    pub signer: Arc<dyn Signer>,
    pub key: SigningKey,
}

/// Options of one transport run.
#[derive(Clone)]
pub struct TransportOptions {
    pub target_base_url: String,
    pub mode: ProcessingMode,
    pub upload_mode_cd: UploadMode,
    pub upload_mode_images: UploadMode,
    pub replication_mode: ReplicationMode,
    pub replace_resource_tags_with_digests: bool,
    /// Platforms of multi-arch images to keep; empty keeps all.
    pub platforms: Vec<String>,
    pub platform_mode: PlatformMatchMode,
    pub job_workers: usize,
    pub publish_workers: usize,
    pub skip_cd_validation: bool,
    pub signing: Option<SigningOptions>,
    /// Where to write the patched root descriptor after the run.
    pub descriptor_output: Option<PathBuf>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            target_base_url: String::new(),
            mode: ProcessingMode::Regular,
            upload_mode_cd: UploadMode::Skip,
            upload_mode_images: UploadMode::Skip,
            replication_mode: ReplicationMode::default(),
            replace_resource_tags_with_digests: false,
            platforms: Vec::new(),
            platform_mode: PlatformMatchMode::default(),
            job_workers: DEFAULT_WORKERS,
            publish_workers: DEFAULT_WORKERS,
            skip_cd_validation: false,
            signing: None,
            descriptor_output: None,
        }
    }
}

impl TransportOptions {
    pub fn new(target_base_url: impl Into<String>) -> Self {
        Self {
            target_base_url: target_base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_upload_mode_cd(mut self, mode: UploadMode) -> Self {
        self.upload_mode_cd = mode;
        self
    }

    pub fn with_upload_mode_images(mut self, mode: UploadMode) -> Self {
        self.upload_mode_images = mode;
        self
    }

    pub fn with_replication_mode(mut self, mode: ReplicationMode) -> Self {
        self.replication_mode = mode;
        self
    }

    pub fn with_replace_resource_tags_with_digests(mut self, enabled: bool) -> Self {
        self.replace_resource_tags_with_digests = enabled;
        self
    }

    pub fn with_platforms<S: Into<String>>(
        mut self,
        platforms: impl IntoIterator<Item = S>,
        mode: PlatformMatchMode,
    ) -> Self {
        self.platforms = platforms.into_iter().map(Into::into).collect();
        self.platform_mode = mode;
        self
    }

    pub fn with_workers(mut self, job_workers: usize, publish_workers: usize) -> Self {
        self.job_workers = job_workers;
        self.publish_workers = publish_workers;
        self
    }

    pub fn with_skip_cd_validation(mut self, skip: bool) -> Self {
        self.skip_cd_validation = skip;
        self
    }

    pub fn with_signing(mut self, signing: SigningOptions) -> Self {
        self.signing = Some(signing);
        self
    }

    pub fn with_descriptor_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.descriptor_output = Some(path.into());
        self
    }

    /// Rejects option combinations that cannot work, before any registry
    /// is contacted.
    pub fn validate(&self, source_base_url: &str) -> Result<(), ConfigError> {
        let target = self.target_base_url.trim_end_matches('/');
        if target.is_empty() {
            return Err(ConfigError::MissingTargetRepository);
        }
        if source_base_url.trim_end_matches('/') == target {
            return Err(ConfigError::SameSourceAndTarget(target.to_string()));
        }
        if self.upload_mode_images == UploadMode::Fail {
            return Err(ConfigError::FailModeForImages);
        }
        if self.job_workers == 0 || self.publish_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    /// `None` when every platform is kept.
    pub fn platform_filter(&self) -> Result<Option<PlatformFilter>, ConfigError> {
        if self.platforms.is_empty() {
            return Ok(None);
        }
        Ok(Some(PlatformFilter::with_mode(
            &self.platforms,
            self.platform_mode,
        )?))
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct TransportOutcome {
    /// The input root descriptor with the patched root component.
    pub descriptor: ComponentDescriptor,
    /// Root and dependencies after merge and context propagation.
    pub components: Vec<Component>,
    pub bom: Vec<BomEntry>,
}

pub struct Transport {
    registry: Arc<dyn RegistryClient>,
    validator: Option<Arc<dyn SchemaValidator>>,
    pipelines: Vec<Arc<ProcessingPipeline>>,
    options: TransportOptions,
}

impl Transport {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        pipelines: Vec<Arc<ProcessingPipeline>>,
        options: TransportOptions,
    ) -> Self {
        Self {
            registry,
            validator: None,
            pipelines,
            options,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Loads the root, resolves its references and runs. The patched root
    /// descriptor is written to `descriptor_output` if one is configured.
    pub async fn run_from_source(
        &self,
        source: &RootSource,
    ) -> Result<TransportOutcome, TransportError> {
        let descriptor = load_root_descriptor(source, self.registry.as_ref()).await?;
        let components = resolve_components(&descriptor, self.registry.as_ref()).await?;
        let outcome = self.run(&descriptor, &components).await?;

        if let Some(path) = &self.options.descriptor_output {
            write_descriptor_file(path, &outcome.descriptor)?;
        }
        Ok(outcome)
    }

    /// Transports the resolved `components` of `descriptor`.
    ///
    /// `components` must contain the root. In dry-run mode the registry is
    /// never called; jobs, merge and validation still run.
    ///
    /// # Errors
    ///
    /// Any failure aborts the run. Registry writes made before the failure
    /// are not rolled back.
    #[instrument(
        skip_all,
        fields(root = %descriptor.component.identity(), target = %self.options.target_base_url)
    )]
    pub async fn run(
        &self,
        descriptor: &ComponentDescriptor,
        components: &[Arc<Component>],
    ) -> Result<TransportOutcome, TransportError> {
        let root = &descriptor.component;
        let root_identity = root.identity();
        let source_base_url = root
            .current_base_url()
            .ok_or_else(|| ConfigError::MissingSourceRepository(root_identity.clone()))?
            .to_string();
        let target_base_url = self.options.target_base_url.trim_end_matches('/').to_string();

        self.options.validate(&source_base_url)?;
        let platform_filter = self.options.platform_filter()?;

        let mode = self.options.mode;
        match mode {
            ProcessingMode::Regular => info!(source = %source_base_url, "Running in regular mode"),
            ProcessingMode::DryRun => {
                info!(source = %source_base_url, "Running in dry-run mode, no registry will be changed")
            }
        }

        let (root_existed_before, signing) = match mode {
            ProcessingMode::Regular => {
                let existed = self
                    .registry
                    .download_descriptor(&source_base_url, &root_identity)
                    .await?
                    .is_some();
                (existed, self.signing_settings().await?)
            }
            ProcessingMode::DryRun => (false, None),
        };

        let (bom_sink, bom_collector) = bom::channel();

        let executor = JobExecutor::new(
            self.options.job_workers,
            Arc::clone(&self.registry),
            ExecutionSettings {
                mode,
                upload_mode_images: self.options.upload_mode_images,
                replication_mode: self.options.replication_mode,
                replace_tags_with_digests: self.options.replace_resource_tags_with_digests,
                platform_filter,
                signing,
            },
            bom_sink.clone(),
        );
        let completed = executor
            .execute_all(enumerate_jobs(&self.pipelines, components))
            .await?;

        let merged: Vec<Component> = merge_components(completed, components)
            .iter()
            .map(|c| propagate_repository_contexts(c, &source_base_url, &target_base_url))
            .collect();

        let validator = if self.options.skip_cd_validation {
            None
        } else {
            self.validator.clone()
        };
        let publisher = Publisher::new(
            self.options.publish_workers,
            Arc::clone(&self.registry),
            validator,
            PublishSettings {
                mode,
                upload_mode_cd: self.options.upload_mode_cd,
                root: root_identity.clone(),
                root_existed_before,
                source_base_url: source_base_url.clone(),
                meta: descriptor.meta.clone(),
            },
            bom_sink,
        );
        publisher.publish_all(&merged).await?;

        let patched_root = find_root(&merged, &root_identity)?.clone();
        let bom = bom_collector.drain();
        info!(
            components = merged.len(),
            bom_entries = bom.len(),
            "Transport finished"
        );

        Ok(TransportOutcome {
            descriptor: descriptor.with_component(patched_root),
            components: merged,
            bom,
        })
    }

    async fn signing_settings(&self) -> Result<Option<SigningSettings>, TransportError> {
        let Some(signing) = &self.options.signing else {
            return Ok(None);
        };
        let key = match &signing.key {
            SigningKey::Imported(key) => key.clone(),
            SigningKey::Pem(pem) => signing.signer.import_key_pair(pem).await?,
        };
        Ok(Some(SigningSettings {
            signer: Arc::clone(&signing.signer),
            key,
        }))
    }
}
