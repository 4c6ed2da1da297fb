use crate::bom::{BomEntry, BomSink};
use crate::error::TransportError;
use crate::model::{Access, ProcessingMode, ReplicationMode, Resource, UploadMode};
use crate::platform::PlatformFilter;
use crate::processing::{MatchedJob, ProcessingError, ProcessingJob};
use crate::reference::{replace_tag_with_digest, ImageReference};
use crate::traits::{KeyPair, PushRequest, RegistryClient, Signer, SigningError};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

/// Signer plus the key it signs uploaded images with.
#[derive(Clone)]
pub struct SigningSettings {
    pub signer: Arc<dyn Signer>,
    pub key: KeyPair,
}

/// Per-run settings applied to every job.
#[derive(Clone, Default)]
pub struct ExecutionSettings {
    pub mode: ProcessingMode,
    pub upload_mode_images: UploadMode,
    pub replication_mode: ReplicationMode,
    /// Rewrite uploaded tags to `name@digest` references.
    pub replace_tags_with_digests: bool,
    pub platform_filter: Option<PlatformFilter>,
    pub signing: Option<SigningSettings>,
}

/// Runs matched jobs on a bounded worker pool.
#[derive(Clone)]
pub struct JobExecutor {
    workers: usize,
    registry: Arc<dyn RegistryClient>,
    settings: Arc<ExecutionSettings>,
    bom: BomSink,
}

impl JobExecutor {
    pub fn new(
        concurrency_limit: usize,
        registry: Arc<dyn RegistryClient>,
        settings: ExecutionSettings,
        bom: BomSink,
    ) -> Self {
        Self {
            workers: concurrency_limit.max(1),
            registry,
            settings: Arc::new(settings),
            bom,
        }
    }

    /// Executes every job of `jobs`, pulling the next one only once a worker
    /// is free. Completed jobs come back in no particular order.
    ///
    /// # Errors
    ///
    /// The first failing job is returned. No further job is started after
    /// it is seen, and jobs still running are aborted.
    #[instrument(skip_all, fields(mode = ?self.settings.mode, workers = self.workers))]
    pub async fn execute_all<I>(&self, jobs: I) -> Result<Vec<ProcessingJob>, TransportError>
    where
        I: IntoIterator<Item = MatchedJob>,
    {
        let mut tasks = JoinSet::new();
        let mut completed = Vec::new();

        for matched in jobs {
            // dropping `tasks` on an early return aborts the remaining jobs
            while tasks.len() >= self.workers {
                if let Some(joined) = tasks.join_next().await {
                    completed.push(joined.map_err(|e| TransportError::Worker(e.to_string()))??);
                }
            }

            let executor = self.clone();
            tasks.spawn(async move { executor.execute(matched).await });
        }

        while let Some(joined) = tasks.join_next().await {
            completed.push(joined.map_err(|e| TransportError::Worker(e.to_string()))??);
        }

        info!(jobs = completed.len(), "Finished processing jobs");
        Ok(completed)
    }

    /// Runs the job's pipeline and, in regular mode, uploads the result.
    pub async fn execute(&self, matched: MatchedJob) -> Result<ProcessingJob, TransportError> {
        let job = matched.pipeline.run(matched.job)?;

        match self.settings.mode {
            ProcessingMode::DryRun => {
                debug!(
                    origin = %job.origin(),
                    target = job.upload_request.target_ref.as_deref().unwrap_or_default(),
                    "dry-run: not uploading"
                );
                Ok(job)
            }
            ProcessingMode::Regular => self.upload(job).await,
        }
    }

    async fn upload(&self, job: ProcessingJob) -> Result<ProcessingJob, TransportError> {
        let resource = job.resource.identity().to_string();
        let source_ref = job
            .upload_request
            .source_ref
            .clone()
            .ok_or_else(|| ProcessingError::MissingSourceReference {
                resource: resource.clone(),
            })?;
        let target_ref = job
            .upload_request
            .target_ref
            .clone()
            .ok_or(ProcessingError::MissingTargetReference { resource })?;

        let PushedImage { digest, skipped } = self
            .push_image(
                &source_ref,
                &target_ref,
                job.upload_request.remove_files.clone().unwrap_or_default(),
            )
            .await?;

        let missing_digest = || TransportError::MissingDigest {
            origin: job.origin(),
            target: target_ref.clone(),
        };

        let job = if self.settings.replace_tags_with_digests {
            let digest = digest.as_deref().ok_or_else(missing_digest)?;
            pin_to_digest(job.clone(), digest)?
        } else {
            job.clone()
        };

        let uploaded_ref = job
            .upload_request
            .target_ref
            .clone()
            .unwrap_or_else(|| target_ref.clone());
        self.bom.append(BomEntry::docker(&uploaded_ref, job.origin()));

        // a skipped image was signed by the run that pushed it
        if let Some(signing) = self.settings.signing.as_ref().filter(|_| !skipped) {
            let digest = digest.as_deref().ok_or_else(missing_digest)?;
            let digest_ref = replace_tag_with_digest(&uploaded_ref, digest)?;
            let signature_ref = sign_image(signing, &digest_ref).await?;
            info!(image = %digest_ref, signature = %signature_ref, "Signed image");
            self.bom.append(BomEntry::docker(signature_ref, job.origin()));
        }

        Ok(job)
    }

    /// Copies `source_ref` to `target_ref` unless the target exists and
    /// images are uploaded in skip mode.
    async fn push_image(
        &self,
        source_ref: &str,
        target_ref: &str,
        remove_files: Vec<String>,
    ) -> Result<PushedImage, TransportError> {
        if let Some(existing) = self.registry.head_manifest(target_ref).await? {
            if self.settings.upload_mode_images == UploadMode::Skip {
                info!(target = %target_ref, "Target exists - skipping upload");
                return Ok(PushedImage {
                    digest: Some(existing),
                    skipped: true,
                });
            }
        }

        info!(source = %source_ref, target = %target_ref, "Start processing");
        let outcome = self
            .registry
            .push_filtered(&PushRequest {
                source_ref: source_ref.to_string(),
                target_ref: target_ref.to_string(),
                remove_files,
                platform_filter: self.settings.platform_filter.clone(),
                replication_mode: self.settings.replication_mode,
            })
            .await?;
        info!(
            source = %source_ref,
            target = %target_ref,
            digest = outcome.digest.as_deref().unwrap_or_default(),
            "Finished processing"
        );

        Ok(PushedImage {
            digest: outcome.digest,
            skipped: false,
        })
    }
}

/// Digest of an upload target and whether the push was skipped.
struct PushedImage {
    digest: Option<String>,
    skipped: bool,
}

/// Signs a digest-referenced image; anything else is a usage error.
pub async fn sign_image(
    signing: &SigningSettings,
    image_reference: &str,
) -> Result<String, TransportError> {
    if !ImageReference::parse(image_reference)?.has_digest() {
        return Err(SigningError::NotDigestReferenced(image_reference.to_string()).into());
    }
    Ok(signing.signer.sign(image_reference, &signing.key).await?)
}

/// Rewrites the job's target to `name@digest` and points the processed
/// resource (or, lacking one, the original) at the digest.
pub fn pin_to_digest(job: ProcessingJob, digest: &str) -> Result<ProcessingJob, ProcessingError> {
    let target_ref = job.upload_request.target_ref.clone().ok_or_else(|| {
        ProcessingError::MissingTargetReference {
            resource: job.resource.identity().to_string(),
        }
    })?;
    let job = job.with_target_ref(replace_tag_with_digest(&target_ref, digest)?);

    match job.processed_resource.clone() {
        Some(processed) => {
            let pinned = access_resource_via_digest(&processed, digest)?;
            Ok(job.with_processed_resource(pinned))
        }
        None => {
            let pinned = access_resource_via_digest(&job.resource, digest)?;
            Ok(job.with_resource(pinned))
        }
    }
}

pub fn access_resource_via_digest(
    resource: &Resource,
    digest: &str,
) -> Result<Resource, ProcessingError> {
    let access = match &resource.access {
        Access::OciRegistry { image_reference } => {
            Access::oci_registry(replace_tag_with_digest(image_reference, digest)?)
        }
        Access::RelativeOciReference { reference } => {
            Access::relative_oci_reference(replace_tag_with_digest(reference, digest)?)
        }
        other => {
            return Err(ProcessingError::UnsupportedAccess {
                resource: resource.identity().to_string(),
                access_type: other.access_type().to_string(),
            })
        }
    };
    Ok(resource.with_access(access))
}
