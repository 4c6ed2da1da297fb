//! Core traits and types for resource processing pipelines.
//!
//! A pipeline is composed from three kinds of stages:
//! - [`Filter`]s decide whether a pipeline is responsible for a resource
//! - one [`Processor`] prepares the upload request
//! - a chain of [`Uploader`]s decides where the image goes
//!
//! Stages are constructed once from configuration and shared by every job
//! of a run, so they must not keep per-call state.

use crate::model::{Access, Component, Resource};
use crate::reference::ReferenceError;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Stage Traits
// ============================================================================

/// Predicate over a `(component, resource)` pair.
pub trait Filter: Send + Sync {
    fn matches(&self, component: &Component, resource: &Resource) -> bool;

    /// Returns the configuration type tag of this filter.
    fn filter_name(&self) -> &'static str;
}

/// First transform of a pipeline; runs exactly once per job.
///
/// Typically sets `upload_request.source_ref`, optionally
/// `upload_request.remove_files`, and the initial processed resource.
pub trait Processor: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ProcessingError`] if the resource cannot be processed, e.g.
    /// because its access kind is not supported.
    fn process(&self, job: ProcessingJob) -> Result<ProcessingJob, ProcessingError>;

    fn processor_name(&self) -> &'static str;
}

/// One link of a pipeline's uploader chain.
///
/// Reads `upload_request.source_ref` and sets `upload_request.target_ref`
/// plus the processed resource's access. The pipeline rewires the source
/// of every uploader after the first to the previous uploader's target.
pub trait Uploader: Send + Sync {
    fn process(&self, job: ProcessingJob) -> Result<ProcessingJob, ProcessingError>;

    fn uploader_name(&self) -> &'static str;
}

// ============================================================================
// Job Structures
// ============================================================================

/// What to copy where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    pub source_ref: Option<String>,
    /// Must be set by an uploader before the job executes.
    pub target_ref: Option<String>,
    pub remove_files: Option<Vec<String>>,
}

/// Unit of work for one resource of one component.
///
/// Jobs are updated by value: every `with_*` method consumes the job and
/// returns the updated one, so concurrent jobs never share mutable state.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub component: Arc<Component>,
    pub resource: Resource,
    pub processed_resource: Option<Resource>,
    pub upload_request: UploadRequest,
}

impl ProcessingJob {
    pub fn new(component: Arc<Component>, resource: Resource) -> Self {
        Self {
            component,
            resource,
            processed_resource: None,
            upload_request: UploadRequest::default(),
        }
    }

    pub fn with_source_ref(mut self, source_ref: impl Into<String>) -> Self {
        self.upload_request.source_ref = Some(source_ref.into());
        self
    }

    pub fn with_target_ref(mut self, target_ref: impl Into<String>) -> Self {
        self.upload_request.target_ref = Some(target_ref.into());
        self
    }

    pub fn with_remove_files(mut self, remove_files: Vec<String>) -> Self {
        self.upload_request.remove_files = Some(remove_files);
        self
    }

    pub fn with_processed_resource(mut self, resource: Resource) -> Self {
        self.processed_resource = Some(resource);
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    /// The processed resource if a stage produced one, else the original.
    pub fn current_resource(&self) -> &Resource {
        self.processed_resource.as_ref().unwrap_or(&self.resource)
    }

    /// `<component name>/<resource name>`, used for BOM records and logs.
    pub fn origin(&self) -> String {
        format!("{}/{}", self.component.name, self.resource.name)
    }
}

/// Absolute image reference of `resource`. Relative references resolve
/// against the component's current repository context.
pub fn resolve_image_reference(
    component: &Component,
    resource: &Resource,
) -> Result<String, ProcessingError> {
    match &resource.access {
        Access::OciRegistry { image_reference } => Ok(image_reference.clone()),
        Access::RelativeOciReference { reference } => {
            let base_url = component.current_base_url().ok_or_else(|| {
                ProcessingError::MissingRepositoryContext {
                    component: component.identity().to_string(),
                    resource: resource.identity().to_string(),
                }
            })?;
            Ok(format!("{}/{}", base_url.trim_end_matches('/'), reference))
        }
        other => Err(ProcessingError::UnsupportedAccess {
            resource: resource.identity().to_string(),
            access_type: other.access_type().to_string(),
        }),
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum ProcessingError {
    /// Resource access is neither an OCI registry nor a relative OCI reference
    #[error("Unsupported access type '{access_type}' for resource {resource}")]
    UnsupportedAccess {
        resource: String,
        access_type: String,
    },

    #[error("No source reference set for resource {resource}")]
    MissingSourceReference { resource: String },

    #[error("No target reference set for resource {resource}")]
    MissingTargetReference { resource: String },

    #[error("Component {component} has no repository context to resolve relative resource {resource}")]
    MissingRepositoryContext { component: String, resource: String },

    /// Tag-based rewrite of a reference that carries no tag
    #[error("Reference '{0}' has no tag to rewrite")]
    MissingTag(String),

    #[error("Invalid image reference: {0}")]
    Reference(#[from] ReferenceError),
}
