//! Declarative processing pipelines.
//!
//! This module provides the [`ProcessingPipeline`] that runs one processor
//! followed by an uploader chain on a resource, and the matcher that assigns
//! each resource to at most one pipeline (first match in configuration
//! order wins).

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::{Component, Label, Resource};
use crate::processing::traits::{
    resolve_image_reference, Filter, ProcessingError, ProcessingJob, Processor, Uploader,
};

/// Label recording which pipelines touched a resource.
pub const PROCESSING_LABEL_NAME: &str = "cloud.gardener.cnudie/sdo/lssd";

const PROCESSING_RULES_KEY: &str = "processingRules";

// ============================================================================
// Pipeline
// ============================================================================

/// Named combination of filters, one processor and an ordered uploader chain.
///
/// # Thread Safety
///
/// Stages are shared behind `Arc`, so one pipeline serves every job of a
/// run concurrently.
pub struct ProcessingPipeline {
    name: String,
    filters: Vec<Arc<dyn Filter>>,
    processor: Arc<dyn Processor>,
    uploaders: Vec<Arc<dyn Uploader>>,
}

impl fmt::Debug for ProcessingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingPipeline")
            .field("name", &self.name)
            .field(
                "filters",
                &self.filters.iter().map(|x| x.filter_name()).collect::<Vec<_>>(),
            )
            .field("processor", &self.processor.processor_name())
            .field(
                "uploaders",
                &self
                    .uploaders
                    .iter()
                    .map(|x| x.uploader_name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ProcessingPipeline {
    pub fn new(
        name: impl Into<String>,
        filters: Vec<Arc<dyn Filter>>,
        processor: Arc<dyn Processor>,
        uploaders: Vec<Arc<dyn Uploader>>,
    ) -> Self {
        Self {
            name: name.into(),
            filters,
            processor,
            uploaders,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True iff every filter accepts the pair. An empty filter list matches.
    pub fn matches(&self, component: &Component, resource: &Resource) -> bool {
        self.filters.iter().all(|f| f.matches(component, resource))
    }

    /// A fresh job; source and target are left for the stages to fill in.
    pub fn build_job(&self, component: Arc<Component>, resource: Resource) -> ProcessingJob {
        ProcessingJob::new(component, resource)
    }

    /// Runs the processor once, then the uploaders in order, and labels the
    /// processed resource with this pipeline's name.
    ///
    /// The first uploader reads the processor's source (defaulting to the
    /// resource's image reference); every later uploader reads the previous
    /// uploader's target.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError`] if a stage fails or an uploader after
    /// the first finds no target to chain from.
    pub fn run(&self, job: ProcessingJob) -> Result<ProcessingJob, ProcessingError> {
        info!(
            pipeline = %self.name,
            component = %job.component.identity(),
            resource = %job.resource.identity(),
            access = job.resource.access.access_type(),
            "Pipeline will process resource"
        );

        let mut job = self.processor.process(job)?;

        for (index, uploader) in self.uploaders.iter().enumerate() {
            job = if index == 0 {
                match job.upload_request.source_ref {
                    Some(_) => job,
                    None => {
                        let source = resolve_image_reference(&job.component, &job.resource)?;
                        job.with_source_ref(source)
                    }
                }
            } else {
                let previous_target = job.upload_request.target_ref.clone().ok_or_else(|| {
                    ProcessingError::MissingTargetReference {
                        resource: job.resource.identity().to_string(),
                    }
                })?;
                job.with_source_ref(previous_target)
            };

            job = uploader.process(job)?;
            debug!(
                pipeline = %self.name,
                uploader = uploader.uploader_name(),
                source = job.upload_request.source_ref.as_deref().unwrap_or_default(),
                target = job.upload_request.target_ref.as_deref().unwrap_or_default(),
                "Uploader applied"
            );
        }

        let labelled = with_processing_rule(job.current_resource(), &self.name);
        Ok(job.with_processed_resource(labelled))
    }
}

/// Returns `resource` with `rule` appended to its processing label.
fn with_processing_rule(resource: &Resource, rule: &str) -> Resource {
    let mut rules: Vec<String> = resource
        .label(PROCESSING_LABEL_NAME)
        .and_then(|label| label.value.get(PROCESSING_RULES_KEY))
        .and_then(|rules| serde_json::from_value(rules.clone()).ok())
        .unwrap_or_default();
    rules.push(rule.to_string());

    resource.with_label(processing_label(rules))
}

pub fn processing_label(rules: Vec<String>) -> Label {
    let mut value = serde_json::Map::new();
    value.insert(PROCESSING_RULES_KEY.to_string(), serde_json::json!(rules));
    Label {
        name: PROCESSING_LABEL_NAME.to_string(),
        value: serde_json::Value::Object(value),
    }
}

// ============================================================================
// Matching
// ============================================================================

/// First pipeline, in configuration order, whose filters all match.
pub fn select_pipeline<'a>(
    pipelines: &'a [Arc<ProcessingPipeline>],
    component: &Component,
    resource: &Resource,
) -> Option<&'a Arc<ProcessingPipeline>> {
    pipelines.iter().find(|p| p.matches(component, resource))
}

/// A job together with the pipeline that will run it.
#[derive(Debug, Clone)]
pub struct MatchedJob {
    pub pipeline: Arc<ProcessingPipeline>,
    pub job: ProcessingJob,
}

/// Lazily yields one job per OCI resource that some pipeline matches.
///
/// Resources with other access kinds are ignored. Resources no pipeline
/// matches are logged and left to pass through unprocessed.
pub fn enumerate_jobs<'a>(
    pipelines: &'a [Arc<ProcessingPipeline>],
    components: &'a [Arc<Component>],
) -> impl Iterator<Item = MatchedJob> + 'a {
    components.iter().flat_map(move |component| {
        component
            .resources
            .iter()
            .filter(|resource| resource.access.is_oci())
            .filter_map(move |resource| {
                match select_pipeline(pipelines, component, resource) {
                    Some(pipeline) => Some(MatchedJob {
                        pipeline: Arc::clone(pipeline),
                        job: pipeline.build_job(Arc::clone(component), resource.clone()),
                    }),
                    None => {
                        warn!(
                            component = %component.identity(),
                            resource = %resource.identity(),
                            access = resource.access.access_type(),
                            "No matching processing pipeline"
                        );
                        None
                    }
                }
            })
    })
}

// ============================================================================
// Tests
// ============================================================================
