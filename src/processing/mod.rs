//! Processing module - per-resource transform pipelines.
//!
//! This module provides the core abstractions for resource processing:
//! - **Traits**: [`Filter`], [`Processor`], [`Uploader`] stages
//! - **Jobs**: [`ProcessingJob`] and its [`UploadRequest`]
//! - **Pipeline**: [`pipeline::ProcessingPipeline`] and first-match selection
//! - **Built-ins**: the filters, processors and uploaders known to configuration

pub mod filters;
pub mod pipeline;
pub mod processors;
pub mod traits;
pub mod uploaders;

pub use traits::{
    resolve_image_reference, Filter, ProcessingError, ProcessingJob, Processor, UploadRequest,
    Uploader,
};

pub use pipeline::{
    enumerate_jobs, processing_label, select_pipeline, MatchedJob, ProcessingPipeline,
    PROCESSING_LABEL_NAME,
};
