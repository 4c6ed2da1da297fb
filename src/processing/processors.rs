//! Built-in [`Processor`] implementations.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::processing::traits::{
    resolve_image_reference, ProcessingError, ProcessingJob, Processor,
};

/// Sources the job from the resource's own image reference and leaves the
/// resource as it is.
#[derive(Debug, Default)]
pub struct NoOpProcessor;

impl Processor for NoOpProcessor {
    fn process(&self, job: ProcessingJob) -> Result<ProcessingJob, ProcessingError> {
        let source = resolve_image_reference(&job.component, &job.resource)?;
        let resource = job.resource.clone();
        Ok(job.with_source_ref(source).with_processed_resource(resource))
    }

    fn processor_name(&self) -> &'static str {
        "NoOpProcessor"
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileFilterConfig {
    /// Files listing the paths to remove, one per line.
    pub filter_files: Vec<PathBuf>,
}

/// Like [`NoOpProcessor`], and additionally removes the listed paths from
/// the copied image.
///
/// The filter files are read once at construction; blank lines and lines
/// starting with `#` are ignored.
#[derive(Debug)]
pub struct FileFilter {
    remove_files: Vec<String>,
}

impl FileFilter {
    /// Relative filter file paths resolve against `base_dir`.
    pub fn new(config: FileFilterConfig, base_dir: &Path) -> std::io::Result<Self> {
        let mut remove_files = Vec::new();
        for file in &config.filter_files {
            let path = base_dir.join(file);
            let content = std::fs::read_to_string(&path)?;
            remove_files.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            );
        }
        let mut seen = HashSet::new();
        remove_files.retain(|file| seen.insert(file.clone()));
        Ok(Self { remove_files })
    }

    pub fn remove_files(&self) -> &[String] {
        &self.remove_files
    }
}

impl Processor for FileFilter {
    fn process(&self, job: ProcessingJob) -> Result<ProcessingJob, ProcessingError> {
        let job = NoOpProcessor.process(job)?;
        Ok(job.with_remove_files(self.remove_files.clone()))
    }

    fn processor_name(&self) -> &'static str {
        "FileFilter"
    }
}
