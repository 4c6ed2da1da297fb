//! Built-in [`Uploader`] implementations.

use serde::Deserialize;

use crate::model::Access;
use crate::processing::traits::{ProcessingError, ProcessingJob, Uploader};
use crate::reference::ImageReference;

fn source_ref(job: &ProcessingJob) -> Result<&str, ProcessingError> {
    job.upload_request
        .source_ref
        .as_deref()
        .ok_or_else(|| ProcessingError::MissingSourceReference {
            resource: job.resource.identity().to_string(),
        })
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrefixUploaderConfig {
    pub prefix: String,
    #[serde(default = "default_true")]
    pub mangle: bool,
    #[serde(default)]
    pub convert_to_relative_refs: bool,
}

/// Relocates images below `prefix`, keeping the source name and tag or
/// digest: `r.example/org/img:1` becomes `<prefix>/r_example/org/img:1`
/// with mangling, `<prefix>/r.example/org/img:1` without.
///
/// With `convert_to_relative_refs` the processed resource gets a relative
/// reference (the target without `<prefix>/`), which only resolves when the
/// prefix is the target repository's base URL.
#[derive(Debug)]
pub struct PrefixUploader {
    prefix: String,
    mangle: bool,
    convert_to_relative_refs: bool,
}

impl PrefixUploader {
    pub fn new(config: PrefixUploaderConfig) -> Self {
        Self {
            prefix: config.prefix.trim_end_matches('/').to_string(),
            mangle: config.mangle,
            convert_to_relative_refs: config.convert_to_relative_refs,
        }
    }

    fn relative_name(&self, source: &ImageReference) -> String {
        if self.mangle {
            source.name.replace(['.', ':'], "_")
        } else {
            source.name.clone()
        }
    }
}

impl Uploader for PrefixUploader {
    fn process(&self, job: ProcessingJob) -> Result<ProcessingJob, ProcessingError> {
        let source = ImageReference::parse(source_ref(&job)?)?;
        let relative = ImageReference {
            name: self.relative_name(&source),
            tag: source.tag.clone(),
            digest: source.digest.clone(),
        }
        .to_string();
        let target = format!("{}/{}", self.prefix, relative);

        let access = if self.convert_to_relative_refs {
            Access::relative_oci_reference(relative)
        } else {
            Access::oci_registry(&target)
        };
        let processed = job.current_resource().with_access(access);

        Ok(job.with_target_ref(target).with_processed_resource(processed))
    }

    fn uploader_name(&self) -> &'static str {
        "PrefixUploader"
    }
}

fn default_separator() -> String {
    "-".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagSuffixUploaderConfig {
    pub suffix: String,
    #[serde(default = "default_separator")]
    pub separator: String,
}

/// Keeps the repository and appends `<separator><suffix>` to the tag.
/// References without a tag cannot be suffixed.
#[derive(Debug)]
pub struct TagSuffixUploader {
    suffix: String,
    separator: String,
}

impl TagSuffixUploader {
    pub fn new(config: TagSuffixUploaderConfig) -> Self {
        Self {
            suffix: config.suffix,
            separator: config.separator,
        }
    }
}

impl Uploader for TagSuffixUploader {
    fn process(&self, job: ProcessingJob) -> Result<ProcessingJob, ProcessingError> {
        let source_ref = source_ref(&job)?;
        let source = ImageReference::parse(source_ref)?;
        let tag = source
            .tag
            .as_deref()
            .ok_or_else(|| ProcessingError::MissingTag(source_ref.to_string()))?;

        let target = ImageReference {
            name: source.name.clone(),
            tag: Some(format!("{}{}{}", tag, self.separator, self.suffix)),
            digest: None,
        }
        .to_string();
        let processed = job
            .current_resource()
            .with_access(Access::oci_registry(&target));

        Ok(job.with_target_ref(target).with_processed_resource(processed))
    }

    fn uploader_name(&self) -> &'static str {
        "TagSuffixUploader"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{component, oci_resource};
    use std::sync::Arc;

    fn job_from(source: &str) -> ProcessingJob {
        let c = Arc::new(component("example.com/app", "1.0.0", vec![]));
        ProcessingJob::new(c, oci_resource("img", source)).with_source_ref(source)
    }

    fn prefix(prefix: &str, mangle: bool, relative: bool) -> PrefixUploader {
        PrefixUploader::new(PrefixUploaderConfig {
            prefix: prefix.to_string(),
            mangle,
            convert_to_relative_refs: relative,
        })
    }

    #[test]
    fn test_prefix_uploader_mangles_source_name() {
        let job = prefix("tgt.example/mirror/", true, false)
            .process(job_from("r.example:5000/org/img:1.0"))
            .unwrap();
        assert_eq!(
            job.upload_request.target_ref.as_deref(),
            Some("tgt.example/mirror/r_example_5000/org/img:1.0")
        );
        assert_eq!(
            job.processed_resource.unwrap().access,
            Access::oci_registry("tgt.example/mirror/r_example_5000/org/img:1.0")
        );
    }

    #[test]
    fn test_prefix_uploader_keeps_digest_and_relative_refs() {
        let job = prefix("tgt.example", false, true)
            .process(job_from("r.example/img@sha256:abc"))
            .unwrap();
        assert_eq!(
            job.upload_request.target_ref.as_deref(),
            Some("tgt.example/r.example/img@sha256:abc")
        );
        assert_eq!(
            job.processed_resource.unwrap().access,
            Access::relative_oci_reference("r.example/img@sha256:abc")
        );
    }

    #[test]
    fn test_prefix_uploader_requires_source() {
        let c = Arc::new(component("example.com/app", "1.0.0", vec![]));
        let job = ProcessingJob::new(c, oci_resource("img", "r.example/img:1"));
        assert!(matches!(
            prefix("tgt.example", true, false).process(job),
            Err(ProcessingError::MissingSourceReference { .. })
        ));
    }

    #[test]
    fn test_tag_suffix_uploader() {
        let uploader = TagSuffixUploader::new(TagSuffixUploaderConfig {
            suffix: "fips".to_string(),
            separator: default_separator(),
        });
        let job = uploader.process(job_from("r.example/img:1.0")).unwrap();
        assert_eq!(
            job.upload_request.target_ref.as_deref(),
            Some("r.example/img:1.0-fips")
        );

        assert!(matches!(
            uploader.process(job_from("r.example/img@sha256:abc")),
            Err(ProcessingError::MissingTag(_))
        ));
    }
}
