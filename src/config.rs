//! Processing configuration.
//!
//! The YAML layout is:
//!
//! ```yaml
//! processors:
//!   strip-docs: { type: FileFilter, kwargs: { filter_files: [remove.txt] } }
//! uploaders:
//!   to-mirror: { type: PrefixUploader, kwargs: { prefix: mirror.example/images } }
//! image_processing_cfg:
//!   - name: default
//!     filter: { type: MatchAll }
//!     processor: strip-docs
//!     upload: [to-mirror]
//! ```
//!
//! Every `type` tag is resolved against a fixed table of known transforms
//! when the configuration is loaded, so an unknown tag fails before any
//! registry is contacted.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::model::ComponentIdentity;
use crate::platform::PlatformError;
use crate::processing::filters::{
    ComponentFilter, ImageFilter, MatchAllFilter, ResourceTypeFilter,
};
use crate::processing::processors::{FileFilter, NoOpProcessor};
use crate::processing::uploaders::{PrefixUploader, TagSuffixUploader};
use crate::processing::{Filter, ProcessingPipeline, Processor, Uploader};

const DEFAULT_PIPELINE_NAME: &str = "<no name>";

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("No such filter type: {0}")]
    UnknownFilter(String),

    #[error("No such processor type: {0}")]
    UnknownProcessor(String),

    #[error("No such uploader type: {0}")]
    UnknownUploader(String),

    #[error("No shared processor named '{0}'")]
    UnknownSharedProcessor(String),

    #[error("No shared uploader named '{0}'")]
    UnknownSharedUploader(String),

    #[error("Invalid arguments for {kind} {type_name}: {message}")]
    InvalidArguments {
        kind: &'static str,
        type_name: String,
        message: String,
    },

    #[error("Pipeline '{0}' has no uploader")]
    NoUploader(String),

    #[error("Invalid platform filter: {0}")]
    Platform(#[from] PlatformError),

    #[error("Source and target repository must differ, both are '{0}'")]
    SameSourceAndTarget(String),

    #[error("No target repository given")]
    MissingTargetRepository,

    #[error("Root component {0} has no repository context to transport from")]
    MissingSourceRepository(ComponentIdentity),

    #[error("Upload mode 'fail' is not supported for images")]
    FailModeForImages,

    #[error("Worker pool size must be at least 1")]
    ZeroWorkers,

    #[error("Either a descriptor file or source repository URL, component name and component version must be given")]
    IncompleteRootSelection,
}

// ============================================================================
// Raw YAML Structures
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct TransformConfig {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    kwargs: Value,
}

// `Many` must stay first: derived structs also deserialize from sequences.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

/// Either the name of a shared transform or an inline definition.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SharedOrInline {
    Shared(String),
    Inline(TransformConfig),
}

#[derive(Debug, Deserialize)]
struct PipelineConfig {
    #[serde(default)]
    name: Option<String>,
    filter: OneOrMany<TransformConfig>,
    #[serde(default)]
    processor: Option<SharedOrInline>,
    #[serde(default)]
    upload: Option<OneOrMany<SharedOrInline>>,
}

#[derive(Debug, Deserialize)]
struct RawProcessingConfig {
    #[serde(default)]
    processors: BTreeMap<String, TransformConfig>,
    #[serde(default)]
    uploaders: BTreeMap<String, TransformConfig>,
    image_processing_cfg: Vec<PipelineConfig>,
}

// ============================================================================
// Type Registry
// ============================================================================

/// Inputs transforms may need at construction time.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Directory of the configuration file; relative paths resolve here.
    pub base_dir: PathBuf,
}

type FilterFactory = fn(&str, Value, &BuildContext) -> Result<Arc<dyn Filter>, ConfigError>;
type ProcessorFactory = fn(&str, Value, &BuildContext) -> Result<Arc<dyn Processor>, ConfigError>;
type UploaderFactory = fn(&str, Value, &BuildContext) -> Result<Arc<dyn Uploader>, ConfigError>;

const FILTER_TYPES: &[(&str, FilterFactory)] = &[
    ("MatchAll", build_match_all),
    ("ComponentFilter", build_component_filter),
    ("ImageFilter", build_image_filter),
    ("ResourceTypeFilter", build_resource_type_filter),
];

const PROCESSOR_TYPES: &[(&str, ProcessorFactory)] = &[
    ("NoOpProcessor", build_noop_processor),
    ("FileFilter", build_file_filter),
];

const UPLOADER_TYPES: &[(&str, UploaderFactory)] = &[
    ("PrefixUploader", build_prefix_uploader),
    ("TagSuffixUploader", build_tag_suffix_uploader),
];

fn lookup<F: Copy>(table: &[(&str, F)], type_name: &str) -> Option<F> {
    table
        .iter()
        .find(|(name, _)| *name == type_name)
        .map(|(_, factory)| *factory)
}

fn parse_kwargs<T: DeserializeOwned>(
    kind: &'static str,
    type_name: &str,
    kwargs: Value,
) -> Result<T, ConfigError> {
    let kwargs = if kwargs.is_null() {
        Value::Mapping(Default::default())
    } else {
        kwargs
    };
    serde_yaml::from_value(kwargs).map_err(|e| ConfigError::InvalidArguments {
        kind,
        type_name: type_name.to_string(),
        message: e.to_string(),
    })
}

fn invalid(kind: &'static str, type_name: &str, e: impl ToString) -> ConfigError {
    ConfigError::InvalidArguments {
        kind,
        type_name: type_name.to_string(),
        message: e.to_string(),
    }
}

fn build_match_all(_: &str, _: Value, _: &BuildContext) -> Result<Arc<dyn Filter>, ConfigError> {
    Ok(Arc::new(MatchAllFilter))
}

fn build_component_filter(
    type_name: &str,
    kwargs: Value,
    _: &BuildContext,
) -> Result<Arc<dyn Filter>, ConfigError> {
    let config = parse_kwargs("filter", type_name, kwargs)?;
    let filter = ComponentFilter::new(config).map_err(|e| invalid("filter", type_name, e))?;
    Ok(Arc::new(filter))
}

fn build_image_filter(
    type_name: &str,
    kwargs: Value,
    _: &BuildContext,
) -> Result<Arc<dyn Filter>, ConfigError> {
    let config = parse_kwargs("filter", type_name, kwargs)?;
    let filter = ImageFilter::new(config).map_err(|e| invalid("filter", type_name, e))?;
    Ok(Arc::new(filter))
}

fn build_resource_type_filter(
    type_name: &str,
    kwargs: Value,
    _: &BuildContext,
) -> Result<Arc<dyn Filter>, ConfigError> {
    let config = parse_kwargs("filter", type_name, kwargs)?;
    Ok(Arc::new(ResourceTypeFilter::new(config)))
}

fn build_noop_processor(
    _: &str,
    _: Value,
    _: &BuildContext,
) -> Result<Arc<dyn Processor>, ConfigError> {
    Ok(Arc::new(NoOpProcessor))
}

fn build_file_filter(
    type_name: &str,
    kwargs: Value,
    ctx: &BuildContext,
) -> Result<Arc<dyn Processor>, ConfigError> {
    let config = parse_kwargs("processor", type_name, kwargs)?;
    let filter =
        FileFilter::new(config, &ctx.base_dir).map_err(|e| invalid("processor", type_name, e))?;
    Ok(Arc::new(filter))
}

fn build_prefix_uploader(
    type_name: &str,
    kwargs: Value,
    _: &BuildContext,
) -> Result<Arc<dyn Uploader>, ConfigError> {
    let config = parse_kwargs("uploader", type_name, kwargs)?;
    Ok(Arc::new(PrefixUploader::new(config)))
}

fn build_tag_suffix_uploader(
    type_name: &str,
    kwargs: Value,
    _: &BuildContext,
) -> Result<Arc<dyn Uploader>, ConfigError> {
    let config = parse_kwargs("uploader", type_name, kwargs)?;
    Ok(Arc::new(TagSuffixUploader::new(config)))
}

fn build_filter(cfg: TransformConfig, ctx: &BuildContext) -> Result<Arc<dyn Filter>, ConfigError> {
    let factory = lookup(FILTER_TYPES, &cfg.type_name)
        .ok_or_else(|| ConfigError::UnknownFilter(cfg.type_name.clone()))?;
    factory(&cfg.type_name, cfg.kwargs, ctx)
}

fn build_processor(
    cfg: TransformConfig,
    ctx: &BuildContext,
) -> Result<Arc<dyn Processor>, ConfigError> {
    let factory = lookup(PROCESSOR_TYPES, &cfg.type_name)
        .ok_or_else(|| ConfigError::UnknownProcessor(cfg.type_name.clone()))?;
    factory(&cfg.type_name, cfg.kwargs, ctx)
}

fn build_uploader(
    cfg: TransformConfig,
    ctx: &BuildContext,
) -> Result<Arc<dyn Uploader>, ConfigError> {
    let factory = lookup(UPLOADER_TYPES, &cfg.type_name)
        .ok_or_else(|| ConfigError::UnknownUploader(cfg.type_name.clone()))?;
    factory(&cfg.type_name, cfg.kwargs, ctx)
}

// ============================================================================
// Processing Configuration
// ============================================================================

/// The ordered pipeline list of a run.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pipelines: Vec<Arc<ProcessingPipeline>>,
}

impl ProcessingConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_yaml(&content, &base_dir)
    }

    pub fn from_yaml(yaml: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let raw: RawProcessingConfig = serde_yaml::from_str(yaml)?;
        let ctx = BuildContext {
            base_dir: base_dir.to_path_buf(),
        };

        let shared_processors = raw
            .processors
            .into_iter()
            .map(|(name, cfg)| Ok((name, build_processor(cfg, &ctx)?)))
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;
        let shared_uploaders = raw
            .uploaders
            .into_iter()
            .map(|(name, cfg)| Ok((name, build_uploader(cfg, &ctx)?)))
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        let pipelines = raw
            .image_processing_cfg
            .into_iter()
            .map(|cfg| build_pipeline(cfg, &shared_processors, &shared_uploaders, &ctx))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(pipelines = pipelines.len(), "Loaded processing configuration");
        Ok(Self { pipelines })
    }

    pub fn pipelines(&self) -> &[Arc<ProcessingPipeline>] {
        &self.pipelines
    }

    pub fn into_pipelines(self) -> Vec<Arc<ProcessingPipeline>> {
        self.pipelines
    }
}

fn build_pipeline(
    cfg: PipelineConfig,
    shared_processors: &BTreeMap<String, Arc<dyn Processor>>,
    shared_uploaders: &BTreeMap<String, Arc<dyn Uploader>>,
    ctx: &BuildContext,
) -> Result<Arc<ProcessingPipeline>, ConfigError> {
    let name = cfg
        .name
        .unwrap_or_else(|| DEFAULT_PIPELINE_NAME.to_string());

    let filters = cfg
        .filter
        .into_vec()
        .into_iter()
        .map(|f| build_filter(f, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    let processor: Arc<dyn Processor> = match cfg.processor {
        None => Arc::new(NoOpProcessor),
        Some(SharedOrInline::Shared(shared)) => shared_processors
            .get(&shared)
            .cloned()
            .ok_or(ConfigError::UnknownSharedProcessor(shared))?,
        Some(SharedOrInline::Inline(inline)) => build_processor(inline, ctx)?,
    };

    let uploaders = cfg
        .upload
        .ok_or_else(|| ConfigError::NoUploader(name.clone()))?
        .into_vec()
        .into_iter()
        .map(|upload| match upload {
            SharedOrInline::Shared(shared) => shared_uploaders
                .get(&shared)
                .cloned()
                .ok_or(ConfigError::UnknownSharedUploader(shared)),
            SharedOrInline::Inline(inline) => build_uploader(inline, ctx),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if uploaders.is_empty() {
        return Err(ConfigError::NoUploader(name));
    }

    Ok(Arc::new(ProcessingPipeline::new(
        name, filters, processor, uploaders,
    )))
}

// ============================================================================
// Root Selection
// ============================================================================

/// Where the root component descriptor of a run comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootSource {
    DescriptorFile(PathBuf),
    Remote {
        repository_url: String,
        identity: ComponentIdentity,
    },
}

impl RootSource {
    /// A descriptor file takes precedence; otherwise all three remote parts
    /// are required.
    pub fn from_parts(
        descriptor_file: Option<PathBuf>,
        repository_url: Option<String>,
        name: Option<String>,
        version: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = descriptor_file {
            return Ok(RootSource::DescriptorFile(path));
        }
        match (repository_url, name, version) {
            (Some(repository_url), Some(name), Some(version)) => Ok(RootSource::Remote {
                repository_url,
                identity: ComponentIdentity::new(name, version),
            }),
            _ => Err(ConfigError::IncompleteRootSelection),
        }
    }
}
