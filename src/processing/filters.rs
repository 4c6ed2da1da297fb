//! Built-in [`Filter`] implementations.
//!
//! Name and reference patterns are regular expressions matched against the
//! whole value. Exclusions win over inclusions, and an empty include list
//! includes everything.

use regex::Regex;
use serde::Deserialize;

use crate::model::{Component, Resource};
use crate::processing::traits::{resolve_image_reference, Filter};
use crate::reference::ImageReference;

fn full_match_patterns(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("^(?:{})$", p)))
        .collect()
}

fn is_included(value: &str, include: &[Regex], exclude: &[Regex]) -> bool {
    if exclude.iter().any(|re| re.is_match(value)) {
        return false;
    }
    include.is_empty() || include.iter().any(|re| re.is_match(value))
}

/// Accepts every resource.
#[derive(Debug, Default)]
pub struct MatchAllFilter;

impl Filter for MatchAllFilter {
    fn matches(&self, _component: &Component, _resource: &Resource) -> bool {
        true
    }

    fn filter_name(&self) -> &'static str {
        "MatchAll"
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentFilterConfig {
    #[serde(default)]
    pub include_component_names: Vec<String>,
    #[serde(default)]
    pub exclude_component_names: Vec<String>,
}

/// Selects by owning component name.
#[derive(Debug)]
pub struct ComponentFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl ComponentFilter {
    pub fn new(config: ComponentFilterConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            include: full_match_patterns(&config.include_component_names)?,
            exclude: full_match_patterns(&config.exclude_component_names)?,
        })
    }
}

impl Filter for ComponentFilter {
    fn matches(&self, component: &Component, _resource: &Resource) -> bool {
        is_included(&component.name, &self.include, &self.exclude)
    }

    fn filter_name(&self) -> &'static str {
        "ComponentFilter"
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageFilterConfig {
    #[serde(default)]
    pub include_image_refs: Vec<String>,
    #[serde(default)]
    pub exclude_image_refs: Vec<String>,
    #[serde(default)]
    pub include_image_names: Vec<String>,
    #[serde(default)]
    pub exclude_image_names: Vec<String>,
}

/// Selects by image reference and by image name (the reference without
/// tag or digest). Both criteria must accept the image.
#[derive(Debug)]
pub struct ImageFilter {
    include_refs: Vec<Regex>,
    exclude_refs: Vec<Regex>,
    include_names: Vec<Regex>,
    exclude_names: Vec<Regex>,
}

impl ImageFilter {
    pub fn new(config: ImageFilterConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            include_refs: full_match_patterns(&config.include_image_refs)?,
            exclude_refs: full_match_patterns(&config.exclude_image_refs)?,
            include_names: full_match_patterns(&config.include_image_names)?,
            exclude_names: full_match_patterns(&config.exclude_image_names)?,
        })
    }
}

impl Filter for ImageFilter {
    fn matches(&self, component: &Component, resource: &Resource) -> bool {
        let Ok(image_ref) = resolve_image_reference(component, resource) else {
            return false;
        };
        let Ok(parsed) = ImageReference::parse(&image_ref) else {
            return false;
        };

        is_included(&image_ref, &self.include_refs, &self.exclude_refs)
            && is_included(&parsed.name, &self.include_names, &self.exclude_names)
    }

    fn filter_name(&self) -> &'static str {
        "ImageFilter"
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceTypeFilterConfig {
    #[serde(default)]
    pub include_resource_types: Vec<String>,
    #[serde(default)]
    pub exclude_resource_types: Vec<String>,
}

/// Selects by exact resource type.
#[derive(Debug)]
pub struct ResourceTypeFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl ResourceTypeFilter {
    pub fn new(config: ResourceTypeFilterConfig) -> Self {
        Self {
            include: config.include_resource_types,
            exclude: config.exclude_resource_types,
        }
    }
}

impl Filter for ResourceTypeFilter {
    fn matches(&self, _component: &Component, resource: &Resource) -> bool {
        let t = &resource.resource_type;
        !self.exclude.contains(t) && (self.include.is_empty() || self.include.contains(t))
    }

    fn filter_name(&self) -> &'static str {
        "ResourceTypeFilter"
    }
}
