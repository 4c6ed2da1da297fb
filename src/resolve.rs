//! Loading the root descriptor and the components it references.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ConfigError, RootSource};
use crate::error::TransportError;
use crate::model::{Component, ComponentDescriptor, ComponentIdentity};
use crate::traits::{RegistryClient, RegistryError};

/// Reads a descriptor from YAML (or JSON, which YAML accepts).
pub fn read_descriptor_file(path: &Path) -> Result<ComponentDescriptor, TransportError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_yaml::from_str(&content)?)
}

pub fn write_descriptor_file(
    path: &Path,
    descriptor: &ComponentDescriptor,
) -> Result<(), TransportError> {
    let content = serde_yaml::to_string(descriptor)?;
    fs::write(path, content).map_err(|source| TransportError::WriteFile {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "Wrote component descriptor");
    Ok(())
}

/// Loads the root descriptor. A remotely loaded root gets the repository it
/// was loaded from as its current repository context.
pub async fn load_root_descriptor(
    source: &RootSource,
    registry: &dyn RegistryClient,
) -> Result<ComponentDescriptor, TransportError> {
    match source {
        RootSource::DescriptorFile(path) => read_descriptor_file(path),
        RootSource::Remote {
            repository_url,
            identity,
        } => {
            let descriptor = registry
                .download_descriptor(repository_url, identity)
                .await?
                .ok_or_else(|| RegistryError::DescriptorNotFound(identity.clone()))?;
            let component = descriptor.component.with_repository_context(repository_url);
            Ok(descriptor.with_component(component))
        }
    }
}

/// Returns the root followed by every transitively referenced component,
/// each once, in depth-first order. References resolve against the current
/// repository context of the referencing component.
///
/// # Errors
///
/// A referenced descriptor that cannot be found aborts the resolution.
pub async fn resolve_components(
    descriptor: &ComponentDescriptor,
    registry: &dyn RegistryClient,
) -> Result<Vec<Arc<Component>>, TransportError> {
    let root = &descriptor.component;
    let mut visited: BTreeSet<ComponentIdentity> = BTreeSet::from([root.identity()]);
    let mut components = vec![Arc::new(root.clone())];
    let mut pending = references_of(root, None);

    while let Some((base_url, identity)) = pending.pop() {
        if !visited.insert(identity.clone()) {
            continue;
        }
        debug!(component = %identity, repository = %base_url, "Resolving component reference");
        let component = registry
            .download_descriptor(&base_url, &identity)
            .await?
            .ok_or_else(|| RegistryError::DescriptorNotFound(identity.clone()))?
            .component;

        pending.extend(references_of(&component, Some(&base_url)));
        components.push(Arc::new(component));
    }

    info!(
        root = %root.identity(),
        components = components.len(),
        "Resolved component references"
    );
    Ok(components)
}

/// References of `component` as a stack: the first reference is on top.
fn references_of(
    component: &Component,
    fallback_base_url: Option<&str>,
) -> Vec<(String, ComponentIdentity)> {
    let base_url = component
        .current_base_url()
        .or(fallback_base_url)
        .unwrap_or_default()
        .to_string();
    component
        .component_references
        .iter()
        .rev()
        .map(|reference| (base_url.clone(), reference.identity()))
        .collect()
}
