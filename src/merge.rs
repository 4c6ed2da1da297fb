//! Reassembles components from completed jobs.
//!
//! Merging is two-phased: components that own at least one completed job
//! get their resource list rebuilt, then every known component that owned
//! no job is passed through unchanged.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::model::{Component, ComponentIdentity, Resource, ResourceIdentity};
use crate::processing::ProcessingJob;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("Root component {0} not found after merge")]
    RootNotFound(ComponentIdentity),

    #[error("Found {count} components with root identity {identity}, expected exactly one")]
    MultipleRoots {
        identity: ComponentIdentity,
        count: usize,
    },
}

/// Completed jobs of one component, together with the component as it was
/// before processing.
#[derive(Debug)]
pub struct JobGroup {
    pub component: Arc<Component>,
    pub jobs: Vec<ProcessingJob>,
}

/// Groups jobs by owning component identity. The complete job sequence is
/// consumed before any group is returned.
pub fn group_jobs<I>(jobs: I) -> BTreeMap<ComponentIdentity, JobGroup>
where
    I: IntoIterator<Item = ProcessingJob>,
{
    let mut groups: BTreeMap<ComponentIdentity, JobGroup> = BTreeMap::new();
    for job in jobs {
        groups
            .entry(job.component.identity())
            .or_insert_with(|| JobGroup {
                component: Arc::clone(&job.component),
                jobs: Vec::new(),
            })
            .jobs
            .push(job);
    }
    groups
}

/// Rebuilds the group's resource list in original order, substituting each
/// processed resource (or the job's original resource for a no-op result).
fn patch_component(group: &JobGroup) -> Component {
    let patched: HashMap<ResourceIdentity, &Resource> = group
        .jobs
        .iter()
        .map(|job| (job.resource.identity(), job.current_resource()))
        .collect();

    let resources = group
        .component
        .resources
        .iter()
        .map(|resource| {
            patched
                .get(&resource.identity())
                .map(|r| (*r).clone())
                .unwrap_or_else(|| resource.clone())
        })
        .collect();

    group.component.with_resources(resources)
}

/// Merges completed jobs back into components.
///
/// The result follows the order of `known_components` (first occurrence of
/// each identity). Processed components that are not among the known ones
/// are appended in identity order.
pub fn merge_components<I>(jobs: I, known_components: &[Arc<Component>]) -> Vec<Component>
where
    I: IntoIterator<Item = ProcessingJob>,
{
    let mut processed: BTreeMap<ComponentIdentity, Component> = group_jobs(jobs)
        .into_iter()
        .map(|(identity, group)| (identity, patch_component(&group)))
        .collect();

    let mut seen = BTreeSet::new();
    let mut merged = Vec::with_capacity(known_components.len());

    for component in known_components {
        let identity = component.identity();
        if !seen.insert(identity.clone()) {
            continue;
        }
        match processed.remove(&identity) {
            Some(patched) => merged.push(patched),
            None => {
                debug!(component = %identity, "No processed resources, passing through");
                merged.push(component.as_ref().clone());
            }
        }
    }

    merged.extend(processed.into_values());
    merged
}

/// Appends the source and then the target base URL to the component's
/// repository-context history, each only if not already current.
pub fn propagate_repository_contexts(
    component: &Component,
    source_base_url: &str,
    target_base_url: &str,
) -> Component {
    component
        .with_repository_context(source_base_url)
        .with_repository_context(target_base_url)
}

/// The single component carrying the root identity.
///
/// # Errors
///
/// Zero or several matches break a merge invariant.
pub fn find_root<'a>(
    components: &'a [Component],
    root: &ComponentIdentity,
) -> Result<&'a Component, MergeError> {
    let mut matches = components.iter().filter(|c| &c.identity() == root);
    let first = matches
        .next()
        .ok_or_else(|| MergeError::RootNotFound(root.clone()))?;

    let others = matches.count();
    if others > 0 {
        return Err(MergeError::MultipleRoots {
            identity: root.clone(),
            count: others + 1,
        });
    }
    Ok(first)
}
