//! Republication of patched component descriptors.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};

use crate::bom::{BomEntry, BomSink};
use crate::error::TransportError;
use crate::model::{
    Component, ComponentDescriptor, ComponentIdentity, Meta, ProcessingMode, UploadMode,
};
use crate::reference::descriptor_oci_ref;
use crate::traits::{RegistryClient, SchemaValidator};

/// What the publisher needs to know about the run.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub mode: ProcessingMode,
    pub upload_mode_cd: UploadMode,
    pub root: ComponentIdentity,
    /// Whether the root descriptor was present in the source repository
    /// before the run started.
    pub root_existed_before: bool,
    pub source_base_url: String,
    pub meta: Meta,
}

/// Validates and republishes components on its own bounded worker pool.
#[derive(Clone)]
pub struct Publisher {
    workers: usize,
    registry: Arc<dyn RegistryClient>,
    validator: Option<Arc<dyn SchemaValidator>>,
    settings: Arc<PublishSettings>,
    bom: BomSink,
}

impl Publisher {
    pub fn new(
        concurrency_limit: usize,
        registry: Arc<dyn RegistryClient>,
        validator: Option<Arc<dyn SchemaValidator>>,
        settings: PublishSettings,
        bom: BomSink,
    ) -> Self {
        Self {
            workers: concurrency_limit.max(1),
            registry,
            validator,
            settings: Arc::new(settings),
            bom,
        }
    }

    /// Publishes every component; the first failure stops further
    /// publication and aborts what is still running.
    #[instrument(skip_all, fields(components = components.len(), mode = ?self.settings.mode))]
    pub async fn publish_all(&self, components: &[Component]) -> Result<(), TransportError> {
        let mut tasks = JoinSet::new();

        for component in components {
            while tasks.len() >= self.workers {
                if let Some(joined) = tasks.join_next().await {
                    joined.map_err(|e| TransportError::Worker(e.to_string()))??;
                }
            }

            let publisher = self.clone();
            let component = component.clone();
            tasks.spawn(async move { publisher.publish(component).await });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.map_err(|e| TransportError::Worker(e.to_string()))??;
        }
        Ok(())
    }

    /// Validates one component and, in regular mode, publishes it.
    ///
    /// The root is replicated from the source repository if it existed
    /// there before the run; a root that only existed locally is uploaded
    /// fresh, which is supported only while it has no resources. Every other
    /// component is replicated.
    pub async fn publish(&self, component: Component) -> Result<(), TransportError> {
        let descriptor = ComponentDescriptor {
            meta: self.settings.meta.clone(),
            component,
        };
        let identity = descriptor.component.identity();
        self.validate(&descriptor)?;

        let target_base_url = descriptor
            .component
            .current_base_url()
            .unwrap_or_default()
            .to_string();

        if self.settings.mode == ProcessingMode::DryRun {
            info!(
                component = %identity,
                target = %target_base_url,
                "dry-run: would republish component descriptor"
            );
            return Ok(());
        }

        let is_root = identity == self.settings.root;
        if is_root && !self.settings.root_existed_before {
            if !descriptor.component.resources.is_empty() {
                return Err(TransportError::Unimplemented(format!(
                    "uploading local root component {} with resources",
                    identity
                )));
            }
            info!(component = %identity, target = %target_base_url, "Uploading component descriptor");
            self.registry
                .upload_descriptor(&descriptor, self.settings.upload_mode_cd)
                .await?;
        } else {
            info!(
                component = %identity,
                source = %self.settings.source_base_url,
                target = %target_base_url,
                "Replicating component descriptor"
            );
            self.registry
                .replicate_with_patched_descriptor(
                    &self.settings.source_base_url,
                    &identity,
                    &descriptor,
                    self.settings.upload_mode_cd,
                )
                .await?;
        }

        self.bom.append(BomEntry::docker(
            descriptor_oci_ref(&target_base_url, &identity),
            identity.to_string(),
        ));
        Ok(())
    }

    /// Schema check on the plain-data form; a no-op without a validator.
    pub fn validate(&self, descriptor: &ComponentDescriptor) -> Result<(), TransportError> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let identity = descriptor.component.identity();
        let value = serde_json::to_value(descriptor)?;

        validator.validate(&value).map_err(|source| {
            error!(component = %identity, error = %source, "Component descriptor failed validation");
            TransportError::Validation {
                component: identity,
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bom;
    use crate::testing::{component, oci_resource, MockRegistry, RejectingValidator};
    use std::collections::BTreeSet;

    const TARGET: &str = "tgt.example";

    fn settings(root_existed_before: bool) -> PublishSettings {
        PublishSettings {
            mode: ProcessingMode::Regular,
            upload_mode_cd: UploadMode::Skip,
            root: ComponentIdentity::new("example.com/root", "1.0.0"),
            root_existed_before,
            source_base_url: "src.example".to_string(),
            meta: Meta::default(),
        }
    }

    fn published(c: Component) -> Component {
        c.with_repository_context(TARGET)
    }

    fn new_publisher(
        registry: Arc<MockRegistry>,
        settings: PublishSettings,
    ) -> (Publisher, bom::BomCollector) {
        let (sink, collector) = bom::channel();
        (Publisher::new(4, registry, None, settings, sink), collector)
    }

    #[tokio::test]
    async fn test_existing_root_and_dependencies_are_replicated() {
        let registry = Arc::new(MockRegistry::default());
        let root = component("example.com/root", "1.0.0", vec![oci_resource("a", "r.example/a:1")]);
        let dep = component("example.com/dep", "2.0.0", vec![]);
        registry.add_descriptor(ComponentDescriptor::new(root.clone()));
        registry.add_descriptor(ComponentDescriptor::new(dep.clone()));

        let (publisher, collector) = new_publisher(registry.clone(), settings(true));
        publisher
            .publish_all(&[published(root.clone()), published(dep.clone())])
            .await
            .unwrap();

        let mut replicated: Vec<_> = registry.replications().into_iter().map(|(_, id)| id).collect();
        replicated.sort();
        assert_eq!(replicated, vec![dep.identity(), root.identity()]);
        assert!(registry.descriptor(TARGET, &root.identity()).is_some());

        let mut refs: Vec<_> = collector.drain().into_iter().map(|e| e.reference).collect();
        refs.sort();
        assert_eq!(
            refs,
            vec![
                "tgt.example/component-descriptors/example.com/dep:2.0.0",
                "tgt.example/component-descriptors/example.com/root:1.0.0",
            ]
        );
    }

    #[tokio::test]
    async fn test_local_root_without_resources_is_uploaded() {
        let registry = Arc::new(MockRegistry::default());
        let root = component("example.com/root", "1.0.0", vec![]);

        let (publisher, _collector) = new_publisher(registry.clone(), settings(false));
        publisher.publish(published(root.clone())).await.unwrap();

        assert!(registry.replications().is_empty());
        assert_eq!(registry.descriptor_writes(), vec![root.identity()]);
    }

    #[tokio::test]
    async fn test_local_root_with_resources_is_unimplemented() {
        let registry = Arc::new(MockRegistry::default());
        let root = component("example.com/root", "1.0.0", vec![oci_resource("a", "r.example/a:1")]);

        let (publisher, _collector) = new_publisher(registry.clone(), settings(false));
        let result = publisher.publish(published(root)).await;

        assert!(matches!(result, Err(TransportError::Unimplemented(_))));
        assert!(registry.descriptor_writes().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_is_fatal_even_in_dry_run() {
        let registry = Arc::new(MockRegistry::default());
        let dep = component("example.com/dep", "2.0.0", vec![]);
        let mut dry_run = settings(true);
        dry_run.mode = ProcessingMode::DryRun;

        let (sink, _collector) = bom::channel();
        let validator = RejectingValidator(BTreeSet::from(["example.com/dep".to_string()]));
        let publisher = Publisher::new(2, registry.clone(), Some(Arc::new(validator)), dry_run, sink);

        let result = publisher.publish_all(&[published(dep.clone())]).await;
        match result {
            Err(TransportError::Validation { component, .. }) => assert_eq!(component, dep.identity()),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(registry.call_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_all_stops_after_failure() {
        let registry = Arc::new(MockRegistry::default());
        let broken = component("example.com/broken", "1.0.0", vec![]);
        let deps: Vec<_> = (0..4)
            .map(|i| component(&format!("example.com/dep-{}", i), "1.0.0", vec![]))
            .collect();
        for dep in &deps {
            registry.add_descriptor(ComponentDescriptor::new(dep.clone()));
        }

        let (sink, _collector) = bom::channel();
        let validator = RejectingValidator(BTreeSet::from(["example.com/broken".to_string()]));
        let publisher = Publisher::new(1, registry.clone(), Some(Arc::new(validator)), settings(true), sink);

        let components: Vec<_> = std::iter::once(broken)
            .chain(deps)
            .map(published)
            .collect();
        let result = publisher.publish_all(&components).await;

        assert!(matches!(result, Err(TransportError::Validation { .. })));
        assert!(registry.replications().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_publishes_nothing() {
        let registry = Arc::new(MockRegistry::default());
        let mut dry_run = settings(false);
        dry_run.mode = ProcessingMode::DryRun;

        let (publisher, collector) = new_publisher(registry.clone(), dry_run);
        publisher
            .publish_all(&[published(component("example.com/root", "1.0.0", vec![]))])
            .await
            .unwrap();

        assert_eq!(registry.call_count(), 0);
        assert!(collector.drain().is_empty());
    }

    #[tokio::test]
    async fn test_second_publish_under_skip_writes_nothing() {
        let registry = Arc::new(MockRegistry::default());
        let dep = component("example.com/dep", "2.0.0", vec![]);
        registry.add_descriptor(ComponentDescriptor::new(dep.clone()));

        let (publisher, _collector) = new_publisher(registry.clone(), settings(true));
        publisher.publish(published(dep.clone())).await.unwrap();
        publisher.publish(published(dep)).await.unwrap();

        assert_eq!(registry.descriptor_writes().len(), 1);
    }
}
