use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub const OCI_REGISTRY_ACCESS: &str = "ociRegistry";
pub const RELATIVE_OCI_REFERENCE_ACCESS: &str = "relativeOciReference";

/// `(name, version)` key of a component; the grouping key for merges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentIdentity {
    pub name: String,
    pub version: String,
}

impl ComponentIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ComponentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Identity of a resource within its component: name, type and extra identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentity {
    pub name: String,
    pub resource_type: String,
    pub extra_identity: BTreeMap<String, String>,
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.resource_type)?;
        for (key, value) in &self.extra_identity {
            write!(f, ",{}={}", key, value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryContext {
    pub base_url: String,
    #[serde(rename = "type")]
    pub context_type: String,
}

impl RepositoryContext {
    pub fn oci_registry(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            context_type: OCI_REGISTRY_ACCESS.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: Value,
}

/// How a resource is accessed. Only the two OCI kinds are understood; every
/// other access is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Access {
    OciRegistry { image_reference: String },
    RelativeOciReference { reference: String },
    Other(Value),
}

impl Access {
    pub fn oci_registry(image_reference: impl Into<String>) -> Self {
        Access::OciRegistry {
            image_reference: image_reference.into(),
        }
    }

    pub fn relative_oci_reference(reference: impl Into<String>) -> Self {
        Access::RelativeOciReference {
            reference: reference.into(),
        }
    }

    pub fn access_type(&self) -> &str {
        match self {
            Access::OciRegistry { .. } => OCI_REGISTRY_ACCESS,
            Access::RelativeOciReference { .. } => RELATIVE_OCI_REFERENCE_ACCESS,
            Access::Other(value) => value.get("type").and_then(Value::as_str).unwrap_or(""),
        }
    }

    pub fn is_oci(&self) -> bool {
        !matches!(self, Access::Other(_))
    }
}

impl TryFrom<Value> for Access {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let access_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "access has no type".to_string())?;

        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| format!("{} access is missing '{}'", access_type, name))
        };

        match access_type {
            OCI_REGISTRY_ACCESS => Ok(Access::OciRegistry {
                image_reference: field("imageReference")?,
            }),
            RELATIVE_OCI_REFERENCE_ACCESS => Ok(Access::RelativeOciReference {
                reference: field("reference")?,
            }),
            _ => Ok(Access::Other(value)),
        }
    }
}

impl From<Access> for Value {
    fn from(access: Access) -> Self {
        match access {
            Access::OciRegistry { image_reference } => serde_json::json!({
                "type": OCI_REGISTRY_ACCESS,
                "imageReference": image_reference,
            }),
            Access::RelativeOciReference { reference } => serde_json::json!({
                "type": RELATIVE_OCI_REFERENCE_ACCESS,
                "reference": reference,
            }),
            Access::Other(value) => value,
        }
    }
}

/// One artifact of a component. Treated as an immutable value: every
/// `with_*` method returns a patched copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_identity: BTreeMap<String, String>,
    pub access: Access,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    /// Descriptor fields this tool does not interpret (relation, srcRefs, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Resource {
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity {
            name: self.name.clone(),
            resource_type: self.resource_type.clone(),
            extra_identity: self.extra_identity.clone(),
        }
    }

    pub fn label(&self, name: &str) -> Option<&Label> {
        self.labels.iter().find(|label| label.name == name)
    }

    pub fn with_access(&self, access: Access) -> Resource {
        Resource {
            access,
            ..self.clone()
        }
    }

    /// Sets `label`, replacing an existing label of the same name in place.
    pub fn with_label(&self, label: Label) -> Resource {
        let mut labels = self.labels.clone();
        match labels.iter_mut().find(|l| l.name == label.name) {
            Some(existing) => *existing = label,
            None => labels.push(label),
        }
        Resource {
            labels,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReference {
    pub name: String,
    pub component_name: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ComponentReference {
    pub fn identity(&self) -> ComponentIdentity {
        ComponentIdentity::new(&self.component_name, &self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub repository_contexts: Vec<RepositoryContext>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub component_references: Vec<ComponentReference>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Component {
    pub fn identity(&self) -> ComponentIdentity {
        ComponentIdentity::new(&self.name, &self.version)
    }

    /// The most recent repository context, i.e. where the component currently lives.
    pub fn current_repository_context(&self) -> Option<&RepositoryContext> {
        self.repository_contexts.last()
    }

    pub fn current_base_url(&self) -> Option<&str> {
        self.current_repository_context()
            .map(|ctx| ctx.base_url.as_str())
    }

    /// Appends an OCI repository context for `base_url` unless it already is
    /// the current one. History is never rewritten.
    pub fn with_repository_context(&self, base_url: &str) -> Component {
        let mut component = self.clone();
        if component.current_base_url() != Some(base_url) {
            component
                .repository_contexts
                .push(RepositoryContext::oci_registry(base_url));
        }
        component
    }

    pub fn with_resources(&self, resources: Vec<Resource>) -> Component {
        Component {
            resources,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            schema_version: "v2".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    #[serde(default)]
    pub meta: Meta,
    pub component: Component,
}

impl ComponentDescriptor {
    pub fn new(component: Component) -> Self {
        Self {
            meta: Meta::default(),
            component,
        }
    }

    pub fn with_component(&self, component: Component) -> ComponentDescriptor {
        ComponentDescriptor {
            meta: self.meta.clone(),
            component,
        }
    }
}

/// Behaviour when an upload target already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    #[default]
    Skip,
    Overwrite,
    Fail,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    Regular,
    /// Runs matching and transforms but never talks to a registry.
    DryRun,
}

/// How multi-arch images are copied by the registry client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplicationMode {
    RegistryDefaults,
    #[default]
    PreferMultiarch,
    NormaliseToMultiarch,
}
