//! OCI image reference handling.
//!
//! References are split into `name[:tag][@digest]` without normalising the
//! registry part, so that a rewritten reference keeps the spelling of the
//! original.

use crate::model::ComponentIdentity;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("Empty image reference")]
    Empty,

    #[error("Invalid digest in reference '{0}': expected algorithm:hex")]
    InvalidDigest(String),
}

/// Parsed `name[:tag][@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry and repository (e.g. "registry.example:5000/org/image")
    pub name: String,
    /// Tag (e.g. "v1.2.0")
    pub tag: Option<String>,
    /// Digest (e.g. "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest = &reference[at_pos + 1..];
                if !digest.contains(':') {
                    return Err(ReferenceError::InvalidDigest(reference.to_string()));
                }
                (&reference[..at_pos], Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // a tag can only follow the last path segment; a colon before that is a port
        let last_segment_start = name_tag.rfind('/').map(|pos| pos + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon_pos) => {
                let split = last_segment_start + colon_pos;
                (&name_tag[..split], Some(name_tag[split + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        Ok(ImageReference {
            name: name.to_string(),
            tag,
            digest,
        })
    }

    pub fn has_digest(&self) -> bool {
        self.digest.is_some()
    }

    /// `name@digest`, dropping any tag.
    pub fn with_digest(&self, digest: &str) -> ImageReference {
        ImageReference {
            name: self.name.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Rewrites `image_reference` to `name@digest`, stripping an existing
/// `:tag` and/or `@digest` suffix.
pub fn replace_tag_with_digest(
    image_reference: &str,
    digest: &str,
) -> Result<String, ReferenceError> {
    Ok(ImageReference::parse(image_reference)?
        .with_digest(digest)
        .to_string())
}

/// OCI reference a component descriptor is stored under in the repository
/// at `base_url`.
pub fn descriptor_oci_ref(base_url: &str, identity: &ComponentIdentity) -> String {
    format!(
        "{}/component-descriptors/{}:{}",
        base_url.trim_end_matches('/'),
        identity.name.to_lowercase(),
        identity.version
    )
}
