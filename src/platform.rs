//! Multi-arch platform normalisation and inclusion filtering.
//!
//! Platforms are canonicalised the way containerd does it (`x86_64` is
//! `amd64`, `armhf` is `arm/v7`, ...) before being matched against the
//! configured include expressions.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Values accepted for the `os` part of a glob expression (Go's GOOS list).
const KNOWN_OPERATING_SYSTEMS: &[&str] = &[
    "aix", "android", "darwin", "dragonfly", "freebsd", "illumos", "ios", "js", "linux", "netbsd",
    "openbsd", "plan9", "solaris", "windows",
];

/// Values accepted for the `architecture` part of a glob expression (Go's GOARCH list).
const KNOWN_ARCHITECTURES: &[&str] = &[
    "ppc64", "386", "amd64", "arm", "arm64", "wasm", "loong64", "mips", "mipsle", "mips64",
    "mips64le", "ppc64le", "riscv64", "s390x",
];

const WILDCARD: &str = "*";

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Platform operating system must not be empty")]
    EmptyOs,

    #[error("Platform architecture must not be empty")]
    EmptyArchitecture,

    #[error("Invalid platform expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}

/// One entry of a multi-arch image index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OciPlatform {
    pub os: String,
    pub architecture: String,
    #[serde(default)]
    pub variant: String,
}

impl OciPlatform {
    pub fn new(
        os: impl Into<String>,
        architecture: impl Into<String>,
        variant: impl Into<String>,
    ) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: variant.into(),
        }
    }
}

/// Renders `os/architecture[/variant]`; no suffix for an empty variant.
impl fmt::Display for OciPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if !self.variant.is_empty() {
            write!(f, "/{}", self.variant)?;
        }
        Ok(())
    }
}

pub fn normalize_os(os: &str) -> Result<String, PlatformError> {
    if os.is_empty() {
        return Err(PlatformError::EmptyOs);
    }

    let os = os.to_lowercase();
    if os == "macos" {
        return Ok("darwin".to_string());
    }
    Ok(os)
}

pub fn normalize_architecture(
    architecture: &str,
    variant: &str,
) -> Result<(String, String), PlatformError> {
    if architecture.is_empty() {
        return Err(PlatformError::EmptyArchitecture);
    }

    let architecture = architecture.to_lowercase();
    let variant = variant.to_lowercase();

    let normalized = match architecture.as_str() {
        "i386" => ("386".to_string(), String::new()),
        "x86_64" | "x86-64" => ("amd64".to_string(), String::new()),
        "aarch64" | "arm64" => {
            let variant = match variant.as_str() {
                "8" | "v8" => String::new(),
                _ => variant,
            };
            ("arm64".to_string(), variant)
        }
        "armhf" => ("arm".to_string(), "v7".to_string()),
        "armel" => ("arm".to_string(), "v6".to_string()),
        "arm" => {
            let variant = match variant.as_str() {
                "" | "7" => "v7".to_string(),
                "5" | "6" | "8" => format!("v{}", variant),
                _ => variant,
            };
            ("arm".to_string(), variant)
        }
        _ => (architecture, variant),
    };
    Ok(normalized)
}

/// Canonical form of `platform` as a triple.
pub fn normalize_platform(platform: &OciPlatform) -> Result<OciPlatform, PlatformError> {
    let os = normalize_os(&platform.os)?;
    let (architecture, variant) = normalize_architecture(&platform.architecture, &platform.variant)?;
    Ok(OciPlatform {
        os,
        architecture,
        variant,
    })
}

/// Canonical `os/architecture[/variant]` string of `platform`.
pub fn normalize(platform: &OciPlatform) -> Result<String, PlatformError> {
    Ok(normalize_platform(platform)?.to_string())
}

/// How include expressions are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformMatchMode {
    /// Full-string regular expressions against the normalised platform string.
    #[default]
    Regex,
    /// `os/architecture[/variant]` with `*` wildcards; os and architecture
    /// must be known values.
    Glob,
}

#[derive(Debug, Clone)]
enum PlatformMatcher {
    Regex(Regex),
    Glob(OciPlatform),
}

impl PlatformMatcher {
    fn matches(&self, normalized: &OciPlatform) -> bool {
        match self {
            PlatformMatcher::Regex(regex) => regex.is_match(&normalized.to_string()),
            PlatformMatcher::Glob(expr) => {
                let part_matches = |pattern: &str, value: &str| pattern == WILDCARD || pattern == value;
                part_matches(&expr.os, &normalized.os)
                    && part_matches(&expr.architecture, &normalized.architecture)
                    && part_matches(&expr.variant, &normalized.variant)
            }
        }
    }
}

/// Decides which platforms of a multi-arch image are replicated.
///
/// A platform is included when it matches any expression. A filter built
/// from an empty expression list includes every platform.
#[derive(Debug, Clone)]
pub struct PlatformFilter {
    matchers: Vec<PlatformMatcher>,
    mode: PlatformMatchMode,
}

impl PlatformFilter {
    pub fn new<S: AsRef<str>>(included: &[S]) -> Result<Self, PlatformError> {
        Self::with_mode(included, PlatformMatchMode::Regex)
    }

    pub fn with_mode<S: AsRef<str>>(
        included: &[S],
        mode: PlatformMatchMode,
    ) -> Result<Self, PlatformError> {
        let matchers = included
            .iter()
            .map(|expr| match mode {
                PlatformMatchMode::Regex => parse_regex(expr.as_ref()),
                PlatformMatchMode::Glob => parse_glob(expr.as_ref()),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { matchers, mode })
    }

    pub fn mode(&self) -> PlatformMatchMode {
        self.mode
    }

    pub fn matches(&self, platform: &OciPlatform) -> bool {
        if self.matchers.is_empty() {
            return true;
        }

        let normalized = match normalize_platform(platform) {
            Ok(normalized) => normalized,
            Err(e) => {
                warn!(platform = %platform, error = %e, "Excluding platform that cannot be normalised");
                return false;
            }
        };

        self.matchers.iter().any(|m| m.matches(&normalized))
    }
}

/// Builds the regex-mode inclusion predicate for `included` expressions.
pub fn build_filter<S: AsRef<str>>(
    included: &[S],
) -> Result<impl Fn(&OciPlatform) -> bool + Send + Sync + Clone, PlatformError> {
    let filter = PlatformFilter::new(included)?;
    Ok(move |platform: &OciPlatform| filter.matches(platform))
}

fn parse_regex(expression: &str) -> Result<PlatformMatcher, PlatformError> {
    Regex::new(&format!("^(?:{})$", expression))
        .map(PlatformMatcher::Regex)
        .map_err(|e| PlatformError::InvalidExpression {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
}

fn parse_glob(expression: &str) -> Result<PlatformMatcher, PlatformError> {
    let invalid = |reason: String| PlatformError::InvalidExpression {
        expression: expression.to_string(),
        reason,
    };

    let parts: Vec<&str> = expression.split('/').collect();
    let (os, architecture, variant) = match parts.as_slice() {
        [os, architecture] => (*os, *architecture, WILDCARD),
        [os, architecture, variant] => (*os, *architecture, *variant),
        _ => {
            return Err(invalid(format!(
                "expected os/architecture[/variant], got {} parts",
                parts.len()
            )))
        }
    };

    if os != WILDCARD && !KNOWN_OPERATING_SYSTEMS.contains(&os) {
        return Err(invalid(format!("unknown operating system '{}'", os)));
    }
    if architecture != WILDCARD && !KNOWN_ARCHITECTURES.contains(&architecture) {
        return Err(invalid(format!("unknown architecture '{}'", architecture)));
    }

    Ok(PlatformMatcher::Glob(OciPlatform::new(os, architecture, variant)))
}
