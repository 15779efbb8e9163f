//! Image reference parsing.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Tag used when a reference names none.
pub const DEFAULT_TAG: &str = "latest";

static PUSH_DIGEST: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"digest: (sha256:[a-f0-9]{64})").ok());

static ECR_HOST: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(?P<account>\d+)\.dkr\.ecr(?:-fips)?\.(?P<region>[a-z0-9-]+)\.amazonaws\.com(?:\.cn)?$")
        .ok()
});

/// A parsed `registry/repository[:tag][@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host (with port, if any)
    pub registry: String,
    /// Repository path; `/` separators are preserved
    pub repository: String,
    /// Tag, if any
    pub tag: Option<String>,
    /// Content digest (`sha256:<hex>`), if any
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference that names its registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidImageReference`] when the registry or the
    /// repository is missing.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (reference, None),
        };

        let (registry, rest) = name
            .split_once('/')
            .filter(|(host, _)| is_registry_host(host))
            .ok_or_else(|| Error::invalid_reference(reference, "missing registry host"))?;

        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repository, tag)) if !tag.contains('/') => (repository, Some(tag.to_string())),
            _ => (rest, None),
        };
        if repository.is_empty() {
            return Err(Error::invalid_reference(reference, "missing repository"));
        }
        if tag.as_deref() == Some("") {
            return Err(Error::invalid_reference(reference, "empty tag"));
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Tag, defaulting to `latest`
    #[must_use]
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Account id when the registry is an ECR host
    #[must_use]
    pub fn registry_id(&self) -> Option<&str> {
        ecr_host_part(&self.registry, "account")
    }

    /// Region when the registry is an ECR host
    #[must_use]
    pub fn registry_region(&self) -> Option<&str> {
        ecr_host_part(&self.registry, "region")
    }

    /// `registry/repository` without tag or digest
    #[must_use]
    pub fn repository_uri(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// `registry/repository@digest`
    #[must_use]
    pub fn with_digest(&self, digest: &str) -> String {
        format!("{}@{digest}", self.repository_uri())
    }
}

fn ecr_host_part<'a>(host: &'a str, group: &str) -> Option<&'a str> {
    ECR_HOST
        .as_ref()?
        .captures(host)?
        .name(group)
        .map(|m| m.as_str())
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

/// Whether a string pins an image by digest.
#[must_use]
pub fn is_digest_reference(reference: &str) -> bool {
    reference.contains("@sha256:")
}

/// Whether a string looks like an image uri rather than a filesystem path.
///
/// Relative and absolute paths (`./`, `../`, `/`, `.`) are never uris.
#[must_use]
pub fn looks_like_image_uri(value: &str) -> bool {
    let value = value.trim();
    if value.starts_with('.') || value.starts_with('/') {
        return false;
    }
    if is_digest_reference(value) {
        return true;
    }
    value
        .split_once('/')
        .is_some_and(|(host, rest)| is_registry_host(host) && !rest.is_empty())
}

/// Hex part of a `sha256:<hex>` digest.
#[must_use]
pub fn digest_hex(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}

/// Extract the pushed digest (`sha256:<hex>`) from `docker push` output.
#[must_use]
pub fn push_digest(output: &str) -> Option<String> {
    PUSH_DIGEST
        .as_ref()?
        .captures(output)?
        .get(1)
        .map(|m| m.as_str().to_string())
}
