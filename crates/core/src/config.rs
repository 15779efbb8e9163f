//! Resolved service configuration.
//!
//! These types mirror the provider block of a service definition after the
//! configuration collaborator has loaded and validated it. Only the fields the
//! execution layer reads are modelled.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Server-side encryption value that forces SigV4 signing on storage calls.
pub const KMS_SERVER_SIDE_ENCRYPTION: &str = "aws:kms";

/// A resolved service definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Service name
    pub service: String,

    /// Directory the service definition lives in; image paths are relative to it
    #[serde(default = "default_service_dir")]
    pub service_dir: PathBuf,

    /// Provider block
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Function definitions keyed by function name
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionConfig>,
}

impl ServiceConfig {
    /// Create a service config with an empty provider block
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            service_dir: default_service_dir(),
            provider: ProviderConfig::default(),
            functions: BTreeMap::new(),
        }
    }

    /// Parses an already-resolved configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not describe a service.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if config.service.trim().is_empty() {
            return Err(Error::invalid_config("`service` must not be empty"));
        }
        Ok(config)
    }

    /// Loads a resolved configuration from a JSON file.
    ///
    /// A relative `serviceDir` is interpreted relative to the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&contents)?;
        if config.service_dir.is_relative()
            && let Some(parent) = path.parent()
        {
            config.service_dir = parent.join(&config.service_dir);
        }
        Ok(config)
    }
}

fn default_service_dir() -> PathBuf {
    PathBuf::from(".")
}

/// The `provider` block of a service definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Default region
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Default stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Named profile in the shared credentials file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Inline credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsConfig>,

    /// Name of a custom deployment bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_bucket: Option<String>,

    /// Object form of the deployment bucket configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_bucket_object: Option<DeploymentBucketConfig>,

    /// Prefix for deployment artifacts in the bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_prefix: Option<String>,

    /// Application load balancer settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alb: Option<AlbConfig>,

    /// Container registry settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecr: Option<EcrConfig>,
}

impl ProviderConfig {
    /// Name of the user-supplied deployment bucket, if any.
    #[must_use]
    pub fn custom_deployment_bucket(&self) -> Option<&str> {
        self.deployment_bucket
            .as_deref()
            .or_else(|| {
                self.deployment_bucket_object
                    .as_ref()
                    .and_then(|bucket| bucket.name.as_deref())
            })
            .filter(|name| !name.is_empty())
    }

    /// Whether the deployment bucket uses KMS managed-key encryption.
    #[must_use]
    pub fn uses_kms_encryption(&self) -> bool {
        self.deployment_bucket_object
            .as_ref()
            .and_then(|bucket| bucket.server_side_encryption.as_deref())
            == Some(KMS_SERVER_SIDE_ENCRYPTION)
    }

    /// Images declared at provider level.
    #[must_use]
    pub fn images(&self) -> BTreeMap<String, ProviderImage> {
        self.ecr
            .as_ref()
            .map(|ecr| ecr.images.clone())
            .unwrap_or_default()
    }

    /// Whether newly created repositories scan images on push.
    #[must_use]
    pub fn scan_on_push(&self) -> bool {
        self.ecr.as_ref().is_some_and(|ecr| ecr.scan_on_push)
    }
}

/// Inline credentials declared on the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsConfig {
    /// Access key id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    /// Secret access key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,

    /// Session token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

impl CredentialsConfig {
    /// True when no field carries a non-blank value.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        [
            &self.access_key_id,
            &self.secret_access_key,
            &self.session_token,
        ]
        .iter()
        .all(|field| field.as_deref().is_none_or(|value| value.trim().is_empty()))
    }
}

/// Object form of the deployment bucket setting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentBucketConfig {
    /// Bucket name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Server-side encryption algorithm (e.g. `AES256`, `aws:kms`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_side_encryption: Option<String>,
}

/// Application load balancer settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlbConfig {
    /// Prefix for generated target group names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_group_prefix: Option<String>,
}

/// Container registry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EcrConfig {
    /// Named images functions can reference
    #[serde(default)]
    pub images: BTreeMap<String, ProviderImage>,

    /// Enable image scanning on push for created repositories
    #[serde(default)]
    pub scan_on_push: bool,
}

/// An image declared under `provider.ecr.images`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ProviderImage {
    /// String shorthand: an image uri or a build context path
    Shorthand(String),
    /// Full definition
    Definition(ImageDefinition),
}

/// Full definition of a provider-level image.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageDefinition {
    /// Build context path, relative to the service directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Dockerfile name inside `path` (defaults to `Dockerfile`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Prebuilt image uri
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// A function definition; only the image reference matters here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionConfig {
    /// Image the function is deployed from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<FunctionImage>,
}

/// The `image` property of a function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FunctionImage {
    /// An image uri or the name of a provider-level image
    Reference(String),
    /// Object form with either `uri` or `name`
    Object(FunctionImageObject),
}

/// Object form of a function image reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionImageObject {
    /// Name of a provider-level image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Image uri
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}
