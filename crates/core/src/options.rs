//! Deployment options passed on the command line.

use serde::{Deserialize, Serialize};

/// Options the CLI collaborator hands to the provider.
///
/// Field names follow the CLI flags (`--aws-profile`, `--aws-s3-accelerate`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct DeploymentOptions {
    /// `--region`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// `--stage`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// `--profile`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// `--aws-profile`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_profile: Option<String>,

    /// `--aws-s3-accelerate`
    #[serde(default)]
    pub aws_s3_accelerate: bool,
}

impl DeploymentOptions {
    /// Options targeting a stage and region
    #[must_use]
    pub fn new(stage: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            region: Some(region.into()),
            ..Self::default()
        }
    }

    /// Profile requested on the command line; `--aws-profile` wins over `--profile`.
    #[must_use]
    pub fn cli_profile(&self) -> Option<&str> {
        non_blank(self.aws_profile.as_deref()).or_else(|| non_blank(self.profile.as_deref()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
