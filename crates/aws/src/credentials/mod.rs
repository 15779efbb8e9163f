//! Credential resolution
//!
//! Credentials are layered from the provider configuration, CLI options, the
//! environment snapshot and the shared credentials file. The first source that
//! yields something wins:
//!
//! 1. explicit `provider.credentials`
//! 2. a named profile (`--aws-profile`, `--profile`, `AWS_<STAGE>_PROFILE`,
//!    `AWS_PROFILE`, `provider.profile`)
//! 3. `AWS_<STAGE>_ACCESS_KEY_ID` and friends
//! 4. `AWS_ACCESS_KEY_ID` and friends
//! 5. `AWS_DEFAULT_PROFILE` / `AWS_PROFILE` when the profile exists
//! 6. the `default` profile when it exists
//!
//! Resolution is re-run for every request so configuration changes are always
//! observed.

mod cell;
mod store;

use std::fmt;

use skyhook_core::{DeploymentOptions, EnvSnapshot, ProviderConfig};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

pub use cell::{CredentialCell, SessionTokenHandle};
pub use store::{CredentialsStore, ProfileSection, SHARED_CREDENTIALS_FILE_ENV};

/// Request signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVersion {
    /// Signature Version 4
    V4,
}

impl SignatureVersion {
    /// Wire name of the signature version
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V4 => "v4",
        }
    }
}

/// Effective credentials and signing options for one request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialContext {
    /// Access key id
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Session token
    pub session_token: Option<String>,
    /// Profile the credentials came from
    pub profile: Option<String>,
    /// Role to assume (role-chaining profile)
    pub role_arn: Option<String>,
    /// Profile holding the credentials used to assume `role_arn`
    pub source_profile: Option<String>,
    /// Forced signature version
    pub signature_version: Option<SignatureVersion>,
    /// Use the S3 transfer acceleration endpoint
    pub accelerate_endpoint: bool,
}

impl CredentialContext {
    /// Whether no credential material was resolved
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.access_key_id.is_none()
            && self.secret_access_key.is_none()
            && self.session_token.is_none()
            && self.profile.is_none()
            && self.role_arn.is_none()
    }

    /// Identifies the credential source, used to scope session-token refreshes.
    #[must_use]
    pub fn source_key(&self) -> String {
        if let Some(role) = &self.role_arn {
            format!("role:{role}")
        } else if let Some(profile) = &self.profile {
            format!("profile:{profile}")
        } else if let Some(key) = &self.access_key_id {
            format!("keys:{key}")
        } else {
            "default-chain".to_string()
        }
    }

    fn from_keys(
        access_key_id: Option<&str>,
        secret_access_key: Option<&str>,
        session_token: Option<&str>,
    ) -> Option<Self> {
        let context = Self {
            access_key_id: present(access_key_id),
            secret_access_key: present(secret_access_key),
            session_token: present(session_token),
            ..Self::default()
        };
        (!context.is_empty()).then_some(context)
    }

    fn from_profile(name: &str, section: &ProfileSection) -> Self {
        let mut context = Self {
            profile: Some(name.to_string()),
            ..Self::default()
        };
        if let (Some(role_arn), Some(source_profile)) =
            (section.get("role_arn"), section.get("source_profile"))
        {
            context.role_arn = Some(role_arn.to_string());
            context.source_profile = Some(source_profile.to_string());
        } else {
            context.access_key_id = present(section.get("aws_access_key_id"));
            context.secret_access_key = present(section.get("aws_secret_access_key"));
            context.session_token = present(section.get("aws_session_token"));
        }
        context
    }
}

impl fmt::Debug for CredentialContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialContext")
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("profile", &self.profile)
            .field("role_arn", &self.role_arn)
            .field("source_profile", &self.source_profile)
            .field("signature_version", &self.signature_version)
            .field("accelerate_endpoint", &self.accelerate_endpoint)
            .finish()
    }
}

fn present(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Prefix of stage-scoped environment variables (`AWS_PROD`).
#[must_use]
pub fn stage_env_prefix(stage: &str) -> String {
    format!("AWS_{}", stage.to_uppercase())
}

/// Resolve the credential context for a stage.
///
/// # Errors
///
/// Returns [`Error::InvalidProfile`] when an explicitly requested profile is
/// missing from the credentials file, or [`Error::CredentialsFile`] when the
/// file cannot be read.
#[instrument(level = "debug", skip(options, provider, env))]
pub async fn resolve_credentials(
    stage: &str,
    options: &DeploymentOptions,
    provider: &ProviderConfig,
    env: &EnvSnapshot,
) -> Result<CredentialContext> {
    let mut context = resolve_source(stage, options, provider, env).await?;
    if provider.uses_kms_encryption() {
        context.signature_version = Some(SignatureVersion::V4);
    }
    Ok(context)
}

async fn resolve_source(
    stage: &str,
    options: &DeploymentOptions,
    provider: &ProviderConfig,
    env: &EnvSnapshot,
) -> Result<CredentialContext> {
    if let Some(explicit) = provider
        .credentials
        .as_ref()
        .filter(|creds| !creds.is_blank())
        .and_then(|creds| {
            CredentialContext::from_keys(
                creds.access_key_id.as_deref(),
                creds.secret_access_key.as_deref(),
                creds.session_token.as_deref(),
            )
        })
    {
        debug!("Using credentials declared in provider configuration");
        return Ok(explicit);
    }

    let prefix = stage_env_prefix(stage);

    let stage_profile_var = format!("{prefix}_PROFILE");
    let requested_profile = options
        .cli_profile()
        .or_else(|| env.non_blank(&stage_profile_var))
        .or_else(|| env.non_blank("AWS_PROFILE"))
        .or_else(|| present_str(provider.profile.as_deref()));

    if let Some(name) = requested_profile {
        let store = CredentialsStore::from_env(env).await?;
        let section = store.profile(name).ok_or_else(|| Error::InvalidProfile {
            profile: name.to_string(),
            path: store.path().to_path_buf(),
        })?;
        debug!(profile = name, "Using credentials from named profile");
        return Ok(CredentialContext::from_profile(name, section));
    }

    for env_prefix in [prefix.as_str(), "AWS"] {
        if let Some(context) = CredentialContext::from_keys(
            env.non_blank(&format!("{env_prefix}_ACCESS_KEY_ID")),
            env.non_blank(&format!("{env_prefix}_SECRET_ACCESS_KEY")),
            env.non_blank(&format!("{env_prefix}_SESSION_TOKEN")),
        ) {
            debug!(prefix = env_prefix, "Using credentials from environment");
            return Ok(context);
        }
    }

    let store = CredentialsStore::from_env(env).await?;
    let fallback_profiles = [
        env.first_of(&["AWS_DEFAULT_PROFILE", "AWS_PROFILE"]),
        Some("default"),
    ];
    for name in fallback_profiles.into_iter().flatten() {
        if let Some(section) = store.profile(name) {
            debug!(profile = name, "Using fallback profile");
            return Ok(CredentialContext::from_profile(name, section));
        }
    }

    debug!("No credentials resolved, deferring to the default chain");
    Ok(CredentialContext::default())
}

fn present_str(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolves credentials and overlays session tokens refreshed by transports.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    stage: String,
    options: DeploymentOptions,
    provider: ProviderConfig,
    env: EnvSnapshot,
    cell: CredentialCell,
}

impl CredentialResolver {
    /// Create a resolver for a stage
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        options: DeploymentOptions,
        provider: ProviderConfig,
        env: EnvSnapshot,
    ) -> Self {
        Self {
            stage: stage.into(),
            options,
            provider,
            env,
            cell: CredentialCell::new(),
        }
    }

    /// Shared cell holding refreshed session tokens
    #[must_use]
    pub const fn cell(&self) -> &CredentialCell {
        &self.cell
    }

    /// Environment snapshot the resolver reads
    #[must_use]
    pub const fn env(&self) -> &EnvSnapshot {
        &self.env
    }

    /// Resolve a fresh context, overlaying any refreshed session token.
    ///
    /// # Errors
    ///
    /// See [`resolve_credentials`].
    pub async fn resolve(&self) -> Result<CredentialContext> {
        let mut context =
            resolve_credentials(&self.stage, &self.options, &self.provider, &self.env).await?;
        if let Some(token) = self.cell.session_token(&context.source_key()) {
            context.session_token = Some(token);
        }
        Ok(context)
    }

    /// Handle a transport uses to report a refreshed session token
    #[must_use]
    pub fn session_handle(&self, context: &CredentialContext) -> SessionTokenHandle {
        self.cell.handle(context.source_key())
    }
}
