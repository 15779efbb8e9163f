//! Provider facade
//!
//! [`AwsProvider`] ties the resolved service configuration, the CLI options and
//! the environment snapshot to a [`RequestExecutor`], and answers the
//! provider-level questions deployment steps ask: region, stage, profile,
//! deployment bucket, account and partition.

use std::sync::Arc;

use serde_json::{Value, json};
use skyhook_core::{DeploymentOptions, EnvSnapshot, Naming, ServiceConfig, ServiceNaming};
use tracing::{debug, instrument};

use crate::credentials::{CredentialContext, CredentialResolver};
use crate::error::{Error, Result};
use crate::executor::{RequestExecutor, RequestOptions};
use crate::http::HttpOptions;
use crate::retry::RetryConfig;
use crate::service::ServiceRegistry;

/// Region used when neither options nor configuration name one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Stage used when neither options nor configuration name one.
pub const DEFAULT_STAGE: &str = "dev";

/// Prefix for deployment artifacts when the configuration sets none.
pub const DEFAULT_DEPLOYMENT_PREFIX: &str = "skyhook";

/// Account owning the credentials and its partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    /// Account id
    pub account_id: String,
    /// Partition (`aws`, `aws-cn`, `aws-us-gov`)
    pub partition: String,
}

/// Builder for [`AwsProvider`].
pub struct AwsProviderBuilder {
    service: ServiceConfig,
    options: DeploymentOptions,
    env: Option<EnvSnapshot>,
    registry: ServiceRegistry,
    retry: RetryConfig,
    naming: Option<Arc<dyn Naming>>,
}

impl std::fmt::Debug for AwsProviderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsProviderBuilder")
            .field("service", &self.service.service)
            .field("options", &self.options)
            .field("registry", &self.registry)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl AwsProviderBuilder {
    /// CLI options
    #[must_use]
    pub fn options(mut self, options: DeploymentOptions) -> Self {
        self.options = options;
        self
    }

    /// Environment snapshot; defaults to the current process environment
    #[must_use]
    pub fn env(mut self, env: EnvSnapshot) -> Self {
        self.env = Some(env);
        self
    }

    /// Service client factories
    #[must_use]
    pub fn registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Retry policy for throttled calls
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Naming scheme; defaults to [`ServiceNaming`]
    #[must_use]
    pub fn naming(mut self, naming: Arc<dyn Naming>) -> Self {
        self.naming = Some(naming);
        self
    }

    /// Build the provider.
    ///
    /// # Errors
    ///
    /// Returns an error if a certificate file named in the environment cannot
    /// be read.
    pub fn build(self) -> Result<AwsProvider> {
        let env = self.env.unwrap_or_else(EnvSnapshot::capture);
        let region = resolve_region(&self.options, &self.service);
        let stage = resolve_stage(&self.options, &self.service);
        let http = HttpOptions::from_env(&env)?;

        let resolver = CredentialResolver::new(
            stage.clone(),
            self.options.clone(),
            self.service.provider.clone(),
            env,
        );
        let executor = RequestExecutor::new(self.registry, resolver, http, self.retry, region.clone());
        executor.set_transfer_acceleration(self.options.aws_s3_accelerate);

        let naming = self
            .naming
            .unwrap_or_else(|| Arc::new(ServiceNaming::new(self.service.service.clone(), stage.clone())));

        debug!(service = %self.service.service, %region, %stage, "AWS provider ready");
        Ok(AwsProvider {
            service: self.service,
            options: self.options,
            region,
            stage,
            executor,
            naming,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn resolve_region(options: &DeploymentOptions, service: &ServiceConfig) -> String {
    non_blank(options.region.as_deref())
        .or_else(|| non_blank(service.provider.region.as_deref()))
        .unwrap_or(DEFAULT_REGION)
        .to_string()
}

fn resolve_stage(options: &DeploymentOptions, service: &ServiceConfig) -> String {
    non_blank(options.stage.as_deref())
        .or_else(|| non_blank(service.provider.stage.as_deref()))
        .unwrap_or(DEFAULT_STAGE)
        .to_string()
}

/// AWS provider for one service deployment.
pub struct AwsProvider {
    service: ServiceConfig,
    options: DeploymentOptions,
    region: String,
    stage: String,
    executor: RequestExecutor,
    naming: Arc<dyn Naming>,
}

impl std::fmt::Debug for AwsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsProvider")
            .field("service", &self.service.service)
            .field("region", &self.region)
            .field("stage", &self.stage)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl AwsProvider {
    /// Start building a provider for a service
    #[must_use]
    pub fn builder(service: ServiceConfig) -> AwsProviderBuilder {
        AwsProviderBuilder {
            service,
            options: DeploymentOptions::default(),
            env: None,
            registry: ServiceRegistry::new(),
            retry: RetryConfig::default(),
            naming: None,
        }
    }

    /// Resolved service configuration
    #[must_use]
    pub const fn service(&self) -> &ServiceConfig {
        &self.service
    }

    /// CLI options
    #[must_use]
    pub const fn options(&self) -> &DeploymentOptions {
        &self.options
    }

    /// Naming scheme
    #[must_use]
    pub fn naming(&self) -> &dyn Naming {
        self.naming.as_ref()
    }

    /// Underlying executor
    #[must_use]
    pub const fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Target region (`--region`, then `provider.region`, then `us-east-1`)
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Target stage (`--stage`, then `provider.stage`, then `dev`)
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Profile named on the command line or in the configuration
    #[must_use]
    pub fn profile(&self) -> Option<&str> {
        self.options
            .cli_profile()
            .or_else(|| non_blank(self.service.provider.profile.as_deref()))
    }

    /// Prefix for deployment artifacts; an explicitly empty prefix is kept
    #[must_use]
    pub fn deployment_prefix(&self) -> &str {
        self.service
            .provider
            .deployment_prefix
            .as_deref()
            .unwrap_or(DEFAULT_DEPLOYMENT_PREFIX)
    }

    /// Prefix for ALB target group names
    #[must_use]
    pub fn alb_target_group_prefix(&self) -> &str {
        self.service
            .provider
            .alb
            .as_ref()
            .and_then(|alb| alb.target_group_prefix.as_deref())
            .unwrap_or("")
    }

    /// Freshly resolved credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProfile`] for an unknown profile.
    pub async fn credentials(&self) -> Result<CredentialContext> {
        self.executor.resolver().resolve().await
    }

    /// Issue a service call.
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::request`].
    pub async fn request(
        &self,
        service: &str,
        method: &str,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value> {
        self.executor.request(service, method, params, options).await
    }

    /// Whether `--aws-s3-accelerate` is in effect
    #[must_use]
    pub fn is_s3_transfer_acceleration_enabled(&self) -> bool {
        self.executor.is_transfer_acceleration_enabled()
    }

    /// Whether a call would use the acceleration endpoint
    #[must_use]
    pub fn can_use_s3_transfer_acceleration(&self, service: &str, method: &str) -> bool {
        self.executor.can_use_transfer_acceleration(service, method)
    }

    /// Turn acceleration off for the rest of the deployment
    pub fn disable_s3_transfer_acceleration(&self) {
        self.executor.set_transfer_acceleration(false);
    }

    /// Mark a credential context as targeting the acceleration endpoint
    pub fn enable_s3_transfer_acceleration(&self, credentials: &mut CredentialContext) {
        credentials.accelerate_endpoint = true;
    }

    /// Name of the deployment bucket.
    ///
    /// A custom bucket from the configuration is returned without any remote
    /// call; otherwise the physical id of the stack's bucket resource is
    /// looked up.
    ///
    /// # Errors
    ///
    /// Returns the lookup failure, or [`Error::InvalidResponse`] when the
    /// result carries no physical resource id.
    #[instrument(level = "debug", skip(self))]
    pub async fn deployment_bucket_name(&self) -> Result<String> {
        if let Some(bucket) = self.service.provider.custom_deployment_bucket() {
            return Ok(bucket.to_string());
        }

        let result = self
            .request(
                "CloudFormation",
                "describeStackResource",
                json!({
                    "StackName": self.naming.stack_name(),
                    "LogicalResourceId": self.naming.deployment_bucket_logical_id(),
                }),
                RequestOptions::new(),
            )
            .await?;

        result
            .pointer("/StackResourceDetail/PhysicalResourceId")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| {
                Error::invalid_response(
                    "CloudFormation",
                    "describeStackResource",
                    "missing StackResourceDetail.PhysicalResourceId",
                )
            })
    }

    /// Account id and partition of the active credentials.
    ///
    /// # Errors
    ///
    /// Returns the STS failure, or [`Error::InvalidResponse`] when the
    /// identity lacks an account or a well-formed ARN.
    #[instrument(level = "debug", skip(self))]
    pub async fn account_info(&self) -> Result<AccountInfo> {
        let identity = self
            .request(
                "STS",
                "getCallerIdentity",
                json!({}),
                RequestOptions::new().cached(true),
            )
            .await?;

        let account_id = identity
            .get("Account")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_response("STS", "getCallerIdentity", "missing Account"))?;
        let partition = identity
            .get("Arn")
            .and_then(Value::as_str)
            .and_then(|arn| arn.split(':').nth(1))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                Error::invalid_response("STS", "getCallerIdentity", "missing or malformed Arn")
            })?;

        Ok(AccountInfo {
            account_id: account_id.to_string(),
            partition: partition.to_string(),
        })
    }

    /// Account id of the active credentials.
    ///
    /// # Errors
    ///
    /// See [`Self::account_info`].
    pub async fn account_id(&self) -> Result<String> {
        Ok(self.account_info().await?.account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with(json: &str, options: DeploymentOptions) -> AwsProvider {
        let service = ServiceConfig::from_json(json).unwrap();
        AwsProvider::builder(service)
            .options(options)
            .env(EnvSnapshot::new())
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let provider = provider_with(r#"{"service": "svc"}"#, DeploymentOptions::default());
        assert_eq!(provider.region(), "us-east-1");
        assert_eq!(provider.stage(), "dev");
        assert_eq!(provider.deployment_prefix(), "skyhook");
        assert_eq!(provider.alb_target_group_prefix(), "");
        assert_eq!(provider.profile(), None);
        assert!(!provider.is_s3_transfer_acceleration_enabled());
    }

    #[test]
    fn test_options_override_configuration() {
        let json = r#"{"service": "svc", "provider": {"region": "eu-west-1", "stage": "prod", "profile": "cfg"}}"#;
        let provider = provider_with(json, DeploymentOptions::default());
        assert_eq!(provider.region(), "eu-west-1");
        assert_eq!(provider.stage(), "prod");
        assert_eq!(provider.profile(), Some("cfg"));

        let mut options = DeploymentOptions::new("qa", "ap-south-1");
        options.aws_profile = Some("cli".to_string());
        let provider = provider_with(json, options);
        assert_eq!(provider.region(), "ap-south-1");
        assert_eq!(provider.stage(), "qa");
        assert_eq!(provider.profile(), Some("cli"));
    }

    #[test]
    fn test_prefixes_from_configuration() {
        let json = r#"{"service": "svc", "provider": {"deploymentPrefix": "", "alb": {"targetGroupPrefix": "tg-"}}}"#;
        let provider = provider_with(json, DeploymentOptions::default());
        assert_eq!(provider.deployment_prefix(), "");
        assert_eq!(provider.alb_target_group_prefix(), "tg-");
    }

    #[test]
    fn test_acceleration_switches() {
        let options = DeploymentOptions {
            aws_s3_accelerate: true,
            ..DeploymentOptions::default()
        };
        let provider = provider_with(r#"{"service": "svc"}"#, options);
        assert!(provider.is_s3_transfer_acceleration_enabled());
        assert!(provider.can_use_s3_transfer_acceleration("S3", "upload"));
        assert!(provider.can_use_s3_transfer_acceleration("S3", "putObject"));
        assert!(!provider.can_use_s3_transfer_acceleration("S3", "getObject"));
        assert!(!provider.can_use_s3_transfer_acceleration("CloudFormation", "upload"));

        provider.disable_s3_transfer_acceleration();
        assert!(!provider.can_use_s3_transfer_acceleration("S3", "upload"));

        let mut credentials = CredentialContext::default();
        provider.enable_s3_transfer_acceleration(&mut credentials);
        assert!(credentials.accelerate_endpoint);
    }
}
