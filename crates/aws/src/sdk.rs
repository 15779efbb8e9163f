//! AWS SDK backed service factories.
//!
//! Covers the calls skyhook issues itself: ECR repository and image lookups,
//! registry login tokens, STS caller identity and CloudFormation stack
//! resources. Parameters and results use the JSON shapes of the AWS API.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_ecr::config::http::HttpResponse;
use aws_sdk_ecr::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ecr::types::{ImageIdentifier, ImageScanningConfiguration};
use aws_sdk_ecr::config::SharedHttpClient;
use aws_smithy_http_client::proxy::ProxyConfig;
use aws_smithy_http_client::Connector;
use aws_smithy_http_client::tls::{self, TlsContext, TrustStore};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::executor::REQUEST_LOG_TARGET;
use crate::http::HttpOptions;
use crate::service::{ClientConfig, ProviderError, ServiceClient, ServiceFactory, ServiceRegistry};

/// Registry with SDK-backed factories for `ECR`, `STS` and `CloudFormation`.
#[must_use]
pub fn sdk_registry() -> ServiceRegistry {
    ServiceRegistry::new()
        .with("ECR", Arc::new(SdkFactory(SdkService::Ecr)))
        .with("STS", Arc::new(SdkFactory(SdkService::Sts)))
        .with("CloudFormation", Arc::new(SdkFactory(SdkService::CloudFormation)))
}

#[derive(Debug, Clone, Copy)]
enum SdkService {
    Ecr,
    Sts,
    CloudFormation,
}

#[derive(Debug)]
struct SdkFactory(SdkService);

#[async_trait]
impl ServiceFactory for SdkFactory {
    async fn create(&self, config: ClientConfig) -> Result<Arc<dyn ServiceClient>, ProviderError> {
        let sdk_config = load_sdk_config(&config).await?;
        let client: Arc<dyn ServiceClient> = match self.0 {
            SdkService::Ecr => Arc::new(EcrClient(aws_sdk_ecr::Client::new(&sdk_config))),
            SdkService::Sts => Arc::new(StsClient(aws_sdk_sts::Client::new(&sdk_config))),
            SdkService::CloudFormation => Arc::new(CloudFormationClient(
                aws_sdk_cloudformation::Client::new(&sdk_config),
            )),
        };
        Ok(client)
    }
}

async fn load_sdk_config(config: &ClientConfig) -> Result<SdkConfig, ProviderError> {
    let creds = &config.credentials;
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .retry_config(RetryConfig::disabled());

    if let (Some(access_key_id), Some(secret)) = (&creds.access_key_id, &creds.secret_access_key) {
        loader = loader.credentials_provider(Credentials::new(
            access_key_id,
            secret,
            creds.session_token.clone(),
            None,
            "skyhook",
        ));
    } else if let Some(profile) = &creds.profile {
        loader = loader.profile_name(profile);
    }

    if let Some(timeout) = config.http.timeout {
        loader = loader.timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build());
    }

    if let Some(http_client) = http_client(&config.http)? {
        loader = loader.http_client(http_client);
    }

    if config.http.debug_logging {
        info!(
            target: REQUEST_LOG_TARGET,
            service = %config.service,
            region = %config.region,
            proxy = config.http.proxy.as_deref(),
            "Creating SDK client"
        );
    }

    let sdk_config = loader.load().await;

    if creds.role_arn.is_some() {
        if let Some(provider) = sdk_config.credentials_provider() {
            match provider.provide_credentials().await {
                Ok(resolved) => {
                    if let Some(token) = resolved.session_token() {
                        config.session.update(token);
                    }
                }
                Err(err) => debug!(error = %err, "Could not pre-resolve assumed role credentials"),
            }
        }
    }

    Ok(sdk_config)
}

/// HTTPS client honouring the proxy and extra CA certificates, if any are set.
fn http_client(options: &HttpOptions) -> Result<Option<SharedHttpClient>, ProviderError> {
    if options.proxy.is_none() && options.ca_certificates.is_empty() {
        return Ok(None);
    }

    let proxy = options
        .proxy
        .as_deref()
        .map(ProxyConfig::all)
        .transpose()
        .map_err(|err| ProviderError::new(format!("Invalid proxy URL: {err}")))?
        .unwrap_or_else(ProxyConfig::disabled);

    let mut trust_store = TrustStore::empty().with_native_roots(true);
    for pem in &options.ca_certificates {
        trust_store = trust_store.with_pem_certificate(pem.as_bytes());
    }
    let tls_context = TlsContext::builder()
        .with_trust_store(trust_store)
        .build()
        .map_err(|err| ProviderError::new(format!("Invalid CA certificates: {err}")))?;

    Ok(Some(aws_smithy_http_client::Builder::new().build_with_connector_fn(
        move |settings, components| {
            let mut builder = Connector::builder().proxy_config(proxy.clone());
            builder.set_connector_settings(settings.cloned());
            if let Some(components) = components {
                builder.set_sleep_impl(components.sleep_impl());
            }
            builder
                .tls_provider(tls::Provider::Rustls(tls::rustls_provider::CryptoMode::Ring))
                .tls_context(tls_context.clone())
                .build()
        },
    )))
}

fn map_sdk_error<E>(err: &SdkError<E, HttpResponse>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let rendered = DisplayErrorContext(err).to_string();
    let message = err.message().map_or_else(
        || {
            if rendered.to_lowercase().contains("no credentials") {
                format!("Missing credentials in config: {rendered}")
            } else {
                rendered.clone()
            }
        },
        ToString::to_string,
    );
    ProviderError {
        message: Some(message),
        code: err.code().map(ToString::to_string),
        status_code: err.raw_response().map(|r| r.status().as_u16()),
        retryable: None,
    }
}

fn unsupported(service: &str, method: &str) -> ProviderError {
    ProviderError::new(format!("{service}.{method} is not supported by the SDK backend"))
        .with_code("UnsupportedOperation")
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, ProviderError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::new(format!("Missing parameter {key}")).with_code("MissingParameter"))
}

struct EcrClient(aws_sdk_ecr::Client);

#[async_trait]
impl ServiceClient for EcrClient {
    async fn call(&self, method: &str, params: &Value) -> Result<Value, ProviderError> {
        match method {
            "describeRepositories" => {
                let names = params
                    .get("repositoryNames")
                    .and_then(Value::as_array)
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                    });
                let out = self
                    .0
                    .describe_repositories()
                    .set_repository_names(names)
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(&e))?;
                let repositories: Vec<Value> = out
                    .repositories()
                    .iter()
                    .map(|repo| {
                        json!({
                            "repositoryName": repo.repository_name(),
                            "repositoryUri": repo.repository_uri(),
                        })
                    })
                    .collect();
                Ok(json!({ "repositories": repositories }))
            }
            "createRepository" => {
                let scan_on_push = params
                    .pointer("/imageScanningConfiguration/scanOnPush")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let out = self
                    .0
                    .create_repository()
                    .repository_name(str_param(params, "repositoryName")?)
                    .image_scanning_configuration(
                        ImageScanningConfiguration::builder()
                            .scan_on_push(scan_on_push)
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(&e))?;
                let repository = out.repository().map(|repo| {
                    json!({
                        "repositoryName": repo.repository_name(),
                        "repositoryUri": repo.repository_uri(),
                    })
                });
                Ok(json!({ "repository": repository }))
            }
            "getAuthorizationToken" => {
                let out = self
                    .0
                    .get_authorization_token()
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(&e))?;
                let data: Vec<Value> = out
                    .authorization_data()
                    .iter()
                    .map(|auth| {
                        json!({
                            "authorizationToken": auth.authorization_token(),
                            "proxyEndpoint": auth.proxy_endpoint(),
                        })
                    })
                    .collect();
                Ok(json!({ "authorizationData": data }))
            }
            "describeImages" => {
                let mut request = self
                    .0
                    .describe_images()
                    .repository_name(str_param(params, "repositoryName")?);
                if let Some(registry_id) = params.get("registryId").and_then(Value::as_str) {
                    request = request.registry_id(registry_id);
                }
                for id in params
                    .get("imageIds")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    let mut identifier = ImageIdentifier::builder();
                    if let Some(tag) = id.get("imageTag").and_then(Value::as_str) {
                        identifier = identifier.image_tag(tag);
                    }
                    if let Some(digest) = id.get("imageDigest").and_then(Value::as_str) {
                        identifier = identifier.image_digest(digest);
                    }
                    request = request.image_ids(identifier.build());
                }
                let out = request.send().await.map_err(|e| map_sdk_error(&e))?;
                let details: Vec<Value> = out
                    .image_details()
                    .iter()
                    .map(|detail| json!({ "imageDigest": detail.image_digest() }))
                    .collect();
                Ok(json!({ "imageDetails": details }))
            }
            other => Err(unsupported("ECR", other)),
        }
    }
}

struct StsClient(aws_sdk_sts::Client);

#[async_trait]
impl ServiceClient for StsClient {
    async fn call(&self, method: &str, _params: &Value) -> Result<Value, ProviderError> {
        match method {
            "getCallerIdentity" => {
                let out = self
                    .0
                    .get_caller_identity()
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(&e))?;
                Ok(json!({
                    "Account": out.account(),
                    "Arn": out.arn(),
                    "UserId": out.user_id(),
                }))
            }
            other => Err(unsupported("STS", other)),
        }
    }
}

struct CloudFormationClient(aws_sdk_cloudformation::Client);

#[async_trait]
impl ServiceClient for CloudFormationClient {
    async fn call(&self, method: &str, params: &Value) -> Result<Value, ProviderError> {
        match method {
            "describeStackResource" => {
                let out = self
                    .0
                    .describe_stack_resource()
                    .stack_name(str_param(params, "StackName")?)
                    .logical_resource_id(str_param(params, "LogicalResourceId")?)
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(&e))?;
                let detail = out.stack_resource_detail().map(|detail| {
                    json!({
                        "LogicalResourceId": detail.logical_resource_id(),
                        "PhysicalResourceId": detail.physical_resource_id(),
                    })
                });
                Ok(json!({ "StackResourceDetail": detail }))
            }
            other => Err(unsupported("CloudFormation", other)),
        }
    }
}
