//! Request executor behaviour against a scripted service.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use skyhook_aws::credentials::SHARED_CREDENTIALS_FILE_ENV;
use skyhook_aws::testing::ScriptedService;
use skyhook_aws::{
    CredentialResolver, Error, ErrorKind, HttpOptions, ProviderError, REQUEST_LOG_TARGET,
    RequestExecutor, RequestOptions, RetryConfig, ServiceRegistry,
};
use skyhook_core::{CredentialsConfig, DeploymentOptions, EnvSnapshot, ProviderConfig};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// Records the target and message of every event.
#[derive(Clone, Default)]
struct CapturedEvents(Arc<Mutex<Vec<(String, String)>>>);

impl CapturedEvents {
    fn messages_for(&self, target: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl<S: tracing::Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Message(String);
        impl tracing::field::Visit for Message {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.0 = format!("{value:?}");
                }
            }
        }

        let mut message = Message(String::new());
        event.record(&mut message);
        self.0
            .lock()
            .push((event.metadata().target().to_string(), message.0));
    }
}

fn isolated_env() -> EnvSnapshot {
    EnvSnapshot::new().with(SHARED_CREDENTIALS_FILE_ENV, "/nonexistent/skyhook/credentials")
}

fn executor_with(
    service: &str,
    script: &ScriptedService,
    provider: ProviderConfig,
    retry: RetryConfig,
) -> RequestExecutor {
    let resolver = CredentialResolver::new(
        "dev",
        DeploymentOptions::default(),
        provider,
        isolated_env(),
    );
    RequestExecutor::new(
        ServiceRegistry::new().with(service, script.factory()),
        resolver,
        HttpOptions::default(),
        retry,
        "us-east-1",
    )
}

fn executor(service: &str, script: &ScriptedService) -> RequestExecutor {
    executor_with(
        service,
        script,
        ProviderConfig::default(),
        RetryConfig::immediate(4),
    )
}

#[tokio::test]
async fn test_concurrent_cached_requests_share_one_call() {
    let script = ScriptedService::new().respond("listBuckets", Ok(json!({"Buckets": []})));
    let executor = executor("S3", &script);

    let requests = (0..1000).map(|_| {
        executor.request(
            "S3",
            "listBuckets",
            json!({}),
            RequestOptions::new().cached(true),
        )
    });
    let results = join_all(requests).await;

    assert_eq!(results.len(), 1000);
    for result in results {
        assert_eq!(result.unwrap(), json!({"Buckets": []}));
    }
    assert_eq!(script.calls_to("listBuckets"), 1);
    assert_eq!(executor.cached_requests(), 1);
}

#[tokio::test]
async fn test_cached_requests_in_different_regions_are_distinct() {
    let script = ScriptedService::new().respond("describeStacks", Ok(json!({"Stacks": []})));
    let executor = executor("CloudFormation", &script);

    let (east, west) = tokio::join!(
        executor.request(
            "CloudFormation",
            "describeStacks",
            json!({"StackName": "svc-dev"}),
            RequestOptions::new().region("us-east-1").cached(true),
        ),
        executor.request(
            "CloudFormation",
            "describeStacks",
            json!({"StackName": "svc-dev"}),
            RequestOptions::new().region("eu-west-1").cached(true),
        ),
    );
    tokio_test::assert_ok!(east);
    tokio_test::assert_ok!(west);

    assert_eq!(script.calls_to("describeStacks"), 2);
    let regions: Vec<String> = script.calls().into_iter().map(|c| c.region).collect();
    assert!(regions.contains(&"us-east-1".to_string()));
    assert!(regions.contains(&"eu-west-1".to_string()));
}

#[tokio::test]
async fn test_cache_is_reused_after_completion() {
    let script = ScriptedService::new().respond("getCallerIdentity", Ok(json!({"Account": "1"})));
    let executor = executor("STS", &script);
    let options = RequestOptions::new().cached(true);

    executor
        .request("STS", "getCallerIdentity", json!({}), options.clone())
        .await
        .unwrap();
    executor
        .request("STS", "getCallerIdentity", json!({}), options)
        .await
        .unwrap();

    assert_eq!(script.calls_to("getCallerIdentity"), 1);
}

#[tokio::test]
async fn test_uncached_requests_always_call_out() {
    let script = ScriptedService::new().respond("getCallerIdentity", Ok(json!({"Account": "1"})));
    let executor = executor("STS", &script);

    for _ in 0..3 {
        executor
            .request("STS", "getCallerIdentity", json!({}), RequestOptions::new())
            .await
            .unwrap();
    }

    assert_eq!(script.calls_to("getCallerIdentity"), 3);
    assert_eq!(executor.cached_requests(), 0);
}

#[tokio::test]
async fn test_throttled_call_is_retried_even_when_not_retryable() {
    let script = ScriptedService::new()
        .respond_once(
            "describeStacks",
            Err(ProviderError::new("Rate exceeded")
                .with_status(429)
                .with_retryable(false)),
        )
        .respond("describeStacks", Ok(json!({"Stacks": []})));
    let executor = executor("CloudFormation", &script);

    let result = executor
        .request("CloudFormation", "describeStacks", json!({}), RequestOptions::new())
        .await;

    assert_eq!(result.unwrap(), json!({"Stacks": []}));
    assert_eq!(script.calls_to("describeStacks"), 2);
}

#[tokio::test]
async fn test_throttling_until_budget_is_spent() {
    let script = ScriptedService::new().respond(
        "describeStacks",
        Err(ProviderError::default()
            .with_code("ThrottlingException")
            .with_status(429)),
    );
    let executor = executor_with(
        "CloudFormation",
        &script,
        ProviderConfig::default(),
        RetryConfig::immediate(3),
    );

    let err = executor
        .request("CloudFormation", "describeStacks", json!({}), RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Throttled);
    assert_eq!(err.to_string(), "ThrottlingException");
    assert!(matches!(err, Error::Throttled { attempts: 3, .. }));
    assert_eq!(script.calls_to("describeStacks"), 3);
}

#[tokio::test]
async fn test_forbidden_is_not_retried() {
    let script = ScriptedService::new().respond(
        "putObject",
        Err(ProviderError::new("Access Denied")
            .with_code("AccessDenied")
            .with_status(403)
            .with_retryable(true)),
    );
    let executor = executor("S3", &script);

    let err = executor
        .request("S3", "putObject", json!({"Bucket": "b"}), RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RemoteCallFailed);
    assert_eq!(err.to_string(), "Access Denied");
    assert_eq!(script.calls_to("putObject"), 1);
}

#[tokio::test]
async fn test_code_is_used_when_message_is_missing() {
    let script = ScriptedService::new().respond(
        "getObject",
        Err(ProviderError::default()
            .with_code("NoSuchKey")
            .with_status(404)),
    );
    let executor = executor("S3", &script);

    let err = executor
        .request("S3", "getObject", json!({}), RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "NoSuchKey");
    assert_eq!(err.provider_code(), Some("NoSuchKey"));
}

#[tokio::test]
async fn test_missing_credentials_fails_once_with_docs_pointer() {
    let script = ScriptedService::new().respond(
        "getCallerIdentity",
        Err(ProviderError::new("Missing credentials in config").with_retryable(true)),
    );
    let executor = executor("STS", &script);

    let err = executor
        .request("STS", "getCallerIdentity", json!({}), RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingCredentials);
    assert!(err.to_string().contains("in our docs here:"));
    assert_eq!(script.calls_to("getCallerIdentity"), 1);
}

#[tokio::test]
async fn test_cached_failure_is_shared() {
    let script = ScriptedService::new().respond(
        "describeRepositories",
        Err(ProviderError::new("boom").with_status(500)),
    );
    let executor = executor("ECR", &script);
    let options = RequestOptions::new().cached(true);

    let (a, b) = tokio::join!(
        executor.request("ECR", "describeRepositories", json!({}), options.clone()),
        executor.request("ECR", "describeRepositories", json!({}), options),
    );

    assert_eq!(a.unwrap_err().to_string(), "boom");
    assert_eq!(b.unwrap_err().to_string(), "boom");
    assert_eq!(script.calls_to("describeRepositories"), 1);
}

#[tokio::test]
async fn test_unknown_service_fails_before_any_call() {
    let script = ScriptedService::new();
    let executor = executor("S3", &script);

    let err = executor
        .request("Lambda", "invoke", json!({}), RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnknownService);
    assert!(script.calls().is_empty());
}

#[tokio::test]
async fn test_nested_service_ids_are_registered_separately() {
    let script = ScriptedService::new().respond("get", Ok(json!({"Item": {}})));
    let resolver = CredentialResolver::new(
        "dev",
        DeploymentOptions::default(),
        ProviderConfig::default(),
        isolated_env(),
    );
    let executor = RequestExecutor::new(
        ServiceRegistry::new().with("DynamoDB.DocumentClient", script.factory()),
        resolver,
        HttpOptions::default(),
        RetryConfig::immediate(1),
        "us-east-1",
    );

    executor
        .request("DynamoDB.DocumentClient", "get", json!({}), RequestOptions::new())
        .await
        .unwrap();
    let err = executor
        .request("DynamoDB", "get", json!({}), RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnknownService);
    assert_eq!(script.configs()[0].service.client.as_deref(), Some("DocumentClient"));
}

#[tokio::test]
async fn test_acceleration_only_for_s3_uploads() {
    let script = ScriptedService::new()
        .respond("putObject", Ok(json!({})))
        .respond("upload", Ok(json!({})))
        .respond("getObject", Ok(json!({})));
    let executor = executor("S3", &script);
    executor.set_transfer_acceleration(true);

    for method in ["putObject", "upload", "getObject"] {
        executor
            .request("S3", method, json!({}), RequestOptions::new())
            .await
            .unwrap();
    }

    let accelerated: Vec<(String, bool)> = script
        .calls()
        .into_iter()
        .map(|c| (c.method, c.credentials.accelerate_endpoint))
        .collect();
    assert_eq!(
        accelerated,
        vec![
            ("putObject".to_string(), true),
            ("upload".to_string(), true),
            ("getObject".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn test_acceleration_disabled_by_default() {
    let script = ScriptedService::new().respond("putObject", Ok(json!({})));
    let executor = executor("S3", &script);

    executor
        .request("S3", "putObject", json!({}), RequestOptions::new())
        .await
        .unwrap();

    assert!(!script.calls()[0].credentials.accelerate_endpoint);
}

#[tokio::test]
async fn test_refreshed_session_token_is_retained() {
    let script = ScriptedService::new()
        .refresh_session_token("refreshed-token")
        .respond("getCallerIdentity", Ok(json!({"Account": "1"})));
    let provider = ProviderConfig {
        credentials: Some(CredentialsConfig {
            access_key_id: Some("AKIA".to_string()),
            secret_access_key: Some("secret".to_string()),
            session_token: Some("original-token".to_string()),
        }),
        ..ProviderConfig::default()
    };
    let executor = executor_with("STS", &script, provider, RetryConfig::immediate(1));

    executor
        .request("STS", "getCallerIdentity", json!({}), RequestOptions::new())
        .await
        .unwrap();

    let refreshed = executor.resolver().resolve().await.unwrap();
    assert_eq!(refreshed.session_token.as_deref(), Some("refreshed-token"));
    assert_eq!(refreshed.access_key_id.as_deref(), Some("AKIA"));
}

#[tokio::test]
async fn test_client_creation_failure_is_surfaced() {
    let script = ScriptedService::new().fail_create(ProviderError::new("bad endpoint"));
    let executor = executor("S3", &script);

    let err = executor
        .request("S3", "listBuckets", json!({}), RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "bad endpoint");
    assert!(script.calls().is_empty());
}

#[tokio::test]
async fn test_debug_logging_records_each_attempt() {
    let events = CapturedEvents::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

    let script = ScriptedService::new()
        .respond_once(
            "describeStacks",
            Err(ProviderError::new("Rate exceeded").with_status(429)),
        )
        .respond("describeStacks", Ok(json!({"Stacks": []})));
    let resolver = CredentialResolver::new(
        "dev",
        DeploymentOptions::default(),
        ProviderConfig::default(),
        isolated_env(),
    );
    let debug = RequestExecutor::new(
        ServiceRegistry::new().with("CloudFormation", script.factory()),
        resolver,
        HttpOptions {
            debug_logging: true,
            ..HttpOptions::default()
        },
        RetryConfig::immediate(3),
        "us-east-1",
    );

    debug
        .request("CloudFormation", "describeStacks", json!({}), RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(
        events.messages_for(REQUEST_LOG_TARGET),
        vec!["Request", "Request", "Response"]
    );
}

#[tokio::test]
async fn test_requests_are_not_logged_without_debug() {
    let events = CapturedEvents::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

    let script = ScriptedService::new().respond("describeStacks", Ok(json!({"Stacks": []})));
    let quiet = executor("CloudFormation", &script);

    quiet
        .request("CloudFormation", "describeStacks", json!({}), RequestOptions::new())
        .await
        .unwrap();

    assert!(events.messages_for(REQUEST_LOG_TARGET).is_empty());
}
