//! Request executor
//!
//! Resolves credentials, builds a service client through the registry, issues
//! the call under the retry policy and shares results between callers of the
//! same cacheable request.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::cache::{CacheKey, RequestCache};
use crate::classify;
use crate::credentials::CredentialResolver;
use crate::error::Result;
use crate::http::HttpOptions;
use crate::retry::{RetryConfig, RetryError, retry_with_backoff};
use crate::service::{ClientConfig, ServiceId, ServiceRegistry};

/// Methods that honour S3 transfer acceleration.
const ACCELERATED_S3_METHODS: &[&str] = &["upload", "putObject"];

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Region override
    pub region: Option<String>,
    /// Share the result with identical cached requests
    pub use_cache: bool,
}

impl RequestOptions {
    /// Default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a specific region
    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Enable or disable request caching
    #[must_use]
    pub const fn cached(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }
}

/// Target of the per-request events emitted when `SKYHOOK_DEBUG` is set.
pub const REQUEST_LOG_TARGET: &str = "skyhook::aws::requests";

/// Everything a call needs. Cached futures hold this, never the cache itself.
struct Core {
    registry: ServiceRegistry,
    resolver: CredentialResolver,
    http: HttpOptions,
    retry: RetryConfig,
    accelerate: AtomicBool,
    default_region: String,
}

struct Inner {
    core: Arc<Core>,
    cache: RequestCache,
}

/// Executes service calls on behalf of the provider.
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<Inner>,
}

impl RequestExecutor {
    /// Create an executor
    #[must_use]
    pub fn new(
        registry: ServiceRegistry,
        resolver: CredentialResolver,
        http: HttpOptions,
        retry: RetryConfig,
        default_region: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: Arc::new(Core {
                    registry,
                    resolver,
                    http,
                    retry,
                    accelerate: AtomicBool::new(false),
                    default_region: default_region.into(),
                }),
                cache: RequestCache::new(),
            }),
        }
    }

    /// Credential resolver used for every call
    #[must_use]
    pub fn resolver(&self) -> &CredentialResolver {
        &self.inner.core.resolver
    }

    /// Whether S3 uploads go through the acceleration endpoint
    #[must_use]
    pub fn is_transfer_acceleration_enabled(&self) -> bool {
        self.inner.core.accelerate.load(Ordering::SeqCst)
    }

    /// Switch S3 transfer acceleration on or off
    pub fn set_transfer_acceleration(&self, enabled: bool) {
        self.inner.core.accelerate.store(enabled, Ordering::SeqCst);
    }

    /// Number of distinct cached requests
    #[must_use]
    pub fn cached_requests(&self) -> usize {
        self.inner.cache.len()
    }

    /// Issue `service.method(params)`.
    ///
    /// With [`RequestOptions::use_cache`], concurrent and later callers with
    /// the same service, method, parameters and region share one outbound
    /// call and observe the same result.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the final attempt, or a credential
    /// or registry error raised before the call was made.
    pub async fn request(
        &self,
        service: &str,
        method: &str,
        params: Value,
        options: RequestOptions,
    ) -> Result<Value> {
        let core = &self.inner.core;
        let region = options
            .region
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| core.default_region.clone());

        if !options.use_cache {
            return core.execute(service, method, &params, &region).await;
        }

        let key = CacheKey::new(service, method, &params, &region);
        let core = Arc::clone(core);
        let service = service.to_string();
        let method = method.to_string();
        let shared = self.inner.cache.get_or_insert_with(key, move || {
            async move { core.execute(&service, &method, &params, &region).await }.boxed()
        });
        shared.await
    }

    /// Whether a call would go through the S3 acceleration endpoint
    #[must_use]
    pub fn can_use_transfer_acceleration(&self, service: &str, method: &str) -> bool {
        self.inner.core.can_use_transfer_acceleration(service, method)
    }
}

impl Core {
    fn can_use_transfer_acceleration(&self, service: &str, method: &str) -> bool {
        self.accelerate.load(Ordering::SeqCst)
            && service == "S3"
            && ACCELERATED_S3_METHODS.contains(&method)
    }

    #[instrument(level = "debug", skip(self, params))]
    async fn execute(
        &self,
        service: &str,
        method: &str,
        params: &Value,
        region: &str,
    ) -> Result<Value> {
        let mut credentials = self.resolver.resolve().await?;
        if self.can_use_transfer_acceleration(service, method) {
            debug!("Using S3 transfer acceleration endpoint");
            credentials.accelerate_endpoint = true;
        }

        let id = ServiceId::parse(service);
        let factory = self.registry.get(&id)?;
        let session = self.resolver.session_handle(&credentials);
        let client = factory
            .create(ClientConfig {
                service: id,
                region: region.to_string(),
                credentials,
                http: self.http.clone(),
                session,
            })
            .await
            .map_err(|err| classify::surface(service, method, &err, 1))?;

        let operation = format!("{service}.{method}");
        let debug_logging = self.http.debug_logging;
        let result = retry_with_backoff(&self.retry, &operation, classify::should_retry, || {
            if debug_logging {
                info!(target: REQUEST_LOG_TARGET, %operation, region, params = %params, "Request");
            }
            client.call(method, params)
        })
        .await;

        if debug_logging {
            match &result {
                Ok(response) => {
                    info!(target: REQUEST_LOG_TARGET, %operation, response = %response, "Response");
                }
                Err(RetryError { last_error, attempts }) => {
                    info!(
                        target: REQUEST_LOG_TARGET,
                        %operation,
                        attempts,
                        error = %last_error,
                        "Request failed"
                    );
                }
            }
        }

        result.map_err(|RetryError { last_error, attempts }| {
            classify::surface(service, method, &last_error, attempts)
        })
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("registry", &self.inner.core.registry)
            .field("default_region", &self.inner.core.default_region)
            .field("cache", &self.inner.cache)
            .field("accelerate", &self.is_transfer_acceleration_enabled())
            .finish_non_exhaustive()
    }
}
