//! Service clients and the registry that builds them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::credentials::{CredentialContext, SessionTokenHandle};
use crate::error::{Error, Result};
use crate::http::HttpOptions;

/// Service identifier, optionally with a client sub-type
/// (`"DynamoDB.DocumentClient"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId {
    /// Service name (`"ECR"`)
    pub service: String,
    /// Client within the service
    pub client: Option<String>,
}

impl ServiceId {
    /// Parse `Service` or `Service.Client`
    #[must_use]
    pub fn parse(id: &str) -> Self {
        match id.split_once('.') {
            Some((service, client)) if !client.is_empty() => Self {
                service: service.to_string(),
                client: Some(client.to_string()),
            },
            _ => Self {
                service: id.trim_end_matches('.').to_string(),
                client: None,
            },
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.client {
            Some(client) => write!(f, "{}.{client}", self.service),
            None => f.write_str(&self.service),
        }
    }
}

/// Raw failure reported by a service client, before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderError {
    /// Human-readable message (may be empty)
    pub message: Option<String>,
    /// Provider error code (`"ThrottlingException"`)
    pub code: Option<String>,
    /// HTTP status code
    pub status_code: Option<u16>,
    /// Retry hint from the transport
    pub retryable: Option<bool>,
}

impl ProviderError {
    /// Error with a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Set the provider error code
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the HTTP status code
    #[must_use]
    pub const fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Set the transport retry hint
    #[must_use]
    pub const fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Message shown to users: the message when non-empty, else the code.
    #[must_use]
    pub fn display_message(&self) -> String {
        self.message
            .as_deref()
            .filter(|m| !m.is_empty())
            .or_else(|| self.code.as_deref().filter(|c| !c.is_empty()))
            .unwrap_or("Unknown error")
            .to_string()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_message())
    }
}

impl std::error::Error for ProviderError {}

/// Everything a factory needs to build a client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service being built
    pub service: ServiceId,
    /// Target region
    pub region: String,
    /// Resolved credentials
    pub credentials: CredentialContext,
    /// Transport settings
    pub http: HttpOptions,
    /// Handle for reporting refreshed session tokens
    pub session: SessionTokenHandle,
}

/// A client able to invoke methods of one service.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Invoke `method` with JSON parameters
    async fn call(&self, method: &str, params: &Value) -> std::result::Result<Value, ProviderError>;
}

/// Builds clients for a service.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    /// Create a client for the given configuration
    async fn create(
        &self,
        config: ClientConfig,
    ) -> std::result::Result<Arc<dyn ServiceClient>, ProviderError>;
}

/// Maps service identifiers to client factories.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    factories: HashMap<ServiceId, Arc<dyn ServiceFactory>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one for the id
    pub fn register(&mut self, id: &str, factory: Arc<dyn ServiceFactory>) {
        self.factories.insert(ServiceId::parse(id), factory);
    }

    /// Builder-style registration
    #[must_use]
    pub fn with(mut self, id: &str, factory: Arc<dyn ServiceFactory>) -> Self {
        self.register(id, factory);
        self
    }

    /// Look up the factory for a service id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownService`] if nothing is registered for the id.
    pub fn get(&self, id: &ServiceId) -> Result<Arc<dyn ServiceFactory>> {
        self.factories
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownService {
                service: id.to_string(),
            })
    }

    /// Whether a factory is registered for the id
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(&ServiceId::parse(id))
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<String> = self.factories.keys().map(ToString::to_string).collect();
        ids.sort();
        f.debug_struct("ServiceRegistry").field("services", &ids).finish()
    }
}
