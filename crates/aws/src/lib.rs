//! AWS request execution for skyhook
//!
//! This crate issues authenticated calls against AWS on behalf of a
//! deployment:
//! - credential resolution from configuration, options, environment and the
//!   shared credentials file ([`credentials`])
//! - transport settings from the environment ([`http`])
//! - a registry of service client factories ([`service`])
//! - request deduplication ([`cache`]), throttling retries ([`retry`]) and
//!   failure classification ([`classify`])
//! - the [`RequestExecutor`] that combines them and the [`AwsProvider`]
//!   facade deployment steps talk to
//!
//! Real AWS clients live behind the `sdk` feature; the `testing` feature
//! exposes a scripted double for everything else.

pub mod cache;
pub mod classify;
pub mod credentials;
mod error;
pub mod executor;
pub mod http;
pub mod provider;
pub mod retry;
#[cfg(feature = "sdk")]
pub mod sdk;
pub mod service;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use credentials::{
    CredentialCell, CredentialContext, CredentialResolver, CredentialsStore, SessionTokenHandle,
    SignatureVersion, resolve_credentials,
};
pub use error::{Error, ErrorKind, Result};
pub use executor::{REQUEST_LOG_TARGET, RequestExecutor, RequestOptions};
pub use http::HttpOptions;
pub use provider::{AccountInfo, AwsProvider, AwsProviderBuilder};
pub use retry::RetryConfig;
pub use service::{
    ClientConfig, ProviderError, ServiceClient, ServiceFactory, ServiceId, ServiceRegistry,
};
