//! Scripted service doubles for tests.
//!
//! [`ScriptedService`] is a [`ServiceFactory`] whose clients answer from a
//! script and record every call, so executor, provider and image tests can run
//! without network access.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::credentials::CredentialContext;
use crate::service::{ClientConfig, ProviderError, ServiceClient, ServiceFactory};

type Scripted = Result<Value, ProviderError>;

/// One recorded call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Method invoked
    pub method: String,
    /// Parameters passed
    pub params: Value,
    /// Region of the client
    pub region: String,
    /// Credentials the client was built with
    pub credentials: CredentialContext,
}

#[derive(Default)]
struct State {
    once: HashMap<String, VecDeque<Scripted>>,
    always: HashMap<String, Scripted>,
    calls: Vec<RecordedCall>,
    configs: Vec<ClientConfig>,
    refreshed_token: Option<String>,
    create_error: Option<ProviderError>,
}

/// Factory and client double answering from a script.
#[derive(Clone, Default)]
pub struct ScriptedService {
    state: Arc<Mutex<State>>,
}

impl ScriptedService {
    /// Create an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call to `method` with `result`
    #[must_use]
    pub fn respond(self, method: &str, result: Scripted) -> Self {
        self.state.lock().always.insert(method.to_string(), result);
        self
    }

    /// Answer the next call to `method` with `result`; queued answers are
    /// consumed before the standing one.
    #[must_use]
    pub fn respond_once(self, method: &str, result: Scripted) -> Self {
        self.state
            .lock()
            .once
            .entry(method.to_string())
            .or_default()
            .push_back(result);
        self
    }

    /// Report a refreshed session token whenever a client is created
    #[must_use]
    pub fn refresh_session_token(self, token: &str) -> Self {
        self.state.lock().refreshed_token = Some(token.to_string());
        self
    }

    /// Fail client creation
    #[must_use]
    pub fn fail_create(self, err: ProviderError) -> Self {
        self.state.lock().create_error = Some(err);
        self
    }

    /// Every call so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Number of calls to `method`
    #[must_use]
    pub fn calls_to(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    /// Every client configuration built so far
    #[must_use]
    pub fn configs(&self) -> Vec<ClientConfig> {
        self.state.lock().configs.clone()
    }

    /// Share this script as a factory
    #[must_use]
    pub fn factory(&self) -> Arc<dyn ServiceFactory> {
        Arc::new(self.clone())
    }
}

impl std::fmt::Debug for ScriptedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedService")
            .field("calls", &self.state.lock().calls.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServiceFactory for ScriptedService {
    async fn create(&self, config: ClientConfig) -> Result<Arc<dyn ServiceClient>, ProviderError> {
        let token = {
            let mut state = self.state.lock();
            if let Some(err) = state.create_error.clone() {
                return Err(err);
            }
            state.configs.push(config.clone());
            state.refreshed_token.clone()
        };
        if let Some(token) = token {
            config.session.update(token);
        }
        Ok(Arc::new(ScriptedClient {
            state: self.state.clone(),
            region: config.region,
            credentials: config.credentials,
        }))
    }
}

struct ScriptedClient {
    state: Arc<Mutex<State>>,
    region: String,
    credentials: CredentialContext,
}

#[async_trait]
impl ServiceClient for ScriptedClient {
    async fn call(&self, method: &str, params: &Value) -> Result<Value, ProviderError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.calls.push(RecordedCall {
            method: method.to_string(),
            params: params.clone(),
            region: self.region.clone(),
            credentials: self.credentials.clone(),
        });
        if let Some(result) = state.once.get_mut(method).and_then(VecDeque::pop_front) {
            return result;
        }
        state.always.get(method).cloned().unwrap_or_else(|| {
            Err(ProviderError::new(format!("No scripted response for {method}"))
                .with_code("UnscriptedMethod"))
        })
    }
}
