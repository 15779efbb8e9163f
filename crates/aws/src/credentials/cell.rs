//! Refreshed session tokens shared between the provider and its transports.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// Session tokens refreshed by transports, keyed by credential source.
#[derive(Clone, Default)]
pub struct CredentialCell {
    tokens: Arc<RwLock<HashMap<String, String>>>,
}

impl CredentialCell {
    /// Create an empty cell
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle allowed to replace the session token of one credential source
    #[must_use]
    pub fn handle(&self, source_key: impl Into<String>) -> SessionTokenHandle {
        SessionTokenHandle {
            cell: self.clone(),
            source_key: source_key.into(),
        }
    }

    /// Latest refreshed token for a source
    #[must_use]
    pub fn session_token(&self, source_key: &str) -> Option<String> {
        self.tokens.read().get(source_key).cloned()
    }

    fn store(&self, source_key: &str, token: String) {
        self.tokens.write().insert(source_key.to_string(), token);
    }
}

impl fmt::Debug for CredentialCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCell")
            .field("sources", &self.tokens.read().len())
            .finish()
    }
}

/// Narrow capability handed to a transport.
///
/// It can only replace the session token of the source it was created for.
#[derive(Clone)]
pub struct SessionTokenHandle {
    cell: CredentialCell,
    source_key: String,
}

impl SessionTokenHandle {
    /// Record a refreshed session token
    pub fn update(&self, session_token: impl Into<String>) {
        debug!(source = %self.source_key, "Session token refreshed");
        self.cell.store(&self.source_key, session_token.into());
    }
}

impl fmt::Debug for SessionTokenHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokenHandle")
            .field("source_key", &self.source_key)
            .finish_non_exhaustive()
    }
}
