//! Environment snapshot
//!
//! Credential and transport resolution read the environment through an
//! [`EnvSnapshot`] instead of `std::env`, so resolution is a pure function of
//! its inputs and tests never mutate the real process environment.

use std::collections::HashMap;

/// An immutable copy of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Create an empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current process environment
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Create a snapshot from key/value pairs
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Builder-style setter
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Raw lookup
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Lookup that treats empty and whitespace-only values as unset
    #[must_use]
    pub fn non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.trim().is_empty())
    }

    /// First non-blank value among `keys`
    #[must_use]
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.non_blank(key))
    }

    /// Whether a variable is set to a truthy value (anything but empty, `0` or `false`)
    #[must_use]
    pub fn is_truthy(&self, key: &str) -> bool {
        self.non_blank(key)
            .is_some_and(|value| !matches!(value.trim(), "0" | "false" | "FALSE" | "False"))
    }
}
