//! Request cache
//!
//! Concurrent identical calls share a single in-flight future. Entries (both
//! successes and failures) live for the lifetime of the provider.

use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::error::Result;

/// Shared handle to one logical request.
pub type SharedRequest = Shared<BoxFuture<'static, Result<Value>>>;

/// Identity of a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    service: String,
    method: String,
    params: String,
    region: String,
}

impl CacheKey {
    /// Build a key; parameters are canonicalised so key order never matters.
    #[must_use]
    pub fn new(service: &str, method: &str, params: &Value, region: &str) -> Self {
        Self {
            service: service.to_string(),
            method: method.to_string(),
            params: canonical_json(params),
            region: region.to_string(),
        }
    }
}

/// Serialise JSON with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), sorted(v)))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// In-memory map of shared request futures.
#[derive(Default)]
pub struct RequestCache {
    entries: Mutex<HashMap<CacheKey, SharedRequest>>,
}

impl RequestCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entry for `key`, inserting the future from `make` if absent.
    ///
    /// Lookup and insertion happen under one lock, so `make` runs at most once
    /// per key.
    pub fn get_or_insert_with<F>(&self, key: CacheKey, make: F) -> SharedRequest
    where
        F: FnOnce() -> BoxFuture<'static, Result<Value>>,
    {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key) {
            trace!(?key, "Request cache hit");
            return existing.clone();
        }
        trace!(?key, "Request cache miss");
        let shared = make().shared();
        entries.insert(key, shared.clone());
        shared
    }

    /// Number of cached requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": [1, {"z": 0, "y": 1}], "c": null}});
        let b = json!({"a": {"c": null, "d": [1, {"y": 1, "z": 0}]}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(
            CacheKey::new("S3", "headBucket", &a, "us-east-1"),
            CacheKey::new("S3", "headBucket", &b, "us-east-1")
        );
    }

    #[test]
    fn test_region_is_part_of_key() {
        let params = json!({});
        assert_ne!(
            CacheKey::new("S3", "listBuckets", &params, "us-east-1"),
            CacheKey::new("S3", "listBuckets", &params, "eu-west-1")
        );
    }

    #[tokio::test]
    async fn test_same_key_runs_once() {
        let cache = RequestCache::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new("STS", "getCallerIdentity", &json!({}), "us-east-1");

        let mut handles = Vec::new();
        for _ in 0..10 {
            let runs = runs.clone();
            handles.push(cache.get_or_insert_with(key.clone(), move || {
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"Account": "123"}))
                }
                .boxed()
            }));
        }

        for result in futures::future::join_all(handles).await {
            assert_eq!(result.unwrap()["Account"], "123");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }
}
