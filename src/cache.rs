//! Solve result caching
//!
//! Thread-safe store of canonical solve response text keyed by the SHA-256
//! digest of `{definition: {name, id}, inputs}` in canonical JSON form. A
//! solve response is a pure function of the definition content and its
//! inputs, so entries carry no TTL: editing a definition rotates its content
//! hash, which rotates every key derived from it.
//!
//! Store mode: single-process in-memory. Multiple gateway processes each
//! keep their own cache; a shared networked store would slot in behind the
//! same `get`/`put` surface.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::registry::Definition;

/// Thread-safe solve result cache
pub struct SolveCache {
    /// Canonical response text keyed by solve key
    entries: DashMap<String, String>,
    /// Cache statistics
    stats: CacheStats,
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    /// Get current cache hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get current cache miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl SolveCache {
    /// Create a new empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Get a cached response by key
    pub fn get(&self, key: &str) -> Option<String> {
        match self.entries.get(key) {
            Some(entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a canonical response under a key
    pub fn put(&self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache statistics
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for SolveCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive the cache key for a definition + input mapping.
///
/// Key material serializes with sorted object keys (`BTreeMap` inputs,
/// alphabetical literal fields), so two requests with the same entries in
/// any order produce the same key. The definition's content-hash id is part
/// of the material, making content edits self-invalidating.
#[must_use]
pub fn compute_key(definition: &Definition, inputs: &BTreeMap<String, Value>) -> String {
    let material = json!({
        "definition": {
            "name": definition.name,
            "id": definition.id,
        },
        "inputs": inputs,
    });
    let mut hasher = Sha256::new();
    hasher.update(material.to_string().as_bytes());
    let digest = hasher.finalize();
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(name: &str, id: &str) -> Definition {
        Definition {
            name: name.to_string(),
            id: id.to_string(),
            path: std::path::PathBuf::from(format!("/tmp/{name}")),
        }
    }

    #[test]
    fn test_key_order_independence() {
        let def = definition("box.gh", "abc123");

        let mut forward = BTreeMap::new();
        forward.insert("width".to_string(), json!(10));
        forward.insert("height".to_string(), json!(5));

        let mut reversed = BTreeMap::new();
        reversed.insert("height".to_string(), json!(5));
        reversed.insert("width".to_string(), json!(10));

        assert_eq!(compute_key(&def, &forward), compute_key(&def, &reversed));
    }

    #[test]
    fn test_key_depends_on_definition_identity() {
        let inputs = BTreeMap::from([("width".to_string(), json!(10))]);

        let a = compute_key(&definition("box.gh", "abc123"), &inputs);
        let b = compute_key(&definition("box.gh", "def456"), &inputs);
        let c = compute_key(&definition("lamp.gh", "abc123"), &inputs);

        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_depends_on_input_values() {
        let def = definition("box.gh", "abc123");
        let a = compute_key(&def, &BTreeMap::from([("width".to_string(), json!(10))]));
        let b = compute_key(&def, &BTreeMap::from([("width".to_string(), json!(11))]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hit_and_miss_counting() {
        let cache = SolveCache::new();
        cache.put("k1", "{\"values\":[]}".to_string());

        assert!(cache.get("k1").is_some());
        assert!(cache.get("k2").is_none());

        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = SolveCache::new();
        cache.put("k1", "a".to_string());
        cache.put("k2", "b".to_string());
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("k1").is_none());
    }
}
