//! Solve orchestration
//!
//! The request pipeline: resolve the definition, check the cache, and on a
//! miss call the compute backend with the one-retry-after-wake policy. Cache
//! hits return without encoding inputs or touching the backend at all;
//! downstream solves are the expensive path this whole gateway exists to
//! avoid.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{self, SolveCache};
use crate::compute::{self, ComputeBackend};
use crate::encode::encode_inputs;
use crate::params::{DescribeResult, ParameterNormalizer};
use crate::readiness::{ActivityState, ReadinessController};
use crate::registry::{Definition, DefinitionRegistry};
use crate::{Error, Result};

/// An incoming solve request
#[derive(Debug, Clone, Deserialize)]
pub struct SolveRequest {
    /// Definition file name, e.g. `box.gh`
    pub definition: String,
    /// Named input values. `BTreeMap` keeps the mapping name-ordered, which
    /// the cache key derivation relies on.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
}

/// A solve result plus where it came from
#[derive(Debug)]
pub struct SolveOutcome {
    /// Canonical solve response
    pub value: Value,
    /// Whether the response was served from cache
    pub cached: bool,
}

/// Orchestrates registry, cache, compute backend, and readiness controller
/// for each incoming request.
pub struct Solver {
    registry: Arc<DefinitionRegistry>,
    compute: Arc<dyn ComputeBackend>,
    cache: Arc<SolveCache>,
    normalizer: ParameterNormalizer,
    readiness: Arc<ReadinessController>,
    activity: Arc<ActivityState>,
}

impl Solver {
    /// Create a solver over shared components
    #[must_use]
    pub fn new(
        registry: Arc<DefinitionRegistry>,
        compute: Arc<dyn ComputeBackend>,
        cache: Arc<SolveCache>,
        readiness: Arc<ReadinessController>,
        activity: Arc<ActivityState>,
    ) -> Self {
        Self {
            registry,
            compute,
            cache,
            normalizer: ParameterNormalizer::new(),
            readiness,
            activity,
        }
    }

    /// Solve a definition with the given inputs.
    pub async fn solve(
        &self,
        definition_name: &str,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<SolveOutcome> {
        // Entry, not success: failing calls still count as backend activity
        // and must hold off the idle shutdown.
        self.activity.touch();

        let definition = self.resolve(definition_name)?;
        let key = cache::compute_key(&definition, inputs);

        if let Some(text) = self.cache.get(&key) {
            debug!(definition = %definition.name, "Cache hit");
            return Ok(SolveOutcome {
                value: serde_json::from_str(&text)?,
                cached: true,
            });
        }

        debug!(definition = %definition.name, "Cache miss, solving");
        let mut value = self.solve_with_wake(&definition, inputs).await?;

        // The backend echoes its internal cache pointer; clients and the
        // cache must never see it.
        strip_pointer(&mut value);

        self.cache.put(&key, value.to_string());
        info!(
            definition = %definition.name,
            cache_entries = self.cache.len(),
            "Solve stored"
        );

        Ok(SolveOutcome {
            value,
            cached: false,
        })
    }

    /// Describe a definition's parameters (memoized after the first call).
    pub async fn describe(&self, definition_name: &str) -> Result<Arc<DescribeResult>> {
        self.activity.touch();
        let definition = self.resolve(definition_name)?;
        self.normalizer
            .describe(&definition, self.compute.as_ref())
            .await
    }

    /// List registered definitions, scanning lazily when the registry is
    /// empty.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Definition>> {
        if self.registry.is_empty() {
            self.registry.scan();
        }
        self.registry.all()
    }

    /// Resolve a definition by name, re-scanning once when the registry is
    /// empty (files may have been deployed after boot).
    fn resolve(&self, name: &str) -> Result<Arc<Definition>> {
        if name.is_empty() {
            return Err(Error::InvalidRequest("definition name is required".to_string()));
        }
        if self.registry.is_empty() {
            self.registry.scan();
        }
        self.registry
            .lookup_by_name(name)
            .ok_or_else(|| Error::DefinitionNotFound(name.to_string()))
    }

    /// The gateway's defining resilience behavior: exactly one retry, only
    /// for a transport-level failure, and only after waking the backend.
    ///
    /// A backend that answered with a status code is not retried at all: it
    /// is up, and it already rejected this request. A second transport
    /// failure after the wake is final.
    async fn solve_with_wake(
        &self,
        definition: &Definition,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<Value> {
        match self.call_backend(definition, inputs).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_retryable() => {
                warn!(
                    definition = %definition.name,
                    error = %e,
                    "Backend unreachable, triggering wake-up"
                );
                match self.readiness.ensure_running().await {
                    Ok(state) => debug!(?state, "Wake-up completed"),
                    // Capacity refusals are user-facing ("try later"), not
                    // a generic failure.
                    Err(e @ Error::InfraCapacity(_)) => return Err(e),
                    Err(wake_err) => {
                        warn!(error = %wake_err, "Wake-up failed, making final attempt anyway");
                    }
                }
                self.call_backend(definition, inputs).await
            }
            Err(e) => Err(e),
        }
    }

    /// One backend solve attempt.
    ///
    /// Definition bytes are read fresh from disk on every attempt so a
    /// hot-edited file reaches the backend without a restart.
    async fn call_backend(
        &self,
        definition: &Definition,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<Value> {
        let bytes = definition.read_bytes()?;
        let algo = compute::encode_algo(&bytes);
        let values = encode_inputs(inputs);
        let body = compute::solve_body(&algo, &definition.id, &values);
        self.compute.solve(body).await
    }
}

/// Remove the backend-internal `pointer` echo from a solve response
fn strip_pointer(value: &mut Value) {
    if let Some(object) = value.as_object_mut() {
        object.remove("pointer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_pointer() {
        let mut value = json!({"values": [1, 2], "pointer": "md5:abc"});
        strip_pointer(&mut value);
        assert_eq!(value, json!({"values": [1, 2]}));

        // Non-object responses pass through untouched
        let mut array = json!([1, 2]);
        strip_pointer(&mut array);
        assert_eq!(array, json!([1, 2]));
    }

    #[test]
    fn test_solve_request_inputs_default_empty() {
        let request: SolveRequest =
            serde_json::from_value(json!({"definition": "box.gh"})).unwrap();
        assert!(request.inputs.is_empty());
    }

    #[test]
    fn test_solve_request_inputs_are_name_ordered() {
        let request: SolveRequest = serde_json::from_value(json!({
            "definition": "box.gh",
            "inputs": {"width": 10, "height": 5}
        }))
        .unwrap();
        let keys: Vec<&str> = request.inputs.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["height", "width"]);
    }
}
