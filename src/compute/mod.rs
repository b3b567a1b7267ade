//! Compute backend client
//!
//! The downstream geometry-compute service is consumed through the
//! [`ComputeBackend`] trait so the solve pipeline can be exercised against
//! stubs. [`HttpCompute`] is the production implementation.

mod http;

pub use self::http::HttpCompute;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::Result;
use crate::encode::DataTree;

/// Absolute tolerance sent with every backend request
pub const DEFAULT_ABSOLUTE_TOLERANCE: f64 = 0.01;
/// Angle tolerance sent with every backend request
pub const DEFAULT_ANGLE_TOLERANCE: f64 = 1.0;
/// Model units sent with every backend request
pub const DEFAULT_MODEL_UNITS: &str = "Millimeters";

/// Downstream geometry-compute service
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Parameter introspection call (`POST /io`)
    async fn describe(&self, body: Value) -> Result<Value>;

    /// Solve call (`POST /grasshopper`)
    async fn solve(&self, body: Value) -> Result<Value>;

    /// Fast health probe (`GET /healthcheck`), returns the response body
    async fn health(&self) -> Result<String>;
}

/// Base64-encode definition bytes for the `algo` request field
#[must_use]
pub fn encode_algo(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Build the parameter introspection request body
#[must_use]
pub fn introspection_body(algo: &str, pointer: &str) -> Value {
    request_body(algo, pointer, json!([]))
}

/// Build the solve request body
#[must_use]
pub fn solve_body(algo: &str, pointer: &str, values: &[DataTree]) -> Value {
    request_body(algo, pointer, json!(values))
}

/// Common request body shape for introspection and solve calls.
///
/// `cachesolve` stays false: caching is this gateway's job, keyed by
/// definition identity rather than the backend's internal pointer.
fn request_body(algo: &str, pointer: &str, values: Value) -> Value {
    json!({
        "absolutetolerance": DEFAULT_ABSOLUTE_TOLERANCE,
        "angletolerance": DEFAULT_ANGLE_TOLERANCE,
        "modelunits": DEFAULT_MODEL_UNITS,
        "algo": algo,
        "pointer": pointer,
        "cachesolve": false,
        "values": values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_inputs;
    use std::collections::BTreeMap;

    #[test]
    fn test_algo_roundtrips() {
        let bytes = b"definition payload";
        let encoded = encode_algo(bytes);
        assert_eq!(BASE64.decode(&encoded).unwrap(), bytes);
    }

    #[test]
    fn test_introspection_body_shape() {
        let body = introspection_body("QUJD", "hash123");
        assert_eq!(body["algo"], "QUJD");
        assert_eq!(body["pointer"], "hash123");
        assert_eq!(body["cachesolve"], false);
        assert_eq!(body["modelunits"], DEFAULT_MODEL_UNITS);
        assert!(body["values"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_solve_body_carries_encoded_values() {
        let inputs = BTreeMap::from([("width".to_string(), serde_json::json!(10))]);
        let trees = encode_inputs(&inputs);
        let body = solve_body("QUJD", "hash123", &trees);

        let values = body["values"].as_array().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["ParamName"], "width");
    }
}
