//! Parameter normalization
//!
//! The downstream introspection endpoint is not stable across backend
//! versions: field names arrive in PascalCase or camelCase, the input
//! collection key varies, and defaults show up either as bare scalars or
//! wrapped in a nested branch tree. Everything funnels through one raw
//! serde model with aliases and one normalization pass, so a new backend
//! shape means one more alias rather than scattered field probes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::compute::{self, ComputeBackend};
use crate::registry::Definition;
use crate::{Error, Result};

/// Canonical parameter type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// Whole number
    Integer,
    /// Floating point number
    Number,
    /// Boolean toggle
    Boolean,
    /// Text value
    Text,
    /// Geometry payload (suppresses the built-in view)
    Geometry,
    /// Point payload (suppresses the built-in view)
    Point,
    /// Curve payload (suppresses the built-in view)
    Curve,
    /// Anything the gateway does not interpret
    Other(String),
}

impl ParamType {
    /// Parse a downstream type name, tolerating casing and legacy spellings
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "integer" => Self::Integer,
            "number" | "double" => Self::Number,
            "boolean" => Self::Boolean,
            "text" | "string" => Self::Text,
            "geometry" => Self::Geometry,
            "point" => Self::Point,
            "curve" => Self::Curve,
            _ => Self::Other(raw.to_string()),
        }
    }

    /// Whether this parameter type requires specialized rendering the
    /// built-in viewer cannot provide
    #[must_use]
    pub fn suppresses_view(&self) -> bool {
        matches!(self, Self::Geometry | Self::Point | Self::Curve)
    }

    fn as_str(&self) -> &str {
        match self {
            Self::Integer => "Integer",
            Self::Number => "Number",
            Self::Boolean => "Boolean",
            Self::Text => "Text",
            Self::Geometry => "Geometry",
            Self::Point => "Point",
            Self::Curve => "Curve",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ParamType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ParamType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Canonical description of one definition input
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDescriptor {
    /// Parameter name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Canonical parameter type
    pub param_type: ParamType,
    /// Default value, cast per `param_type`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Lower bound, cast per `param_type`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Value>,
    /// Upper bound, cast per `param_type`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Value>,
}

/// Normalized result of a parameter introspection call
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DescribeResult {
    /// Definition description text
    pub description: String,
    /// Normalized input descriptors
    pub inputs: Vec<ParameterDescriptor>,
    /// Output parameter names
    pub outputs: Vec<String>,
    /// Whether the built-in viewer can render results
    pub has_view: bool,
}

// ---------------------------------------------------------------------------
// Raw downstream shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawDescribe {
    #[serde(alias = "Description", default)]
    description: Option<String>,
    #[serde(
        alias = "Inputs",
        alias = "InputNames",
        alias = "inputNames",
        default
    )]
    inputs: Option<RawParamList>,
    #[serde(
        alias = "Outputs",
        alias = "OutputNames",
        alias = "outputNames",
        default
    )]
    outputs: Option<RawParamList>,
}

/// Parameter collections arrive either as full objects or as bare name lists
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParamList {
    Params(Vec<RawParam>),
    Names(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawParam {
    #[serde(alias = "Name", default)]
    name: String,
    #[serde(alias = "Description", default)]
    description: Option<String>,
    #[serde(
        alias = "ParamType",
        alias = "TypeName",
        alias = "typeName",
        default
    )]
    param_type: Option<ParamType>,
    #[serde(alias = "Default", default)]
    default: Option<RawValue>,
    #[serde(alias = "Minimum", default)]
    minimum: Option<Value>,
    #[serde(alias = "Maximum", default)]
    maximum: Option<Value>,
}

/// A default arrives either tree-wrapped or as a bare scalar
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Tree(RawTree),
    Scalar(Value),
}

#[derive(Debug, Deserialize)]
struct RawTree {
    #[serde(alias = "InnerTree", alias = "innerTree")]
    inner_tree: BTreeMap<String, Vec<RawLeaf>>,
}

#[derive(Debug, Deserialize)]
struct RawLeaf {
    #[serde(alias = "Data", default)]
    data: Value,
}

impl RawValue {
    /// Extract the underlying scalar: the first leaf's `data` in the wrapped
    /// case, the value itself otherwise.
    fn into_scalar(self) -> Option<Value> {
        match self {
            Self::Scalar(v) if v.is_null() => None,
            Self::Scalar(v) => Some(v),
            Self::Tree(tree) => tree
                .inner_tree
                .into_values()
                .flatten()
                .next()
                .map(|leaf| leaf.data),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize a raw introspection response into the canonical shape
pub fn normalize_describe(raw: &Value) -> Result<DescribeResult> {
    let raw: RawDescribe = serde_json::from_value(raw.clone())?;

    let inputs: Vec<ParameterDescriptor> = match raw.inputs {
        Some(RawParamList::Params(params)) => {
            params.into_iter().map(normalize_param).collect()
        }
        Some(RawParamList::Names(names)) => names
            .into_iter()
            .map(|name| ParameterDescriptor {
                name,
                description: String::new(),
                param_type: ParamType::Other(String::new()),
                default: None,
                minimum: None,
                maximum: None,
            })
            .collect(),
        None => Vec::new(),
    };

    let outputs: Vec<String> = match raw.outputs {
        Some(RawParamList::Params(params)) => params.into_iter().map(|p| p.name).collect(),
        Some(RawParamList::Names(names)) => names,
        None => Vec::new(),
    };

    let has_view = !inputs.iter().any(|i| i.param_type.suppresses_view());

    Ok(DescribeResult {
        description: raw.description.unwrap_or_default(),
        inputs,
        outputs,
        has_view,
    })
}

fn normalize_param(raw: RawParam) -> ParameterDescriptor {
    let param_type = raw
        .param_type
        .unwrap_or_else(|| ParamType::Other(String::new()));
    let default = raw
        .default
        .and_then(RawValue::into_scalar)
        .and_then(|v| cast_value(v, &param_type));
    let minimum = raw.minimum.and_then(|v| cast_value(v, &param_type));
    let maximum = raw.maximum.and_then(|v| cast_value(v, &param_type));

    ParameterDescriptor {
        name: raw.name,
        description: raw.description.unwrap_or_default(),
        param_type,
        default,
        minimum,
        maximum,
    }
}

/// Cast a raw downstream value according to the parameter type.
///
/// Tree leaf `data` is frequently a JSON-encoded string (`"10"`, `"\"a\""`),
/// so string payloads are unquoted before casting.
fn cast_value(raw: Value, param_type: &ParamType) -> Option<Value> {
    let raw = unquote(raw);
    match param_type {
        ParamType::Integer => match &raw {
            Value::Number(n) => n.as_i64().map(Value::from),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        ParamType::Number => match &raw {
            Value::Number(n) => n.as_f64().map(Value::from),
            Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
            _ => None,
        },
        ParamType::Boolean => match &raw {
            Value::Bool(b) => Some(Value::from(*b)),
            Value::String(s) => Some(Value::from(s.trim().eq_ignore_ascii_case("true"))),
            _ => None,
        },
        _ => match raw {
            Value::String(s) => Some(Value::from(s)),
            Value::Null => None,
            other => Some(Value::from(other.to_string())),
        },
    }
}

/// Undo one layer of JSON string encoding when present
fn unquote(value: Value) -> Value {
    if let Value::String(s) = &value {
        if let Ok(inner) = serde_json::from_str::<Value>(s) {
            if !matches!(inner, Value::Object(_) | Value::Array(_)) {
                return inner;
            }
        }
    }
    value
}

// ---------------------------------------------------------------------------
// Normalizer with per-definition memoization
// ---------------------------------------------------------------------------

/// Parameter normalizer with per-definition-id memoization.
///
/// A definition's descriptors are fetched at most once per process lifetime;
/// editing the file rotates its content hash and therefore the memo key.
pub struct ParameterNormalizer {
    memo: DashMap<String, Arc<DescribeResult>>,
}

impl ParameterNormalizer {
    /// Create an empty normalizer
    #[must_use]
    pub fn new() -> Self {
        Self {
            memo: DashMap::new(),
        }
    }

    /// Describe a definition, invoking the downstream introspection endpoint
    /// on first use only.
    ///
    /// Failures are never retried here: a broken definition file should
    /// surface immediately with the downstream status and body, not hide
    /// behind the solve pipeline's wake-retry machinery.
    pub async fn describe(
        &self,
        definition: &Definition,
        backend: &dyn ComputeBackend,
    ) -> Result<Arc<DescribeResult>> {
        if let Some(memoized) = self.memo.get(&definition.id) {
            return Ok(Arc::clone(&memoized));
        }

        let bytes = definition.read_bytes()?;
        let algo = compute::encode_algo(&bytes);
        let body = compute::introspection_body(&algo, &definition.id);

        let raw = backend.describe(body).await?;
        let normalized = Arc::new(normalize_describe(&raw).map_err(|e| {
            Error::Internal(format!(
                "Unrecognized introspection response for {}: {e}",
                definition.name
            ))
        })?);

        debug!(
            definition = %definition.name,
            inputs = normalized.inputs.len(),
            outputs = normalized.outputs.len(),
            "Memoized parameter descriptors"
        );
        self.memo
            .insert(definition.id.clone(), Arc::clone(&normalized));
        Ok(normalized)
    }
}

impl Default for ParameterNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_pascal_and_camel_shapes_normalize_identically() {
        let pascal = json!({
            "Description": "A parametric box",
            "Inputs": [{
                "Name": "width",
                "Description": "Box width",
                "ParamType": "Number",
                "Default": {"InnerTree": {"{0;0}": [{"type": "System.Double", "data": "10"}]}},
                "Minimum": "1",
                "Maximum": "100"
            }],
            "Outputs": [{"Name": "mesh"}]
        });
        let camel = json!({
            "description": "A parametric box",
            "inputs": [{
                "name": "width",
                "description": "Box width",
                "paramType": "Double",
                "default": 10,
                "minimum": 1,
                "maximum": 100
            }],
            "outputs": [{"name": "mesh"}]
        });

        let a = normalize_describe(&pascal).unwrap();
        let b = normalize_describe(&camel).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.inputs[0].default, Some(json!(10.0)));
        assert_eq!(a.inputs[0].minimum, Some(json!(1.0)));
        assert_eq!(a.outputs, vec!["mesh".to_string()]);
    }

    #[test]
    fn test_legacy_name_lists() {
        let raw = json!({
            "inputNames": ["width", "height"],
            "outputNames": ["volume"]
        });
        let normalized = normalize_describe(&raw).unwrap();
        assert_eq!(normalized.inputs.len(), 2);
        assert_eq!(normalized.inputs[0].name, "width");
        assert_eq!(normalized.outputs, vec!["volume".to_string()]);
        assert!(normalized.has_view);
    }

    #[test]
    fn test_geometry_inputs_suppress_view() {
        let raw = json!({
            "inputs": [
                {"name": "width", "paramType": "Number"},
                {"name": "profile", "paramType": "Curve"}
            ]
        });
        assert!(!normalize_describe(&raw).unwrap().has_view);
    }

    #[test]
    fn test_cast_by_type() {
        assert_eq!(
            cast_value(json!("42"), &ParamType::Integer),
            Some(json!(42))
        );
        assert_eq!(
            cast_value(json!("2.5"), &ParamType::Number),
            Some(json!(2.5))
        );
        assert_eq!(
            cast_value(json!("TRUE"), &ParamType::Boolean),
            Some(json!(true))
        );
        assert_eq!(
            cast_value(json!("yes"), &ParamType::Boolean),
            Some(json!(false))
        );
        assert_eq!(
            cast_value(json!("\"label\""), &ParamType::Text),
            Some(json!("label"))
        );
        assert_eq!(cast_value(json!("nope"), &ParamType::Integer), None);
    }

    #[test]
    fn test_param_type_parse() {
        assert_eq!(ParamType::parse("Double"), ParamType::Number);
        assert_eq!(ParamType::parse("integer"), ParamType::Integer);
        assert_eq!(ParamType::parse("Text"), ParamType::Text);
        assert_eq!(
            ParamType::parse("Mesh"),
            ParamType::Other("Mesh".to_string())
        );
        assert!(ParamType::Point.suppresses_view());
        assert!(!ParamType::Text.suppresses_view());
    }

    #[test]
    fn test_tree_default_takes_first_leaf() {
        let wrapped = RawValue::Tree(RawTree {
            inner_tree: BTreeMap::from([(
                "{0;0}".to_string(),
                vec![
                    RawLeaf { data: json!("1") },
                    RawLeaf { data: json!("2") },
                ],
            )]),
        });
        assert_eq!(wrapped.into_scalar(), Some(json!("1")));
    }
}
