//! Input encoding
//!
//! Converts the flat `{name: value}` mapping supplied by clients into the
//! data-tree wire format the compute backend expects: one tree per
//! parameter, a single branch under the root path, and a single leaf whose
//! `data` carries the JSON-encoded value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root branch path for single-value trees
pub const ROOT_BRANCH: &str = "{0}";

/// One encoded parameter tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataTree {
    /// Parameter name as the downstream expects it
    #[serde(rename = "ParamName")]
    pub param_name: String,
    /// Branch path -> leaves
    #[serde(rename = "InnerTree")]
    pub inner_tree: BTreeMap<String, Vec<TreeLeaf>>,
}

/// One leaf inside a branch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeLeaf {
    /// Downstream wire type name
    #[serde(rename = "type")]
    pub wire_type: String,
    /// JSON-encoded value
    pub data: String,
}

/// Encode client inputs into data trees.
///
/// Input comes in as a `BTreeMap`, so iteration is name-ordered and two
/// mappings with equal entries encode to byte-identical serializations no
/// matter what order the client sent them in. Wire order does not matter to
/// the backend, but the cache key derivation depends on this determinism.
#[must_use]
pub fn encode_inputs(inputs: &BTreeMap<String, Value>) -> Vec<DataTree> {
    inputs
        .iter()
        .map(|(name, value)| DataTree {
            param_name: name.clone(),
            inner_tree: BTreeMap::from([(
                ROOT_BRANCH.to_string(),
                vec![TreeLeaf {
                    wire_type: wire_type(value).to_string(),
                    data: value.to_string(),
                }],
            )]),
        })
        .collect()
}

/// Infer the downstream wire type from the runtime shape of a value
fn wire_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "System.Boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "System.Int32",
        Value::Number(_) => "System.Double",
        _ => "System.String",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_wire_type_inference() {
        assert_eq!(wire_type(&json!(true)), "System.Boolean");
        assert_eq!(wire_type(&json!(10)), "System.Int32");
        assert_eq!(wire_type(&json!(2.5)), "System.Double");
        assert_eq!(wire_type(&json!("hello")), "System.String");
    }

    #[test]
    fn test_single_leaf_under_root_branch() {
        let inputs = BTreeMap::from([("width".to_string(), json!(10))]);
        let trees = encode_inputs(&inputs);

        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].param_name, "width");
        let leaves = &trees[0].inner_tree[ROOT_BRANCH];
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].wire_type, "System.Int32");
        assert_eq!(leaves[0].data, "10");
    }

    #[test]
    fn test_string_data_stays_json_encoded() {
        let inputs = BTreeMap::from([("label".to_string(), json!("lid"))]);
        let trees = encode_inputs(&inputs);
        assert_eq!(trees[0].inner_tree[ROOT_BRANCH][0].data, "\"lid\"");
    }

    #[test]
    fn test_encoding_is_order_independent() {
        let mut forward = BTreeMap::new();
        forward.insert("width".to_string(), json!(10));
        forward.insert("height".to_string(), json!(5));

        let mut reversed = BTreeMap::new();
        reversed.insert("height".to_string(), json!(5));
        reversed.insert("width".to_string(), json!(10));

        let a = serde_json::to_string(&encode_inputs(&forward)).unwrap();
        let b = serde_json::to_string(&encode_inputs(&reversed)).unwrap();
        assert_eq!(a, b);
    }
}
