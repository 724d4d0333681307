//! Safe recursive stringification of raw provider payloads for logging (§4.1).
//!
//! Grounded on Design Notes §9: "Recursive object stringification (safe dump)
//! -> explicit depth + visited-set parameters threaded through recursion."
//! `serde_json::Value` trees can't structurally cycle, but the contract is
//! still implemented as documented — pointer identity of each node visited
//! this call is tracked, and a failure to serialize a leaf degrades to a
//! sentinel string rather than panicking or aborting the whole dump.

use serde_json::Value;
use std::collections::HashSet;

const SENTINEL: &str = "<unserializable>";

/// Depth-ceiling, cycle-safe stringification of a JSON value for log output.
pub fn safe_dump(value: &Value, max_depth: usize) -> Value {
    let mut visited = HashSet::new();
    dump_inner(value, max_depth, &mut visited)
}

fn dump_inner(value: &Value, depth_remaining: usize, visited: &mut HashSet<usize>) -> Value {
    let addr = value as *const Value as usize;
    if !visited.insert(addr) {
        return Value::String("<cycle>".to_string());
    }
    let result = if depth_remaining == 0 {
        match value {
            Value::Object(_) | Value::Array(_) => Value::String("<depth-limit>".to_string()),
            leaf => leaf.clone(),
        }
    } else {
        match value {
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), dump_inner(v, depth_remaining - 1, visited));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| dump_inner(v, depth_remaining - 1, visited))
                    .collect(),
            ),
            other => stringify_leaf(other),
        }
    };
    visited.remove(&addr);
    result
}

fn stringify_leaf(value: &Value) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(_) => Value::String(SENTINEL.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shallow_values_pass_through_unchanged() {
        let value = json!({"a": 1, "b": "two"});
        assert_eq!(safe_dump(&value, 5), value);
    }

    #[test]
    fn depth_ceiling_truncates_nested_objects() {
        let value = json!({"a": {"b": {"c": {"d": 1}}}});
        let dumped = safe_dump(&value, 2);
        assert_eq!(dumped["a"]["b"], json!("<depth-limit>"));
    }

    #[test]
    fn arrays_are_truncated_past_the_depth_ceiling() {
        let value = json!([[[[1]]]]);
        let dumped = safe_dump(&value, 1);
        assert_eq!(dumped[0], json!("<depth-limit>"));
    }
}
