//! JSON Flattening - Normalizes nested upstream payloads into flat records
//!
//! The gateway services return arbitrarily nested objects. Before a table can
//! be materialized every record is flattened to a single level so that the
//! column set is just the union of flat keys.

use serde_json::{Map, Value};

/// Separator between a parent key and its child keys.
pub const KEY_SEPARATOR: &str = "_";

/// Flatten a JSON value into a one-level map.
///
/// - Objects recurse, prefixing child keys with `parent_key + "_"`.
/// - Arrays whose elements are all objects expand with the element index in
///   the prefix (`items_0_a`, `items_1_a`, ...).
/// - Any other array (including the empty one) is kept verbatim as an atomic
///   leaf value.
/// - Scalars and nulls land under the accumulated key with the trailing
///   separator stripped.
pub fn flatten_record(value: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut Map<String, Value>) {
    match value {
        Value::Object(fields) => {
            for (key, child) in fields {
                flatten_into(child, format!("{}{}{}", prefix, key, KEY_SEPARATOR), out);
            }
        }
        Value::Array(items) => {
            // An empty array is NOT a list of objects; it stays atomic.
            if !items.is_empty() && items.iter().all(Value::is_object) {
                for (index, item) in items.iter().enumerate() {
                    flatten_into(item, format!("{}{}{}", prefix, index, KEY_SEPARATOR), out);
                }
            } else {
                out.insert(strip_separator(&prefix), value.clone());
            }
        }
        leaf => {
            out.insert(strip_separator(&prefix), leaf.clone());
        }
    }
}

fn strip_separator(prefix: &str) -> String {
    prefix
        .strip_suffix(KEY_SEPARATOR)
        .unwrap_or(prefix)
        .to_string()
}
