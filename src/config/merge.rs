//! Field-by-field merging of configuration tiers.
//!
//! Arrays and scalars from a higher tier replace the lower tier's value;
//! objects are merged key by key.

use serde_json::Value;

/// Merge `overlay` onto `base`, overlay winning.
///
/// A null overlay value means "not specified" and keeps the base value.
///
/// # Example
/// ```
/// use serde_json::json;
/// use task_tree::config::deep_merge;
///
/// let defaults = json!({ "store": { "busy_timeout_ms": 5000, "pool_size": 4 } });
/// let project = json!({ "store": { "pool_size": 2 } });
/// let merged = deep_merge(defaults, project);
/// assert_eq!(merged, json!({ "store": { "busy_timeout_ms": 5000, "pool_size": 2 } }));
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Merge tiers in order, later tiers taking precedence.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}
