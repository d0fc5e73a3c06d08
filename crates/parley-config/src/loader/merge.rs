//! JSON merge helpers for layered configuration.

use serde_json::{Map, Value};

/// Merge overlay values into the base, recursively overriding objects.
pub(super) fn merge_json_values(base: &mut Value, overlay: &Value) {
    merge_json_with_constraints(base, overlay, None);
}

/// Merge overlay values into base, skipping any key locked by `constraints`.
///
/// A constraint object locks every leaf it contains; nested objects in the
/// constraint only lock their own leaves, leaving sibling keys writable.
pub(super) fn merge_json_with_constraints(
    base: &mut Value,
    overlay: &Value,
    constraints: Option<&Value>,
) {
    let locked = match constraints {
        None => None,
        Some(Value::Object(map)) => Some(map),
        // A scalar or array constraint locks this whole subtree.
        Some(_) => return,
    };

    let (base_map, overlay_map) = match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => (base_map, overlay_map),
        (slot, value) => {
            if locked.is_none() {
                *slot = value.clone();
            }
            return;
        }
    };

    for (key, value) in overlay_map {
        let constraint = locked.and_then(|map| map.get(key));
        match base_map.get_mut(key) {
            Some(existing) => merge_json_with_constraints(existing, value, constraint),
            None => match constraint {
                None => {
                    base_map.insert(key.clone(), value.clone());
                }
                Some(Value::Object(_)) => {
                    let mut fresh = Value::Object(Map::new());
                    merge_json_with_constraints(&mut fresh, value, constraint);
                    base_map.insert(key.clone(), fresh);
                }
                Some(_) => {}
            },
        }
    }
}
