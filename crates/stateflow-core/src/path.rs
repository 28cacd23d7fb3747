//! Restricted JSONPath evaluator.
//!
//! Supports the root reference `$`, dotted descent (`$.a.b.c`), and
//! numeric array indices (`$.items.0`). A bare path (`a.b`) is treated as
//! `$.a.b` against the supplied root.
//!
//! Reads never fail: a missing key, an out-of-range index, or descent
//! through a non-container yields `Null`. Writes return a new tree,
//! creating intermediate objects as needed; an existing object merges
//! with an incoming object recursively, any other combination is
//! replaced by the incoming subtree.

use serde_json::{Map, Value};

/// Split a path into its descent segments. `$` alone yields no segments.
fn segments(path: &str) -> Vec<&str> {
    let trimmed = path.trim();
    let body = trimmed.strip_prefix('$').unwrap_or(trimmed);
    body.split('.').filter(|s| !s.is_empty()).collect()
}

/// Resolve a path to a reference into the tree, or `None` when any
/// segment fails to resolve.
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for seg in segments(path) {
        current = match current {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => {
                let idx: usize = seg.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Read the value at a path. Missing paths yield `Null`.
pub fn get_at(root: &Value, path: &str) -> Value {
    resolve(root, path).cloned().unwrap_or(Value::Null)
}

/// Return a new tree in which `path` resolves to `value`.
///
/// For the root path `$`, the result is `value` itself. Deeper paths
/// create intermediate objects; the destination merges per [`deep_merge`].
pub fn set_at(root: &Value, path: &str, value: Value) -> Value {
    let segs = segments(path);
    if segs.is_empty() {
        return value;
    }
    let mut out = root.clone();
    set_segments(&mut out, &segs, value);
    out
}

fn set_segments(target: &mut Value, segs: &[&str], value: Value) {
    let seg = segs[0];

    // Numeric segments index into existing arrays (padding with nulls
    // when writing past the end); everything else descends by key.
    if let Value::Array(items) = target {
        if let Ok(idx) = seg.parse::<usize>() {
            while items.len() <= idx {
                items.push(Value::Null);
            }
            if segs.len() == 1 {
                let previous = items[idx].take();
                items[idx] = deep_merge(previous, value);
            } else {
                set_segments(&mut items[idx], &segs[1..], value);
            }
            return;
        }
    }

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        if segs.len() == 1 {
            match map.get_mut(seg) {
                Some(slot) => {
                    let previous = slot.take();
                    *slot = deep_merge(previous, value);
                }
                None => {
                    map.insert(seg.to_string(), value);
                }
            }
        } else {
            let entry = map.entry(seg.to_string()).or_insert(Value::Null);
            set_segments(entry, &segs[1..], value);
        }
    }
}

/// Merge `incoming` into `existing`: object-into-object merges
/// recursively, any other combination yields `incoming`.
pub fn deep_merge(existing: Value, incoming: Value) -> Value {
    match (existing, incoming) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => {
                        let previous = slot.take();
                        *slot = deep_merge(previous, value);
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Object(base)
        }
        (_, incoming) => incoming,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[test]
    fn test_get_root() {
        let v = json!({"a": 1});
        assert_eq!(get_at(&v, "$"), v);
    }

    #[test]
    fn test_get_dotted_descent() {
        let v = json!({"a": {"b": {"c": 42}}});
        assert_eq!(get_at(&v, "$.a.b.c"), json!(42));
    }

    #[test]
    fn test_get_array_index() {
        let v = json!({"items": ["x", "y", "z"]});
        assert_eq!(get_at(&v, "$.items.1"), json!("y"));
        assert_eq!(get_at(&v, "$.items.9"), Value::Null);
    }

    #[test]
    fn test_bare_path_equivalent_to_rooted() {
        let v = json!({"a": {"b": 7}});
        assert_eq!(get_at(&v, "a.b"), get_at(&v, "$.a.b"));
    }

    #[test]
    fn test_get_missing_key_is_null() {
        let v = json!({"a": 1});
        assert_eq!(get_at(&v, "$.nope"), Value::Null);
        assert_eq!(get_at(&v, "$.nope.deeper"), Value::Null);
    }

    #[test]
    fn test_get_through_scalar_is_null() {
        let v = json!({"a": 5});
        assert_eq!(get_at(&v, "$.a.b"), Value::Null);
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    #[test]
    fn test_set_root_replaces() {
        let v = json!({"old": true});
        assert_eq!(set_at(&v, "$", json!({"new": 1})), json!({"new": 1}));
    }

    #[test]
    fn test_set_creates_intermediates() {
        let v = json!({});
        let out = set_at(&v, "$.a.b.c", json!(3));
        assert_eq!(out, json!({"a": {"b": {"c": 3}}}));
    }

    #[test]
    fn test_set_preserves_siblings() {
        let v = json!({"keep": "me", "a": {"keep_too": 1}});
        let out = set_at(&v, "$.a.b", json!(2));
        assert_eq!(out, json!({"keep": "me", "a": {"keep_too": 1, "b": 2}}));
    }

    #[test]
    fn test_set_merges_objects() {
        let v = json!({"a": {"x": 1, "nested": {"p": 1}}});
        let out = set_at(&v, "$.a", json!({"y": 2, "nested": {"q": 2}}));
        assert_eq!(
            out,
            json!({"a": {"x": 1, "nested": {"p": 1, "q": 2}, "y": 2}})
        );
    }

    #[test]
    fn test_set_non_object_combination_replaced() {
        let v = json!({"a": [1, 2, 3]});
        let out = set_at(&v, "$.a", json!({"b": 1}));
        assert_eq!(out, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_set_array_index() {
        let v = json!({"items": [1, 2, 3]});
        let out = set_at(&v, "$.items.1", json!(9));
        assert_eq!(out, json!({"items": [1, 9, 3]}));
    }

    #[test]
    fn test_set_array_pads_with_nulls() {
        let v = json!({"items": [1]});
        let out = set_at(&v, "$.items.3", json!("end"));
        assert_eq!(out, json!({"items": [1, null, null, "end"]}));
    }

    #[test]
    fn test_set_does_not_mutate_input() {
        let v = json!({"a": 1});
        let _ = set_at(&v, "$.b", json!(2));
        assert_eq!(v, json!({"a": 1}));
    }

    // -----------------------------------------------------------------------
    // Round-trip law: get_at(set_at(v, p, x), p) == x
    // -----------------------------------------------------------------------

    #[test]
    fn test_round_trip_scalar() {
        let v = json!({"a": {"b": "old"}});
        for path in ["$.a.b", "$.fresh.path", "$.a.c.d"] {
            let out = set_at(&v, path, json!(123));
            assert_eq!(get_at(&out, path), json!(123), "path {path}");
        }
    }

    #[test]
    fn test_round_trip_array_element() {
        let v = json!({"xs": [0, 0]});
        let out = set_at(&v, "$.xs.0", json!("first"));
        assert_eq!(get_at(&out, "$.xs.0"), json!("first"));
    }

    // -----------------------------------------------------------------------
    // deep_merge directly
    // -----------------------------------------------------------------------

    #[test]
    fn test_deep_merge_recursive() {
        let merged = deep_merge(
            json!({"a": {"x": 1}, "b": 1}),
            json!({"a": {"y": 2}, "c": 3}),
        );
        assert_eq!(merged, json!({"a": {"x": 1, "y": 2}, "b": 1, "c": 3}));
    }

    #[test]
    fn test_deep_merge_incoming_wins() {
        assert_eq!(deep_merge(json!({"a": 1}), json!(5)), json!(5));
        assert_eq!(deep_merge(json!([1, 2]), json!([3])), json!([3]));
    }
}
