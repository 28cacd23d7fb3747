//! The data-flow pipeline shared by Task, Pass, and Parallel.
//!
//! Each stage is a small pure function over JSON values:
//!
//! 1. `apply_input_path` -- narrow the state input to its effective input
//! 2. `apply_parameters` -- template the effective input
//! 3. (the state's own behavior produces a raw result)
//! 4. `apply_result_selector` -- template the raw result
//! 5. `apply_result_path` -- place the result into the original input
//! 6. `apply_output_path` -- wrap the placed value for the next state

use serde_json::{Map, Value};
use stateflow_types::definition::ResultPathField;

use crate::{intrinsics, path};

/// Narrow the state input via `InputPath`. Absent (or null) leaves the
/// input unchanged; a path that fails to resolve yields an empty object.
pub fn apply_input_path(input: &Value, input_path: Option<&str>) -> Value {
    match input_path {
        None => input.clone(),
        Some(p) => match path::resolve(input, p) {
            Some(v) => v.clone(),
            None => Value::Object(Map::new()),
        },
    }
}

/// Apply a `Parameters` template to the effective input. Absent template
/// passes the input through.
pub fn apply_parameters(parameters: Option<&Value>, effective_input: &Value) -> Value {
    match parameters {
        Some(template) => evaluate_template(template, effective_input),
        None => effective_input.clone(),
    }
}

/// Apply a `ResultSelector` template to the raw result.
pub fn apply_result_selector(selector: Option<&Value>, raw: &Value) -> Value {
    match selector {
        Some(template) => evaluate_template(template, raw),
        None => raw.clone(),
    }
}

/// Deep-walk a template: objects and arrays recurse, strings pass
/// through the intrinsic evaluator with `data` as the resolution root.
pub fn evaluate_template(template: &Value, data: &Value) -> Value {
    match template {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), evaluate_template(v, data)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| evaluate_template(v, data)).collect())
        }
        Value::String(s) => intrinsics::evaluate_expression(s, data),
        other => other.clone(),
    }
}

/// Place the selected result into a copy of the original input.
///
/// Absent `ResultPath` (or `$`) replaces the input with the result; an
/// explicit null discards the result and preserves the input; any other
/// path deep-merges the result into the input at that location.
pub fn apply_result_path(original: &Value, result: &Value, result_path: &ResultPathField) -> Value {
    match result_path {
        None => result.clone(),
        Some(None) => original.clone(),
        Some(Some(p)) if is_root(p) => result.clone(),
        Some(Some(p)) => path::set_at(original, p, result.clone()),
    }
}

/// Apply `OutputPath`: absent (or `$`) passes the value through;
/// otherwise the value becomes the subtree at that path in an otherwise
/// empty object.
pub fn apply_output_path(placed: Value, output_path: Option<&str>) -> Value {
    match output_path {
        None => placed,
        Some(p) if is_root(p) => placed,
        Some(p) => path::set_at(&Value::Object(Map::new()), p, placed),
    }
}

fn is_root(p: &str) -> bool {
    p.trim() == "$"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // InputPath
    // -----------------------------------------------------------------------

    #[test]
    fn test_input_path_absent_is_identity() {
        let input = json!({"a": 1});
        assert_eq!(apply_input_path(&input, None), input);
    }

    #[test]
    fn test_input_path_narrows() {
        let input = json!({"order": {"total": 42}});
        assert_eq!(apply_input_path(&input, Some("$.order")), json!({"total": 42}));
    }

    #[test]
    fn test_input_path_unresolvable_is_empty_object() {
        let input = json!({"a": 1});
        assert_eq!(apply_input_path(&input, Some("$.missing")), json!({}));
    }

    // -----------------------------------------------------------------------
    // Parameters / ResultSelector templates
    // -----------------------------------------------------------------------

    #[test]
    fn test_parameters_template_resolves_paths() {
        let effective = json!({"name": "Ada", "n": 2});
        let template = json!({
            "greeting": "States.Format('hi {}', $.name)",
            "copy": "$.n",
            "nested": {"list": ["$.name", "literal"]}
        });
        let out = apply_parameters(Some(&template), &effective);
        assert_eq!(
            out,
            json!({
                "greeting": "hi Ada",
                "copy": 2,
                "nested": {"list": ["Ada", "literal"]}
            })
        );
    }

    #[test]
    fn test_result_selector_absent_is_identity() {
        let raw = json!({"r": 1});
        assert_eq!(apply_result_selector(None, &raw), raw);
    }

    #[test]
    fn test_template_preserves_non_strings() {
        let out = evaluate_template(&json!({"n": 5, "b": true, "x": null}), &json!({}));
        assert_eq!(out, json!({"n": 5, "b": true, "x": null}));
    }

    // -----------------------------------------------------------------------
    // ResultPath
    // -----------------------------------------------------------------------

    #[test]
    fn test_result_path_absent_replaces() {
        let out = apply_result_path(&json!({"in": 1}), &json!({"out": 2}), &None);
        assert_eq!(out, json!({"out": 2}));
    }

    #[test]
    fn test_result_path_null_discards_result() {
        let out = apply_result_path(&json!({"in": 1}), &json!({"out": 2}), &Some(None));
        assert_eq!(out, json!({"in": 1}));
    }

    #[test]
    fn test_result_path_root_replaces() {
        let out = apply_result_path(
            &json!({"in": 1}),
            &json!("result"),
            &Some(Some("$".to_string())),
        );
        assert_eq!(out, json!("result"));
    }

    #[test]
    fn test_result_path_merges_at_location() {
        let out = apply_result_path(
            &json!({"data": "v"}),
            &json!({"Error": "E", "Cause": "C"}),
            &Some(Some("$.error".to_string())),
        );
        assert_eq!(
            out,
            json!({"data": "v", "error": {"Error": "E", "Cause": "C"}})
        );
    }

    // -----------------------------------------------------------------------
    // OutputPath
    // -----------------------------------------------------------------------

    #[test]
    fn test_output_path_absent_is_identity() {
        assert_eq!(apply_output_path(json!({"a": 1}), None), json!({"a": 1}));
    }

    #[test]
    fn test_output_path_wraps() {
        assert_eq!(
            apply_output_path(json!({"a": 1}), Some("$.wrapped")),
            json!({"wrapped": {"a": 1}})
        );
    }

    #[test]
    fn test_output_path_root_is_identity() {
        assert_eq!(apply_output_path(json!(7), Some("$")), json!(7));
    }

    // -----------------------------------------------------------------------
    // Full pipeline composition
    // -----------------------------------------------------------------------

    #[test]
    fn test_pipeline_composition() {
        let input = json!({"order": {"id": 9, "qty": 2}});
        let effective = apply_input_path(&input, Some("$.order"));
        let params = apply_parameters(Some(&json!({"order_id": "$.id"})), &effective);
        assert_eq!(params, json!({"order_id": 9}));

        // Pretend the state produced this raw result.
        let raw = json!({"status": "shipped", "carrier": "x"});
        let selected = apply_result_selector(Some(&json!({"s": "$.status"})), &raw);
        let placed = apply_result_path(&input, &selected, &Some(Some("$.shipping".to_string())));
        let output = apply_output_path(placed, None);
        assert_eq!(
            output,
            json!({
                "order": {"id": 9, "qty": 2},
                "shipping": {"s": "shipped"}
            })
        );
    }
}
