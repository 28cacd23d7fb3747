//! Intrinsic functions embedded in parameter strings.
//!
//! A parameter string is scanned for the first recognized `States.*`
//! function name; if none is present but the string starts with `$`, it
//! is resolved as a path against the current data value. Anything else
//! passes through as a literal.
//!
//! Evaluation is best-effort: any parse or evaluation error yields the
//! original literal string, never an error.

use rand::Rng;
use serde_json::Value;
use uuid::Uuid;

use crate::path;

/// Recognized function names, scanned by position (ties go to the
/// longest name).
const FUNCTION_NAMES: [&str; 6] = [
    "States.StringToJson",
    "States.JsonToString",
    "States.MathRandom",
    "States.Format",
    "States.Array",
    "States.UUID",
];

/// Evaluate one parameter string against the current data value.
pub fn evaluate_expression(expr: &str, data: &Value) -> Value {
    let trimmed = expr.trim();

    if let Some((start, name)) = find_first_call(trimmed) {
        if let Some((args_src, end)) = balanced_call(trimmed, start + name.len()) {
            if let Some(value) = eval_call(name, args_src, data) {
                if start == 0 && end == trimmed.len() {
                    return value;
                }
                // The call is embedded in surrounding text: substitute
                // its rendering in place.
                let mut out = String::with_capacity(trimmed.len());
                out.push_str(&trimmed[..start]);
                out.push_str(&render(&value));
                out.push_str(&trimmed[end..]);
                return Value::String(out);
            }
        }
        return Value::String(expr.to_string());
    }

    if trimmed.starts_with('$') {
        return path::get_at(data, trimmed);
    }

    Value::String(expr.to_string())
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Find the earliest recognized function name that is immediately
/// followed by an opening parenthesis.
fn find_first_call(s: &str) -> Option<(usize, &'static str)> {
    let mut best: Option<(usize, &'static str)> = None;
    for name in FUNCTION_NAMES {
        let mut from = 0;
        while let Some(rel) = s[from..].find(name) {
            let pos = from + rel;
            let after = pos + name.len();
            if s[after..].starts_with('(') {
                best = match best {
                    Some((bpos, bname)) if bpos < pos => Some((bpos, bname)),
                    Some((bpos, bname)) if bpos == pos && bname.len() > name.len() => {
                        Some((bpos, bname))
                    }
                    _ => Some((pos, name)),
                };
                break;
            }
            from = after;
        }
    }
    best
}

/// Given the index of an opening parenthesis, return the argument source
/// (between the parentheses) and the index just past the closing one.
/// Respects single-quoted strings and nesting.
fn balanced_call(s: &str, open: usize) -> Option<(&str, usize)> {
    let bytes = s.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        if in_quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == b'\'' {
                in_quote = false;
            }
        } else {
            match b {
                b'\'' => in_quote = true,
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some((&s[open + 1..i], i + 1));
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Split an argument list at top-level commas, respecting quotes and
/// bracket nesting.
fn split_args(src: &str) -> Vec<&str> {
    let bytes = src.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if in_quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == b'\'' {
                in_quote = false;
            }
        } else {
            match b {
                b'\'' => in_quote = true,
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => {
                    parts.push(&src[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        i += 1;
    }
    if start < src.len() {
        parts.push(&src[start..]);
    }
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate one argument: single-quoted literal, nested call, path
/// reference, or JSON literal (in that order).
fn eval_arg(arg: &str, data: &Value) -> Option<Value> {
    let trimmed = arg.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        let inner = &trimmed[1..trimmed.len() - 1];
        return Some(Value::String(inner.replace("\\'", "'")));
    }
    if trimmed.contains("States.") {
        return Some(evaluate_expression(trimmed, data));
    }
    if trimmed.starts_with('$') {
        return Some(path::get_at(data, trimmed));
    }
    serde_json::from_str(trimmed).ok()
}

fn eval_call(name: &str, args_src: &str, data: &Value) -> Option<Value> {
    let args = split_args(args_src);
    match name {
        "States.Format" => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args.iter().copied() {
                values.push(eval_arg(arg, data)?);
            }
            let mut iter = values.into_iter();
            let Value::String(fmt) = iter.next()? else {
                return None;
            };
            let mut out = fmt;
            for value in iter {
                let Some(pos) = out.find("{}") else { break };
                out.replace_range(pos..pos + 2, &render(&value));
            }
            Some(Value::String(out))
        }
        "States.StringToJson" => {
            let value = eval_arg(args.first().copied()?, data)?;
            serde_json::from_str(value.as_str()?).ok()
        }
        "States.JsonToString" => {
            let value = eval_arg(args.first().copied()?, data)?;
            serde_json::to_string(&value).ok().map(Value::String)
        }
        "States.Array" => {
            let mut out = Vec::with_capacity(args.len());
            for arg in args.iter().copied() {
                out.push(eval_arg(arg, data)?);
            }
            Some(Value::Array(out))
        }
        "States.MathRandom" => {
            if args.len() != 2 {
                return None;
            }
            let lo = eval_arg(args[0], data)?.as_i64()?;
            let hi = eval_arg(args[1], data)?.as_i64()?;
            if lo > hi {
                return None;
            }
            Some(Value::from(rand::thread_rng().gen_range(lo..=hi)))
        }
        "States.UUID" => {
            if !args.is_empty() {
                return None;
            }
            Some(Value::String(Uuid::new_v4().to_string()))
        }
        _ => None,
    }
}

/// Render a value for substitution into a string: strings verbatim,
/// everything else as compact JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
