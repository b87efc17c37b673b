//! Output-tolerance comparator for sandbox results.
//!
//! Programs that print `[25]` for an expected `25`, or `"3.0"` for `3`,
//! are not wrong enough to score zero. [`compare`] walks a fixed ladder of
//! equivalence rules and reports the first one that matches together with
//! its confidence.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const FLOAT_RELATIVE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceRule {
    Exact,
    BothNull,
    SingleElementUnwrap,
    StringNumberCoercion,
    FloatTolerance,
    Trimmed,
    DeepFlatten,
    JsonString,
    BooleanEquivalence,
    Multiset,
}

impl ToleranceRule {
    pub fn confidence(&self) -> f64 {
        match self {
            ToleranceRule::Exact => 1.0,
            ToleranceRule::BothNull
            | ToleranceRule::SingleElementUnwrap
            | ToleranceRule::FloatTolerance => 0.95,
            ToleranceRule::StringNumberCoercion
            | ToleranceRule::Trimmed
            | ToleranceRule::DeepFlatten
            | ToleranceRule::JsonString => 0.9,
            ToleranceRule::BooleanEquivalence | ToleranceRule::Multiset => 0.85,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceMatch {
    pub is_match: bool,
    pub confidence: f64,
    pub rule: Option<ToleranceRule>,
}

impl ToleranceMatch {
    fn matched(rule: ToleranceRule) -> Self {
        Self {
            is_match: true,
            confidence: rule.confidence(),
            rule: Some(rule),
        }
    }

    fn mismatch() -> Self {
        Self {
            is_match: false,
            confidence: 0.0,
            rule: None,
        }
    }
}

/// Compares a program's `actual` output with the `expected` value.
pub fn compare(expected: &Value, actual: &Value) -> ToleranceMatch {
    let rules: [(ToleranceRule, fn(&Value, &Value) -> bool); 10] = [
        (ToleranceRule::Exact, |e, a| e == a),
        (ToleranceRule::BothNull, |e, a| is_nullish(e) && is_nullish(a)),
        (ToleranceRule::SingleElementUnwrap, single_element_unwrap),
        (ToleranceRule::StringNumberCoercion, string_number_coercion),
        (ToleranceRule::FloatTolerance, |e, a| match (e.as_f64(), a.as_f64()) {
            (Some(x), Some(y)) => floats_close(x, y),
            _ => false,
        }),
        (ToleranceRule::Trimmed, |e, a| match (e.as_str(), a.as_str()) {
            (Some(x), Some(y)) => x.trim() == y.trim(),
            _ => false,
        }),
        (ToleranceRule::DeepFlatten, deep_flatten),
        (ToleranceRule::JsonString, json_string),
        (ToleranceRule::BooleanEquivalence, boolean_equivalence),
        (ToleranceRule::Multiset, multiset),
    ];

    rules
        .iter()
        .find(|(_, check)| check(expected, actual))
        .map(|(rule, _)| ToleranceMatch::matched(*rule))
        .unwrap_or_else(ToleranceMatch::mismatch)
}

/// Converts a match confidence into awarded points out of `base_score`.
///
/// High-confidence matches (above 0.8) are floored at 80% of the base.
pub fn award_score(base_score: f64, confidence: f64) -> f64 {
    if confidence <= 0.0 {
        return 0.0;
    }
    let awarded = (base_score * confidence).round();
    if confidence > 0.8 {
        awarded.max(base_score * 0.8)
    } else {
        awarded
    }
}

fn is_nullish(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => matches!(s.trim(), "null" | "None" | "nil"),
        _ => false,
    }
}

fn floats_close(x: f64, y: f64) -> bool {
    let scale = x.abs().max(y.abs()).max(1.0);
    (x - y).abs() <= FLOAT_RELATIVE_TOLERANCE * scale
}

/// Equality used inside containers: exact, or numerically equal.
fn same(a: &Value, b: &Value) -> bool {
    a == b
        || match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => floats_close(x, y),
            _ => false,
        }
}

fn single_element_unwrap(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Array(items), other) | (other, Value::Array(items))
            if items.len() == 1 && !other.is_array() =>
        {
            same(&items[0], other)
        }
        _ => false,
    }
}

fn string_number_coercion(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            match (s.trim().parse::<f64>(), n.as_f64()) {
                (Ok(x), Some(y)) => floats_close(x, y),
                _ => false,
            }
        }
        _ => false,
    }
}

fn flatten<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| flatten(item, out)),
        other => out.push(other),
    }
}

fn deep_flatten(expected: &Value, actual: &Value) -> bool {
    if !expected.is_array() || !actual.is_array() {
        return false;
    }
    let (mut left, mut right) = (Vec::new(), Vec::new());
    flatten(expected, &mut left);
    flatten(actual, &mut right);
    left.len() == right.len() && left.iter().zip(&right).all(|(a, b)| same(a, b))
}

fn json_string(expected: &Value, actual: &Value) -> bool {
    let parse = |v: &Value| -> Option<Value> {
        v.as_str().and_then(|s| serde_json::from_str::<Value>(s.trim()).ok())
    };
    match (parse(expected), parse(actual)) {
        (Some(e), Some(a)) => e == a,
        (Some(e), None) => !actual.is_string() && same(&e, actual),
        (None, Some(a)) => !expected.is_string() && same(expected, &a),
        (None, None) => false,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 1.0 => Some(true),
            Some(x) if x == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn is_booleanish(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "false"),
        _ => false,
    }
}

fn boolean_equivalence(expected: &Value, actual: &Value) -> bool {
    if !is_booleanish(expected) && !is_booleanish(actual) {
        return false;
    }
    matches!((as_bool(expected), as_bool(actual)), (Some(a), Some(b)) if a == b)
}

fn multiset(expected: &Value, actual: &Value) -> bool {
    let (Value::Array(left), Value::Array(right)) = (expected, actual) else {
        return false;
    };
    if left.len() != right.len() {
        return false;
    }
    let mut used = vec![false; right.len()];
    left.iter().all(|item| {
        match (0..right.len()).find(|&i| !used[i] && same(item, &right[i])) {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}
