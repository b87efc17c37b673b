//! Pulls a numeric score out of a judge's free-text reply.
//!
//! Formats are tried from most to least explicit: a JSON object with a
//! `score` field, a labelled `SCORE: 85` (optionally `SCORE: 8/10`), a bare
//! fraction `85/100`, a percentage `85%`, and finally the first number in
//! the text. Fractions and percentages are ratios and are mapped onto the
//! evaluator's range; the other forms are taken as already on that range.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

static LABELLED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bscore\b\s*(?:is)?\s*[:=]?\s*(-?\d+(?:\.\d+)?)(?:\s*/\s*(\d+(?:\.\d+)?))?")
        .expect("valid regex")
});
static FRACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d+(?:\.\d+)?)\s*/\s*(\d+(?:\.\d+)?)").expect("valid regex"));
static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d+(?:\.\d+)?)\s*%").expect("valid regex"));
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFormat {
    Json,
    Labelled,
    Fraction,
    Percentage,
    FirstNumber,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedScore {
    /// Within `[min, max]`.
    pub value: f64,
    pub format: ScoreFormat,
}

/// Extracts a score on the `[min, max]` range, or `None` when the text
/// carries no number at all.
pub fn parse_score(text: &str, min: f64, max: f64) -> Option<ParsedScore> {
    let (value, format) = parse_json(text)
        .map(|v| (v, ScoreFormat::Json))
        .or_else(|| parse_labelled(text, min, max).map(|v| (v, ScoreFormat::Labelled)))
        .or_else(|| parse_fraction(text, min, max).map(|v| (v, ScoreFormat::Fraction)))
        .or_else(|| parse_percentage(text, min, max).map(|v| (v, ScoreFormat::Percentage)))
        .or_else(|| parse_first_number(text).map(|v| (v, ScoreFormat::FirstNumber)))?;

    if !value.is_finite() {
        return None;
    }
    Some(ParsedScore {
        value: value.clamp(min.min(max), max.max(min)),
        format,
    })
}

fn scale(ratio: f64, min: f64, max: f64) -> f64 {
    min + ratio * (max - min)
}

fn parse_json(text: &str) -> Option<f64> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    match value.get("score")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_labelled(text: &str, min: f64, max: f64) -> Option<f64> {
    let caps = LABELLED.captures(text)?;
    let numerator: f64 = caps.get(1)?.as_str().parse().ok()?;
    match caps.get(2).and_then(|d| d.as_str().parse::<f64>().ok()) {
        Some(denominator) if denominator > 0.0 => Some(scale(numerator / denominator, min, max)),
        _ => Some(numerator),
    }
}

fn parse_fraction(text: &str, min: f64, max: f64) -> Option<f64> {
    let caps = FRACTION.captures(text)?;
    let numerator: f64 = caps.get(1)?.as_str().parse().ok()?;
    let denominator: f64 = caps.get(2)?.as_str().parse().ok()?;
    (denominator > 0.0).then(|| scale(numerator / denominator, min, max))
}

fn parse_percentage(text: &str, min: f64, max: f64) -> Option<f64> {
    let caps = PERCENT.captures(text)?;
    let pct: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(scale(pct / 100.0, min, max))
}

fn parse_first_number(text: &str) -> Option<f64> {
    NUMBER.find(text)?.as_str().parse().ok()
}
