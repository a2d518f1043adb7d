//! Per-field confidence from corroborating sources.
//!
//! A field starts at 0.3, loses 0.1 for a shape shortfall, gains a bonus per
//! independent source type that backs it, and loses 0.15 when at most one
//! source backs it at all. Global penalties are applied afterwards to every
//! field alike. Scores never leave `[0.1, 1.0]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FieldShape, SourceFlags};

pub const MIN_SCORE: f64 = 0.1;
pub const MAX_SCORE: f64 = 1.0;
pub const BASE_SCORE: f64 = 0.3;
pub const SHAPE_SHORTFALL: f64 = 0.1;
pub const SINGLE_SOURCE_PENALTY: f64 = 0.15;

pub const PRIMARY_SOURCE_BONUS: f64 = 0.3;
pub const VERIFIED_PROFILE_BONUS: f64 = 0.2;
pub const REVIEW_PLATFORM_BONUS: f64 = 0.2;
pub const LAUNCH_SITE_BONUS: f64 = 0.15;
pub const COMMUNITY_MENTION_BONUS: f64 = 0.1;
pub const WEB_SEARCH_BONUS: f64 = 0.1;

pub const FETCH_FAILURE_PENALTY: f64 = 0.15;
pub const INSUFFICIENT_QUERY_PENALTY: f64 = 0.05;
pub const CONTRADICTION_STEP: f64 = 0.1;
pub const CONTRADICTION_CAP: f64 = 0.3;
pub const CRITICAL_FLAG_PENALTY: f64 = 0.2;

/// Keys the validator itself writes into field payloads. They never count
/// as extracted content.
pub const ANNOTATION_KEYS: [&str; 2] = ["redaction_reason", "warning"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    High,
    #[default]
    Normal,
    Low,
}

impl Completeness {
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint.map(|h| h.trim().to_lowercase()).as_deref() {
            Some("high") => Completeness::High,
            Some("low") => Completeness::Low,
            _ => Completeness::Normal,
        }
    }

    fn adjustment(self) -> f64 {
        match self {
            Completeness::High => 0.05,
            Completeness::Normal => 0.0,
            Completeness::Low => -0.10,
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn clamp_score(value: f64) -> f64 {
    round2(value.clamp(MIN_SCORE, MAX_SCORE))
}

/// Whether a value carries any extracted content.
pub fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(_) | Value::Number(_) => true,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => items.iter().any(has_content),
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| !ANNOTATION_KEYS.contains(&k.as_str()) && has_content(v)),
    }
}

fn shape_shortfall(data: &Value, shape: &FieldShape) -> bool {
    match shape {
        FieldShape::List { min_items } => match data {
            Value::Array(items) => items.iter().filter(|v| has_content(v)).count() < *min_items,
            _ => true,
        },
        FieldShape::Object { required_keys } => match data {
            Value::Object(map) => required_keys
                .iter()
                .any(|k| map.get(*k).is_none_or(|v| !has_content(v))),
            _ => true,
        },
        FieldShape::Text => !matches!(data, Value::String(_)),
    }
}

fn source_bonus(sources: SourceFlags) -> f64 {
    [
        (sources.primary_source, PRIMARY_SOURCE_BONUS),
        (sources.verified_profile, VERIFIED_PROFILE_BONUS),
        (sources.review_platform, REVIEW_PLATFORM_BONUS),
        (sources.launch_site, LAUNCH_SITE_BONUS),
        (sources.community_mention, COMMUNITY_MENTION_BONUS),
        (sources.web_search, WEB_SEARCH_BONUS),
    ]
    .iter()
    .filter(|(present, _)| *present)
    .map(|(_, bonus)| bonus)
    .sum()
}

/// Confidence for one field before global penalties. `sources` must already
/// be narrowed to the source types relevant to the field.
pub fn score_field(
    data: &Value,
    shape: &FieldShape,
    sources: SourceFlags,
    completeness: Completeness,
) -> f64 {
    if !has_content(data) {
        return MIN_SCORE;
    }

    let mut score = BASE_SCORE;
    if shape_shortfall(data, shape) {
        score -= SHAPE_SHORTFALL;
    }
    score += source_bonus(sources);
    if sources.count() <= 1 {
        score -= SINGLE_SOURCE_PENALTY;
    }
    score += completeness.adjustment();
    clamp_score(score)
}

pub fn contradiction_penalty(contradictions: usize) -> f64 {
    (contradictions as f64 * CONTRADICTION_STEP).min(CONTRADICTION_CAP)
}

/// Report-wide deductions applied to every field after per-field scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GlobalPenalties {
    pub fetch_failed: bool,
    pub insufficient_sub_queries: usize,
    pub contradictions: usize,
    pub has_critical: bool,
}

impl GlobalPenalties {
    pub fn total(&self) -> f64 {
        let mut total = 0.0;
        if self.fetch_failed {
            total += FETCH_FAILURE_PENALTY;
        }
        total += self.insufficient_sub_queries as f64 * INSUFFICIENT_QUERY_PENALTY;
        total += contradiction_penalty(self.contradictions);
        if self.has_critical {
            total += CRITICAL_FLAG_PENALTY;
        }
        round2(total)
    }

    pub fn apply(&self, score: f64) -> f64 {
        clamp_score(score - self.total())
    }
}

/// Mean of the scores, rounded to two decimals and reclamped.
pub fn overall(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return MIN_SCORE;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    clamp_score(round2(mean))
}
