use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ExtractedFields, Redaction, domain_of, is_review_domain};

/// Industries whose vocabulary in a feature list almost always means the
/// extraction drifted onto a different product.
const OFF_TOPIC_TERMS: &[&str] = &[
    "casino",
    "sports betting",
    "gambling",
    "payday loan",
    "mortgage",
    "real estate listing",
    "online pharmacy",
    "cannabis",
    "firearms",
    "dating site",
    "forex trading",
    "escort",
];

/// Below this share of review citations on known review platforms, numeric
/// ratings cannot be traced to a platform.
pub const REVIEW_SHARE_THRESHOLD: f64 = 0.3;
/// Contradiction or insufficient sub-query count at which the flag turns critical.
pub const CRITICAL_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    WrongProduct,
    UnverifiedRatings,
    Contradictions,
    InsufficientCoverage,
    QualityGateFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationFlag {
    #[serde(rename = "type")]
    pub kind: FlagKind,
    pub detail: String,
    pub severity: Severity,
}

impl HallucinationFlag {
    fn new(kind: FlagKind, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            severity,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Evidence the detector needs beyond the extracted fields themselves.
#[derive(Debug, Clone, Default)]
pub struct DetectionContext<'a> {
    pub primary_description: &'a str,
    pub reviews_insufficient: bool,
    pub fetch_failed: bool,
    pub review_citations: &'a [String],
    pub contradictions: &'a [String],
    pub insufficient_sub_queries: usize,
    pub quality_gate_passed: bool,
}

fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(&s.to_lowercase());
            out.push(' ');
        }
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
        _ => {}
    }
}

fn has_numeric(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::Array(items) => items.iter().any(has_numeric),
        Value::Object(map) => map.values().any(has_numeric),
        _ => false,
    }
}

/// Fraction of citations whose host is a recognised review platform.
pub fn review_platform_share(citations: &[String]) -> f64 {
    if citations.is_empty() {
        return 0.0;
    }
    let hits = citations
        .iter()
        .filter_map(|c| domain_of(c))
        .filter(|d| is_review_domain(d))
        .count();
    hits as f64 / citations.len() as f64
}

fn off_topic_terms(features: &Value, description: &str) -> Vec<&'static str> {
    let description = description.to_lowercase();
    let mut text = String::new();
    collect_text(features, &mut text);
    OFF_TOPIC_TERMS
        .iter()
        .copied()
        .filter(|term| text.contains(term) && !description.contains(term))
        .collect()
}

fn count_severity(count: usize) -> Severity {
    if count >= CRITICAL_COUNT {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

pub fn detect(fields: &ExtractedFields, ctx: &DetectionContext<'_>) -> Vec<HallucinationFlag> {
    let mut flags = Vec::new();

    let terms = off_topic_terms(&fields.features, ctx.primary_description);
    if !terms.is_empty() {
        flags.push(HallucinationFlag::new(
            FlagKind::WrongProduct,
            Severity::Critical,
            format!(
                "features mention {} which the product site never does",
                terms.join(", ")
            ),
        ));
    }

    if has_numeric(&fields.ratings) {
        let share = review_platform_share(ctx.review_citations);
        if ctx.reviews_insufficient {
            flags.push(HallucinationFlag::new(
                FlagKind::UnverifiedRatings,
                Severity::Critical,
                "ratings extracted although review search found insufficient evidence",
            ));
        } else if ctx.fetch_failed && share < REVIEW_SHARE_THRESHOLD {
            flags.push(HallucinationFlag::new(
                FlagKind::UnverifiedRatings,
                Severity::Critical,
                format!(
                    "ratings extracted without a product page and only {:.0}% review-platform citations",
                    share * 100.0
                ),
            ));
        }
    }

    let contradictions = ctx.contradictions.len();
    if contradictions > 0 {
        flags.push(HallucinationFlag::new(
            FlagKind::Contradictions,
            count_severity(contradictions),
            format!("{} contradictions between sources", contradictions),
        ));
    }

    if ctx.insufficient_sub_queries > 0 {
        flags.push(HallucinationFlag::new(
            FlagKind::InsufficientCoverage,
            count_severity(ctx.insufficient_sub_queries),
            format!(
                "{} of 6 research queries returned insufficient evidence",
                ctx.insufficient_sub_queries
            ),
        ));
    }

    if !ctx.quality_gate_passed {
        flags.push(HallucinationFlag::new(
            FlagKind::QualityGateFailed,
            Severity::Critical,
            "research did not pass its quality gate",
        ));
    }

    flags
}

/// Neutralise the data behind critical flags. Ratings are nulled field by
/// field; sentiment is annotated, never removed.
pub fn apply_fixes(flags: &[HallucinationFlag], fields: &mut ExtractedFields) -> Vec<Redaction> {
    let mut redactions = Vec::new();
    for flag in flags {
        match flag.kind {
            FlagKind::UnverifiedRatings => {
                let mut nulled = match std::mem::take(&mut fields.ratings) {
                    Value::Object(map) => map
                        .into_iter()
                        .map(|(k, _)| (k, Value::Null))
                        .collect::<Map<String, Value>>(),
                    _ => Map::new(),
                };
                nulled.insert("redaction_reason".into(), Value::String(flag.detail.clone()));
                fields.ratings = Value::Object(nulled);
                redactions.push(Redaction {
                    field: "ratings".into(),
                    reason: flag.detail.clone(),
                });
            }
            FlagKind::WrongProduct => {
                let warning = Value::String(flag.detail.clone());
                match &mut fields.sentiment {
                    Value::Object(map) => {
                        map.insert("warning".into(), warning);
                    }
                    other => {
                        let data = std::mem::take(other);
                        let mut map = Map::new();
                        map.insert("data".into(), data);
                        map.insert("warning".into(), warning);
                        *other = Value::Object(map);
                    }
                }
                redactions.push(Redaction {
                    field: "sentiment".into(),
                    reason: flag.detail.clone(),
                });
            }
            _ => {}
        }
    }
    redactions
}
