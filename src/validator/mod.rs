//! Confidence scoring and hallucination checks for analyst output.
//!
//! `validate` runs the detectors over the extracted fields, neutralises what
//! the critical flags point at, then scores every field against the sources
//! that could corroborate it. The resulting [`ConfidenceReport`] decides
//! whether a tool moves on to the writer or waits for a human.

pub mod hallucination;
pub mod scoring;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

pub use hallucination::{FlagKind, HallucinationFlag, Severity};
pub use scoring::Completeness;

use hallucination::DetectionContext;
use scoring::{GlobalPenalties, has_content, score_field};

/// Overall confidence below this sends a tool to review.
pub const REVIEW_THRESHOLD: f64 = 0.30;
/// Fields scoring below this are listed as research gaps.
pub const GAP_THRESHOLD: f64 = 0.5;

const REVIEW_DOMAINS: &[&str] = &[
    "g2.com",
    "capterra.com",
    "trustradius.com",
    "trustpilot.com",
    "getapp.com",
    "softwareadvice.com",
    "gartner.com",
];
const VERIFIED_PROFILE_DOMAINS: &[&str] = &[
    "crunchbase.com",
    "linkedin.com",
    "github.com",
    "wikipedia.org",
    "pitchbook.com",
];
const LAUNCH_DOMAINS: &[&str] = &[
    "producthunt.com",
    "news.ycombinator.com",
    "betalist.com",
    "indiehackers.com",
];
const COMMUNITY_DOMAINS: &[&str] = &[
    "reddit.com",
    "twitter.com",
    "x.com",
    "stackoverflow.com",
    "dev.to",
    "medium.com",
    "youtube.com",
    "quora.com",
];

/// Lowercased host of a URL without a leading `www.`.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

fn matches_any(host: &str, domains: &[&str]) -> bool {
    domains
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

pub fn is_review_domain(host: &str) -> bool {
    matches_any(host, REVIEW_DOMAINS)
}

/// Independent source types that can back an extracted field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFlags {
    pub primary_source: bool,
    pub verified_profile: bool,
    pub review_platform: bool,
    pub launch_site: bool,
    pub community_mention: bool,
    pub web_search: bool,
}

impl SourceFlags {
    /// Classify citation domains. `primary_source` is whether the product's
    /// own page was fetched.
    pub fn from_citations(primary_source: bool, citations: &[String]) -> Self {
        let hosts: Vec<String> = citations.iter().filter_map(|c| domain_of(c)).collect();
        let any = |domains: &[&str]| hosts.iter().any(|h| matches_any(h, domains));
        Self {
            primary_source,
            verified_profile: any(VERIFIED_PROFILE_DOMAINS),
            review_platform: any(REVIEW_DOMAINS),
            launch_site: any(LAUNCH_DOMAINS),
            community_mention: any(COMMUNITY_DOMAINS),
            web_search: !hosts.is_empty(),
        }
    }

    pub fn count(&self) -> usize {
        [
            self.primary_source,
            self.verified_profile,
            self.review_platform,
            self.launch_site,
            self.community_mention,
            self.web_search,
        ]
        .iter()
        .filter(|f| **f)
        .count()
    }
}

/// Minimum structure a field must have to avoid the shortfall deduction.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldShape {
    List { min_items: usize },
    Object { required_keys: &'static [&'static str] },
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Features,
    Pricing,
    Sentiment,
    Competitors,
    Company,
    Ratings,
    Classification,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Features,
        Field::Pricing,
        Field::Sentiment,
        Field::Competitors,
        Field::Company,
        Field::Ratings,
        Field::Classification,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Features => "features",
            Field::Pricing => "pricing",
            Field::Sentiment => "sentiment",
            Field::Competitors => "competitors",
            Field::Company => "company",
            Field::Ratings => "ratings",
            Field::Classification => "classification",
        }
    }

    pub fn shape(self) -> FieldShape {
        match self {
            Field::Features => FieldShape::List { min_items: 3 },
            Field::Pricing => FieldShape::Object {
                required_keys: &["model", "tiers"],
            },
            Field::Sentiment => FieldShape::Object {
                required_keys: &["overall", "pros", "cons"],
            },
            Field::Competitors => FieldShape::List { min_items: 2 },
            Field::Company => FieldShape::Object {
                required_keys: &["name", "founded"],
            },
            Field::Ratings => FieldShape::Object { required_keys: &[] },
            Field::Classification => FieldShape::Object {
                required_keys: &["primary_category"],
            },
        }
    }

    /// Keep only the source types that can speak to this field. The product
    /// page only counts for pricing when it links to a pricing page.
    pub fn sources(self, all: SourceFlags, has_pricing_link: bool) -> SourceFlags {
        let none = SourceFlags::default();
        match self {
            Field::Features => SourceFlags {
                primary_source: all.primary_source,
                verified_profile: all.verified_profile,
                launch_site: all.launch_site,
                web_search: all.web_search,
                ..none
            },
            Field::Pricing => SourceFlags {
                primary_source: all.primary_source && has_pricing_link,
                review_platform: all.review_platform,
                web_search: all.web_search,
                ..none
            },
            Field::Sentiment => SourceFlags {
                review_platform: all.review_platform,
                community_mention: all.community_mention,
                launch_site: all.launch_site,
                web_search: all.web_search,
                ..none
            },
            Field::Competitors => SourceFlags {
                primary_source: all.primary_source,
                verified_profile: all.verified_profile,
                community_mention: all.community_mention,
                web_search: all.web_search,
                ..none
            },
            Field::Company => SourceFlags {
                primary_source: all.primary_source,
                verified_profile: all.verified_profile,
                web_search: all.web_search,
                ..none
            },
            Field::Ratings => SourceFlags {
                review_platform: all.review_platform,
                launch_site: all.launch_site,
                web_search: all.web_search,
                ..none
            },
            Field::Classification => SourceFlags {
                primary_source: all.primary_source,
                launch_site: all.launch_site,
                web_search: all.web_search,
                ..none
            },
        }
    }
}

/// Analyst output under validation. Fixes are applied in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub features: Value,
    pub pricing: Value,
    pub sentiment: Value,
    pub ratings: Value,
    pub competitors: Value,
    pub company: Value,
    pub classification: Value,
}

impl ExtractedFields {
    pub fn get(&self, field: Field) -> &Value {
        match field {
            Field::Features => &self.features,
            Field::Pricing => &self.pricing,
            Field::Sentiment => &self.sentiment,
            Field::Competitors => &self.competitors,
            Field::Company => &self.company,
            Field::Ratings => &self.ratings,
            Field::Classification => &self.classification,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redaction {
    pub field: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationInput {
    pub sources: SourceFlags,
    pub has_pricing_link: bool,
    pub fetch_failed: bool,
    pub primary_description: String,
    pub reviews_insufficient: bool,
    pub review_citations: Vec<String>,
    pub insufficient_sub_queries: usize,
    pub contradictions: Vec<String>,
    pub consolidation_gaps: Vec<String>,
    pub quality_gate_passed: bool,
    pub completeness: HashMap<Field, Completeness>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceReport {
    pub fields: BTreeMap<String, f64>,
    pub overall: f64,
    pub penalty: f64,
    pub has_critical: bool,
    pub flags: Vec<HallucinationFlag>,
    pub redactions: Vec<Redaction>,
    #[serde(skip)]
    pub gaps: Vec<String>,
}

impl ConfidenceReport {
    pub fn needs_review(&self) -> bool {
        self.overall < REVIEW_THRESHOLD
    }
}

fn gap_reason(field: Field, data: &Value, sources: SourceFlags, score: f64) -> String {
    if !has_content(data) {
        format!("{}: nothing could be extracted", field.name())
    } else if sources.count() <= 1 {
        format!("{}: backed by at most one source ({:.2})", field.name(), score)
    } else {
        format!("{}: weak corroboration ({:.2})", field.name(), score)
    }
}

fn dedup_in_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

pub fn validate(input: &ValidationInput, fields: &mut ExtractedFields) -> ConfidenceReport {
    let ctx = DetectionContext {
        primary_description: &input.primary_description,
        reviews_insufficient: input.reviews_insufficient,
        fetch_failed: input.fetch_failed,
        review_citations: &input.review_citations,
        contradictions: &input.contradictions,
        insufficient_sub_queries: input.insufficient_sub_queries,
        quality_gate_passed: input.quality_gate_passed,
    };
    let flags = hallucination::detect(fields, &ctx);
    let redactions = hallucination::apply_fixes(&flags, fields);
    let has_critical = flags.iter().any(HallucinationFlag::is_critical);

    let penalties = GlobalPenalties {
        fetch_failed: input.fetch_failed,
        insufficient_sub_queries: input.insufficient_sub_queries,
        contradictions: input.contradictions.len(),
        has_critical,
    };

    let mut scores = BTreeMap::new();
    let mut ordered = Vec::with_capacity(Field::ALL.len());
    let mut gaps = Vec::new();
    for field in Field::ALL {
        let data = fields.get(field);
        let sources = field.sources(input.sources, input.has_pricing_link);
        let completeness = input.completeness.get(&field).copied().unwrap_or_default();
        let score = penalties.apply(score_field(data, &field.shape(), sources, completeness));
        if score < GAP_THRESHOLD {
            gaps.push(gap_reason(field, data, sources, score));
        }
        ordered.push(score);
        scores.insert(field.name().to_string(), score);
    }

    gaps.extend(input.consolidation_gaps.iter().cloned());
    gaps.extend(flags.iter().map(|f| f.detail.clone()));

    ConfidenceReport {
        fields: scores,
        overall: scoring::overall(&ordered),
        penalty: penalties.total(),
        has_critical,
        flags,
        redactions,
        gaps: dedup_in_order(gaps),
    }
}
