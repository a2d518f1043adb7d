use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::fetch::PageMetadata;
use crate::core::search::SearchResponse;

/// Sufficient sub-queries that stand in for a failed product page fetch.
pub const MIN_SUFFICIENT_QUERIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubQuery {
    Overview,
    Features,
    Pricing,
    Reviews,
    Community,
    Company,
}

impl SubQuery {
    pub const ALL: [SubQuery; 6] = [
        SubQuery::Overview,
        SubQuery::Features,
        SubQuery::Pricing,
        SubQuery::Reviews,
        SubQuery::Community,
        SubQuery::Company,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubQuery::Overview => "overview",
            SubQuery::Features => "features",
            SubQuery::Pricing => "pricing",
            SubQuery::Reviews => "reviews",
            SubQuery::Community => "community",
            SubQuery::Company => "company",
        }
    }

    pub fn query(self, name: &str, website: &str) -> String {
        match self {
            SubQuery::Overview => format!(
                "What is {} ({})? Describe what the product does and who it is for.",
                name, website
            ),
            SubQuery::Features => format!(
                "List the main product features of {} ({}).",
                name, website
            ),
            SubQuery::Pricing => format!(
                "What are the current pricing plans and tiers for {} ({})?",
                name, website
            ),
            SubQuery::Reviews => format!(
                "Summarize user reviews and ratings of {} on G2, Capterra, TrustRadius or similar sites.",
                name
            ),
            SubQuery::Community => format!(
                "What do developers and users say about {} on Reddit, Hacker News or Product Hunt?",
                name
            ),
            SubQuery::Company => format!(
                "Which organization is behind {} ({})? Include founding year, headquarters and funding.",
                name, website
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQueryResult {
    pub kind: SubQuery,
    pub query: String,
    pub text: String,
    #[serde(default)]
    pub citations: Vec<String>,
    pub insufficient: bool,
}

impl SubQueryResult {
    pub fn new(kind: SubQuery, query: String, response: SearchResponse) -> Self {
        Self {
            kind,
            query,
            text: response.text,
            citations: response.citations,
            insufficient: response.insufficient,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub primary_category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub short_description: Option<String>,
}

impl Classification {
    pub fn has_category(&self) -> bool {
        self.primary_category
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }
}

/// Everything research learned about one tool, stored as the tool's
/// research JSON and read back by the analyst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchEvidence {
    pub website_fetch: Option<PageMetadata>,
    #[serde(default)]
    pub fetch_error: Option<String>,
    pub sub_queries: Vec<SubQueryResult>,
    #[serde(default)]
    pub classification: Classification,
    pub quality_gate_passed: bool,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub contradictions: Vec<String>,
    pub collected_at: DateTime<Utc>,
}

impl ResearchEvidence {
    pub fn fetch_failed(&self) -> bool {
        self.website_fetch.is_none()
    }

    pub fn sub_query(&self, kind: SubQuery) -> Option<&SubQueryResult> {
        self.sub_queries.iter().find(|r| r.kind == kind)
    }

    /// Sub-queries that came back insufficient. A sub-query that never ran
    /// counts as insufficient.
    pub fn insufficient_count(&self) -> usize {
        SubQuery::ALL
            .iter()
            .filter(|kind| self.sub_query(**kind).is_none_or(|r| r.insufficient))
            .count()
    }

    pub fn sufficient_count(&self) -> usize {
        SubQuery::ALL.len() - self.insufficient_count()
    }

    /// Category present and either the product page or enough independent
    /// search answers to stand in for it.
    pub fn passes_quality_gate(&self) -> bool {
        self.classification.has_category()
            && (!self.fetch_failed() || self.sufficient_count() >= MIN_SUFFICIENT_QUERIES)
    }

    /// Citations across all sub-queries, first occurrence kept.
    pub fn all_citations(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.sub_queries
            .iter()
            .flat_map(|r| r.citations.iter())
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }

    /// Plain-text rendering for generation prompts. Insufficient answers are
    /// labelled as such rather than dropped.
    pub fn digest(&self, name: &str, website: &str) -> String {
        let mut out = format!("Tool: {}\nWebsite: {}\n", name, website);
        match &self.website_fetch {
            Some(page) => {
                if let Some(title) = &page.title {
                    out.push_str(&format!("Page title: {}\n", title));
                }
                if let Some(description) = &page.description {
                    out.push_str(&format!("Page description: {}\n", description));
                }
                out.push_str(&format!("Pricing page linked: {}\n", page.has_pricing_link));
            }
            None => out.push_str("Product page could not be fetched.\n"),
        }
        for result in &self.sub_queries {
            out.push_str(&format!("\n## {}\n", result.kind.as_str()));
            if result.insufficient {
                out.push_str("(insufficient evidence)\n");
            } else {
                out.push_str(result.text.trim());
                out.push('\n');
                for citation in &result.citations {
                    out.push_str(&format!("- source: {}\n", citation));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(kind: SubQuery, insufficient: bool, citations: &[&str]) -> SubQueryResult {
        SubQueryResult {
            kind,
            query: kind.query("Acme", "https://acme.dev"),
            text: if insufficient { String::new() } else { format!("{} answer", kind.as_str()) },
            citations: citations.iter().map(|c| c.to_string()).collect(),
            insufficient,
        }
    }

    fn evidence(fetched: bool, sufficient: usize, category: Option<&str>) -> ResearchEvidence {
        ResearchEvidence {
            website_fetch: fetched.then(PageMetadata::default),
            fetch_error: (!fetched).then(|| "timed out".to_string()),
            sub_queries: SubQuery::ALL
                .iter()
                .enumerate()
                .map(|(i, kind)| result(*kind, i >= sufficient, &["https://example.com/a"]))
                .collect(),
            classification: Classification {
                primary_category: category.map(str::to_string),
                ..Default::default()
            },
            quality_gate_passed: false,
            gaps: Vec::new(),
            contradictions: Vec::new(),
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn quality_gate_needs_category_and_some_grounding() {
        assert!(evidence(true, 0, Some("devtools")).passes_quality_gate());
        assert!(evidence(false, 3, Some("devtools")).passes_quality_gate());
        assert!(!evidence(false, 2, Some("devtools")).passes_quality_gate());
        assert!(!evidence(true, 6, None).passes_quality_gate());
        assert!(!evidence(true, 6, Some("  ")).passes_quality_gate());
    }

    #[test]
    fn missing_sub_queries_count_as_insufficient() {
        let mut e = evidence(true, 6, Some("x"));
        e.sub_queries.truncate(4);
        assert_eq!(e.insufficient_count(), 2);
        assert_eq!(e.sufficient_count(), 4);
    }

    #[test]
    fn citations_are_deduplicated_in_order() {
        let mut e = evidence(true, 6, Some("x"));
        e.sub_queries[1].citations.push("https://www.g2.com/acme".into());
        assert_eq!(
            e.all_citations(),
            vec!["https://example.com/a", "https://www.g2.com/acme"]
        );
    }

    #[test]
    fn digest_marks_insufficient_answers() {
        let e = evidence(false, 1, Some("x"));
        let digest = e.digest("Acme", "https://acme.dev");
        assert!(digest.contains("could not be fetched"));
        assert!(digest.contains("overview answer"));
        assert_eq!(digest.matches("(insufficient evidence)").count(), 5);
    }

    #[test]
    fn evidence_survives_json() {
        let e = evidence(true, 4, Some("devtools"));
        let value = serde_json::to_value(&e).unwrap();
        assert_eq!(value["sub_queries"][0]["kind"], "overview");
        let back: ResearchEvidence = serde_json::from_value(value).unwrap();
        assert_eq!(back, e);
    }
}
