use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::llm::{GenerationRequest, LlmManager, ProviderKind};

/// Sentinel the search model is told to emit when it cannot ground an answer.
pub const INSUFFICIENT_MARKER: &str = "INSUFFICIENT_EVIDENCE";

const SEARCH_SYSTEM_PROMPT: &str = "You are a research assistant. Answer only from sources you \
can cite. If the sources do not support an answer, reply with exactly INSUFFICIENT_EVIDENCE.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub text: String,
    pub citations: Vec<String>,
    pub insufficient: bool,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Whether credentials for the backing service are present.
    fn is_configured(&self) -> bool {
        true
    }

    async fn search(&self, query: &str) -> Result<SearchResponse>;
}

/// Web search answered by a citation-returning generation provider.
pub struct GroundedSearch {
    llm: Arc<LlmManager>,
    provider: ProviderKind,
    model: String,
}

impl GroundedSearch {
    pub fn new(llm: Arc<LlmManager>, model: impl Into<String>) -> Self {
        Self {
            llm,
            provider: ProviderKind::Perplexity,
            model: model.into(),
        }
    }
}

/// No grounding: the model said so, said nothing, or cited nothing.
pub fn is_insufficient(text: &str, citations: &[String]) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed.contains(INSUFFICIENT_MARKER) || citations.is_empty()
}

#[async_trait]
impl SearchProvider for GroundedSearch {
    fn is_configured(&self) -> bool {
        self.llm.has_provider(self.provider)
    }

    async fn search(&self, query: &str) -> Result<SearchResponse> {
        let request = GenerationRequest::prompt(&self.model, Some(SEARCH_SYSTEM_PROMPT), query);
        let response = self.llm.generate(self.provider, &request).await?;
        let insufficient = is_insufficient(&response.text, &response.citations);
        Ok(SearchResponse {
            text: response.text,
            citations: response.citations,
            insufficient,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::testing::ScriptedGenerator;

    fn manager(generator: ScriptedGenerator) -> Arc<LlmManager> {
        let mut manager = LlmManager::new();
        manager.register_provider(Arc::new(generator));
        Arc::new(manager)
    }

    #[tokio::test]
    async fn cited_answer_is_sufficient() {
        let llm = manager(
            ScriptedGenerator::new(ProviderKind::Perplexity)
                .reply_with_citations("Acme costs $10/mo.", &["https://acme.dev/pricing"]),
        );
        let search = GroundedSearch::new(llm, "sonar");
        assert!(search.is_configured());
        let res = search.search("acme pricing").await.unwrap();
        assert!(!res.insufficient);
        assert_eq!(res.citations, vec!["https://acme.dev/pricing"]);
    }

    #[tokio::test]
    async fn marker_or_missing_citations_are_insufficient() {
        let llm = manager(
            ScriptedGenerator::new(ProviderKind::Perplexity)
                .reply_with_citations("INSUFFICIENT_EVIDENCE", &["https://x.dev"])
                .reply("Acme is popular."),
        );
        let search = GroundedSearch::new(llm, "sonar");
        assert!(search.search("q1").await.unwrap().insufficient);
        assert!(search.search("q2").await.unwrap().insufficient);
    }

    #[tokio::test]
    async fn unconfigured_search_reports_it() {
        let search = GroundedSearch::new(Arc::new(LlmManager::new()), "sonar");
        assert!(!search.is_configured());
        assert!(search.search("q").await.is_err());
    }
}
