pub mod generic_provider;
pub mod registry;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::core::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    Perplexity,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::Perplexity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Perplexity => "perplexity",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            "gemini" | "google" => Some(ProviderKind::Gemini),
            "perplexity" => Some(ProviderKind::Perplexity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Single-turn request: optional system prompt plus one user message.
    pub fn prompt(model: &str, system: Option<&str>, user: impl Into<String>) -> Self {
        Self {
            model: model.to_string(),
            system: system.map(str::to_string),
            messages: vec![ChatMessage::user(user)],
            max_tokens: None,
        }
    }

}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationResponse {
    pub text: String,
    pub usage: Usage,
    /// Source URLs, reported by grounded providers only.
    pub citations: Vec<String>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse>;
}

/// Registered providers, one per kind. There is no failover: a request names
/// its provider and fails if that provider is unavailable.
#[derive(Default)]
pub struct LlmManager {
    providers: HashMap<ProviderKind, Arc<dyn TextGenerator>>,
}

impl LlmManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&mut self, provider: Arc<dyn TextGenerator>) {
        info!("Registered LLM provider: {}", provider.kind().as_str());
        self.providers.insert(provider.kind(), provider);
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    pub fn list_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.providers.contains_key(k))
            .collect()
    }

    pub async fn generate(
        &self,
        kind: ProviderKind,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse> {
        let provider = self.providers.get(&kind).ok_or_else(|| {
            PipelineError::Configuration(format!("provider '{}' has no API key", kind.as_str()))
        })?;
        provider.generate(request).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses in order and records every request.
    pub struct ScriptedGenerator {
        kind: ProviderKind,
        replies: Mutex<VecDeque<Result<GenerationResponse, String>>>,
        pub requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        pub fn new(kind: ProviderKind) -> Self {
            Self {
                kind,
                replies: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn reply(self, text: &str) -> Self {
            self.reply_with_citations(text, &[])
        }

        pub fn reply_with_citations(self, text: &str, citations: &[&str]) -> Self {
            self.replies.lock().unwrap().push_back(Ok(GenerationResponse {
                text: text.to_string(),
                usage: Usage::default(),
                citations: citations.iter().map(|c| c.to_string()).collect(),
            }));
            self
        }

        pub fn fail(self, message: &str) -> Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(Err(message.to_string()));
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
            self.requests.lock().unwrap().push(request.clone());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(PipelineError::TransientFetch(message).into()),
                None => Err(PipelineError::TransientFetch("script exhausted".into()).into()),
            }
        }
    }
}
