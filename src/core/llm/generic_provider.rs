use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::registry::{ApiFormat, AuthType, ProviderDef};
use super::{ChatMessage, GenerationRequest, GenerationResponse, ProviderKind, TextGenerator, Usage};
use crate::core::error::PipelineError;

const DEFAULT_MAX_TOKENS: u32 = 4096;

// ── OpenAI-compatible (also Perplexity) ──

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageOwned,
}

#[derive(Deserialize)]
struct OpenAiMessageOwned {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAiResponse {
    fn into_generation(self) -> GenerationResponse {
        GenerationResponse {
            text: self
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default(),
            usage: self
                .usage
                .map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                })
                .unwrap_or_default(),
            citations: self.citations,
        }
    }
}

// ── Anthropic messages ──

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl AnthropicResponse {
    fn into_generation(self) -> GenerationResponse {
        let text = self
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        GenerationResponse {
            text,
            usage: self
                .usage
                .map(|u| Usage {
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                })
                .unwrap_or_default(),
            citations: Vec::new(),
        }
    }
}

// ── Gemini generateContent ──

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(rename = "system_instruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResContent,
}

#[derive(Deserialize)]
struct GeminiResContent {
    #[serde(default)]
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
struct GeminiResPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GeminiResponse {
    fn into_generation(self) -> GenerationResponse {
        let text = self
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        GenerationResponse {
            text,
            usage: self
                .usage_metadata
                .map(|u| Usage {
                    input_tokens: u.prompt_token_count,
                    output_tokens: u.candidates_token_count,
                })
                .unwrap_or_default(),
            citations: Vec::new(),
        }
    }
}

/// Gemini requires strictly alternating roles; consecutive same-role turns
/// are merged.
fn gemini_contents(messages: &[ChatMessage]) -> Vec<GeminiContent> {
    let mut contents: Vec<GeminiContent> = Vec::new();
    for m in messages {
        let role = if m.role == "assistant" { "model" } else { "user" };
        if let Some(last) = contents.last_mut()
            && last.role == role
            && let Some(part) = last.parts.first_mut()
        {
            part.text.push('\n');
            part.text.push_str(&m.content);
            continue;
        }
        contents.push(GeminiContent {
            role: role.to_string(),
            parts: vec![GeminiPart {
                text: m.content.clone(),
            }],
        });
    }
    contents
}

/// One HTTP-backed provider, shaped by its registry definition.
pub struct HttpProvider {
    kind: ProviderKind,
    def: ProviderDef,
    api_key: String,
    client: Client,
}

impl HttpProvider {
    pub fn new(def: ProviderDef, api_key: String) -> Result<Self> {
        let kind = def
            .kind()
            .ok_or_else(|| anyhow!("unknown provider id '{}'", def.id))?;
        Ok(Self {
            kind,
            def,
            api_key,
            client: Client::new(),
        })
    }

    fn with_auth(&self, mut request: RequestBuilder) -> RequestBuilder {
        request = match self.def.auth.auth_type {
            AuthType::Bearer => request.header("Authorization", format!("Bearer {}", self.api_key)),
            AuthType::Header => request.header(
                self.def.auth.header_name.as_deref().unwrap_or("Authorization"),
                &self.api_key,
            ),
            AuthType::QueryParam => request,
        };
        for (name, value) in &self.def.extra_headers {
            request = request.header(name, value);
        }
        request
    }

    fn url(&self, model: &str) -> String {
        let base = self.def.base_url.replace("{model}", model);
        match self.def.auth.auth_type {
            AuthType::QueryParam => {
                let param = self.def.auth.param_name.as_deref().unwrap_or("key");
                format!("{}?{}={}", base, param, urlencoding::encode(&self.api_key))
            }
            _ => base,
        }
    }

    async fn send<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        model: &str,
        body: &T,
    ) -> Result<R> {
        let request = self.with_auth(self.client.post(self.url(model)).json(body));
        let res = request
            .send()
            .await
            .map_err(|e| PipelineError::TransientFetch(format!("{}: {}", self.def.name, e)))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(PipelineError::TransientFetch(format!(
                "{} API error {}: {}",
                self.def.name, status, body
            ))
            .into());
        }
        res.json::<R>().await.map_err(|e| {
            PipelineError::parse(format!("{} response", self.def.name), e.to_string()).into()
        })
    }

    async fn generate_openai(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(OpenAiMessage {
                role: "system",
                content: system,
            });
        }
        messages.extend(request.messages.iter().map(|m| OpenAiMessage {
            role: &m.role,
            content: &m.content,
        }));
        let body = OpenAiRequest {
            model: &request.model,
            messages,
            max_tokens: request.max_tokens,
        };
        let parsed: OpenAiResponse = self.send(&request.model, &body).await?;
        Ok(parsed.into_generation())
    }

    async fn generate_anthropic(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system.as_deref(),
            messages: request
                .messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
        };
        let parsed: AnthropicResponse = self.send(&request.model, &body).await?;
        Ok(parsed.into_generation())
    }

    async fn generate_gemini(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let body = GeminiRequest {
            system_instruction: request.system.as_ref().map(|s| GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text: s.clone() }],
            }),
            contents: gemini_contents(&request.messages),
            generation_config: request.max_tokens.map(|max_output_tokens| GeminiConfig {
                max_output_tokens,
            }),
        };
        let parsed: GeminiResponse = self.send(&request.model, &body).await?;
        Ok(parsed.into_generation())
    }
}

#[async_trait]
impl TextGenerator for HttpProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        // An empty model means "whatever this provider defaults to".
        let defaulted;
        let request = if request.model.trim().is_empty() {
            defaulted = GenerationRequest {
                model: self.def.default_model.clone(),
                ..request.clone()
            };
            &defaulted
        } else {
            request
        };
        match self.def.api_format {
            ApiFormat::Openai => self.generate_openai(request).await,
            ApiFormat::Anthropic => self.generate_anthropic(request).await,
            ApiFormat::Gemini => self.generate_gemini(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::registry::ProviderRegistry;

    #[test]
    fn perplexity_citations_are_kept() {
        let raw = r#"{
            "choices": [{"message": {"content": "Acme is a CI service."}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7},
            "citations": ["https://acme.dev", "https://www.g2.com/products/acme"]
        }"#;
        let parsed: OpenAiResponse = serde_json::from_str(raw).unwrap();
        let res = parsed.into_generation();
        assert_eq!(res.text, "Acme is a CI service.");
        assert_eq!(res.usage.output_tokens, 7);
        assert_eq!(res.citations.len(), 2);
    }

    #[test]
    fn anthropic_text_blocks_are_joined() {
        let raw = r#"{
            "content": [{"type": "text", "text": "Hello "}, {"type": "tool_use"}, {"type": "text", "text": "world"}],
            "usage": {"input_tokens": 3, "output_tokens": 2}
        }"#;
        let parsed: AnthropicResponse = serde_json::from_str(raw).unwrap();
        let res = parsed.into_generation();
        assert_eq!(res.text, "Hello world");
        assert_eq!(res.usage.input_tokens, 3);
    }

    #[test]
    fn gemini_empty_candidates_yield_empty_text() {
        let parsed: GeminiResponse = serde_json::from_str(r#"{"candidates": []}"#).unwrap();
        assert_eq!(parsed.into_generation().text, "");
    }

    #[test]
    fn gemini_merges_consecutive_roles() {
        let messages = vec![
            ChatMessage::user("a"),
            ChatMessage::user("b"),
            ChatMessage {
                role: "assistant".into(),
                content: "c".into(),
            },
        ];
        let contents = gemini_contents(&messages);
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].parts[0].text, "a\nb");
        assert_eq!(contents[1].role, "model");
    }

    #[test]
    fn gemini_key_goes_in_query_and_model_in_path() {
        let registry = ProviderRegistry::load().unwrap();
        let def = registry.get(ProviderKind::Gemini).unwrap().clone();
        let provider = HttpProvider::new(def, "k&1".into()).unwrap();
        let url = provider.url("gemini-2.0-flash");
        assert!(url.contains("/models/gemini-2.0-flash:generateContent"));
        assert!(url.ends_with("?key=k%261"));
    }

    #[test]
    fn openai_request_prepends_system() {
        let body = OpenAiRequest {
            model: "gpt",
            messages: vec![
                OpenAiMessage {
                    role: "system",
                    content: "s",
                },
                OpenAiMessage {
                    role: "user",
                    content: "u",
                },
            ],
            max_tokens: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert!(json.get("max_tokens").is_none());
    }
}
