use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ProviderKind;

const PROVIDERS_JSON: &str = include_str!("providers.json");

/// Endpoint and credential layout for each supported provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRegistry {
    pub providers: Vec<ProviderDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDef {
    pub id: String,
    pub name: String,
    pub api_format: ApiFormat,
    pub base_url: String,
    pub auth: AuthConfig,
    pub default_model: String,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

impl ProviderDef {
    pub fn kind(&self) -> Option<ProviderKind> {
        ProviderKind::parse(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFormat {
    Openai,
    Anthropic,
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    #[serde(default)]
    pub param_name: Option<String>,
    /// Header carrying the raw key for `header` auth.
    #[serde(default)]
    pub header_name: Option<String>,
    pub vault_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Bearer,
    QueryParam,
    Header,
}

impl ProviderRegistry {
    pub fn load() -> Result<Self> {
        serde_json::from_str(PROVIDERS_JSON).context("bundled providers.json is invalid")
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderDef> {
        self.providers.iter().find(|p| p.kind() == Some(kind))
    }

    /// Replace base URLs with operator-configured endpoints, keyed by
    /// provider id.
    pub fn apply_overrides(&mut self, base_urls: &HashMap<String, String>) {
        for provider in &mut self.providers {
            if let Some(url) = base_urls.get(&provider.id) {
                provider.base_url = url.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_definition() {
        let registry = ProviderRegistry::load().unwrap();
        for kind in ProviderKind::ALL {
            let def = registry.get(kind).unwrap_or_else(|| panic!("{:?} missing", kind));
            assert!(!def.auth.vault_key.is_empty());
            assert!(!def.default_model.is_empty());
        }
        let perplexity = registry.get(ProviderKind::Perplexity).unwrap();
        assert_eq!(perplexity.api_format, ApiFormat::Openai);
        let gemini = registry.get(ProviderKind::Gemini).unwrap();
        assert!(gemini.base_url.contains("{model}"));
    }

    #[test]
    fn overrides_replace_base_url() {
        let mut registry = ProviderRegistry::load().unwrap();
        let overrides = HashMap::from([(
            "openai".to_string(),
            "http://127.0.0.1:9000/v1/chat/completions".to_string(),
        )]);
        registry.apply_overrides(&overrides);
        assert_eq!(
            registry.get(ProviderKind::OpenAi).unwrap().base_url,
            "http://127.0.0.1:9000/v1/chat/completions"
        );
    }
}
