use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_FILE: &str = "foreman.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,

    /// Directories scanned for automation manifests. Relative entries are
    /// resolved against the data directory; each root's name is the
    /// category part of the automation ids found beneath it.
    #[serde(default = "default_automation_roots")]
    pub automation_roots: Vec<String>,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Base URL overrides keyed by provider id (`openai`, `perplexity`, ...).
    #[serde(default)]
    pub provider_urls: HashMap<String, String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Where externally-hosted automations are triggered. Without a URL,
/// external automations fail at dispatch time.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub url: Option<String>,
    /// Vault key holding the bearer token sent with dispatch calls.
    #[serde(default = "default_dispatch_token_key")]
    pub token_vault_key: String,
}

fn default_automation_roots() -> Vec<String> {
    vec![
        "automations/workers".to_string(),
        "automations/agents".to_string(),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    17990
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("foreman/{}", env!("CARGO_PKG_VERSION"))
}

fn default_dispatch_token_key() -> String {
    "dispatch_token".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            automation_roots: default_automation_roots(),
            fetch: FetchConfig::default(),
            dispatch: DispatchConfig {
                url: None,
                token_vault_key: default_dispatch_token_key(),
            },
            provider_urls: HashMap::new(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join(CONFIG_FILE);
        if !config_path.exists() {
            info!("No {} found, using defaults.", CONFIG_FILE);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let mut config: AppConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", config_path.display(), e))?;

        config.automation_roots.retain(|r| !r.trim().is_empty());
        if config.automation_roots.is_empty() {
            config.automation_roots = default_automation_roots();
        }
        if config.fetch.timeout_secs == 0 {
            config.fetch.timeout_secs = default_fetch_timeout();
        }

        info!(
            "Loaded config: api={}:{}, roots={:?}, fetch_timeout={}s",
            config.api.host, config.api.port, config.automation_roots, config.fetch.timeout_secs
        );
        Ok(config)
    }

    pub fn resolve_roots(&self, data_dir: &Path) -> Vec<PathBuf> {
        self.automation_roots
            .iter()
            .map(|root| {
                let path = PathBuf::from(root);
                if path.is_absolute() {
                    path
                } else {
                    data_dir.join(path)
                }
            })
            .collect()
    }

    pub fn is_loopback(&self) -> bool {
        matches!(self.api.host.as_str(), "127.0.0.1" | "::1" | "localhost")
    }
}
