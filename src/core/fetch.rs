use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use crate::core::error::PipelineError;

/// Bytes read from a page before parsing stops. Title, meta tags and the
/// navigation links all live well inside this.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Lightweight facts about a page. Nothing beyond these is extracted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub has_pricing_link: bool,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PageMetadata>;
}

/// Absolute http(s) URL with a host; anything else is refused up front.
pub fn is_fetchable(url: &str) -> bool {
    url::Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<PageMetadata> {
        let parsed = url::Url::parse(url)
            .map_err(|e| PipelineError::TransientFetch(format!("invalid url '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(
                PipelineError::TransientFetch(format!("unsupported scheme in '{}'", url)).into(),
            );
        }

        let res = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| PipelineError::TransientFetch(format!("fetch {}: {}", url, e)))?;
        if !res.status().is_success() {
            return Err(PipelineError::TransientFetch(format!(
                "fetch {} returned {}",
                url,
                res.status()
            ))
            .into());
        }
        let body = read_capped(res, MAX_BODY_BYTES)
            .await
            .map_err(|e| PipelineError::TransientFetch(format!("read {}: {}", url, e)))?;
        debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(parse_page_metadata(&String::from_utf8_lossy(&body)))
    }
}

async fn read_capped(mut res: Response, limit: usize) -> reqwest::Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = res.chunk().await? {
        let room = limit - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex"));
static META_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("meta regex"));
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z:\-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attr regex")
});
static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).expect("anchor regex")
});

fn attributes(tag: &str) -> Vec<(String, String)> {
    ATTR_RE
        .captures_iter(tag)
        .map(|c| {
            let name = c[1].to_lowercase();
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (name, value)
        })
        .collect()
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

pub fn parse_page_metadata(html: &str) -> PageMetadata {
    let title = TITLE_RE
        .captures(html)
        .and_then(|c| non_empty(decode_entities(&c[1])));

    let mut description = None;
    let mut og_description = None;
    for tag in META_RE.find_iter(html) {
        let attrs = attributes(tag.as_str());
        let key = attrs
            .iter()
            .find(|(n, _)| n == "name" || n == "property")
            .map(|(_, v)| v.to_lowercase());
        let content = attrs
            .iter()
            .find(|(n, _)| n == "content")
            .map(|(_, v)| decode_entities(v));
        match (key.as_deref(), content) {
            (Some("description"), Some(c)) if description.is_none() => description = non_empty(c),
            (Some("og:description"), Some(c)) if og_description.is_none() => {
                og_description = non_empty(c)
            }
            _ => {}
        }
    }

    let has_pricing_link = ANCHOR_RE.captures_iter(html).any(|c| {
        let href = c[1].to_lowercase();
        let text = c[2].to_lowercase();
        ["pricing", "plans"]
            .iter()
            .any(|needle| href.contains(needle) || text.contains(needle))
    });

    PageMetadata {
        title,
        description: description.or(og_description),
        has_pricing_link,
    }
}
