use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::core::error::PipelineError;
use crate::core::registry::AutomationDescriptor;

/// Body posted to the external runtime. `callback` is the path the runtime
/// uses to report progress back as steps of this execution.
#[derive(Debug, Serialize)]
pub struct DispatchPayload<'a> {
    pub automation_id: &'a str,
    pub kind: &'a str,
    pub execution_id: &'a str,
    pub callback: String,
}

impl<'a> DispatchPayload<'a> {
    pub fn new(descriptor: &'a AutomationDescriptor, execution_id: &'a str) -> Self {
        Self {
            automation_id: &descriptor.id,
            kind: descriptor.kind.as_str(),
            execution_id,
            callback: format!("/api/executions/{}/steps", execution_id),
        }
    }
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Fire a one-shot trigger. Success means the runtime accepted it, not
    /// that the remote run succeeded.
    async fn dispatch(&self, descriptor: &AutomationDescriptor, execution_id: &str) -> Result<()>;
}

pub struct HttpDispatcher {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpDispatcher {
    pub fn new(url: String, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
            token,
        }
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, descriptor: &AutomationDescriptor, execution_id: &str) -> Result<()> {
        let payload = DispatchPayload::new(descriptor, execution_id);
        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let res = request
            .send()
            .await
            .map_err(|e| {
                PipelineError::TransientFetch(format!("dispatch {}: {}", descriptor.id, e))
            })?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(PipelineError::TransientFetch(format!(
                "dispatch {} rejected with {}: {}",
                descriptor.id, status, body
            ))
            .into());
        }
        info!("Dispatched {} as execution {}", descriptor.id, execution_id);
        Ok(())
    }
}
