pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

use crate::core::engine::Engine;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::store::Store;

pub use router::build_api_router;

pub struct ApiServer {
    engine: Arc<Engine>,
    log_tx: broadcast::Sender<String>,
    api_host: String,
    api_port: u16,
}

pub struct ApiServerConfig {
    pub engine: Arc<Engine>,
    pub log_tx: broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) engine: Arc<Engine>,
    pub(crate) store: Arc<Store>,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) api_host: String,
    pub(crate) api_port: u16,
}

impl AppState {
    pub(crate) fn new(
        engine: Arc<Engine>,
        log_tx: broadcast::Sender<String>,
        api_host: String,
        api_port: u16,
    ) -> Self {
        Self {
            store: engine.store().clone(),
            engine,
            log_tx,
            api_host,
            api_port,
        }
    }

    pub(crate) fn is_loopback(&self) -> bool {
        matches!(self.api_host.as_str(), "127.0.0.1" | "::1" | "localhost")
    }
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            engine: config.engine,
            log_tx: config.log_tx,
            api_host: config.api_host,
            api_port: config.api_port,
        }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&self) -> Result<()> {
        info!("API server initializing...");
        Ok(())
    }

    async fn on_start(&self) -> Result<()> {
        let state = AppState::new(
            self.engine.clone(),
            self.log_tx.clone(),
            self.api_host.clone(),
            self.api_port,
        );
        let addr = format!("{}:{}", self.api_host, self.api_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("API server listening on http://{}", addr);

        tokio::spawn(async move {
            let app = build_api_router(state);
            if let Err(e) = axum::serve(listener, app).await {
                error!("API server stopped: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&self) -> Result<()> {
        info!("API server shutting down...");
        Ok(())
    }
}
