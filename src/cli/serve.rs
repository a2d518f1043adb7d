use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::ServeFlags;
use super::bootstrap::{build_engine, open_storage};
use crate::core::lifecycle::LifecycleManager;
use crate::core::terminal::{self, print_link, print_status, print_warn};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging::{self, LOG_CHANNEL_CAPACITY};

/// Run the scheduler and HTTP API until ctrl-c.
pub async fn run_serve(flags: ServeFlags) -> Result<()> {
    let mut storage = open_storage().await?;
    if let Some(host) = flags.host {
        storage.config.api.host = host;
    }
    if let Some(port) = flags.port {
        storage.config.api.port = port;
    }

    let (log_tx, _) = broadcast::channel::<String>(LOG_CHANNEL_CAPACITY);
    logging::init(&storage.config.log_level, log_tx.clone(), false);

    terminal::print_banner();
    print_status("Data", &storage.data_dir.display().to_string());
    if !storage.config.is_loopback() && !storage.store.has_any_api_tokens().await? {
        print_warn(
            "API bound to a non-loopback host with no tokens; every request will be refused.",
        );
    }

    let mut lifecycle = LifecycleManager::new().await?;
    let engine = build_engine(&storage, lifecycle.scheduler()).await?;
    lifecycle.attach(engine.clone());
    lifecycle.attach(Arc::new(ApiServer::new(ApiServerConfig {
        engine,
        log_tx,
        api_host: storage.config.api.host.clone(),
        api_port: storage.config.api.port,
    })));
    lifecycle.start().await?;

    print_link(
        "API",
        &format!(
            "http://{}:{}/api",
            storage.config.api.host, storage.config.api.port
        ),
    );
    info!("foreman is running. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await?;
    terminal::print_goodbye();
    Ok(())
}
