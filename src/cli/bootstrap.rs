use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::JobScheduler;
use tracing::{info, warn};

use crate::core::config::AppConfig;
use crate::core::dispatch::{Dispatcher, HttpDispatcher};
use crate::core::engine::Engine;
use crate::core::executor::Executor;
use crate::core::fetch::HttpPageFetcher;
use crate::core::llm::generic_provider::HttpProvider;
use crate::core::llm::registry::ProviderRegistry;
use crate::core::llm::{LlmManager, ProviderKind};
use crate::core::registry::{HandlerTable, seed_builtin_automations};
use crate::core::scheduler::AutomationScheduler;
use crate::core::search::GroundedSearch;
use crate::core::store::Store;
use crate::core::vault::SecretsVault;
use crate::pipeline::StageDeps;
use crate::pipeline::analyst::AnalystWorker;
use crate::pipeline::research::ResearchWorker;
use crate::pipeline::writer::WriterWorker;
use crate::platform::{NativePlatform, Platform};

/// Store and vault, enough for commands that never run an automation.
pub(crate) struct Storage {
    pub data_dir: PathBuf,
    pub config: AppConfig,
    pub store: Arc<Store>,
    pub vault: Arc<SecretsVault>,
}

pub(crate) async fn open_storage() -> Result<Storage> {
    let data_dir = NativePlatform::data_dir();
    let config = AppConfig::load(&data_dir).await?;
    let store = Arc::new(Store::open(&data_dir).await?);
    let vault = Arc::new(SecretsVault::new(store.get_db())?);
    vault.initialize().await?;
    Ok(Storage {
        data_dir,
        config,
        store,
        vault,
    })
}

/// One HTTP provider per vault key that is set. Missing keys are not an
/// error here; stage prechecks report them when a run needs them.
async fn build_llm(config: &AppConfig, vault: &SecretsVault) -> Result<LlmManager> {
    let mut registry = ProviderRegistry::load()?;
    registry.apply_overrides(&config.provider_urls);

    let mut llm = LlmManager::new();
    for kind in ProviderKind::ALL {
        let Some(def) = registry.get(kind) else {
            continue;
        };
        match vault.get_secret(&def.auth.vault_key).await? {
            Some(key) if !key.trim().is_empty() => {
                llm.register_provider(Arc::new(HttpProvider::new(def.clone(), key)?));
            }
            _ => info!("{} not configured (no {})", def.name, def.auth.vault_key),
        }
    }
    info!("Generation providers ready: {:?}", llm.list_providers());
    Ok(llm)
}

async fn build_dispatcher(
    config: &AppConfig,
    vault: &SecretsVault,
) -> Result<Option<Arc<dyn Dispatcher>>> {
    let Some(url) = config.dispatch.url.clone().filter(|u| !u.trim().is_empty()) else {
        return Ok(None);
    };
    let token = vault.get_secret(&config.dispatch.token_vault_key).await?;
    if token.is_none() {
        warn!(
            "Dispatch URL set but vault key '{}' is empty; dispatching without a token",
            config.dispatch.token_vault_key
        );
    }
    Ok(Some(Arc::new(HttpDispatcher::new(url, token))))
}

/// Every automation compiled into this build, keyed by manifest `handler`.
pub(crate) fn builtin_handlers(deps: StageDeps) -> HandlerTable {
    let mut handlers = HandlerTable::new();
    handlers.register("research", Arc::new(ResearchWorker::new(deps.clone())));
    handlers.register("analyst", Arc::new(AnalystWorker::new(deps.clone())));
    handlers.register("writer", Arc::new(WriterWorker::new(deps)));
    handlers
}

/// Wire the engine. Schedules are armed on `scheduler`, which only fires
/// once the caller starts it.
pub(crate) async fn build_engine(
    storage: &Storage,
    scheduler: JobScheduler,
) -> Result<Arc<Engine>> {
    seed_builtin_automations(&storage.data_dir).await?;

    let llm = Arc::new(build_llm(&storage.config, &storage.vault).await?);
    let search_model = storage.store.get_setting_or("search_model", None, "").await?;
    let deps = StageDeps {
        store: storage.store.clone(),
        llm: llm.clone(),
        search: Arc::new(GroundedSearch::new(llm, search_model)),
        fetcher: Arc::new(HttpPageFetcher::new(
            Duration::from_secs(storage.config.fetch.timeout_secs),
            &storage.config.fetch.user_agent,
        )?),
    };

    let dispatcher = build_dispatcher(&storage.config, &storage.vault).await?;
    let executor = Arc::new(Executor::new(
        storage.store.clone(),
        builtin_handlers(deps),
        dispatcher,
    ));
    let roots = roots(&storage.config, &storage.data_dir);
    Ok(Arc::new(Engine::new(
        storage.store.clone(),
        executor,
        AutomationScheduler::new(scheduler),
        roots,
    )))
}

fn roots(config: &AppConfig, data_dir: &Path) -> Vec<PathBuf> {
    let roots = config.resolve_roots(data_dir);
    info!("Automation roots: {:?}", roots);
    roots
}
