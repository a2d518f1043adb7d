use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::JobScheduler;
use tracing::{info, warn};

#[derive(Debug, PartialEq)]
pub enum LifecycleState {
    Created,
    Init,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait LifecycleComponent {
    async fn on_init(&self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Drives attached components through init, start and shutdown, and owns
/// the cron runtime that armed schedules live in.
pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<Arc<dyn LifecycleComponent + Send + Sync>>,
    scheduler: JobScheduler,
}

impl LifecycleManager {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            state: LifecycleState::Created,
            components: Vec::new(),
            scheduler,
        })
    }

    /// Handle to the cron runtime. Jobs added before `start` fire once it runs.
    pub fn scheduler(&self) -> JobScheduler {
        self.scheduler.clone()
    }

    pub fn attach(&mut self, component: Arc<dyn LifecycleComponent + Send + Sync>) {
        self.components.push(component);
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;
        for comp in &self.components {
            comp.on_init().await?;
        }

        for comp in &self.components {
            comp.on_start().await?;
        }

        info!("Lifecycle Phase: Ready (Starting Scheduler)");
        self.scheduler.start().await?;
        self.state = LifecycleState::Ready;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state == LifecycleState::Shutdown {
            return Ok(());
        }
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;

        for comp in &self.components {
            if let Err(e) = comp.on_shutdown().await {
                warn!("Component shutdown error: {}", e);
            }
        }
        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Scheduler shutdown error: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl LifecycleComponent for Recorder {
        async fn on_init(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:init", self.name));
            Ok(())
        }
        async fn on_start(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:start", self.name));
            Ok(())
        }
        async fn on_shutdown(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:shutdown", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn phases_run_in_order_for_every_component() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = LifecycleManager::new().await.unwrap();
        manager.attach(Arc::new(Recorder { name: "a", log: log.clone() }));
        manager.attach(Arc::new(Recorder { name: "b", log: log.clone() }));

        manager.start().await.unwrap();
        assert_eq!(manager.state, LifecycleState::Ready);
        manager.shutdown().await.unwrap();
        manager.shutdown().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:init", "b:init", "a:start", "b:start", "a:shutdown", "b:shutdown"]
        );
    }
}
