use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::executor::{Executor, Trigger};
use crate::core::registry::{AutomationDescriptor, RuntimeTarget};

/// Cron jobs for schedule-bearing automations. Every call to
/// [`AutomationScheduler::schedule`] replaces the whole armed set.
pub struct AutomationScheduler {
    scheduler: JobScheduler,
    armed: Mutex<Vec<Uuid>>,
}

/// Six-field (seconds-first) form of a cron expression. Five-field
/// expressions fire at second zero; anything else is rejected.
pub fn normalize_cron(expr: &str) -> Option<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => Some(format!("0 {}", fields.join(" "))),
        6 | 7 => Some(fields.join(" ")),
        _ => None,
    }
}

pub fn is_schedulable(descriptor: &AutomationDescriptor) -> bool {
    descriptor.enabled
        && descriptor.runtime == RuntimeTarget::Local
        && descriptor.schedule.cron_expr().is_some()
}

impl AutomationScheduler {
    pub fn new(scheduler: JobScheduler) -> Self {
        Self {
            scheduler,
            armed: Mutex::new(Vec::new()),
        }
    }

    pub async fn armed_count(&self) -> usize {
        self.armed.lock().await.len()
    }

    /// Drop every armed job, then arm one per eligible descriptor. Invalid
    /// expressions are logged and skipped. Returns the number armed.
    pub async fn schedule(
        &self,
        descriptors: &[AutomationDescriptor],
        executor: Arc<Executor>,
    ) -> usize {
        let mut armed = self.armed.lock().await;
        for job_id in armed.drain(..) {
            if let Err(e) = self.scheduler.remove(&job_id).await {
                warn!("Failed to remove scheduled job {}: {}", job_id, e);
            }
        }

        for descriptor in descriptors.iter().filter(|d| is_schedulable(d)) {
            let raw = descriptor.schedule.as_str();
            let Some(expr) = normalize_cron(raw) else {
                warn!(
                    automation = %descriptor.id,
                    "Invalid cron expression '{}', not scheduling",
                    raw
                );
                continue;
            };

            let executor_for_job = executor.clone();
            let descriptor_for_job = descriptor.clone();
            let job = Job::new_async(expr.as_str(), move |_uuid, mut _l| {
                let executor = executor_for_job.clone();
                let descriptor = descriptor_for_job.clone();
                Box::pin(async move {
                    if let Err(e) = executor.execute(&descriptor, Trigger::Schedule, None).await {
                        error!(automation = %descriptor.id, "Scheduled run could not start: {}", e);
                    }
                })
            });
            let job = match job {
                Ok(job) => job,
                Err(e) => {
                    warn!(automation = %descriptor.id, "Invalid cron expression '{}': {}", raw, e);
                    continue;
                }
            };

            match self.scheduler.add(job).await {
                Ok(job_id) => {
                    info!(automation = %descriptor.id, cron = %expr, "Armed schedule");
                    armed.push(job_id);
                }
                Err(e) => warn!(automation = %descriptor.id, "Failed to arm schedule: {}", e),
            }
        }

        armed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{AutomationKind, HandlerTable, Schedule};
    use crate::core::store::test_store;

    fn descriptor(
        id: &str,
        schedule: &str,
        enabled: bool,
        runtime: RuntimeTarget,
    ) -> AutomationDescriptor {
        AutomationDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            kind: AutomationKind::Worker,
            schedule: Schedule::parse(schedule),
            enabled,
            tags: vec![],
            runtime,
            version: "0.1.0".into(),
            handler: "noop".into(),
            flow: None,
            source_dir: String::new(),
            discovered_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn five_field_cron_gains_seconds() {
        assert_eq!(normalize_cron("*/15 * * * *").as_deref(), Some("0 */15 * * * *"));
        assert_eq!(normalize_cron("0 0 6 * * *").as_deref(), Some("0 0 6 * * *"));
        assert_eq!(normalize_cron("every day"), None);
        assert_eq!(normalize_cron(""), None);
    }

    #[test]
    fn only_enabled_local_cron_is_schedulable() {
        assert!(is_schedulable(&descriptor("a", "*/5 * * * *", true, RuntimeTarget::Local)));
        assert!(!is_schedulable(&descriptor("b", "*/5 * * * *", false, RuntimeTarget::Local)));
        assert!(!is_schedulable(&descriptor("c", "manual", true, RuntimeTarget::Local)));
        assert!(!is_schedulable(&descriptor("d", "triggered", true, RuntimeTarget::Local)));
        assert!(!is_schedulable(&descriptor("e", "*/5 * * * *", true, RuntimeTarget::External)));
    }

    #[tokio::test]
    async fn rescheduling_replaces_and_skips_invalid() {
        let store = Arc::new(test_store().await);
        let executor = Arc::new(Executor::new(store, HandlerTable::new(), None));
        let scheduler = AutomationScheduler::new(JobScheduler::new().await.unwrap());

        let descriptors = vec![
            descriptor("workers/a", "*/10 * * * *", true, RuntimeTarget::Local),
            descriptor("workers/b", "0 0 6 * * *", true, RuntimeTarget::Local),
            descriptor("workers/c", "not a cron", true, RuntimeTarget::Local),
            descriptor("workers/d", "*/10 * * * *", false, RuntimeTarget::Local),
            descriptor("agents/e", "manual", true, RuntimeTarget::Local),
        ];
        assert_eq!(scheduler.schedule(&descriptors, executor.clone()).await, 2);
        assert_eq!(scheduler.schedule(&descriptors, executor.clone()).await, 2);
        assert_eq!(scheduler.armed_count().await, 2);

        assert_eq!(scheduler.schedule(&descriptors[..1], executor).await, 1);
        assert_eq!(scheduler.armed_count().await, 1);
    }
}
