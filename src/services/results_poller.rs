use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler as CronScheduler};
use tracing::{debug, error, info, warn};

use crate::error::{Error, ExamErrorKind, Result};
use crate::models::poll_job::FETCH_RESULTS_HOOK;
use crate::repositories::{JobScheduler, KeyValueCache};
use crate::services::lifecycle_service::LifecycleService;
use crate::utils::time::Clock;

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub checked: usize,
    pub resolved: usize,
    pub pending: usize,
    pub dropped: usize,
    pub failed: usize,
}

/// Fallback for missed callbacks: re-fetches results for attempts whose
/// polling job has come due.
pub struct ResultsPoller {
    scheduler: Arc<dyn JobScheduler>,
    cache: Arc<dyn KeyValueCache>,
    lifecycle: Arc<LifecycleService>,
    clock: Arc<dyn Clock>,
}

impl ResultsPoller {
    pub fn new(
        scheduler: Arc<dyn JobScheduler>,
        cache: Arc<dyn KeyValueCache>,
        lifecycle: Arc<LifecycleService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler,
            cache,
            lifecycle,
            clock,
        }
    }

    pub async fn run_once(&self) -> Result<PollSummary> {
        let now = self.clock.now();
        let due = self.scheduler.due(now, BATCH_SIZE).await?;
        let mut summary = PollSummary::default();

        for scheduled in due {
            let job = &scheduled.job;
            if job.hook != FETCH_RESULTS_HOOK {
                warn!(hook = %job.hook, "unknown job hook, skipping");
                continue;
            }
            summary.checked += 1;
            let next_run = now + Duration::seconds(scheduled.interval_seconds.max(60));

            match self
                .lifecycle
                .fetch_results(job.exam_id, job.learner_id, &job.attempt_id)
                .await
            {
                Ok(true) => summary.resolved += 1,
                Ok(false) => {
                    summary.pending += 1;
                    self.scheduler.reschedule(job, next_run).await?;
                }
                Err(Error::Exam(e)) if e.kind == ExamErrorKind::NoSuchAttempt => {
                    debug!(attempt_id = %job.attempt_id, "attempt gone, dropping poll job");
                    self.scheduler.cancel(job).await?;
                    summary.dropped += 1;
                }
                Err(_) => {
                    summary.failed += 1;
                    self.scheduler.reschedule(job, next_run).await?;
                }
            }
        }

        match self.cache.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "expired cache entries removed"),
            Err(e) => warn!(error = %e, "cache purge failed"),
        }

        if summary.checked > 0 {
            info!(
                checked = summary.checked,
                resolved = summary.resolved,
                pending = summary.pending,
                dropped = summary.dropped,
                failed = summary.failed,
                "results poll finished"
            );
        }
        Ok(summary)
    }

    /// Registers `run_once` on the given cron expression and starts the
    /// scheduler. Keep the returned handle alive for as long as polling
    /// should run.
    pub async fn start(self: Arc<Self>, schedule: &str) -> Result<CronScheduler> {
        let cron = CronScheduler::new()
            .await
            .map_err(|e| Error::Internal(format!("cron scheduler: {:?}", e)))?;

        let poller = Arc::clone(&self);
        let job = Job::new_async(schedule, move |_id, _lock| {
            let poller = Arc::clone(&poller);
            Box::pin(async move {
                if let Err(e) = poller.run_once().await {
                    error!(error = %e, "results poll failed");
                }
            })
        })
        .map_err(|e| Error::Config(format!("Invalid value for POLLER_CRON: {:?}", e)))?;

        cron.add(job)
            .await
            .map_err(|e| Error::Internal(format!("cron scheduler: {:?}", e)))?;
        cron.start()
            .await
            .map_err(|e| Error::Internal(format!("cron scheduler: {:?}", e)))?;
        info!(schedule, "results poller started");
        Ok(cron)
    }
}
