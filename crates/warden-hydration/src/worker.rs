//! Background workers: the nightly scheduler and the queue consumer.
//!
//! The scheduler polls sources whose `next_run_at` has passed, takes the
//! workspace lock, gates on the PDP as the service principal, and invokes
//! the pipeline. API-initiated runs travel through the job queue with a
//! correlation id and land on the same entrypoint with `trigger=api`.

use crate::alerts::AlertManager;
use crate::models::{
    HydrationOptions, HydrationStatus, HydrationTrigger, SourceRepo, StateRepo,
};
use crate::pipeline::HydrationPipeline;
use crate::{AlertCategory, AlertSeverity, HydrationError};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use warden_core::{
    workspace_lock_key, CoreConfig, Job, JobHeaders, JobQueue, JobType, LockManager, Store,
    StoreError, WORKSPACE_LOCK_TTL_SECS,
};
use warden_pdp::{PolicyEngine, PolicyRequest, RequestContext};

const QUEUE_VISIBILITY: Duration = Duration::from_secs(600);

/// Next occurrence of `hour:minute` in `tz`, strictly in the future.
pub fn next_run_time(now: DateTime<Utc>, tz: Tz, hour: u32, minute: u32) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let date = local_now.date_naive();
    let candidate = date
        .and_hms_opt(hour, minute, 0)
        .and_then(|naive| tz.from_local_datetime(&naive).earliest());
    let mut scheduled = match candidate {
        Some(scheduled) => scheduled,
        None => return now + ChronoDuration::days(1),
    };
    if scheduled <= local_now {
        let tomorrow = date + ChronoDuration::days(1);
        scheduled = tomorrow
            .and_hms_opt(hour, minute, 0)
            .and_then(|naive| tz.from_local_datetime(&naive).earliest())
            .unwrap_or(scheduled + ChronoDuration::days(1));
    }
    scheduled.with_timezone(&Utc)
}

/// Enqueue an API-triggered hydration job; returns the job sequence.
pub fn enqueue_hydration_job(
    queue: &JobQueue,
    workspace_id: &str,
    source_ids: Option<Vec<u64>>,
    user_id: Option<i64>,
    correlation_id: &str,
) -> Result<u64, StoreError> {
    queue.enqueue(Job {
        job_type: JobType::Hydration,
        payload: serde_json::json!({
            "workspace_id": workspace_id,
            "source_ids": source_ids,
        }),
        headers: JobHeaders {
            correlation_id: correlation_id.to_string(),
            workspace_id: Some(workspace_id.to_string()),
            user_id,
        },
    })
}

pub struct HydrationWorker {
    pipeline: Arc<HydrationPipeline>,
    pdp: Arc<PolicyEngine>,
    locks: Arc<LockManager>,
    queue: Arc<JobQueue>,
    alerts: AlertManager,
    sources: SourceRepo,
    states: StateRepo,
    config: CoreConfig,
}

impl HydrationWorker {
    pub fn new(
        store: Store,
        pipeline: Arc<HydrationPipeline>,
        pdp: Arc<PolicyEngine>,
        locks: Arc<LockManager>,
        queue: Arc<JobQueue>,
        config: CoreConfig,
    ) -> Self {
        Self {
            pipeline,
            pdp,
            locks,
            queue,
            alerts: AlertManager::new(store.clone()),
            sources: SourceRepo::new(store.clone()),
            states: StateRepo::new(store),
            config,
        }
    }

    fn schedule_zone(&self) -> Tz {
        self.config.hydration_tz.parse().unwrap_or(Tz::UTC)
    }

    /// One scheduler pass over all enabled sources.
    pub async fn tick(&self) -> Result<(), HydrationError> {
        let now = Utc::now();
        let tz = self.schedule_zone();
        let hour = self.config.hydration_hour;
        let minute = self.config.hydration_minute;

        for source in self.sources.enabled()? {
            let mut state = self.states.load_or_create(source.id)?;
            if state.next_run_at.is_none() {
                state.next_run_at = Some(next_run_time(now, tz, hour, minute));
                self.states.save(&state)?;
                continue;
            }
            if state.next_run_at.map(|at| at > now).unwrap_or(false) {
                continue;
            }

            let lock_key = workspace_lock_key(&source.workspace_id);
            let Some(token) = self.locks.acquire(&lock_key, WORKSPACE_LOCK_TTL_SECS) else {
                continue;
            };

            let decision = self.pdp.evaluate(&PolicyRequest {
                principal_id: self.config.hydration_service_user_id,
                action: "hydrate_scheduled".to_string(),
                resource_type: "workspace".to_string(),
                resource_id: Some(source.workspace_id.clone()),
                context: RequestContext {
                    workspace_id: Some(source.workspace_id.clone()),
                    ..Default::default()
                },
            });
            if !decision.allowed {
                warn!(
                    target: "warden::hydration",
                    workspace = %source.workspace_id,
                    reason = %decision.reason,
                    "scheduled hydration denied by PDP"
                );
                let mut state = self.states.load_or_create(source.id)?;
                state.status = HydrationStatus::Failed;
                state.last_error = Some(decision.reason.clone());
                state.consecutive_failures += 1;
                state.next_run_at = Some(next_run_time(now, tz, hour, minute));
                self.states.save(&state)?;
                self.alerts.create_alert(
                    &source.workspace_id,
                    AlertSeverity::Warn,
                    AlertCategory::Auth,
                    &format!("Scheduled hydration denied: {}", decision.reason),
                    None,
                )?;
                self.locks.release(&lock_key, &token);
                continue;
            }

            let options = HydrationOptions {
                trigger: HydrationTrigger::Scheduled,
                source_ids: Some(vec![source.id]),
                force_full_scan: self.config.hydration_force_full_scan,
                max_files: self.config.hydration_max_files_per_run,
                dry_run: false,
            };
            if let Err(err) = self
                .pipeline
                .hydrate_with_lock(&source.workspace_id, &options, Some(&token))
                .await
            {
                error!(
                    target: "warden::hydration",
                    workspace = %source.workspace_id,
                    error = %err,
                    "scheduled hydration failed"
                );
            }

            let mut state = self.states.load_or_create(source.id)?;
            state.next_run_at = Some(next_run_time(Utc::now(), tz, hour, minute));
            self.states.save(&state)?;
            self.locks.release(&lock_key, &token);
        }
        Ok(())
    }

    /// Long-running scheduler loop.
    pub async fn run_scheduler(self: Arc<Self>) {
        if !self.config.hydration_enabled {
            info!(target: "warden::hydration", "hydration worker disabled via HYDRATION_ENABLED");
            return;
        }
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.hydration_poll_seconds.max(1)));
        loop {
            interval.tick().await;
            if let Err(err) = self.tick().await {
                error!(target: "warden::hydration", error = %err, "scheduler pass failed");
            }
        }
    }

    /// Drain at most one queued job. Returns whether a job was handled.
    pub async fn process_queue_once(&self) -> Result<bool, HydrationError> {
        let Some(delivered) = self.queue.dequeue(QUEUE_VISIBILITY)? else {
            return Ok(false);
        };
        if delivered.job.job_type == JobType::Hydration {
            let workspace_id = delivered
                .job
                .payload
                .get("workspace_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or(delivered.job.headers.workspace_id.clone());
            if let Some(workspace_id) = workspace_id {
                let source_ids = delivered
                    .job
                    .payload
                    .get("source_ids")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_u64()).collect::<Vec<u64>>())
                    .filter(|ids| !ids.is_empty());
                let options = HydrationOptions {
                    trigger: HydrationTrigger::Api,
                    source_ids,
                    ..Default::default()
                };
                info!(
                    target: "warden::hydration",
                    workspace = %workspace_id,
                    correlation_id = %delivered.job.headers.correlation_id,
                    "processing queued hydration job"
                );
                if let Err(err) = self.pipeline.hydrate_workspace(&workspace_id, &options).await
                {
                    error!(
                        target: "warden::hydration",
                        workspace = %workspace_id,
                        error = %err,
                        "queued hydration failed"
                    );
                }
            } else {
                warn!(target: "warden::hydration", "hydration job missing workspace_id");
            }
        }
        self.queue.ack(delivered.seq)?;
        Ok(true)
    }

    /// Long-running queue consumer loop.
    pub async fn run_queue_worker(self: Arc<Self>) {
        loop {
            match self.process_queue_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(Duration::from_secs(1)).await,
                Err(err) => {
                    error!(target: "warden::hydration", error = %err, "queue worker pass failed");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn next_run_is_strictly_in_the_future() {
        let tz: Tz = "UTC".parse().unwrap();
        let now = Utc::now();
        let next = next_run_time(now, tz, 2, 0);
        assert!(next > now);
        assert_eq!(next.with_timezone(&tz).hour(), 2);
        assert_eq!(next.with_timezone(&tz).minute(), 0);
        // Scheduling again from the computed time moves forward a day.
        let after = next_run_time(next, tz, 2, 0);
        assert!(after > next);
        assert!(after - next <= ChronoDuration::days(1));
    }

    #[test]
    fn next_run_respects_the_zone() {
        let tz: Tz = "Asia/Riyadh".parse().unwrap();
        let now = Utc::now();
        let next = next_run_time(now, tz, 2, 30);
        let local = next.with_timezone(&tz);
        assert_eq!(local.hour(), 2);
        assert_eq!(local.minute(), 30);
        assert!(next > now);
    }

    #[test]
    fn hydration_job_envelope_carries_correlation() {
        let queue = JobQueue::new(Store::temp().unwrap());
        let seq =
            enqueue_hydration_job(&queue, "ws1", Some(vec![3]), Some(9), "corr-123").unwrap();
        let delivered = queue.dequeue(Duration::from_secs(30)).unwrap().unwrap();
        assert_eq!(delivered.seq, seq);
        assert_eq!(delivered.job.headers.correlation_id, "corr-123");
        assert_eq!(delivered.job.payload["workspace_id"], "ws1");
        assert_eq!(delivered.job.payload["source_ids"][0], 3);
    }
}
