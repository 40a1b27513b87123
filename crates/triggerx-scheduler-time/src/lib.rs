//! Time Scheduler (spec.md §4.3): polls the store for imminent jobs and
//! fires at exact instants, recovering precisely across restarts.
//!
//! The scheduler is stateless between polls — all durable state lives
//! in the Job Store Gateway (spec.md §3 "Ownership").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Semaphore};
use tracing::{info, warn};

use triggerx_core::{JobStatus, TimeJob};
use triggerx_dispatch::{Dispatcher, FireOutcome, FireRequest};
use triggerx_performer::PerformerSelector;
use triggerx_schedule::ScheduleKind;
use triggerx_store::JobStoreGateway;

#[derive(Debug, Clone, Copy)]
pub struct TimeSchedulerConfig {
    pub poll_interval: Duration,
    pub look_ahead: Duration,
    pub fanout: usize,
}

pub struct TimeScheduler {
    store: Arc<dyn JobStoreGateway>,
    selector: Arc<PerformerSelector>,
    dispatcher: Arc<Dispatcher>,
    config: TimeSchedulerConfig,
    missed_deadline_total: AtomicU64,
}

impl TimeScheduler {
    pub fn new(
        store: Arc<dyn JobStoreGateway>,
        selector: Arc<PerformerSelector>,
        dispatcher: Arc<Dispatcher>,
        config: TimeSchedulerConfig,
    ) -> Self {
        TimeScheduler {
            store,
            selector,
            dispatcher,
            config,
            missed_deadline_total: AtomicU64::new(0),
        }
    }

    pub fn missed_deadline_total(&self) -> u64 {
        self.missed_deadline_total.load(Ordering::Relaxed)
    }

    /// Drives the poll loop until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    info!("time scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// One poll cycle (spec.md §4.3 steps 1-3). Public for tests and
    /// for the synchronous single-tick driver some callers prefer.
    pub async fn poll_once(&self) {
        let lookahead = match chrono::Duration::from_std(self.config.look_ahead) {
            Ok(d) => d,
            Err(_) => return,
        };

        let due = match self.store.get_time_jobs_due_by(lookahead).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "readiness query failed");
                return;
            }
        };

        let queue_limit = self.config.fanout * 2;
        if due.len() > queue_limit {
            warn!(
                due = due.len(),
                queue_limit, "due-job backlog exceeds queue limit, deferring overflow to next poll"
            );
        }
        let batch: Vec<TimeJob> = due.into_iter().take(queue_limit).collect();

        let semaphore = Arc::new(Semaphore::new(self.config.fanout));
        let mut handles = Vec::with_capacity(batch.len());
        for job in batch {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let this = self;
            handles.push(async move {
                let _permit = permit;
                this.handle_due_job(job).await;
            });
        }
        futures::future::join_all(handles).await;
    }

    async fn handle_due_job(&self, job: TimeJob) {
        let job_id = job.common.id;
        let current_next_fire = job.next_execution_instant;

        // Pre-flight performer check: if none is available, leave
        // `next_execution_instant` untouched so the next poll retries
        // the same instant (spec.md §4.7 step 1, concrete scenario 4).
        if self.selector.select(job.common.on_imua).is_none() {
            info!(job_id, "no performer available, deferring this cycle");
            return;
        }

        let definition_kind: u8 = if job.target.has_dynamic_args() { 2 } else { 1 };
        let kind = schedule_kind_of(&job);

        match triggerx_schedule::next(current_next_fire, &kind, &job.common.timezone) {
            Ok(Some(next)) if next <= job.common.expiration => {
                if let Err(e) = self.store.update_next_fire(job_id, next).await {
                    warn!(job_id, error = %e, "failed to advance next_execution_instant");
                    return;
                }
            }
            Ok(_) => {
                if let Err(e) = self.store.complete(job_id).await {
                    warn!(job_id, error = %e, "failed to complete exhausted job");
                    return;
                }
                let _ = self.store.update_status(job_id, JobStatus::Completed).await;
            }
            Err(e) => {
                warn!(job_id, error = %e, "schedule calculator error");
                return;
            }
        }

        let now = Utc::now();
        if now - current_next_fire > chrono::Duration::from_std(self.config.poll_interval).unwrap_or_default() {
            self.missed_deadline_total.fetch_add(1, Ordering::Relaxed);
            warn!(job_id, "missed deadline for scheduled fire");
        }

        let request = FireRequest {
            job: triggerx_core::Job::Time(job),
            execution_instant: current_next_fire,
            definition_kind,
        };

        match self.dispatcher.dispatch(request).await {
            Ok(FireOutcome::NoPerformer) => {
                info!(job_id, "dispatcher reported no-performer after pre-flight check");
            }
            Ok(FireOutcome::Dispatched { success, .. }) => {
                info!(job_id, success, "fire dispatched");
            }
            Err(e) => {
                warn!(job_id, error = %e, "dispatch failed");
            }
        }
    }
}

fn schedule_kind_of(job: &TimeJob) -> ScheduleKind {
    match job.schedule_type {
        triggerx_core::ScheduleType::Interval => ScheduleKind::Interval {
            seconds: job.interval_sec.unwrap_or(0),
        },
        triggerx_core::ScheduleType::Cron => ScheduleKind::Cron {
            expr: job.cron_expr.clone().unwrap_or_default(),
        },
        triggerx_core::ScheduleType::Specific => ScheduleKind::Specific {
            instants: job.specific_schedule.clone(),
        },
    }
}
