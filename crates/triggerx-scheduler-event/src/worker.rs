//! One subscription-reader per active event-job (spec.md §4.5).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};
use triggerx_core::EventJob;
use triggerx_dispatch::{Dispatcher, FireOutcome, FireRequest};
use triggerx_store::JobStoreGateway;

use crate::cancel::CancelToken;
use crate::source::LogSource;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const BACKOFF_JITTER: f64 = 0.25;

pub struct EventWorker {
    job_id: i64,
    store: Arc<dyn JobStoreGateway>,
    log_source: Arc<dyn LogSource>,
    dispatcher: Arc<Dispatcher>,
    confirmation_blocks: u64,
    last_seen_block: AtomicU64,
    last_seen_log_index: AtomicU32,
}

impl EventWorker {
    pub fn new(
        job_id: i64,
        store: Arc<dyn JobStoreGateway>,
        log_source: Arc<dyn LogSource>,
        dispatcher: Arc<Dispatcher>,
        confirmation_blocks: u64,
    ) -> Self {
        EventWorker {
            job_id,
            store,
            log_source,
            dispatcher,
            confirmation_blocks,
            last_seen_block: AtomicU64::new(0),
            last_seen_log_index: AtomicU32::new(0),
        }
    }

    fn watermark(&self) -> (u64, u32) {
        (
            self.last_seen_block.load(Ordering::SeqCst),
            self.last_seen_log_index.load(Ordering::SeqCst),
        )
    }

    fn past_watermark(&self, block_number: u64, log_index: u32) -> bool {
        let (wm_block, wm_index) = self.watermark();
        (block_number, log_index) > (wm_block, wm_index)
    }

    fn advance_watermark(&self, block_number: u64, log_index: u32) {
        self.last_seen_block.store(block_number, Ordering::SeqCst);
        self.last_seen_log_index.store(log_index, Ordering::SeqCst);
    }

    pub async fn run(self: Arc<Self>, cancel: CancelToken) {
        let mut consecutive_errors: u32 = 0;
        let mut from_block: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let job = match self.store.get_by_id(self.job_id).await {
                Ok(triggerx_core::Job::Event(e)) => e,
                Ok(_) => {
                    warn!(job_id = self.job_id, "job is no longer an event job");
                    break;
                }
                Err(e) => {
                    warn!(job_id = self.job_id, error = %e, "failed to load event job");
                    break;
                }
            };

            if job.common.status != triggerx_core::JobStatus::Active {
                info!(job_id = self.job_id, "event job no longer active, stopping");
                break;
            }
            if Utc::now() > job.common.expiration {
                info!(job_id = self.job_id, "event job expired, stopping");
                let _ = self.store.complete(self.job_id).await;
                break;
            }

            match self
                .log_source
                .poll_logs(
                    &job.trigger.chain_id,
                    &job.trigger.contract,
                    &job.trigger.event_signature,
                    from_block,
                )
                .await
            {
                Ok(logs) => {
                    if consecutive_errors > 0 {
                        info!(job_id = self.job_id, "event subscription reconnected");
                    }
                    consecutive_errors = 0;

                    for log in logs {
                        if self.past_watermark(log.block_number, log.log_index) {
                            self.handle_log(&job, log.clone()).await;
                            self.advance_watermark(log.block_number, log.log_index);
                        }
                    }
                    from_block = self
                        .watermark()
                        .0
                        .saturating_sub(self.confirmation_blocks)
                        .max(from_block);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(job_id = self.job_id, error = %e, consecutive_errors, "log subscription error");
                    // Resume from the watermark minus the confirmation
                    // gap to tolerate reorgs across the drop.
                    from_block = self
                        .watermark()
                        .0
                        .saturating_sub(self.confirmation_blocks);
                    let delay = backoff_delay(consecutive_errors);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }

    async fn handle_log(&self, job: &EventJob, log: crate::source::LogEvent) {
        let definition_kind: u8 = if job.target.has_dynamic_args() { 4 } else { 3 };
        let request = FireRequest {
            job: triggerx_core::Job::Event(job.clone()),
            execution_instant: log.block_timestamp,
            definition_kind,
        };
        match self.dispatcher.dispatch(request).await {
            Ok(FireOutcome::NoPerformer) => {
                warn!(job_id = self.job_id, "no performer available for event fire");
            }
            Err(e) => {
                warn!(job_id = self.job_id, error = %e, "dispatch failed for event fire");
            }
            _ => {}
        }
    }
}

/// Exponential backoff with jitter for reconnection (spec.md §4.5:
/// base 1 s, cap 60 s, jitter ±25%).
fn backoff_delay(consecutive_errors: u32) -> Duration {
    let exp = 2_f64.powi((consecutive_errors.saturating_sub(1)) as i32);
    let capped_ms = (BACKOFF_BASE.as_millis() as f64 * exp).min(BACKOFF_CAP.as_millis() as f64);
    let span = capped_ms * BACKOFF_JITTER;
    let jitter = rand::thread_rng().gen_range(-span..=span);
    Duration::from_millis((capped_ms + jitter).max(0.0).round() as u64)
}
