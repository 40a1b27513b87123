//! One long-lived worker per active condition job (spec.md §4.4),
//! grounded on `original_source`'s `ConditionWorker`/`init_condition.go`
//! ticker-and-cancel-channel loop.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};
use triggerx_client::{ClientError, HttpClient};
use triggerx_core::{ConditionJob, JobStatus, ValueSourceType};
use triggerx_dispatch::{Dispatcher, FireOutcome, FireRequest};
use triggerx_store::JobStoreGateway;

use crate::cancel::CancelToken;

const STATUS_RECHECK_TICKS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastSatisfied {
    Unknown,
    True,
    False,
}

pub struct ConditionWorker {
    job_id: i64,
    store: Arc<dyn JobStoreGateway>,
    client: Arc<HttpClient>,
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    state: RwLock<WorkerState>,
    last_satisfied: RwLock<LastSatisfied>,
    value_source_errors_total: AtomicU64,
    fires_total: AtomicU32,
}

impl ConditionWorker {
    pub fn new(
        job_id: i64,
        store: Arc<dyn JobStoreGateway>,
        client: Arc<HttpClient>,
        dispatcher: Arc<Dispatcher>,
        poll_interval: Duration,
    ) -> Self {
        ConditionWorker {
            job_id,
            store,
            client,
            dispatcher,
            poll_interval,
            state: RwLock::new(WorkerState::Starting),
            last_satisfied: RwLock::new(LastSatisfied::Unknown),
            value_source_errors_total: AtomicU64::new(0),
            fires_total: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub fn value_source_errors_total(&self) -> u64 {
        self.value_source_errors_total.load(Ordering::Relaxed)
    }

    pub fn fires_total(&self) -> u32 {
        self.fires_total.load(Ordering::Relaxed)
    }

    /// Runs until `cancel` fires or the job's own lifecycle ends
    /// (expired, or re-read as non-active).
    pub async fn run(self: Arc<Self>, cancel: CancelToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut tick_count: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    *self.state.write() = WorkerState::Stopping;
                    info!(job_id = self.job_id, "condition worker cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    *self.state.write() = WorkerState::Running;
                    tick_count += 1;

                    if tick_count % STATUS_RECHECK_TICKS == 0 {
                        match self.store.get_by_id(self.job_id).await {
                            Ok(job) if job.common().status != JobStatus::Active => {
                                info!(job_id = self.job_id, "job no longer active, stopping worker");
                                break;
                            }
                            Err(e) => {
                                warn!(job_id = self.job_id, error = %e, "failed to re-read job status");
                            }
                            _ => {}
                        }
                    }

                    if !self.tick().await {
                        break;
                    }
                }
            }
        }

        *self.state.write() = WorkerState::Stopped;
    }

    /// Runs a single tick; returns `false` when the worker should stop
    /// (expiration passed).
    async fn tick(&self) -> bool {
        let job = match self.store.get_by_id(self.job_id).await {
            Ok(triggerx_core::Job::Condition(c)) => c,
            Ok(_) => {
                warn!(job_id = self.job_id, "job is no longer a condition job");
                return false;
            }
            Err(e) => {
                warn!(job_id = self.job_id, error = %e, "failed to load condition job");
                return true;
            }
        };

        if Utc::now() > job.common.expiration {
            info!(job_id = self.job_id, "condition job expired, stopping worker");
            let _ = self.store.complete(self.job_id).await;
            return false;
        }

        let value = match self.resolve_value(&job).await {
            Ok(v) => v,
            Err(e) => {
                self.value_source_errors_total.fetch_add(1, Ordering::Relaxed);
                warn!(job_id = self.job_id, error = %e, "value source fetch failed");
                *self.last_satisfied.write() = LastSatisfied::False;
                return true;
            }
        };

        let satisfied = job.is_satisfied(value);
        let previous = *self.last_satisfied.read();

        let should_fire = if job.common.recurring {
            satisfied
        } else {
            satisfied && previous != LastSatisfied::True
        };

        if should_fire {
            self.fires_total.fetch_add(1, Ordering::Relaxed);
            let definition_kind: u8 = if job.target.has_dynamic_args() { 6 } else { 5 };
            let request = FireRequest {
                job: triggerx_core::Job::Condition(job.clone()),
                execution_instant: Utc::now(),
                definition_kind,
            };
            match self.dispatcher.dispatch(request).await {
                Ok(FireOutcome::NoPerformer) => {
                    // Retrigger on the next met tick (spec.md §4.7 step 1).
                    *self.last_satisfied.write() = LastSatisfied::Unknown;
                    return true;
                }
                Err(e) => {
                    warn!(job_id = self.job_id, error = %e, "dispatch failed");
                }
                _ => {}
            }
        }

        *self.last_satisfied.write() = if satisfied {
            LastSatisfied::True
        } else {
            LastSatisfied::False
        };

        true
    }

    /// Resolves the job's current value (spec.md §3:
    /// `value-source-type ∈ {http-json, static}`). `http-json` GETs
    /// `value_source_url`; `static` parses it directly as a literal
    /// number rather than dereferencing it as an endpoint.
    async fn resolve_value(&self, job: &ConditionJob) -> Result<f64, ClientError> {
        match job.value_source_type {
            ValueSourceType::HttpJson => {
                self.client
                    .fetch_value(&job.value_source_url, Duration::from_secs(10))
                    .await
            }
            ValueSourceType::Static => job
                .value_source_url
                .trim()
                .parse::<f64>()
                .map_err(|_| ClientError::Decode("static value source is not a number".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triggerx_client::RetryPolicy;
    use triggerx_core::{ConditionType, JobCommon, Target};
    use triggerx_events::EventBus;
    use triggerx_performer::PerformerSelector;
    use triggerx_store::InMemoryStore;

    fn target() -> Target {
        Target {
            chain_id: "1".into(),
            contract: "0xabc".into(),
            function: "fire".into(),
            abi: "[]".into(),
            arg_type: "tuple".into(),
            arguments: vec![],
            dynamic_args_url: None,
        }
    }

    fn condition_job(value_source_type: ValueSourceType, value_source_url: &str) -> ConditionJob {
        let now = Utc::now();
        ConditionJob {
            common: JobCommon {
                id: 1,
                title: "c".into(),
                user_id: 1,
                linked_job_id: None,
                expiration: now + chrono::Duration::hours(1),
                recurring: true,
                status: JobStatus::Active,
                predicted_cost: 0.0,
                actual_cost: 0.0,
                task_ids: vec![],
                created_at: now,
                updated_at: now,
                last_executed_at: None,
                timezone: "UTC".into(),
                on_imua: true,
                consecutive_failures: 0,
            },
            condition_type: ConditionType::GreaterThan,
            upper_limit: 10.0,
            lower_limit: 0.0,
            value_source_type,
            value_source_url: value_source_url.into(),
            target: target(),
        }
    }

    fn worker() -> ConditionWorker {
        let store = Arc::new(InMemoryStore::new());
        let selector = Arc::new(PerformerSelector::new(store.clone()));
        let client = Arc::new(HttpClient::new(RetryPolicy::default()));
        let events = Arc::new(EventBus::default());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            store,
            selector,
            client.clone(),
            events,
        ));
        ConditionWorker::new(1, Arc::new(InMemoryStore::new()), client, dispatcher, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn static_value_source_parses_the_literal_without_an_http_call() {
        let w = worker();
        let job = condition_job(ValueSourceType::Static, "42.5");
        let value = w.resolve_value(&job).await.unwrap();
        assert_eq!(value, 42.5);
    }

    #[tokio::test]
    async fn static_value_source_rejects_a_non_numeric_literal() {
        let w = worker();
        let job = condition_job(ValueSourceType::Static, "not-a-number");
        assert!(w.resolve_value(&job).await.is_err());
    }
}
