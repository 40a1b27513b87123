//! Fire-to-task pipeline (spec.md §4.7): selects a performer, creates
//! the task record, delivers the payload, and reconciles the outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use triggerx_client::{CircuitBreaker, CircuitConfig, HttpClient, TaskEnvelope, TaskTarget};
use triggerx_core::{HealthState, Job, JobStatus, Target};
use triggerx_events::{DomainEvent, EventBus};
use triggerx_performer::PerformerSelector;
use triggerx_store::{JobStoreGateway, KeeperGateway};

use crate::error::DispatchError;

const TIME_TIMEOUT: Duration = Duration::from_secs(30);
const CONDITION_TIMEOUT: Duration = Duration::from_secs(45);
const EVENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Consecutive dispatch failures before a keeper is nudged to
/// `Unreachable` rather than merely `Degraded` (spec.md §4.7 steps 4-5).
/// Independent of the `/status` prober's own streak (spec.md §4.6) —
/// this one reacts to delivery outcomes, not probe results.
const DISPATCH_UNREACHABLE_THRESHOLD: u32 = 3;

/// Default number of consecutive fire failures before a job is marked
/// `failed` (spec.md §7).
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

#[derive(Debug, Clone)]
pub struct FireRequest {
    pub job: Job,
    pub execution_instant: chrono::DateTime<Utc>,
    pub definition_kind: u8,
}

#[derive(Debug, Clone)]
pub enum FireOutcome {
    Dispatched {
        task_id: i64,
        performer_id: i64,
        success: bool,
        cost: f64,
        reason: Option<String>,
    },
    NoPerformer,
}

pub struct Dispatcher {
    store: Arc<dyn JobStoreGateway>,
    keepers: Arc<dyn KeeperGateway>,
    selector: Arc<PerformerSelector>,
    client: Arc<HttpClient>,
    events: Arc<EventBus>,
    circuits: DashMap<i64, Arc<CircuitBreaker>>,
    health_streaks: DashMap<i64, u32>,
    failure_threshold: u32,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStoreGateway>,
        keepers: Arc<dyn KeeperGateway>,
        selector: Arc<PerformerSelector>,
        client: Arc<HttpClient>,
        events: Arc<EventBus>,
    ) -> Self {
        Dispatcher {
            store,
            keepers,
            selector,
            client,
            events,
            circuits: DashMap::new(),
            health_streaks: DashMap::new(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    fn circuit_for(&self, keeper_id: i64) -> Arc<CircuitBreaker> {
        self.circuits
            .entry(keeper_id)
            .or_insert_with(|| Arc::new(CircuitBreaker::new(CircuitConfig::default())))
            .clone()
    }

    /// Nudges a keeper's health toward healthy on an acknowledged
    /// success, or toward unreachable on an acknowledged failure or
    /// timeout (spec.md §4.7 steps 4-5).
    async fn nudge_keeper_health(&self, keeper_id: i64, succeeded: bool) {
        let state = if succeeded {
            self.health_streaks.insert(keeper_id, 0);
            HealthState::Healthy
        } else {
            let streak = {
                let mut entry = self.health_streaks.entry(keeper_id).or_insert(0);
                *entry += 1;
                *entry
            };
            if streak >= DISPATCH_UNREACHABLE_THRESHOLD {
                HealthState::Unreachable
            } else {
                HealthState::Degraded
            }
        };

        let failures = self.health_streaks.get(&keeper_id).map(|s| *s).unwrap_or(0);
        if let Err(e) = self
            .keepers
            .update_health(keeper_id, state, failures, Utc::now())
            .await
        {
            warn!(keeper_id, error = %e, "failed to persist dispatch-driven health nudge");
        }
    }

    pub async fn dispatch(&self, request: FireRequest) -> Result<FireOutcome, DispatchError> {
        let common = request.job.common().clone();
        let keeper = match self.selector.select(common.on_imua) {
            Some(k) => k,
            None => {
                warn!(job_id = common.id, "no performer available, deferring fire");
                return Ok(FireOutcome::NoPerformer);
            }
        };

        let task = self
            .store
            .create_task(
                common.id,
                request.definition_kind,
                Some(keeper.id),
                request.execution_instant,
            )
            .await?;

        let target = target_of(&request.job);
        let envelope = TaskEnvelope {
            task_id: task.id,
            job_id: common.id,
            definition_id: request.definition_kind as i32,
            target: TaskTarget {
                chain_id: target.chain_id.clone(),
                contract: target.contract.clone(),
                function: target.function.clone(),
                abi: target.abi.clone(),
                arg_type: target.arg_type.clone(),
                arguments: target.arguments.clone(),
                dynamic_args_url: target.dynamic_args_url.clone().unwrap_or_default(),
            },
            deadline_unix_ms: common.expiration.timestamp_millis(),
            trace_id: Uuid::new_v4(),
        };

        let timeout = timeout_for(&request.job);
        let circuit = self.circuit_for(keeper.id);

        self.selector.track_dispatch_start(keeper.id);
        let delivery = self
            .client
            .deliver_task(&keeper.url, &envelope, &circuit, timeout)
            .await;
        self.selector.track_dispatch_end(keeper.id);

        info!(
            job_id = common.id,
            task_id = task.id,
            keeper_id = keeper.id,
            trace_id = %envelope.trace_id,
            "dispatched fire"
        );

        match delivery {
            Ok(resp) if resp.success => {
                self.store
                    .append_task_to_job(common.id, task.id, resp.cost_opx, request.execution_instant)
                    .await?;
                self.store.mark_task_success(task.id, resp.cost_opx).await?;
                self.store.reset_fire_failures(common.id).await?;
                self.nudge_keeper_health(keeper.id, true).await;
                self.events.publish(DomainEvent::TaskCompleted {
                    task_id: task.id,
                    job_id: common.id,
                    success: true,
                });

                if !common.recurring {
                    self.complete_and_activate_linked(&common).await?;
                }

                Ok(FireOutcome::Dispatched {
                    task_id: task.id,
                    performer_id: keeper.id,
                    success: true,
                    cost: resp.cost_opx,
                    reason: None,
                })
            }
            Ok(resp) => {
                self.handle_failure(common.id, task.id, keeper.id, resp.reason.clone())
                    .await?;
                Ok(FireOutcome::Dispatched {
                    task_id: task.id,
                    performer_id: keeper.id,
                    success: false,
                    cost: 0.0,
                    reason: Some(resp.reason),
                })
            }
            Err(e) => {
                let reason = e.to_string();
                self.handle_failure(common.id, task.id, keeper.id, reason.clone())
                    .await?;
                Ok(FireOutcome::Dispatched {
                    task_id: task.id,
                    performer_id: keeper.id,
                    success: false,
                    cost: 0.0,
                    reason: Some(reason),
                })
            }
        }
    }

    async fn handle_failure(
        &self,
        job_id: i64,
        task_id: i64,
        keeper_id: i64,
        reason: String,
    ) -> Result<(), DispatchError> {
        self.store.mark_task_failed(task_id, reason).await?;
        self.nudge_keeper_health(keeper_id, false).await;
        self.events.publish(DomainEvent::TaskCompleted {
            task_id,
            job_id,
            success: false,
        });

        let streak = self.store.record_fire_failure(job_id).await?;
        if streak >= self.failure_threshold {
            self.store.update_status(job_id, JobStatus::Failed).await?;
            self.events.publish(DomainEvent::JobFailed {
                job_id,
                reason: format!("{streak} consecutive fire failures"),
            });
        }
        Ok(())
    }

    async fn complete_and_activate_linked(
        &self,
        common: &triggerx_core::JobCommon,
    ) -> Result<(), DispatchError> {
        self.store.complete(common.id).await?;
        self.events.publish(DomainEvent::JobCompleted {
            job_id: common.id,
        });

        if let Some(linked_id) = common.linked_job_id {
            self.store
                .update_status(linked_id, JobStatus::Active)
                .await?;
            self.events.publish(DomainEvent::JobActivated {
                job_id: linked_id,
                at: Utc::now(),
            });
        }
        Ok(())
    }
}

fn target_of(job: &Job) -> &Target {
    match job {
        Job::Time(t) => &t.target,
        Job::Event(e) => &e.target,
        Job::Condition(c) => &c.target,
    }
}

fn timeout_for(job: &Job) -> Duration {
    match job {
        Job::Time(_) => TIME_TIMEOUT,
        Job::Condition(_) => CONDITION_TIMEOUT,
        Job::Event(_) => EVENT_TIMEOUT,
    }
}
