use async_trait::async_trait;
use chrono::{DateTime, Utc};
use triggerx_core::{ConditionJob, EventJob, HealthState, Job, JobStatus, Keeper, Task, TimeJob};

use crate::error::Result;

/// Typed operations over job, task, and keeper rows (spec.md §4.2). All
/// writes are idempotent with respect to the primary key; no cross-row
/// transactions are required. Errors are classified via [`crate::StoreError`];
/// only `Transient` is retried by callers.
#[async_trait]
pub trait JobStoreGateway: Send + Sync {
    async fn create(&self, job: Job) -> Result<()>;
    async fn get_by_id(&self, job_id: i64) -> Result<Job>;
    async fn update_status(&self, job_id: i64, status: JobStatus) -> Result<()>;
    async fn complete(&self, job_id: i64) -> Result<()>;
    async fn update_next_fire(&self, job_id: i64, instant: DateTime<Utc>) -> Result<()>;
    async fn update_interval(&self, job_id: i64, interval_sec: u64) -> Result<()>;
    async fn append_task_to_job(
        &self,
        job_id: i64,
        task_id: i64,
        cost: f64,
        fired_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Returns time-jobs with `next_execution_instant` in
    /// `[now, now+lookahead]`.
    async fn get_time_jobs_due_by(&self, lookahead: chrono::Duration) -> Result<Vec<TimeJob>>;

    /// Discovery queries the Condition Worker Pool and Event Subscriber
    /// use for their reconcile loops (the "wanted" set, spec.md §9).
    async fn get_active_condition_jobs(&self) -> Result<Vec<ConditionJob>>;
    async fn get_active_event_jobs(&self) -> Result<Vec<EventJob>>;

    async fn create_task(
        &self,
        job_id: i64,
        definition_kind: u8,
        performer_keeper_id: Option<i64>,
        execution_instant: DateTime<Utc>,
    ) -> Result<Task>;
    async fn mark_task_success(&self, task_id: i64, cost: f64) -> Result<()>;
    async fn mark_task_failed(&self, task_id: i64, reason: String) -> Result<()>;

    /// Records a fire-failure for a job's consecutive-failure counter,
    /// returning the counter's new value (supplemented feature, see
    /// `SPEC_FULL.md` §B).
    async fn record_fire_failure(&self, job_id: i64) -> Result<u32>;
    async fn reset_fire_failures(&self, job_id: i64) -> Result<()>;
}

/// Read paths the Performer Selector's scoring formula depends on
/// (`points_normalized`, cumulative executed tasks — `SPEC_FULL.md` §B),
/// plus the health-state write path the selector owns (spec.md §3).
#[async_trait]
pub trait KeeperGateway: Send + Sync {
    async fn list_keepers(&self) -> Result<Vec<Keeper>>;
    async fn get_task_count(&self, keeper_id: i64) -> Result<u64>;
    async fn get_points(&self, keeper_id: i64) -> Result<f64>;
    async fn update_health(
        &self,
        keeper_id: i64,
        health: HealthState,
        consecutive_failures: u32,
        last_probe_instant: DateTime<Utc>,
    ) -> Result<()>;
    async fn increment_executed_tasks(&self, keeper_id: i64) -> Result<()>;
}
