//! In-memory `JobStoreGateway`/`KeeperGateway` implementation. The real
//! backend (Cassandra/CQL) is out of scope for the core; this backs
//! local runs and tests behind the same narrow trait boundary.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use triggerx_core::{ConditionJob, EventJob, HealthState, Job, JobStatus, Keeper, Task, TimeJob};

use crate::error::{Result, StoreError};
use crate::gateway::{JobStoreGateway, KeeperGateway};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    jobs: DashMap<i64, Job>,
    tasks: DashMap<i64, Task>,
    keepers: DashMap<i64, Keeper>,
    consecutive_failures: DashMap<i64, u32>,
    next_task_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a keeper row; used by tests and local bootstrapping (the
    /// registry owns this write path in production).
    pub fn seed_keeper(&self, keeper: Keeper) {
        self.keepers.insert(keeper.id, keeper);
    }
}

#[async_trait]
impl JobStoreGateway for InMemoryStore {
    async fn create(&self, job: Job) -> Result<()> {
        let id = job.id();
        if self.jobs.contains_key(&id) {
            return Err(StoreError::Constraint(format!(
                "job {id} already exists"
            )));
        }
        self.jobs.insert(id, job);
        Ok(())
    }

    async fn get_by_id(&self, job_id: i64) -> Result<Job> {
        self.jobs
            .get(&job_id)
            .map(|j| j.clone())
            .ok_or(StoreError::NotFound {
                entity: "job",
                id: job_id,
            })
    }

    async fn update_status(&self, job_id: i64, status: JobStatus) -> Result<()> {
        let mut entry = self.jobs.get_mut(&job_id).ok_or(StoreError::NotFound {
            entity: "job",
            id: job_id,
        })?;
        entry.common_mut().status = status;
        entry.common_mut().updated_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        self.update_status(job_id, JobStatus::Completed).await
    }

    async fn update_next_fire(&self, job_id: i64, instant: DateTime<Utc>) -> Result<()> {
        let mut entry = self.jobs.get_mut(&job_id).ok_or(StoreError::NotFound {
            entity: "job",
            id: job_id,
        })?;
        match &mut *entry {
            Job::Time(t) => {
                t.next_execution_instant = instant;
                t.common.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(StoreError::Constraint(
                "update_next_fire is only valid for time jobs".to_string(),
            )),
        }
    }

    async fn update_interval(&self, job_id: i64, interval_sec: u64) -> Result<()> {
        let mut entry = self.jobs.get_mut(&job_id).ok_or(StoreError::NotFound {
            entity: "job",
            id: job_id,
        })?;
        match &mut *entry {
            Job::Time(t) => {
                t.interval_sec = Some(interval_sec);
                t.common.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(StoreError::Constraint(
                "update_interval is only valid for time jobs".to_string(),
            )),
        }
    }

    async fn append_task_to_job(
        &self,
        job_id: i64,
        task_id: i64,
        cost: f64,
        fired_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut entry = self.jobs.get_mut(&job_id).ok_or(StoreError::NotFound {
            entity: "job",
            id: job_id,
        })?;
        let common = entry.common_mut();
        if !common.task_ids.contains(&task_id) {
            common.task_ids.push(task_id);
        }
        common.actual_cost += cost;
        common.last_executed_at = Some(fired_at);
        common.updated_at = Utc::now();
        Ok(())
    }

    async fn get_time_jobs_due_by(&self, lookahead: chrono::Duration) -> Result<Vec<TimeJob>> {
        let now = Utc::now();
        let horizon = now + lookahead;
        Ok(self
            .jobs
            .iter()
            .filter_map(|entry| match entry.value() {
                Job::Time(t) if t.common.status == JobStatus::Active => {
                    if t.next_execution_instant >= now && t.next_execution_instant <= horizon {
                        Some(t.clone())
                    } else {
                        None
                    }
                }
                _ => None,
            })
            .collect())
    }

    async fn get_active_condition_jobs(&self) -> Result<Vec<ConditionJob>> {
        Ok(self
            .jobs
            .iter()
            .filter_map(|entry| match entry.value() {
                Job::Condition(c) if c.common.status == JobStatus::Active => Some(c.clone()),
                _ => None,
            })
            .collect())
    }

    async fn get_active_event_jobs(&self) -> Result<Vec<EventJob>> {
        Ok(self
            .jobs
            .iter()
            .filter_map(|entry| match entry.value() {
                Job::Event(e) if e.common.status == JobStatus::Active => Some(e.clone()),
                _ => None,
            })
            .collect())
    }

    async fn create_task(
        &self,
        job_id: i64,
        definition_kind: u8,
        performer_keeper_id: Option<i64>,
        execution_instant: DateTime<Utc>,
    ) -> Result<Task> {
        if !self.jobs.contains_key(&job_id) {
            return Err(StoreError::NotFound {
                entity: "job",
                id: job_id,
            });
        }
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        let task = Task {
            id,
            job_id,
            definition_kind,
            performer_keeper_id,
            created_at: Utc::now(),
            execution_instant,
            cost_opx: 0.0,
            success: false,
            failure_reason: None,
        };
        self.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn mark_task_success(&self, task_id: i64, cost: f64) -> Result<()> {
        let mut entry = self.tasks.get_mut(&task_id).ok_or(StoreError::NotFound {
            entity: "task",
            id: task_id,
        })?;
        if entry.success {
            return Err(StoreError::Constraint(format!(
                "task {task_id} already recorded as success"
            )));
        }
        entry.success = true;
        entry.cost_opx = cost;
        entry.failure_reason = None;
        Ok(())
    }

    async fn mark_task_failed(&self, task_id: i64, reason: String) -> Result<()> {
        let mut entry = self.tasks.get_mut(&task_id).ok_or(StoreError::NotFound {
            entity: "task",
            id: task_id,
        })?;
        if entry.success {
            return Err(StoreError::Constraint(format!(
                "task {task_id} already recorded as success"
            )));
        }
        entry.failure_reason = Some(reason);
        Ok(())
    }

    async fn record_fire_failure(&self, job_id: i64) -> Result<u32> {
        let mut count = self.consecutive_failures.entry(job_id).or_insert(0);
        *count += 1;
        if let Some(mut entry) = self.jobs.get_mut(&job_id) {
            entry.common_mut().consecutive_failures = *count;
        }
        Ok(*count)
    }

    async fn reset_fire_failures(&self, job_id: i64) -> Result<()> {
        self.consecutive_failures.remove(&job_id);
        if let Some(mut entry) = self.jobs.get_mut(&job_id) {
            entry.common_mut().consecutive_failures = 0;
        }
        Ok(())
    }
}

#[async_trait]
impl KeeperGateway for InMemoryStore {
    async fn list_keepers(&self) -> Result<Vec<Keeper>> {
        Ok(self.keepers.iter().map(|e| e.value().clone()).collect())
    }

    async fn get_task_count(&self, keeper_id: i64) -> Result<u64> {
        self.keepers
            .get(&keeper_id)
            .map(|k| k.cumulative_executed_tasks)
            .ok_or(StoreError::NotFound {
                entity: "keeper",
                id: keeper_id,
            })
    }

    async fn get_points(&self, keeper_id: i64) -> Result<f64> {
        self.keepers
            .get(&keeper_id)
            .map(|k| k.points)
            .ok_or(StoreError::NotFound {
                entity: "keeper",
                id: keeper_id,
            })
    }

    async fn update_health(
        &self,
        keeper_id: i64,
        health: HealthState,
        consecutive_failures: u32,
        last_probe_instant: DateTime<Utc>,
    ) -> Result<()> {
        let mut entry = self.keepers.get_mut(&keeper_id).ok_or(StoreError::NotFound {
            entity: "keeper",
            id: keeper_id,
        })?;
        entry.health = health;
        entry.consecutive_failures = consecutive_failures;
        entry.last_probe_instant = Some(last_probe_instant);
        Ok(())
    }

    async fn increment_executed_tasks(&self, keeper_id: i64) -> Result<()> {
        let mut entry = self.keepers.get_mut(&keeper_id).ok_or(StoreError::NotFound {
            entity: "keeper",
            id: keeper_id,
        })?;
        entry.cumulative_executed_tasks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triggerx_core::{JobCommon, ScheduleType, Target, TimeJob};

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

    fn time_job(id: i64, next: DateTime<Utc>, status: JobStatus) -> Job {
        let now = Utc::now();
        Job::Time(TimeJob {
            common: JobCommon {
                id,
                title: "t".into(),
                user_id: 1,
                linked_job_id: None,
                expiration: now + chrono::Duration::days(1),
                recurring: true,
                status,
                predicted_cost: 0.0,
                actual_cost: 0.0,
                task_ids: vec![],
                created_at: now,
                updated_at: now,
                last_executed_at: None,
                timezone: "UTC".into(),
                on_imua: false,
                consecutive_failures: 0,
            },
            schedule_type: ScheduleType::Interval,
            interval_sec: Some(60),
            cron_expr: None,
            specific_schedule: vec![],
            next_execution_instant: next,
            target: target(),
        })
    }

    #[tokio::test]
    async fn due_query_filters_by_window_and_status() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .create(time_job(1, now + chrono::Duration::seconds(5), JobStatus::Active))
            .await
            .unwrap();
        store
            .create(time_job(2, now + chrono::Duration::hours(2), JobStatus::Active))
            .await
            .unwrap();
        store
            .create(time_job(3, now + chrono::Duration::seconds(5), JobStatus::Pending))
            .await
            .unwrap();

        let due = store
            .get_time_jobs_due_by(chrono::Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].common.id, 1);
    }

    #[tokio::test]
    async fn success_task_is_immutable() {
        let store = InMemoryStore::new();
        store
            .create(time_job(1, Utc::now(), JobStatus::Active))
            .await
            .unwrap();
        let task = store
            .create_task(1, 1, Some(7), Utc::now())
            .await
            .unwrap();
        store.mark_task_success(task.id, 1.5).await.unwrap();
        let err = store.mark_task_success(task.id, 2.0).await;
        assert!(err.is_err());
        let err = store.mark_task_failed(task.id, "late".into()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn fire_failure_counter_accumulates_and_resets() {
        let store = InMemoryStore::new();
        store
            .create(time_job(1, Utc::now(), JobStatus::Active))
            .await
            .unwrap();
        assert_eq!(store.record_fire_failure(1).await.unwrap(), 1);
        assert_eq!(store.record_fire_failure(1).await.unwrap(), 2);
        store.reset_fire_failures(1).await.unwrap();
        let job = store.get_by_id(1).await.unwrap();
        assert_eq!(job.common().consecutive_failures, 0);
    }
}
