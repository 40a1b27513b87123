//! Domain model: jobs, tasks, and keepers.
//!
//! The three job kinds share a common envelope but have disjoint
//! extensions, so they are modeled as a tagged variant rather than
//! subclassed (spec.md §9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic lifecycle state. Transitions are monotonic except
/// `pending <-> active`; once `completed` or `cancelled`, no further
/// fires may be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

/// Fields shared by every job kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCommon {
    pub id: i64,
    pub title: String,
    pub user_id: i64,
    pub linked_job_id: Option<i64>,
    pub expiration: DateTime<Utc>,
    pub recurring: bool,
    pub status: JobStatus,
    pub predicted_cost: f64,
    pub actual_cost: f64,
    pub task_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub timezone: String,
    pub on_imua: bool,
    /// Consecutive fire failures; reset on any success. The job is
    /// transitioned to `Failed` once this reaches the configured
    /// threshold (default 5, spec.md §7).
    pub consecutive_failures: u32,
}

impl JobCommon {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Cancelled)
    }
}

/// The call a fire ultimately delivers to a performer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub chain_id: String,
    pub contract: String,
    pub function: String,
    pub abi: String,
    pub arg_type: String,
    pub arguments: Vec<serde_json::Value>,
    pub dynamic_args_url: Option<String>,
}

impl Target {
    /// definition-kind parity: even means "has a dynamic-argument
    /// script" (spec.md §3, §4.3 step 2a).
    pub fn has_dynamic_args(&self) -> bool {
        self.dynamic_args_url
            .as_ref()
            .map(|u| !u.is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Interval,
    Cron,
    Specific,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeJob {
    pub common: JobCommon,
    pub schedule_type: ScheduleType,
    pub interval_sec: Option<u64>,
    pub cron_expr: Option<String>,
    pub specific_schedule: Vec<DateTime<Utc>>,
    pub next_execution_instant: DateTime<Utc>,
    pub target: Target,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTrigger {
    pub chain_id: String,
    pub contract: String,
    pub event_signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventJob {
    pub common: JobCommon,
    pub trigger: EventTrigger,
    pub target: Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    GreaterThan,
    LessThan,
    InsideRange,
    OutsideRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSourceType {
    HttpJson,
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionJob {
    pub common: JobCommon,
    pub condition_type: ConditionType,
    pub upper_limit: f64,
    pub lower_limit: f64,
    pub value_source_type: ValueSourceType,
    pub value_source_url: String,
    pub target: Target,
}

impl ConditionJob {
    /// Evaluates the predicate for `value`. NaN never satisfies any
    /// predicate (spec.md §4.4).
    pub fn is_satisfied(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match self.condition_type {
            ConditionType::GreaterThan => value > self.upper_limit,
            ConditionType::LessThan => value < self.lower_limit,
            ConditionType::InsideRange => self.lower_limit <= value && value <= self.upper_limit,
            ConditionType::OutsideRange => {
                !(self.lower_limit <= value && value <= self.upper_limit)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Job {
    Time(TimeJob),
    Event(EventJob),
    Condition(ConditionJob),
}

impl Job {
    pub fn common(&self) -> &JobCommon {
        match self {
            Job::Time(j) => &j.common,
            Job::Event(j) => &j.common,
            Job::Condition(j) => &j.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut JobCommon {
        match self {
            Job::Time(j) => &mut j.common,
            Job::Event(j) => &mut j.common,
            Job::Condition(j) => &mut j.common,
        }
    }

    pub fn id(&self) -> i64 {
        self.common().id
    }
}

/// The execution record produced by one fire. Once written as success
/// it is immutable; as failure it may only be superseded by a retried
/// task with a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub job_id: i64,
    pub definition_kind: u8,
    pub performer_keeper_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub execution_instant: DateTime<Utc>,
    pub cost_opx: f64,
    pub success: bool,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown,
    Healthy,
    Degraded,
    Unreachable,
}

/// A keeper's health state is owned by the Performer Selector; every
/// other field is owned by the registry (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keeper {
    pub id: i64,
    pub address: String,
    pub url: String,
    pub health: HealthState,
    pub consecutive_failures: u32,
    pub last_probe_instant: Option<DateTime<Utc>>,
    pub cumulative_executed_tasks: u64,
    pub points: f64,
    pub on_imua: bool,
}
