pub mod config;
pub mod error;
pub mod model;

pub use config::AppConfig;
pub use error::{Error, Result, StoreErrorKind};
pub use model::{
    ConditionJob, ConditionType, EventJob, EventTrigger, HealthState, Job, JobCommon, JobStatus,
    Keeper, ScheduleType, Target, Task, TimeJob, ValueSourceType,
};
