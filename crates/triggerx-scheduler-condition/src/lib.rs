pub mod cancel;
pub mod pool;
pub mod worker;

pub use cancel::CancelToken;
pub use pool::ConditionWorkerPool;
pub use worker::{ConditionWorker, WorkerState};
