pub mod dispatcher;
pub mod error;

pub use dispatcher::{Dispatcher, FireOutcome, FireRequest, DEFAULT_FAILURE_THRESHOLD};
pub use error::DispatchError;
