pub mod circuit_breaker;
pub mod error;
pub mod http;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitConfig, CircuitState};
pub use error::{ClientError, Result};
pub use http::{ExecuteResponse, HttpClient, TaskEnvelope, TaskTarget};
pub use retry::{retry_with_backoff, DeliveryOutcome, RetryPolicy};
