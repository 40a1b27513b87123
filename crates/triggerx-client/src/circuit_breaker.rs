//! Circuit breaker wrapping outbound calls to performers, value sources,
//! and chain RPC.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        CircuitConfig {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_state_change: RwLock<Instant>,
    total_requests: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        CircuitBreaker {
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_state_change: RwLock::new(Instant::now()),
            total_requests: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    /// Current state, lazily transitioning `Open -> HalfOpen` once the
    /// configured timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        let current = *self.state.read();
        if current == CircuitState::Open {
            let elapsed = self.last_state_change.read().elapsed();
            if elapsed >= self.config.timeout {
                self.transition_to(CircuitState::HalfOpen);
                return CircuitState::HalfOpen;
            }
        }
        current
    }

    pub fn can_execute(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                let count = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.success_threshold {
                    self.reset();
                }
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open);
            }
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn transition_to(&self, new_state: CircuitState) {
        let mut state = self.state.write();
        if *state == new_state {
            return;
        }
        info!(from = ?*state, to = ?new_state, "circuit breaker state transition");
        *state = new_state;
        *self.last_state_change.write() = Instant::now();
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.transition_to(CircuitState::Closed);
    }

    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !self.can_execute() {
            return Err(CircuitBreakerError::Open);
        }
        match f().await {
            Ok(v) => {
                self.record_success();
                Ok(v)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    Open,
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::Open => write!(f, "circuit breaker open"),
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for CircuitBreakerError<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let cb = CircuitBreaker::new(CircuitConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout: Duration::from_millis(50),
        });
        let _ = cb.execute(|| async { Err::<(), _>("e1") }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        let _ = cb.execute(|| async { Err::<(), _>("e2") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.execute(|| async { Ok::<_, &str>(()) }).await;
        assert!(matches!(rejected, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn half_open_recovers_to_closed_on_success() {
        let cb = CircuitBreaker::new(CircuitConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout: Duration::from_millis(10),
        });
        let _ = cb.execute(|| async { Err::<(), _>("e") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let ok = cb.execute(|| async { Ok::<_, &str>(()) }).await;
        assert!(ok.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
