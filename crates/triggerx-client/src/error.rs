use thiserror::Error;
use triggerx_core::Error as CoreError;

/// Connection-level errors get up to 2 retries (3 attempts total).
pub const CONNECTION_ERROR_MAX_ATTEMPTS: u32 = 3;
/// A 5xx response gets exactly 1 retry (2 attempts total) — spec.md
/// §4.7 step 3 budgets it more tightly than a connection-level failure.
pub const SERVER_ERROR_MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("remote rejected with status {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("response decode error: {0}")]
    Decode(String),
    #[error("circuit breaker open for {target}")]
    CircuitOpen { target: String },
}

impl ClientError {
    /// The total-attempt budget for this error's class, or `None` if it
    /// should never be retried (4xx and everything else, spec.md §4.7
    /// step 3).
    pub fn retry_budget(&self) -> Option<u32> {
        match self {
            ClientError::Connect(_) | ClientError::Timeout => Some(CONNECTION_ERROR_MAX_ATTEMPTS),
            ClientError::Remote { status, .. } if *status >= 500 => {
                Some(SERVER_ERROR_MAX_ATTEMPTS)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_connect() {
            ClientError::Connect(e.to_string())
        } else {
            ClientError::Decode(e.to_string())
        }
    }
}

impl From<ClientError> for CoreError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Timeout => CoreError::Timeout { timeout_secs: 0 },
            ClientError::CircuitOpen { target } => CoreError::CircuitOpen { target },
            other => CoreError::Network {
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
