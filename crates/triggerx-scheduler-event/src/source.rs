//! Chain-log subscription boundary. The actual RPC/websocket plumbing
//! is an external collaborator (spec.md §1 Non-goals: "on-chain
//! contract bindings"); this crate depends only on this narrow trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub block_number: u64,
    pub log_index: u32,
    pub block_timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum LogSourceError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Polling view over a subscription: each call returns logs observed
/// since `from_block` (inclusive) matching the given filter. Modeling
/// a push subscription as idempotent polling keeps the watermark
/// de-duplication logic in `EventWorker` regardless of transport.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn poll_logs(
        &self,
        chain_id: &str,
        contract: &str,
        event_signature: &str,
        from_block: u64,
    ) -> Result<Vec<LogEvent>, LogSourceError>;
}
