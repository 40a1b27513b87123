//! Internal domain event bus (ambient stack — not part of spec.md's
//! module boundaries, but every long-running service in the corpus
//! carries one for cross-component notification). Grounded on
//! `rustpress-events::bus`, trimmed to the job-lifecycle events this
//! core emits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone)]
pub enum DomainEvent {
    JobActivated {
        job_id: i64,
        at: DateTime<Utc>,
    },
    JobFired {
        job_id: i64,
        task_id: i64,
        execution_instant: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: i64,
        job_id: i64,
        success: bool,
    },
    JobCompleted {
        job_id: i64,
    },
    JobFailed {
        job_id: i64,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub max_history: usize,
    pub enable_history: bool,
    pub broadcast_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        EventBusConfig {
            max_history: 256,
            enable_history: false,
            broadcast_capacity: 256,
        }
    }
}

pub struct EventBus {
    tx: broadcast::Sender<Arc<DomainEvent>>,
    history: RwLock<Vec<Arc<DomainEvent>>>,
    config: EventBusConfig,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (tx, _rx) = broadcast::channel(config.broadcast_capacity);
        EventBus {
            tx,
            history: RwLock::new(Vec::new()),
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.tx.subscribe()
    }

    /// Broadcasts an event to all current subscribers; a send with no
    /// subscribers is not an error, matching the teacher's bus (events
    /// emitted before anyone subscribes are simply dropped unless
    /// history is enabled).
    pub fn publish(&self, event: DomainEvent) {
        let event = Arc::new(event);
        trace!(?event, "publishing domain event");

        if self.config.enable_history {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.config.max_history {
                let excess = history.len() - self.config.max_history;
                history.drain(0..excess);
            }
        }

        let _ = self.tx.send(event);
    }

    pub fn history(&self) -> Vec<Arc<DomainEvent>> {
        self.history.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(DomainEvent::JobActivated {
            job_id: 1,
            at: Utc::now(),
        });

        let received = rx.recv().await.unwrap();
        assert!(matches!(*received, DomainEvent::JobActivated { job_id: 1, .. }));
    }

    #[tokio::test]
    async fn history_accumulates_when_enabled() {
        let bus = EventBus::new(EventBusConfig {
            enable_history: true,
            ..EventBusConfig::default()
        });
        bus.publish(DomainEvent::JobCompleted { job_id: 1 });
        bus.publish(DomainEvent::JobCompleted { job_id: 2 });
        assert_eq!(bus.history().len(), 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(DomainEvent::JobCompleted { job_id: 1 });
    }
}
