pub mod cancel;
pub mod pool;
pub mod source;
pub mod worker;

pub use cancel::CancelToken;
pub use pool::EventSubscriberPool;
pub use source::{LogEvent, LogSource, LogSourceError};
pub use worker::EventWorker;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use triggerx_client::{HttpClient, RetryPolicy};
    use triggerx_core::{EventJob, EventTrigger, JobCommon, JobStatus, Target};
    use triggerx_dispatch::Dispatcher;
    use triggerx_events::EventBus;
    use triggerx_performer::PerformerSelector;
    use triggerx_store::InMemoryStore;

    use super::*;

    struct ScriptedSource {
        calls: AtomicU64,
    }

    #[async_trait]
    impl LogSource for ScriptedSource {
        async fn poll_logs(
            &self,
            _chain_id: &str,
            _contract: &str,
            _event_signature: &str,
            _from_block: u64,
        ) -> Result<Vec<LogEvent>, LogSourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(vec![LogEvent {
                    block_number: 100,
                    log_index: 0,
                    block_timestamp: Utc::now(),
                    data: serde_json::json!({}),
                }])
            } else {
                Ok(vec![])
            }
        }
    }

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

    fn event_job(id: i64) -> triggerx_core::Job {
        let now = Utc::now();
        triggerx_core::Job::Event(EventJob {
            common: JobCommon {
                id,
                title: "e".into(),
                user_id: 1,
                linked_job_id: None,
                expiration: now + chrono::Duration::hours(1),
                recurring: true,
                status: JobStatus::Active,
                predicted_cost: 0.0,
                actual_cost: 0.0,
                task_ids: vec![],
                created_at: now,
                updated_at: now,
                last_executed_at: None,
                timezone: "UTC".into(),
                on_imua: true,
                consecutive_failures: 0,
            },
            trigger: EventTrigger {
                chain_id: "1".into(),
                contract: "0xabc".into(),
                event_signature: "Transfer(address,address,uint256)".into(),
            },
            target: target(),
        })
    }

    #[tokio::test]
    async fn watermark_prevents_reprocessing_the_same_log() {
        let store = Arc::new(InMemoryStore::new());
        store.create(event_job(1)).await.unwrap();

        let selector = Arc::new(PerformerSelector::new(store.clone()));
        let client = Arc::new(HttpClient::new(RetryPolicy::default()));
        let events = Arc::new(EventBus::default());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            store.clone(),
            selector,
            client,
            events,
        ));
        let source = Arc::new(ScriptedSource {
            calls: AtomicU64::new(0),
        });

        let worker = Arc::new(EventWorker::new(1, store.clone(), source, dispatcher, 4));
        let cancel = CancelToken::new();
        let worker_clone = worker.clone();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move { worker_clone.run(cancel_clone).await });

        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        let _ = handle.await;

        let job = store.get_by_id(1).await.unwrap();
        assert_eq!(job.common().task_ids.len(), 1);
    }
}
