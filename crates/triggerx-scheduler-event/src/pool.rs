//! Supervisor reconciling running event-log readers against the
//! store's active event jobs, mirroring the condition pool's pattern.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use triggerx_dispatch::Dispatcher;
use triggerx_store::JobStoreGateway;

use crate::cancel::CancelToken;
use crate::source::LogSource;
use crate::worker::EventWorker;

struct RunningWorker {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

pub struct EventSubscriberPool {
    store: Arc<dyn JobStoreGateway>,
    log_source: Arc<dyn LogSource>,
    dispatcher: Arc<Dispatcher>,
    confirmation_blocks: u64,
    reconcile_interval: Duration,
    running: DashMap<i64, RunningWorker>,
}

impl EventSubscriberPool {
    pub fn new(
        store: Arc<dyn JobStoreGateway>,
        log_source: Arc<dyn LogSource>,
        dispatcher: Arc<Dispatcher>,
        confirmation_blocks: u64,
    ) -> Self {
        EventSubscriberPool {
            store,
            log_source,
            dispatcher,
            confirmation_blocks,
            reconcile_interval: Duration::from_secs(10),
            running: DashMap::new(),
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self, job_id: i64) -> bool {
        self.running.contains_key(&job_id)
    }

    pub async fn reconcile(&self) {
        let wanted: HashSet<i64> = match self.store.get_active_event_jobs().await {
            Ok(jobs) => jobs.iter().map(|j| j.common.id).collect(),
            Err(e) => {
                warn!(error = %e, "failed to list active event jobs");
                return;
            }
        };

        for job_id in wanted.iter().copied() {
            if !self.running.contains_key(&job_id) {
                self.spawn_worker(job_id);
            }
        }

        let to_stop: Vec<i64> = self
            .running
            .iter()
            .filter(|e| !wanted.contains(e.key()))
            .map(|e| *e.key())
            .collect();
        for job_id in to_stop {
            if let Some((_, worker)) = self.running.remove(&job_id) {
                worker.cancel.cancel();
                info!(job_id, "stopped event worker");
            }
        }

        let dead: Vec<i64> = self
            .running
            .iter()
            .filter(|e| e.value().handle.is_finished())
            .map(|e| *e.key())
            .collect();
        for job_id in dead {
            self.running.remove(&job_id);
            if wanted.contains(&job_id) {
                self.spawn_worker(job_id);
            }
        }
    }

    fn spawn_worker(&self, job_id: i64) {
        let cancel = CancelToken::new();
        let worker = Arc::new(EventWorker::new(
            job_id,
            self.store.clone(),
            self.log_source.clone(),
            self.dispatcher.clone(),
            self.confirmation_blocks,
        ));
        let handle = tokio::spawn(worker.run(cancel.clone()));
        self.running.insert(job_id, RunningWorker { cancel, handle });
        info!(job_id, "started event worker");
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.reconcile_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => { self.reconcile().await; }
                _ = shutdown.recv() => {
                    info!("event subscriber pool shutting down");
                    break;
                }
            }
        }
        for entry in self.running.iter() {
            entry.value().cancel.cancel();
        }
    }
}
