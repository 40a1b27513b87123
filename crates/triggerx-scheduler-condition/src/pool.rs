//! Supervisor that reconciles the set of running workers against the
//! store's active condition jobs (spec.md §5, §9: "wanted vs running").

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use triggerx_client::HttpClient;
use triggerx_dispatch::Dispatcher;
use triggerx_store::JobStoreGateway;

use crate::cancel::CancelToken;
use crate::worker::ConditionWorker;

struct RunningWorker {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

pub struct ConditionWorkerPool {
    store: Arc<dyn JobStoreGateway>,
    client: Arc<HttpClient>,
    dispatcher: Arc<Dispatcher>,
    worker_poll_interval: Duration,
    reconcile_interval: Duration,
    running: DashMap<i64, RunningWorker>,
}

impl ConditionWorkerPool {
    pub fn new(
        store: Arc<dyn JobStoreGateway>,
        client: Arc<HttpClient>,
        dispatcher: Arc<Dispatcher>,
        worker_poll_interval: Duration,
    ) -> Self {
        ConditionWorkerPool {
            store,
            client,
            dispatcher,
            worker_poll_interval,
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

    /// One reconcile pass: starts a worker for every active job not
    /// already running, and cancels any running worker whose job is no
    /// longer active or has disappeared.
    pub async fn reconcile(&self) {
        let wanted: HashSet<i64> = match self.store.get_active_condition_jobs().await {
            Ok(jobs) => jobs.iter().map(|j| j.common.id).collect(),
            Err(e) => {
                warn!(error = %e, "failed to list active condition jobs");
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
            self.stop_worker(job_id);
        }

        // Restart any worker whose task has exited while its job
        // remains active (spec.md §4.4 worker lifecycle).
        let dead: Vec<i64> = self
            .running
            .iter()
            .filter(|e| e.value().handle.is_finished())
            .map(|e| *e.key())
            .collect();
        for job_id in dead {
            self.running.remove(&job_id);
            if wanted.contains(&job_id) {
                info!(job_id, "restarting condition worker that exited while job is active");
                self.spawn_worker(job_id);
            }
        }
    }

    fn spawn_worker(&self, job_id: i64) {
        let cancel = CancelToken::new();
        let worker = Arc::new(ConditionWorker::new(
            job_id,
            self.store.clone(),
            self.client.clone(),
            self.dispatcher.clone(),
            self.worker_poll_interval,
        ));
        let handle = tokio::spawn(worker.run(cancel.clone()));
        self.running.insert(job_id, RunningWorker { cancel, handle });
        info!(job_id, "started condition worker");
    }

    fn stop_worker(&self, job_id: i64) {
        if let Some((_, worker)) = self.running.remove(&job_id) {
            worker.cancel.cancel();
            info!(job_id, "stopped condition worker");
        }
    }

    /// Drives the reconcile loop until `shutdown` fires, then cancels
    /// every running worker.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.reconcile_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reconcile().await;
                }
                _ = shutdown.recv() => {
                    info!("condition worker pool shutting down");
                    break;
                }
            }
        }

        for entry in self.running.iter() {
            entry.value().cancel.cancel();
        }
    }
}
