//! Ordered graceful shutdown (spec.md §5): stop acceptors, cancel all
//! workers, wait for in-flight tasks up to a grace period, then
//! force-close. Grounded nearly verbatim on `rustpress-server::shutdown`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

pub type ShutdownReceiver = broadcast::Receiver<()>;
pub type ShutdownSender = broadcast::Sender<()>;

pub struct ShutdownController {
    sender: ShutdownSender,
    is_shutting_down: Arc<AtomicBool>,
    timeout: Duration,
}

impl ShutdownController {
    pub fn new(timeout: Duration) -> Self {
        let (sender, _) = broadcast::channel(1);
        ShutdownController {
            sender,
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    pub fn with_default_timeout() -> Self {
        Self::new(Duration::from_secs(10))
    }

    pub fn subscribe(&self) -> ShutdownReceiver {
        self.sender.subscribe()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn shutdown(&self) {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("initiating graceful shutdown");
            let _ = self.sender.send(());
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe();
        tokio::select! {
            _ = rx.recv() => {}
            _ = tokio::time::sleep(self.timeout) => {}
        }
    }
}

/// Listens for Ctrl-C or SIGTERM and triggers shutdown.
pub async fn listen_for_shutdown_signals(controller: Arc<ShutdownController>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }

    controller.shutdown();
}

/// Tracks in-flight work during drain so the shutdown sequence can wait
/// for it with a grace period.
pub struct ShutdownHandle {
    controller: Arc<ShutdownController>,
    active_tasks: Arc<AtomicUsize>,
}

impl ShutdownHandle {
    pub fn new(controller: Arc<ShutdownController>) -> Self {
        ShutdownHandle {
            controller,
            active_tasks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn register_task(&self) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            active_tasks: self.active_tasks.clone(),
        }
    }

    pub fn active_task_count(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    pub async fn wait_for_tasks(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active_task_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.active_task_count(),
                    "grace period elapsed with tasks still in flight"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.controller.is_shutting_down()
    }

    pub fn subscribe(&self) -> ShutdownReceiver {
        self.controller.subscribe()
    }
}

pub struct TaskGuard {
    active_tasks: Arc<AtomicUsize>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.active_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    StopAccepting,
    CancelWorkers,
    DrainConnections,
    ForceClose,
}

impl ShutdownPhase {
    pub fn all() -> [ShutdownPhase; 4] {
        [
            ShutdownPhase::StopAccepting,
            ShutdownPhase::CancelWorkers,
            ShutdownPhase::DrainConnections,
            ShutdownPhase::ForceClose,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ShutdownPhase::StopAccepting => "stop_accepting",
            ShutdownPhase::CancelWorkers => "cancel_workers",
            ShutdownPhase::DrainConnections => "drain_connections",
            ShutdownPhase::ForceClose => "force_close",
        }
    }
}

type PhaseHandler = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct ShutdownExecutor {
    handlers: Vec<(ShutdownPhase, PhaseHandler)>,
}

impl ShutdownExecutor {
    pub fn new() -> Self {
        ShutdownExecutor {
            handlers: Vec::new(),
        }
    }

    pub fn register<F, Fut>(&mut self, phase: ShutdownPhase, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers
            .push((phase, Box::new(move || Box::pin(handler()))));
    }

    pub async fn execute(&mut self) {
        self.handlers.sort_by_key(|(phase, _)| *phase);
        for (phase, handler) in &self.handlers {
            info!(phase = phase.name(), "running shutdown phase");
            handler().await;
        }
    }
}

impl Default for ShutdownExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let controller = ShutdownController::with_default_timeout();
        controller.shutdown();
        controller.shutdown();
        assert!(controller.is_shutting_down());
    }

    #[tokio::test]
    async fn task_guard_decrements_on_drop() {
        let controller = Arc::new(ShutdownController::with_default_timeout());
        let handle = ShutdownHandle::new(controller);
        {
            let _guard = handle.register_task();
            assert_eq!(handle.active_task_count(), 1);
        }
        assert_eq!(handle.active_task_count(), 0);
    }

    #[tokio::test]
    async fn executor_runs_phases_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut executor = ShutdownExecutor::new();

        let o1 = order.clone();
        executor.register(ShutdownPhase::ForceClose, move || {
            let o1 = o1.clone();
            async move {
                o1.lock().push(ShutdownPhase::ForceClose);
            }
        });
        let o2 = order.clone();
        executor.register(ShutdownPhase::StopAccepting, move || {
            let o2 = o2.clone();
            async move {
                o2.lock().push(ShutdownPhase::StopAccepting);
            }
        });

        executor.execute().await;
        assert_eq!(
            *order.lock(),
            vec![ShutdownPhase::StopAccepting, ShutdownPhase::ForceClose]
        );
        let _ = AtomicU32::new(0);
    }
}
