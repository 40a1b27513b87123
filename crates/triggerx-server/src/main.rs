//! Process entrypoint: wires every component together and drives the
//! ordered shutdown sequence (spec.md §5, §9).

mod health;
mod shutdown;
mod telemetry;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use triggerx_client::{HttpClient, RetryPolicy};
use triggerx_core::AppConfig;
use triggerx_dispatch::Dispatcher;
use triggerx_events::EventBus;
use triggerx_performer::{HealthProber, PerformerSelector};
use triggerx_scheduler_condition::ConditionWorkerPool;
use triggerx_scheduler_event::{EventSubscriberPool, LogEvent, LogSource, LogSourceError};
use triggerx_scheduler_time::{TimeScheduler, TimeSchedulerConfig};
use triggerx_store::InMemoryStore;

use crate::health::HealthState;
use crate::shutdown::{listen_for_shutdown_signals, ShutdownController};

/// Stand-in for the chain-RPC log subscription (out of scope per
/// spec.md's Non-goals): reports no new logs. A deployment that needs
/// real event triggers supplies its own `LogSource`.
struct NullLogSource;

#[async_trait]
impl LogSource for NullLogSource {
    async fn poll_logs(
        &self,
        _chain_id: &str,
        _contract: &str,
        _event_signature: &str,
        _from_block: u64,
    ) -> Result<Vec<LogEvent>, LogSourceError> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    telemetry::init(&config.rust_log);

    tracing::info!("starting triggerx-server");

    let store = Arc::new(InMemoryStore::new());
    let events = Arc::new(EventBus::default());
    let client = Arc::new(HttpClient::new(RetryPolicy::default()));
    let selector = Arc::new(PerformerSelector::new(store.clone()));
    let health_prober = Arc::new(HealthProber::new(store.clone(), client.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        store.clone(),
        selector.clone(),
        client.clone(),
        events.clone(),
    ));

    let time_scheduler = Arc::new(TimeScheduler::new(
        store.clone(),
        selector.clone(),
        dispatcher.clone(),
        TimeSchedulerConfig {
            poll_interval: config.poll_interval(),
            look_ahead: config.look_ahead(),
            fanout: config.dispatch_fanout,
        },
    ));

    let condition_pool = Arc::new(ConditionWorkerPool::new(
        store.clone(),
        client.clone(),
        dispatcher.clone(),
        config.condition_poll_interval(),
    ));

    let event_pool = Arc::new(EventSubscriberPool::new(
        store.clone(),
        Arc::new(NullLogSource),
        dispatcher.clone(),
        config.event_confirmation_blocks,
    ));

    let health_state = HealthState::new(
        store.clone(),
        selector.clone(),
        std::time::Duration::from_secs(config.performer_refresh_sec * 3),
    );

    let controller = Arc::new(ShutdownController::new(config.shutdown_grace_period()));

    if selector.refresh().await.is_err() {
        tracing::warn!("initial performer snapshot refresh failed; starting with an empty fleet");
    }
    health_state.record_performer_refresh();

    let mut join_set = tokio::task::JoinSet::new();

    {
        let selector = selector.clone();
        let refresh_interval = std::time::Duration::from_secs(config.performer_refresh_sec);
        let mut shutdown_rx = controller.subscribe();
        join_set.spawn(async move {
            tokio::select! {
                _ = selector.clone().run_refresh_loop(refresh_interval) => {}
                _ = shutdown_rx.recv() => {}
            }
        });
    }

    {
        let prober = health_prober.clone();
        let mut shutdown_rx = controller.subscribe();
        let interval = config.poll_interval();
        join_set.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => prober.probe_all().await,
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    {
        let scheduler = time_scheduler.clone();
        let shutdown_rx = controller.subscribe();
        join_set.spawn(async move { scheduler.run(shutdown_rx).await });
    }

    {
        let pool = condition_pool.clone();
        let shutdown_rx = controller.subscribe();
        join_set.spawn(async move { pool.run(shutdown_rx).await });
    }

    {
        let pool = event_pool.clone();
        let shutdown_rx = controller.subscribe();
        join_set.spawn(async move { pool.run(shutdown_rx).await });
    }

    let app: Router = health::router(health_state);
    let listener = tokio::net::TcpListener::bind(&config.health_bind_addr).await?;
    tracing::info!(addr = %config.health_bind_addr, "health endpoint listening");
    let server_shutdown = controller.subscribe();
    join_set.spawn(async move {
        let mut rx = server_shutdown;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.recv().await;
            })
            .await
            .ok();
    });

    listen_for_shutdown_signals(controller.clone()).await;

    tracing::info!("waiting for components to drain");
    let grace = config.shutdown_grace_period();
    let drain = async {
        while join_set.join_next().await.is_some() {}
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!("shutdown grace period elapsed; aborting remaining tasks");
        join_set.shutdown().await;
    }

    tracing::info!("triggerx-server stopped");
    Ok(())
}
