//! Minimal liveness/readiness surface (spec.md §A.4): store reachability
//! and performer-snapshot freshness, grounded on
//! `rustpress-health::checker` and trimmed to what this core needs. The
//! registry's full CRUD HTTP API stays out of scope; this is bare
//! infra every long-running service in the corpus carries.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use triggerx_performer::PerformerSelector;
use triggerx_store::JobStoreGateway;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: Status,
    pub store_reachable: bool,
    pub performer_snapshot_age_secs: Option<i64>,
    pub started_at: DateTime<Utc>,
}

pub struct HealthState {
    store: Arc<dyn JobStoreGateway>,
    selector: Arc<PerformerSelector>,
    started_at: DateTime<Utc>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
    stale_after: Duration,
}

impl HealthState {
    pub fn new(
        store: Arc<dyn JobStoreGateway>,
        selector: Arc<PerformerSelector>,
        stale_after: Duration,
    ) -> Arc<Self> {
        Arc::new(HealthState {
            store,
            selector,
            started_at: Utc::now(),
            last_refresh: RwLock::new(None),
            stale_after,
        })
    }

    pub fn record_performer_refresh(&self) {
        *self.last_refresh.write() = Some(Utc::now());
    }

    pub async fn check(&self) -> HealthReport {
        // A zero-lookahead readiness probe is enough to confirm the
        // store responds at all.
        let store_reachable = self
            .store
            .get_time_jobs_due_by(chrono::Duration::seconds(0))
            .await
            .is_ok();

        let snapshot_age = self
            .last_refresh
            .read()
            .map(|t| (Utc::now() - t).num_seconds());

        let snapshot_stale = snapshot_age
            .map(|age| age > self.stale_after.as_secs() as i64)
            .unwrap_or(false);

        let status = if !store_reachable {
            Status::Unhealthy
        } else if snapshot_stale || self.selector.snapshot_len() == 0 {
            Status::Degraded
        } else {
            Status::Healthy
        };

        HealthReport {
            status,
            store_reachable,
            performer_snapshot_age_secs: snapshot_age,
            started_at: self.started_at,
        }
    }
}

async fn healthz(State(state): State<Arc<HealthState>>) -> Json<HealthReport> {
    Json(state.check().await)
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new().route("/healthz", get(healthz)).with_state(state)
}
