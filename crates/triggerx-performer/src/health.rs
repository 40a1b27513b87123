//! Independent keeper health prober (spec.md §4.6): pings `/status` on
//! a fixed cadence and reclassifies health from the observed streak.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tracing::warn;
use triggerx_client::HttpClient;
use triggerx_core::HealthState;
use triggerx_store::KeeperGateway;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const UNREACHABLE_THRESHOLD: u32 = 3;

pub struct HealthProber {
    store: Arc<dyn KeeperGateway>,
    client: Arc<HttpClient>,
    streaks: DashMap<i64, u32>,
}

impl HealthProber {
    pub fn new(store: Arc<dyn KeeperGateway>, client: Arc<HttpClient>) -> Self {
        HealthProber {
            store,
            client,
            streaks: DashMap::new(),
        }
    }

    /// Probes every known keeper once. Three consecutive failures mark
    /// a keeper unreachable; one failure after a success marks it
    /// degraded; a success restores healthy and resets the streak.
    pub async fn probe_all(&self) {
        let keepers = match self.store.list_keepers().await {
            Ok(k) => k,
            Err(e) => {
                warn!(error = %e, "failed to list keepers for health probe");
                return;
            }
        };

        for keeper in keepers {
            let healthy = self.client.probe_status(&keeper.url, PROBE_TIMEOUT).await;
            let new_state = if healthy {
                self.streaks.insert(keeper.id, 0);
                HealthState::Healthy
            } else {
                let mut streak = self.streaks.entry(keeper.id).or_insert(0);
                *streak += 1;
                if *streak >= UNREACHABLE_THRESHOLD {
                    HealthState::Unreachable
                } else {
                    HealthState::Degraded
                }
            };

            let failures = self
                .streaks
                .get(&keeper.id)
                .map(|s| *s)
                .unwrap_or(0);
            if let Err(e) = self
                .store
                .update_health(keeper.id, new_state, failures, Utc::now())
                .await
            {
                warn!(keeper_id = keeper.id, error = %e, "failed to persist health update");
            }
        }
    }

    pub async fn run_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.probe_all().await;
        }
    }
}
