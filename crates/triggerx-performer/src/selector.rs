//! Health-aware keeper selection for a single fire (spec.md §4.6).
//!
//! The fleet view is a read-mostly snapshot replaced atomically under a
//! reader-writer lock, never a mutable graph of keeper objects
//! (spec.md §9's cyclic-graph note).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{info, warn};
use triggerx_core::{HealthState, Keeper};
use triggerx_store::KeeperGateway;

/// Weights in the load-score formula: `in_flight * w1 + consecutive_failures * w2 - points_normalized * w3`.
#[derive(Debug, Clone, Copy)]
pub struct SelectorWeights {
    pub in_flight: f64,
    pub consecutive_failures: f64,
    pub points_normalized: f64,
}

impl Default for SelectorWeights {
    fn default() -> Self {
        SelectorWeights {
            in_flight: 1.0,
            consecutive_failures: 5.0,
            points_normalized: 0.1,
        }
    }
}

pub struct PerformerSelector {
    store: Arc<dyn KeeperGateway>,
    snapshot: RwLock<HashMap<i64, Keeper>>,
    in_flight: DashMap<i64, u32>,
    weights: SelectorWeights,
}

impl PerformerSelector {
    pub fn new(store: Arc<dyn KeeperGateway>) -> Self {
        PerformerSelector {
            store,
            snapshot: RwLock::new(HashMap::new()),
            in_flight: DashMap::new(),
            weights: SelectorWeights::default(),
        }
    }

    /// Refreshes the fleet snapshot from the registry (default cadence
    /// 30 s, spec.md §6 `PERFORMER_REFRESH_SEC`). Replaces the whole
    /// map atomically.
    pub async fn refresh(&self) -> Result<(), triggerx_store::StoreError> {
        let keepers = self.store.list_keepers().await?;
        let map: HashMap<i64, Keeper> = keepers.into_iter().map(|k| (k.id, k)).collect();
        *self.snapshot.write() = map;
        Ok(())
    }

    /// Runs `refresh` on a fixed interval until the process shuts down.
    pub async fn run_refresh_loop(self: Arc<Self>, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "performer fleet refresh failed");
            }
        }
    }

    pub fn track_dispatch_start(&self, keeper_id: i64) {
        *self.in_flight.entry(keeper_id).or_insert(0) += 1;
    }

    pub fn track_dispatch_end(&self, keeper_id: i64) {
        if let Some(mut count) = self.in_flight.get_mut(&keeper_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// Selects the lowest-load healthy-or-degraded keeper matching
    /// `on_imua`, breaking ties by smallest keeper id. Returns `None`
    /// when no candidate exists (spec.md §4.6 step 3: `no-performer`).
    pub fn select(&self, on_imua: bool) -> Option<Keeper> {
        let snapshot = self.snapshot.read();
        let candidates: Vec<&Keeper> = snapshot
            .values()
            .filter(|k| {
                k.on_imua == on_imua
                    && matches!(k.health, HealthState::Healthy | HealthState::Degraded)
            })
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let max_points = candidates
            .iter()
            .map(|k| k.points)
            .fold(0.0_f64, f64::max)
            .max(1.0);

        let scored = candidates.iter().map(|k| {
            let in_flight = self.in_flight.get(&k.id).map(|c| *c).unwrap_or(0) as f64;
            let points_normalized = k.points / max_points;
            let score = in_flight * self.weights.in_flight
                + (k.consecutive_failures as f64) * self.weights.consecutive_failures
                - points_normalized * self.weights.points_normalized;
            (score, k.id, (*k).clone())
        });

        scored
            .min_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            })
            .map(|(_, _, keeper)| keeper)
    }

    pub fn snapshot_len(&self) -> usize {
        self.snapshot.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use triggerx_store::InMemoryStore;

    fn keeper(id: i64, health: HealthState, failures: u32, points: f64) -> Keeper {
        Keeper {
            id,
            address: format!("0x{id}"),
            url: format!("http://keeper{id}"),
            health,
            consecutive_failures: failures,
            last_probe_instant: Some(Utc::now()),
            cumulative_executed_tasks: 0,
            points,
            on_imua: true,
        }
    }

    async fn selector_with(keepers: Vec<Keeper>) -> PerformerSelector {
        let store = Arc::new(InMemoryStore::new());
        for k in keepers {
            store.seed_keeper(k);
        }
        let selector = PerformerSelector::new(store);
        selector.refresh().await.unwrap();
        selector
    }

    #[tokio::test]
    async fn never_selects_unreachable_keeper() {
        let selector = selector_with(vec![
            keeper(1, HealthState::Unreachable, 0, 100.0),
            keeper(2, HealthState::Healthy, 0, 0.0),
        ])
        .await;
        let chosen = selector.select(true).unwrap();
        assert_eq!(chosen.id, 2);
    }

    #[tokio::test]
    async fn returns_none_when_no_candidate() {
        let selector = selector_with(vec![keeper(1, HealthState::Unreachable, 0, 0.0)]).await;
        assert!(selector.select(true).is_none());
    }

    #[tokio::test]
    async fn ties_broken_by_smallest_id() {
        let selector = selector_with(vec![
            keeper(5, HealthState::Healthy, 0, 0.0),
            keeper(2, HealthState::Healthy, 0, 0.0),
        ])
        .await;
        let chosen = selector.select(true).unwrap();
        assert_eq!(chosen.id, 2);
    }

    #[tokio::test]
    async fn in_flight_load_pushes_score_up() {
        let selector = selector_with(vec![
            keeper(1, HealthState::Healthy, 0, 0.0),
            keeper(2, HealthState::Healthy, 0, 0.0),
        ])
        .await;
        selector.track_dispatch_start(1);
        selector.track_dispatch_start(1);
        let chosen = selector.select(true).unwrap();
        assert_eq!(chosen.id, 2);
    }
}
