//! Single process-wide tracing initialization (spec.md §9: no global
//! mutable state — every other module receives its logger through
//! `tracing`'s thread-local span context, not a singleton it reaches
//! into directly).

use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub fn init(rust_log: &str) {
    let filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("tracing subscriber already initialized");
    }
}
