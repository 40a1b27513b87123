//! Process-wide configuration, loaded once at startup and handed to every
//! component by `Arc` (spec.md §9: no global mutable state).

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Configuration recognized via environment variables (spec.md §6),
/// plus the ambient additions every long-running service in the corpus
/// carries (log filter, health bind address, shutdown grace period).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub polling_interval_sec: u64,
    pub polling_look_ahead_sec: u64,
    pub condition_poll_interval_sec: u64,
    pub event_confirmation_blocks: u64,
    pub dispatch_fanout: usize,
    pub performer_refresh_sec: u64,
    pub alchemy_api_key: String,

    pub rust_log: String,
    pub health_bind_addr: String,
    pub shutdown_grace_period_sec: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            polling_interval_sec: 5,
            polling_look_ahead_sec: 10,
            condition_poll_interval_sec: 5,
            event_confirmation_blocks: 4,
            dispatch_fanout: 32,
            performer_refresh_sec: 30,
            alchemy_api_key: String::new(),

            rust_log: "info".to_string(),
            health_bind_addr: "0.0.0.0:8080".to_string(),
            shutdown_grace_period_sec: 10,
        }
    }
}

impl AppConfig {
    /// Loads configuration layered over environment variables, falling
    /// back to defaults for anything unset (grounded on
    /// `rustpress-core::config`'s layered-source pattern).
    pub fn load() -> Result<Self> {
        let defaults = AppConfig::default();
        let builder = config::Config::builder()
            .set_default("polling_interval_sec", defaults.polling_interval_sec)?
            .set_default(
                "polling_look_ahead_sec",
                defaults.polling_look_ahead_sec,
            )?
            .set_default(
                "condition_poll_interval_sec",
                defaults.condition_poll_interval_sec,
            )?
            .set_default(
                "event_confirmation_blocks",
                defaults.event_confirmation_blocks,
            )?
            .set_default("dispatch_fanout", defaults.dispatch_fanout as i64)?
            .set_default("performer_refresh_sec", defaults.performer_refresh_sec)?
            .set_default("alchemy_api_key", defaults.alchemy_api_key.clone())?
            .set_default("rust_log", defaults.rust_log.clone())?
            .set_default("health_bind_addr", defaults.health_bind_addr.clone())?
            .set_default(
                "shutdown_grace_period_sec",
                defaults.shutdown_grace_period_sec,
            )?
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .separator("__"),
            );

        let settings = builder
            .build()
            .map_err(|e| Error::Configuration {
                message: e.to_string(),
            })?;

        settings.try_deserialize().map_err(|e| Error::Configuration {
            message: e.to_string(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_sec)
    }

    pub fn look_ahead(&self) -> Duration {
        Duration::from_secs(self.polling_look_ahead_sec)
    }

    pub fn condition_poll_interval(&self) -> Duration {
        Duration::from_secs(self.condition_poll_interval_sec)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_sec)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Configuration {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.polling_interval_sec, 5);
        assert_eq!(cfg.dispatch_fanout, 32);
        assert_eq!(cfg.performer_refresh_sec, 30);
    }

    #[test]
    fn load_falls_back_to_defaults_when_env_unset() {
        let cfg = AppConfig::load().expect("config should load from defaults alone");
        assert_eq!(cfg.polling_interval_sec, 5);
    }
}
