//! Runtime configuration with typed durations and timezone.

use super::delivery::DeliveryConfig;
use super::types::{Config, MetricsConfig, StoreConfig};
use crate::error::ConfigError;
use crate::matcher::MatchMode;
use chrono_tz::Tz;
use std::time::Duration;

/// Configuration ready to build the engine from.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub monitor_rules: Vec<String>,
    pub match_mode: MatchMode,
    pub notify_template: String,
    pub notify_interval: Duration,
    pub regex_timeout: Duration,
    pub enable_debug: bool,
    pub timezone: Tz,
    pub reload_temporary_rules: bool,
    /// `None` when periodic reload is disabled.
    pub temp_rules_refresh: Option<Duration>,
    pub max_in_flight: usize,
    pub store: StoreConfig,
    pub delivery: DeliveryConfig,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Convert into a [`RuntimeConfig`].
    ///
    /// Call [`Config::validate`] first; this only repeats the checks it
    /// needs to build typed values.
    ///
    /// # Errors
    /// Returns [`ConfigError::ValidationError`] for an invalid timezone or
    /// regex timeout.
    pub fn compile(self) -> Result<RuntimeConfig, ConfigError> {
        let timezone: Tz = self.timezone.parse().map_err(|_| {
            ConfigError::ValidationError(format!(
                "timezone '{}' is not a valid timezone",
                self.timezone
            ))
        })?;

        let regex_timeout = Duration::try_from_secs_f64(self.regex_timeout).map_err(|e| {
            ConfigError::ValidationError(format!("regex_timeout {}: {}", self.regex_timeout, e))
        })?;
        if self.max_in_flight == 0 {
            return Err(ConfigError::ValidationError(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if regex_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "regex_timeout must be a positive number of seconds, got 0".to_string(),
            ));
        }

        Ok(RuntimeConfig {
            monitor_rules: self.monitor_rules,
            match_mode: self.match_mode,
            notify_template: self.notify_template,
            notify_interval: Duration::from_secs(self.notify_interval),
            regex_timeout,
            enable_debug: self.enable_debug,
            timezone,
            reload_temporary_rules: self.reload_temporary_rules,
            temp_rules_refresh: (self.temp_rules_refresh_interval > 0)
                .then(|| Duration::from_secs(self.temp_rules_refresh_interval)),
            max_in_flight: self.max_in_flight,
            store: self.store,
            delivery: self.delivery,
            metrics: self.metrics,
        })
    }
}
