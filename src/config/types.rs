//! Core configuration types and loading.

use super::delivery::DeliveryConfig;
use super::env::resolve_env_vars;
use crate::error::ConfigError;
use crate::matcher::MatchMode;
use crate::pattern::invalid_patterns;
use crate::rule::Rule;
use crate::template::DEFAULT_TEMPLATE;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/keyword-monitor/config.yaml";

/// Main configuration structure.
///
/// Keys are snake_case; the upper-case names (`MONITOR_RULES`, ...) are
/// accepted as aliases.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Rule texts, `monitor|kw1,kw2|notify`.
    #[serde(default, alias = "MONITOR_RULES")]
    pub monitor_rules: Vec<String>,
    /// 0 = fuzzy, 1 = exact, 2 = regex.
    #[serde(default, alias = "MATCH_MODE")]
    pub match_mode: MatchMode,
    #[serde(default = "default_template", alias = "NOTIFY_TEMPLATE")]
    pub notify_template: String,
    /// Minimum seconds between two notifications of one channel pair.
    #[serde(default = "default_notify_interval", alias = "NOTIFY_INTERVAL")]
    pub notify_interval: u64,
    /// Seconds allowed for each regex keyword.
    #[serde(default = "default_regex_timeout", alias = "REGEX_TIMEOUT")]
    pub regex_timeout: f64,
    #[serde(default, alias = "ENABLE_DEBUG")]
    pub enable_debug: bool,
    /// IANA timezone used for `{time}` (e.g. "UTC", "Asia/Shanghai").
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Restore temporary rules from the store at startup.
    #[serde(default = "default_true")]
    pub reload_temporary_rules: bool,
    /// Seconds between reloads of temporary rules while running, so rules
    /// added with `add-rule` from another process take effect. 0 disables.
    #[serde(default = "default_temp_rules_refresh_interval")]
    pub temp_rules_refresh_interval: u64,
    /// Maximum number of messages dispatched concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Key-value store configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// JSON file backing the store; in-memory when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Metrics exposition configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_notify_interval() -> u64 {
    60
}

fn default_regex_timeout() -> f64 {
    1.0
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_temp_rules_refresh_interval() -> u64 {
    30
}

fn default_max_in_flight() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor_rules: Vec::new(),
            match_mode: MatchMode::default(),
            notify_template: default_template(),
            notify_interval: default_notify_interval(),
            regex_timeout: default_regex_timeout(),
            enable_debug: false,
            timezone: default_timezone(),
            reload_temporary_rules: true,
            temp_rules_refresh_interval: default_temp_rules_refresh_interval(),
            max_in_flight: default_max_in_flight(),
            store: StoreConfig::default(),
            delivery: DeliveryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    ///
    /// # Errors
    /// Returns [`ConfigError::LoadError`] if the file cannot be read.
    /// Returns [`ConfigError::ValidationError`] if the YAML is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadError(format!("{}: {}", path.display(), e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    ///
    /// # Errors
    /// Returns [`ConfigError::ValidationError`] if the YAML is invalid.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty document means "all defaults".
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Validate the whole configuration.
    ///
    /// Malformed rule texts are not errors: they are skipped at runtime and
    /// reported by `list-rules`. Everything that would make the process
    /// unable to start is.
    ///
    /// # Errors
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if !self.regex_timeout.is_finite() || self.regex_timeout <= 0.0 {
            errors.push(ConfigError::ValidationError(format!(
                "regex_timeout must be a positive number of seconds, got {}",
                self.regex_timeout
            )));
        }

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            errors.push(ConfigError::ValidationError(format!(
                "timezone '{}' is not a valid timezone",
                self.timezone
            )));
        }

        if self.max_in_flight == 0 {
            errors.push(ConfigError::ValidationError(
                "max_in_flight must be at least 1".to_string(),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            errors.push(ConfigError::ValidationError(
                "metrics.port must be non-zero when metrics are enabled".to_string(),
            ));
        }

        if let DeliveryConfig::Webhook(webhook) = &self.delivery {
            let method = webhook.method.to_uppercase();
            if method != "POST" && method != "PUT" {
                errors.push(ConfigError::InvalidDelivery {
                    kind: self.delivery.kind().to_string(),
                    message: format!(
                        "unsupported method '{}': only POST and PUT are supported",
                        webhook.method
                    ),
                });
            }
            if let Err(e) = resolve_env_vars(&webhook.url) {
                errors.push(ConfigError::InvalidDelivery {
                    kind: self.delivery.kind().to_string(),
                    message: format!("url: {}", e),
                });
            }
            for (name, value) in &webhook.headers {
                if let Err(e) = resolve_env_vars(value) {
                    errors.push(ConfigError::InvalidDelivery {
                        kind: self.delivery.kind().to_string(),
                        message: format!("header '{}': {}", name, e),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Non-fatal findings about the rule list, for `--validate` output.
    pub fn rule_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (idx, text) in self.monitor_rules.iter().enumerate() {
            match Rule::parse(text) {
                Ok(rule) if self.match_mode == MatchMode::Regex => {
                    let invalid = invalid_patterns(&rule.keywords);
                    if !invalid.is_empty() {
                        warnings.push(format!(
                            "rule {}: invalid regex patterns: {}",
                            idx + 1,
                            invalid.join(", ")
                        ));
                    }
                }
                Ok(_) => {}
                Err(e) => warnings.push(format!("rule {}: {}", idx + 1, e)),
            }
        }
        warnings
    }
}
