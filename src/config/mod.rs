//! Configuration loading and validation for keyword-monitor.
//!
//! This module handles loading the YAML configuration file, validating it,
//! and resolving environment variables in delivery secrets.

mod delivery;
mod env;
mod runtime;
mod secret;
mod types;

pub use delivery::{DeliveryConfig, WebhookDeliveryConfig};
pub use env::resolve_env_vars;
pub use runtime::RuntimeConfig;
pub use secret::SecretString;
pub use types::{Config, DEFAULT_CONFIG_PATH, MetricsConfig, StoreConfig};
