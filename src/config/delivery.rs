//! Delivery (outbound send) configuration.

use serde::Deserialize;
use std::collections::HashMap;

/// Where notifications are delivered, tagged by `type`.
///
/// ```yaml
/// delivery:
///   type: webhook
///   url: "https://bot.example.com/send"
///   headers:
///     Authorization: "Bearer ${BOT_TOKEN}"
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeliveryConfig {
    /// One JSON line per notification on standard output.
    #[default]
    Stdout,
    /// HTTP request per notification.
    Webhook(WebhookDeliveryConfig),
}

impl DeliveryConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryConfig::Stdout => "stdout",
            DeliveryConfig::Webhook(_) => "webhook",
        }
    }
}

/// Configuration for the webhook notifier.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WebhookDeliveryConfig {
    /// Target URL (supports `${ENV_VAR}` substitution).
    pub url: String,
    #[serde(default = "default_post")]
    pub method: String,
    /// Extra headers; values support `${ENV_VAR}` substitution.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_post() -> String {
    "POST".to_string()
}
