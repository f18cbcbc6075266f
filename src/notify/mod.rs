//! Outbound notification delivery.
//!
//! The dispatcher only sees the [`Notifier`] trait. Two implementations are
//! provided and selected by the `delivery` configuration section:
//!
//! - [`WebhookNotifier`]: HTTP request per notification with exponential
//!   backoff retry.
//! - [`StdoutNotifier`]: JSON line per notification on standard output.

pub mod stdout;
mod traits;
pub mod webhook;

use crate::config::DeliveryConfig;
use crate::error::ConfigError;
use std::sync::Arc;
use std::time::Duration;

pub use stdout::StdoutNotifier;
pub use traits::Notifier;
pub use webhook::WebhookNotifier;

/// Timeout applied to each webhook request.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the notifier described by `delivery`.
///
/// # Errors
/// Returns [`ConfigError::InvalidDelivery`] if the webhook settings cannot be
/// resolved or the HTTP client cannot be built.
pub fn build_notifier(delivery: &DeliveryConfig) -> Result<Arc<dyn Notifier>, ConfigError> {
    let notifier: Arc<dyn Notifier> = match delivery {
        DeliveryConfig::Stdout => Arc::new(StdoutNotifier::new()),
        DeliveryConfig::Webhook(config) => {
            let client = reqwest::Client::builder()
                .timeout(HTTP_REQUEST_TIMEOUT)
                .build()
                .map_err(|e| ConfigError::InvalidDelivery {
                    kind: delivery.kind().to_string(),
                    message: format!("http client: {}", e),
                })?;
            Arc::new(WebhookNotifier::from_config(config, client)?)
        }
    };

    tracing::info!(notifier_type = notifier.notifier_type(), "Notifier initialized");
    Ok(notifier)
}

/// Calculate exponential backoff delay.
///
/// Formula: min(base * 2^attempt, max)
///
/// # Arguments
///
/// * `attempt` - Current attempt number (0-indexed)
/// * `base` - Base delay duration
/// * `max` - Maximum delay cap
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let delay = base.saturating_mul(2_u32.saturating_pow(attempt));
    std::cmp::min(delay, max)
}
