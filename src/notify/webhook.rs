//! Webhook notifier.
//!
//! Posts one JSON document per notification to a configured HTTP endpoint,
//! typically a chat bot gateway that relays it to the destination channel.

use crate::config::{SecretString, WebhookDeliveryConfig, resolve_env_vars};
use crate::error::{ConfigError, NotifyError};
use crate::notify::{Notifier, backoff_delay};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::Instrument;

/// Backoff base delay for webhook retries.
const WEBHOOK_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Maximum backoff delay for webhook retries.
const WEBHOOK_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Maximum number of attempts per notification.
const WEBHOOK_MAX_RETRIES: u32 = 3;

/// Request body sent to the webhook.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WebhookPayload {
    /// Destination channel identifier.
    pub channel: String,
    /// Rendered notification text.
    pub text: String,
    /// RFC 3339 time the request was built.
    pub timestamp: String,
}

/// Notifier delivering through an HTTP webhook.
///
/// # Retry Policy
///
/// - **5xx errors**: Retry (server temporarily unavailable)
/// - **Network errors**: Retry (timeout, connection refused)
/// - **4xx errors**: Do NOT retry (client error, invalid request)
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: SecretString,
    method: Method,
    headers: HeaderMap,
}

impl WebhookNotifier {
    /// Create a notifier from configuration, resolving `${VAR}` references.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidDelivery`] if the URL or a header cannot
    /// be resolved, a header is not valid HTTP, or the method is not POST/PUT.
    pub fn from_config(
        config: &WebhookDeliveryConfig,
        client: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidDelivery {
            kind: "webhook".to_string(),
            message,
        };

        let url = resolve_env_vars(&config.url).map_err(|e| invalid(format!("url: {}", e)))?;

        let method_upper = config.method.to_uppercase();
        if method_upper != "POST" && method_upper != "PUT" {
            return Err(invalid(format!(
                "unsupported method '{}': only POST and PUT are supported",
                config.method
            )));
        }
        let method = Method::from_str(&method_upper)
            .map_err(|_| invalid(format!("invalid method: {}", config.method)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (key, value) in &config.headers {
            let resolved =
                resolve_env_vars(value).map_err(|e| invalid(format!("header '{}': {}", key, e)))?;
            let name = HeaderName::from_str(key)
                .map_err(|_| invalid(format!("invalid header name: {}", key)))?;
            let value = HeaderValue::from_str(&resolved)
                .map_err(|_| invalid(format!("invalid header value for '{}'", key)))?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            url: SecretString::new(url),
            method,
            headers,
        })
    }

    #[cfg(test)]
    pub fn url(&self) -> &str {
        self.url.expose()
    }

    #[cfg(test)]
    pub fn method(&self) -> &Method {
        &self.method
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn notifier_type(&self) -> &str {
        "webhook"
    }

    async fn send(&self, channel: &str, text: &str) -> Result<(), NotifyError> {
        let span = tracing::info_span!("send_webhook", notify_channel = %channel);

        async {
            let payload = WebhookPayload {
                channel: channel.to_string(),
                text: text.to_string(),
                timestamp: Utc::now().to_rfc3339(),
            };
            let body = serde_json::to_string(&payload)
                .map_err(|e| NotifyError::SendFailed(format!("JSON serialization error: {}", e)))?;
            tracing::trace!(body_len = body.len(), "Request body built");

            for attempt in 0..WEBHOOK_MAX_RETRIES {
                match self
                    .client
                    .request(self.method.clone(), self.url.expose())
                    .headers(self.headers.clone())
                    .body(body.clone())
                    .send()
                    .await
                {
                    Ok(response) if response.status().is_success() => {
                        tracing::debug!("Webhook notification sent");
                        return Ok(());
                    }
                    Ok(response) if response.status().is_client_error() => {
                        let status = response.status();
                        tracing::error!(status = %status, "Webhook returned client error, not retrying");
                        return Err(NotifyError::SendFailed(format!("client error: {}", status)));
                    }
                    Ok(response) => {
                        tracing::warn!(
                            attempt = attempt,
                            status = %response.status(),
                            "Webhook returned server error, retrying"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(attempt = attempt, error = %e, "Failed to send webhook, retrying");
                    }
                }

                if attempt < WEBHOOK_MAX_RETRIES - 1 {
                    let delay = backoff_delay(attempt, WEBHOOK_BACKOFF_BASE, WEBHOOK_BACKOFF_MAX);
                    tracing::debug!(delay_ms = delay.as_millis(), "Waiting before retry");
                    tokio::time::sleep(delay).await;
                }
            }

            tracing::error!(
                max_retries = WEBHOOK_MAX_RETRIES,
                "Failed to send webhook notification after all retries"
            );
            Err(NotifyError::MaxRetriesExceeded)
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // URL and headers may carry tokens.
        f.debug_struct("WebhookNotifier")
            .field("method", &self.method.as_str())
            .field("header_count", &self.headers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(url: &str) -> WebhookDeliveryConfig {
        WebhookDeliveryConfig {
            url: url.to_string(),
            method: "POST".to_string(),
            headers: HashMap::new(),
        }
    }

    // ===================================================================
    // Construction tests
    // ===================================================================

    #[test]
    #[serial]
    fn from_config_resolves_env_vars() {
        temp_env::with_vars(
            [
                ("KM_TEST_WEBHOOK_HOST", Some("bot.example.com")),
                ("KM_TEST_WEBHOOK_TOKEN", Some("secret-token-123")),
            ],
            || {
                let config = WebhookDeliveryConfig {
                    url: "https://${KM_TEST_WEBHOOK_HOST}/send".to_string(),
                    method: "put".to_string(),
                    headers: HashMap::from([(
                        "Authorization".to_string(),
                        "Bearer ${KM_TEST_WEBHOOK_TOKEN}".to_string(),
                    )]),
                };

                let notifier = WebhookNotifier::from_config(&config, reqwest::Client::new()).unwrap();

                assert_eq!(notifier.url(), "https://bot.example.com/send");
                assert_eq!(notifier.method(), &Method::PUT);
                assert_eq!(notifier.notifier_type(), "webhook");
            },
        );
    }

    #[test]
    #[serial]
    fn from_config_fails_on_undefined_env_var() {
        temp_env::with_var("KM_UNDEFINED_WEBHOOK_URL", None::<&str>, || {
            let config = make_config("${KM_UNDEFINED_WEBHOOK_URL}");

            let err = WebhookNotifier::from_config(&config, reqwest::Client::new()).unwrap_err();
            match err {
                ConfigError::InvalidDelivery { kind, message } => {
                    assert_eq!(kind, "webhook");
                    assert!(message.contains("url"));
                    assert!(message.contains("KM_UNDEFINED_WEBHOOK_URL"));
                }
                other => panic!("Expected InvalidDelivery, got {:?}", other),
            }
        });
    }

    #[test]
    fn from_config_rejects_unsupported_method() {
        let config = WebhookDeliveryConfig {
            method: "GET".to_string(),
            ..make_config("https://x")
        };
        let err = WebhookNotifier::from_config(&config, reqwest::Client::new()).unwrap_err();
        assert!(err.to_string().contains("unsupported method 'GET'"));
    }

    #[test]
    fn from_config_rejects_invalid_header_name() {
        let config = WebhookDeliveryConfig {
            headers: HashMap::from([("bad header".to_string(), "v".to_string())]),
            ..make_config("https://x")
        };
        let err = WebhookNotifier::from_config(&config, reqwest::Client::new()).unwrap_err();
        assert!(err.to_string().contains("invalid header name"));
    }

    #[test]
    fn debug_hides_url() {
        let notifier =
            WebhookNotifier::from_config(&make_config("https://x/?token=abc"), reqwest::Client::new()).unwrap();
        let debug = format!("{:?}", notifier);
        assert!(!debug.contains("token"));
        assert!(debug.contains("POST"));
    }

    // ===================================================================
    // Delivery tests
    // ===================================================================

    #[tokio::test]
    async fn send_posts_channel_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(serde_json::json!({
                "channel": "onebot_v11-private_789012",
                "text": "🔔 urgent"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier =
            WebhookNotifier::from_config(&make_config(&format!("{}/send", server.uri())), reqwest::Client::new())
                .unwrap();

        notifier.send("onebot_v11-private_789012", "🔔 urgent").await.unwrap();
    }

    #[tokio::test]
    async fn send_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::from_config(&make_config(&server.uri()), reqwest::Client::new()).unwrap();

        let err = notifier.send("chatB", "hello").await.unwrap_err();
        assert!(matches!(err, NotifyError::SendFailed(msg) if msg.contains("404")));
    }

    #[tokio::test]
    async fn send_retries_server_errors_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::from_config(&make_config(&server.uri()), reqwest::Client::new()).unwrap();

        let err = notifier.send("chatB", "hello").await.unwrap_err();
        assert!(matches!(err, NotifyError::MaxRetriesExceeded));
    }

    #[tokio::test]
    async fn send_recovers_after_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::from_config(&make_config(&server.uri()), reqwest::Client::new()).unwrap();

        assert!(notifier.send("chatB", "hello").await.is_ok());
    }
}
