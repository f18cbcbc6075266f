//! Per-message orchestration.
//!
//! For each inbound [`MessageEvent`] the dispatcher resolves the rules
//! monitoring its channel and, for each rule in order:
//!
//! ```text
//! match keywords → acquire throttle permit → should fire? → compose → send → record
//! ```
//!
//! A delivery failure leaves the throttle record untouched so the next
//! qualifying message can retry. Nothing in this module returns an error to
//! the caller: every failure is logged and reported as a [`DispatchOutcome`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::matcher::Matcher;
use crate::notify::Notifier;
use crate::registry::RuleRegistry;
use crate::rule::Rule;
use crate::template::NotificationComposer;
use crate::throttle::{ThrottleKey, ThrottleStore};

/// One inbound chat message, as delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    /// Identifier of the channel the message was posted in.
    pub chat_key: String,
    /// Plain text content.
    pub text: String,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

impl MessageEvent {
    pub fn new(chat_key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_key: chat_key.into(),
            text: text.into(),
            channel_name: None,
            channel_id: None,
        }
    }
}

/// What happened to one applicable rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No keyword of the rule matched.
    NoMatch,
    /// A keyword matched but the channel pair fired too recently.
    Throttled { keyword: String },
    /// The notification was delivered and recorded.
    Sent { keyword: String, notify_channel: String },
    /// The notification could not be delivered.
    DeliveryFailed { keyword: String, notify_channel: String },
}

/// Settings shared by every dispatch.
///
/// The match mode is not part of these: it belongs to the [`RuleRegistry`],
/// which also uses it to validate temporary rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub notify_interval: Duration,
    pub regex_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            notify_interval: Duration::from_secs(60),
            regex_timeout: Duration::from_secs(1),
        }
    }
}

/// Rule evaluation and notification engine.
///
/// Shared by reference (typically in an `Arc`) between concurrent message
/// tasks; all interior state is synchronized.
pub struct Dispatcher {
    registry: Arc<RuleRegistry>,
    matcher: Matcher,
    throttle: Arc<ThrottleStore>,
    composer: NotificationComposer,
    notifier: Arc<dyn Notifier>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RuleRegistry>,
        throttle: Arc<ThrottleStore>,
        composer: NotificationComposer,
        notifier: Arc<dyn Notifier>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            matcher: Matcher::new(),
            throttle,
            composer,
            notifier,
            settings,
        }
    }

    /// Process `event` at the current wall-clock time.
    pub async fn handle(&self, event: &MessageEvent) -> Vec<DispatchOutcome> {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        self.handle_at(event, now).await
    }

    /// Process `event` as if it arrived at `now` (epoch seconds).
    ///
    /// Returns one outcome per rule monitoring the event's channel, in rule
    /// order. An event from an empty or unmonitored channel yields nothing.
    pub async fn handle_at(&self, event: &MessageEvent, now: f64) -> Vec<DispatchOutcome> {
        if event.chat_key.is_empty() {
            return Vec::new();
        }

        let rules = self.registry.rules_for(&event.chat_key);
        if rules.is_empty() {
            return Vec::new();
        }

        debug!(
            chat_key = %event.chat_key,
            rules = rules.len(),
            mode = %self.registry.mode(),
            "Message on monitored channel"
        );
        metrics::counter!("keyword_monitor_messages_evaluated_total").increment(1);

        let mut outcomes = Vec::with_capacity(rules.len());
        for rule in rules {
            outcomes.push(self.apply_rule(&rule, event, now).await);
        }
        outcomes
    }

    async fn apply_rule(&self, rule: &Rule, event: &MessageEvent, now: f64) -> DispatchOutcome {
        let Some(keyword) = self
            .matcher
            .evaluate(
                &event.text,
                &rule.keywords,
                self.registry.mode(),
                self.settings.regex_timeout,
            )
            .await
        else {
            return DispatchOutcome::NoMatch;
        };

        info!(
            monitor = %rule.monitor_channel,
            notify = %rule.notify_channel,
            keyword = %keyword,
            "Keyword matched"
        );
        metrics::counter!("keyword_monitor_matches_total").increment(1);

        let key = ThrottleKey::new(&rule.monitor_channel, &rule.notify_channel);
        let permit = self.throttle.acquire(&key).await;

        if !permit.should_fire(now, self.settings.notify_interval).await {
            debug!(throttle_key = %key, "Notify interval not elapsed, suppressed");
            metrics::counter!("keyword_monitor_notifications_throttled_total").increment(1);
            return DispatchOutcome::Throttled { keyword };
        }

        let text = self.composer.compose(
            event.channel_name.as_deref(),
            event.channel_id.as_deref(),
            &keyword,
            &event.text,
            now,
        );

        if let Err(e) = self.notifier.send(&rule.notify_channel, &text).await {
            error!(
                notify = %rule.notify_channel,
                notifier_type = self.notifier.notifier_type(),
                error = %e,
                "Failed to send notification"
            );
            metrics::counter!("keyword_monitor_notifications_failed_total").increment(1);
            return DispatchOutcome::DeliveryFailed {
                keyword,
                notify_channel: rule.notify_channel.clone(),
            };
        }

        if let Err(e) = permit.record(now).await {
            // The notification went out; only the throttle bookkeeping is lost.
            warn!(throttle_key = %key, error = %e, "Failed to record notification time");
        }

        info!(notify = %rule.notify_channel, keyword = %keyword, "Notification sent");
        metrics::counter!("keyword_monitor_notifications_sent_total").increment(1);

        DispatchOutcome::Sent {
            keyword,
            notify_channel: rule.notify_channel.clone(),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("notifier", &self.notifier)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
