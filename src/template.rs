//! Notification text rendering.
//!
//! Templates use single-brace placeholders:
//!
//! | Placeholder      | Value                                          |
//! |------------------|------------------------------------------------|
//! | `{channel_name}` | display name of the monitored channel          |
//! | `{channel_id}`   | identifier of the monitored channel            |
//! | `{keyword}`      | keyword that matched                           |
//! | `{content}`      | message text, truncated to 200 characters      |
//! | `{time}`         | notification time, `YYYY-MM-DD HH:MM:SS`       |
//!
//! Anything else in braces is left as literal text.
//!
//! # Example
//!
//! ```ignore
//! let composer = NotificationComposer::new(template, chrono_tz::UTC);
//! let text = composer.compose(Some("Dev group"), Some("group_1"), "urgent", message, now);
//! ```

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::{Captures, Regex};

/// Template used when the configuration does not provide one.
pub const DEFAULT_TEMPLATE: &str = "🔔 Keyword alert\nChannel: {channel_name}\nKeyword: {keyword}\nContent: {content}\nTime: {time}";

/// Substituted for a missing channel name.
pub const UNKNOWN_CHANNEL_NAME: &str = "unknown channel";

/// Substituted for a missing channel id.
pub const UNKNOWN_CHANNEL_ID: &str = "unknown";

/// Maximum number of characters of message content placed in a notification.
pub const MAX_CONTENT_CHARS: usize = 200;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("valid regex"));

/// Values available to a template for one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContext {
    pub channel_name: Option<String>,
    pub channel_id: Option<String>,
    pub keyword: String,
    /// Already truncated, see [`truncate_content`].
    pub content: String,
    /// Already formatted.
    pub time: String,
}

/// Substitute the known placeholders of `template` from `ctx`.
///
/// Substitution is a single pass, so placeholder-like text inside the
/// substituted values is never expanded.
pub fn render(template: &str, ctx: &NotificationContext) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures<'_>| {
            let value = match &caps[1] {
                "channel_name" => ctx.channel_name.as_deref().unwrap_or(UNKNOWN_CHANNEL_NAME),
                "channel_id" => ctx.channel_id.as_deref().unwrap_or(UNKNOWN_CHANNEL_ID),
                "keyword" => &ctx.keyword,
                "content" => &ctx.content,
                "time" => &ctx.time,
                _ => &caps[0],
            };
            value.to_string()
        })
        .into_owned()
}

/// Keep the first `max_chars` characters of `text`.
pub fn truncate_content(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Format an epoch-seconds timestamp in `tz`.
///
/// Out-of-range timestamps fall back to the Unix epoch.
pub fn format_time(epoch_seconds: f64, tz: Tz) -> String {
    let secs = epoch_seconds.floor() as i64;
    let utc: DateTime<Utc> = DateTime::from_timestamp(secs, 0).unwrap_or_default();
    utc.with_timezone(&tz).format(TIME_FORMAT).to_string()
}

/// Renders notifications with the configured template and timezone.
#[derive(Debug, Clone)]
pub struct NotificationComposer {
    template: String,
    timezone: Tz,
}

impl NotificationComposer {
    pub fn new(template: impl Into<String>, timezone: Tz) -> Self {
        Self {
            template: template.into(),
            timezone,
        }
    }

    /// Build the context for one match and render it.
    pub fn compose(
        &self,
        channel_name: Option<&str>,
        channel_id: Option<&str>,
        keyword: &str,
        content: &str,
        now: f64,
    ) -> String {
        let ctx = NotificationContext {
            channel_name: channel_name.map(String::from),
            channel_id: channel_id.map(String::from),
            keyword: keyword.to_string(),
            content: truncate_content(content, MAX_CONTENT_CHARS).to_string(),
            time: format_time(now, self.timezone),
        };
        render(&self.template, &ctx)
    }
}

impl Default for NotificationComposer {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE, chrono_tz::UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ctx() -> NotificationContext {
        NotificationContext {
            channel_name: Some("Dev group".to_string()),
            channel_id: Some("onebot_v11-group_123".to_string()),
            keyword: "urgent".to_string(),
            content: "this is urgent".to_string(),
            time: "2024-01-15 10:30:00".to_string(),
        }
    }

    #[test]
    fn render_substitutes_all_placeholders() {
        let out = render("[{channel_name}|{channel_id}] {keyword}: {content} @ {time}", &make_ctx());
        assert_eq!(
            out,
            "[Dev group|onebot_v11-group_123] urgent: this is urgent @ 2024-01-15 10:30:00"
        );
    }

    #[test]
    fn render_uses_fallbacks_for_missing_channel() {
        let ctx = NotificationContext {
            channel_name: None,
            channel_id: None,
            ..make_ctx()
        };
        assert_eq!(render("{channel_name}/{channel_id}", &ctx), "unknown channel/unknown");
    }

    #[test]
    fn render_leaves_unknown_placeholders() {
        let out = render("{keyword} {sender} {} {KEYWORD}", &make_ctx());
        assert_eq!(out, "urgent {sender} {} {KEYWORD}");
    }

    #[test]
    fn render_does_not_expand_substituted_values() {
        let ctx = NotificationContext {
            content: "literal {keyword}".to_string(),
            ..make_ctx()
        };
        assert_eq!(render("{content}", &ctx), "literal {keyword}");
    }

    #[test]
    fn render_repeated_placeholder() {
        assert_eq!(render("{keyword}{keyword}", &make_ctx()), "urgenturgent");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let text = "错".repeat(250);
        let truncated = truncate_content(&text, MAX_CONTENT_CHARS);
        assert_eq!(truncated.chars().count(), 200);

        assert_eq!(truncate_content("short", 200), "short");
        assert_eq!(truncate_content("abc", 3), "abc");
        assert_eq!(truncate_content("abcd", 3), "abc");
    }

    #[test]
    fn format_time_in_utc() {
        // 2024-01-15T10:30:00Z
        assert_eq!(format_time(1_705_314_600.0, chrono_tz::UTC), "2024-01-15 10:30:00");
    }

    #[test]
    fn format_time_in_configured_timezone() {
        assert_eq!(
            format_time(1_705_314_600.9, chrono_tz::Asia::Shanghai),
            "2024-01-15 18:30:00"
        );
    }

    #[test]
    fn compose_truncates_and_formats() {
        let composer = NotificationComposer::new("{keyword}|{content}|{time}", chrono_tz::UTC);
        let long = "x".repeat(300);

        let out = composer.compose(None, None, "x", &long, 0.0);

        assert_eq!(out, format!("x|{}|1970-01-01 00:00:00", "x".repeat(200)));
    }

    #[test]
    fn default_template_mentions_every_field() {
        let composer = NotificationComposer::default();
        let out = composer.compose(Some("Dev"), None, "hello", "say hello", 1_705_314_600.0);

        assert!(out.starts_with("🔔"));
        assert!(out.contains("Channel: Dev"));
        assert!(out.contains("Keyword: hello"));
        assert!(out.contains("Content: say hello"));
        assert!(out.contains("Time: 2024-01-15 10:30:00"));
    }
}
