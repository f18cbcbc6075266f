//! Operations exposed to an agent or operator: rule listing, pattern
//! testing and temporary rule addition.
//!
//! Each operation returns a human-readable report and never fails; errors
//! are rendered into the report.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;

use crate::error::AddRuleError;
use crate::matcher::{MatchMode, run_bounded};
use crate::pattern::{compile_pattern, invalid_patterns};
use crate::registry::RuleRegistry;
use crate::template::format_time;
use crate::throttle::{ThrottleKey, ThrottleStore};

/// Maximum number of matches listed by [`RuleTools::test_pattern`].
pub const MAX_LISTED_MATCHES: usize = 5;

fn mode_description(mode: MatchMode) -> &'static str {
    match mode {
        MatchMode::Fuzzy => "fuzzy match",
        MatchMode::Exact => "exact match",
        MatchMode::Regex => "regular expression",
    }
}

/// Tool operations over a rule registry and throttle store.
#[derive(Debug, Clone)]
pub struct RuleTools {
    registry: Arc<RuleRegistry>,
    throttle: Arc<ThrottleStore>,
    timezone: Tz,
    regex_timeout: Duration,
}

impl RuleTools {
    pub fn new(
        registry: Arc<RuleRegistry>,
        throttle: Arc<ThrottleStore>,
        timezone: Tz,
        regex_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            throttle,
            timezone,
            regex_timeout,
        }
    }

    /// Report every rule with its validity and last notification time.
    pub async fn list_rules(&self) -> String {
        let entries = self.registry.entries();
        if entries.is_empty() {
            return "No monitoring rules configured".to_string();
        }

        let mode = self.registry.mode();
        let mut report = format!("📋 Monitoring rules ({}):\n", mode_description(mode));
        report.push_str(&"=".repeat(40));
        report.push('\n');

        for (idx, entry) in entries.iter().enumerate() {
            let number = idx + 1;
            let rule = match &entry.parsed {
                Ok(rule) => rule,
                Err(e) => {
                    let _ = writeln!(report, "\nRule {number} [{}]: malformed ({e})", entry.origin);
                    continue;
                }
            };

            let _ = writeln!(report, "\nRule {number} [{}]:", entry.origin);
            let _ = writeln!(report, "  Monitor: {}", rule.monitor_channel);
            let _ = writeln!(report, "  Keywords: {}", rule.keywords.join(", "));
            let _ = writeln!(report, "  Notify: {}", rule.notify_channel);

            if mode == MatchMode::Regex {
                let invalid = invalid_patterns(&rule.keywords);
                if !invalid.is_empty() {
                    let _ = writeln!(report, "  ⚠️ Invalid regex: {}", invalid.join(", "));
                }
            }

            let key = ThrottleKey::new(&rule.monitor_channel, &rule.notify_channel);
            if let Some(last) = self.throttle.last_fired(&key).await {
                let _ = writeln!(report, "  Last notified: {}", format_time(last, self.timezone));
            }
        }

        report
    }

    /// Check that `pattern` compiles and, given a sample, list its matches.
    pub async fn test_pattern(&self, pattern: &str, sample: Option<&str>) -> String {
        let regex = match compile_pattern(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                tracing::debug!(pattern = %pattern, error = %e, "Pattern rejected");
                return format!("❌ Invalid regular expression: {pattern}");
            }
        };

        let mut report = format!("✅ Valid regular expression: {pattern}\n");

        let Some(sample) = sample.filter(|s| !s.trim().is_empty()) else {
            report.push_str("\n💡 Provide sample text to check what it matches");
            return report;
        };

        let haystack = sample.to_string();
        let found = run_bounded(self.regex_timeout, move || {
            regex
                .find_iter(&haystack)
                .map(|m| m.as_str().to_string())
                .collect::<Vec<_>>()
        })
        .await;

        match found {
            Ok(matches) if matches.is_empty() => {
                report.push_str("❌ No match in the sample text\n");
            }
            Ok(matches) => {
                let _ = writeln!(report, "✅ Found {} match(es):", matches.len());
                for (i, m) in matches.iter().take(MAX_LISTED_MATCHES).enumerate() {
                    let _ = writeln!(report, "  {}. {}", i + 1, m);
                }
                if matches.len() > MAX_LISTED_MATCHES {
                    let _ = writeln!(report, "  ... and {} more", matches.len() - MAX_LISTED_MATCHES);
                }
            }
            Err(e) => {
                let _ = writeln!(report, "❌ Match test failed: {e}");
            }
        }

        report
    }

    /// Add a temporary rule and describe the result.
    pub async fn add_temporary_rule(
        &self,
        monitor_channel: &str,
        keywords_csv: &str,
        notify_channel: &str,
    ) -> String {
        match self
            .registry
            .add_temporary(monitor_channel, keywords_csv, notify_channel)
            .await
        {
            Ok(_) => format!(
                "✅ Temporary rule added: monitoring {monitor_channel}, keywords [{keywords_csv}] ({} mode), notifying {notify_channel}",
                self.registry.mode()
            ),
            Err(AddRuleError::EmptyKeywords) => "Error: keyword list must not be empty".to_string(),
            Err(AddRuleError::AlreadyExists) => "This rule already exists".to_string(),
            Err(e @ AddRuleError::InvalidPattern(_)) => format!("Error: {e}"),
            Err(e @ AddRuleError::Malformed(_)) => format!("Error: {e}"),
            Err(e @ AddRuleError::Store(_)) => {
                tracing::error!(error = %e, "Failed to persist temporary rule");
                format!("Error: {e}")
            }
        }
    }
}
