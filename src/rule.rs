//! Rule text codec.
//!
//! A rule connects one monitored channel to one notification channel through
//! a list of keywords:
//!
//! ```text
//! onebot_v11-group_123456|urgent,@admin|onebot_v11-private_789012
//! ```
//!
//! Channel identifiers are opaque to this module; only non-emptiness is
//! checked.

use std::fmt;
use std::str::FromStr;

use crate::error::RuleError;

/// Separator between the three segments of a rule.
pub const SEGMENT_SEPARATOR: char = '|';

/// Separator between keywords in the middle segment.
pub const KEYWORD_SEPARATOR: char = ',';

/// A parsed monitoring rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Channel whose messages are inspected.
    pub monitor_channel: String,
    /// Keywords in definition order (duplicates kept).
    pub keywords: Vec<String>,
    /// Channel that receives the notification.
    pub notify_channel: String,
    /// Raw text the rule was parsed from.
    pub source_text: String,
}

impl Rule {
    /// Parse a rule text.
    ///
    /// # Errors
    ///
    /// * [`RuleError::MalformedRule`] if the text does not have exactly three
    ///   `|`-separated segments or one of them is blank.
    /// * [`RuleError::EmptyKeywordList`] if no keyword survives trimming.
    pub fn parse(text: &str) -> Result<Self, RuleError> {
        let segments: Vec<&str> = text.trim().split(SEGMENT_SEPARATOR).collect();
        let [monitor, keywords, notify] = segments.as_slice() else {
            return Err(RuleError::MalformedRule(text.to_string()));
        };

        let (monitor, keywords, notify) = (monitor.trim(), keywords.trim(), notify.trim());
        if monitor.is_empty() || keywords.is_empty() || notify.is_empty() {
            return Err(RuleError::MalformedRule(text.to_string()));
        }

        let keywords = split_keywords(keywords);
        if keywords.is_empty() {
            return Err(RuleError::EmptyKeywordList(text.to_string()));
        }

        Ok(Self {
            monitor_channel: monitor.to_string(),
            keywords,
            notify_channel: notify.to_string(),
            source_text: text.to_string(),
        })
    }
}

/// Split a comma-separated keyword list, trimming pieces and dropping blanks.
pub fn split_keywords(csv: &str) -> Vec<String> {
    csv.split(KEYWORD_SEPARATOR)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Build the raw text of a rule from its parts, verbatim.
///
/// No normalization is applied: two rules that only differ in whitespace
/// compose to different texts.
pub fn compose(monitor_channel: &str, keywords_csv: &str, notify_channel: &str) -> String {
    format!("{monitor_channel}{SEGMENT_SEPARATOR}{keywords_csv}{SEGMENT_SEPARATOR}{notify_channel}")
}

impl FromStr for Rule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rule::parse(s)
    }
}

/// Normalized form: trimmed segments, keywords joined with `,`.
impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEGMENT_SEPARATOR}{}{SEGMENT_SEPARATOR}{}",
            self.monitor_channel,
            self.keywords.join(","),
            self.notify_channel
        )
    }
}
