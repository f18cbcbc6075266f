//! Centralized error types for keyword-monitor using thiserror.
//!
//! Errors raised while evaluating rules or sending notifications are always
//! handled locally (logged and downgraded); none of them reach the message
//! ingestion loop.

use thiserror::Error;

/// Errors related to configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config file: {0}")]
    LoadError(String),
    #[error("invalid configuration: {0}")]
    ValidationError(String),
    #[error("invalid delivery '{kind}': {message}")]
    InvalidDelivery { kind: String, message: String },
}

/// Errors produced when parsing a rule text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("malformed rule '{0}': expected 'monitor|keyword1,keyword2|notify'")]
    MalformedRule(String),
    #[error("rule '{0}' has an empty keyword list")]
    EmptyKeywordList(String),
}

/// Errors raised while evaluating a single keyword.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("invalid regex pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("regex evaluation exceeded {budget_ms}ms")]
    Timeout { budget_ms: u128 },
    #[error("regex evaluation failed: {0}")]
    Runtime(String),
}

/// Errors related to the key-value store collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data is corrupt: {0}")]
    Corrupt(String),
}

/// Errors related to notification delivery.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to send notification: {0}")]
    SendFailed(String),
    #[error("max retries exceeded")]
    MaxRetriesExceeded,
}

/// Reasons a temporary rule is rejected.
#[derive(Error, Debug)]
pub enum AddRuleError {
    #[error("keyword list is empty")]
    EmptyKeywords,
    #[error("invalid regex patterns: {}", .0.join(", "))]
    InvalidPattern(Vec<String>),
    #[error("rule already exists")]
    AlreadyExists,
    #[error(transparent)]
    Malformed(#[from] RuleError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::LoadError("file not found".to_string());
        assert_eq!(err.to_string(), "failed to load config file: file not found");

        let err = ConfigError::InvalidDelivery {
            kind: "webhook".to_string(),
            message: "missing url".to_string(),
        };
        assert_eq!(err.to_string(), "invalid delivery 'webhook': missing url");
    }

    #[test]
    fn rule_error_display() {
        let err = RuleError::MalformedRule("a|b".to_string());
        assert_eq!(
            err.to_string(),
            "malformed rule 'a|b': expected 'monitor|keyword1,keyword2|notify'"
        );

        let err = RuleError::EmptyKeywordList("a| , |b".to_string());
        assert_eq!(err.to_string(), "rule 'a| , |b' has an empty keyword list");
    }

    #[test]
    fn match_error_display() {
        let err = MatchError::Timeout { budget_ms: 1000 };
        assert_eq!(err.to_string(), "regex evaluation exceeded 1000ms");

        let err = MatchError::Runtime("worker panicked".to_string());
        assert_eq!(err.to_string(), "regex evaluation failed: worker panicked");
    }

    #[test]
    fn add_rule_error_lists_invalid_patterns() {
        let err = AddRuleError::InvalidPattern(vec!["(".to_string(), "[a".to_string()]);
        assert_eq!(err.to_string(), "invalid regex patterns: (, [a");
    }

    #[test]
    fn add_rule_error_wraps_rule_error() {
        let err: AddRuleError = RuleError::MalformedRule("|x|y".to_string()).into();
        assert!(err.to_string().starts_with("malformed rule"));
    }

    #[test]
    fn notify_error_display() {
        let err = NotifyError::SendFailed("network error".to_string());
        assert_eq!(err.to_string(), "failed to send notification: network error");
        assert_eq!(NotifyError::MaxRetriesExceeded.to_string(), "max retries exceeded");
    }
}
