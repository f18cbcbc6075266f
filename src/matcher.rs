//! Keyword matching against message text.
//!
//! Three modes are supported, selected globally by configuration:
//!
//! - **Fuzzy**: the keyword occurs anywhere in the text.
//! - **Exact**: the keyword equals one whitespace-separated token.
//! - **Regex**: the keyword is a pattern searched anywhere in the text.
//!
//! Keywords are tried in definition order and the first hit wins.
//!
//! # Regex time budget
//!
//! Each regex keyword is compiled and searched inside its own unit of work on
//! the blocking pool, awaited with a deadline. When the deadline passes the
//! unit is abandoned and the keyword counts as a non-match. A panic inside the
//! unit is contained the same way. Neither stops the remaining keywords from
//! being evaluated.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use regex::Regex;
use serde::Deserialize;
use tracing::{error, trace, warn};

use crate::error::MatchError;
use crate::pattern::compile_pattern;

/// Default number of compiled patterns kept in memory.
const DEFAULT_PATTERN_CACHE_CAPACITY: u64 = 1_024;

/// How keywords are compared with message text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum MatchMode {
    /// Case-sensitive substring.
    #[default]
    Fuzzy,
    /// Whole whitespace-delimited token.
    Exact,
    /// Unanchored regular expression search.
    Regex,
}

impl TryFrom<u8> for MatchMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MatchMode::Fuzzy),
            1 => Ok(MatchMode::Exact),
            2 => Ok(MatchMode::Regex),
            other => Err(format!(
                "invalid match mode {other}: expected 0 (fuzzy), 1 (exact) or 2 (regex)"
            )),
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchMode::Fuzzy => "fuzzy",
            MatchMode::Exact => "exact",
            MatchMode::Regex => "regex",
        })
    }
}

/// Evaluates message text against keyword lists.
///
/// Cheap to clone; clones share the compiled pattern cache.
#[derive(Clone)]
pub struct Matcher {
    patterns: Cache<String, Arc<Regex>>,
}

impl Matcher {
    /// Create a matcher with the default pattern cache capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PATTERN_CACHE_CAPACITY)
    }

    /// Create a matcher caching at most `capacity` compiled patterns.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            patterns: Cache::builder().max_capacity(capacity).build(),
        }
    }

    /// Return the first keyword matching `text`, if any.
    ///
    /// `budget` bounds each regex keyword separately; it is ignored in the
    /// other modes. Errors on individual keywords are logged and treated as
    /// non-matches.
    pub async fn evaluate(
        &self,
        text: &str,
        keywords: &[String],
        mode: MatchMode,
        budget: Duration,
    ) -> Option<String> {
        match mode {
            MatchMode::Fuzzy => keywords.iter().find(|k| text.contains(k.as_str())).cloned(),
            MatchMode::Exact => {
                let tokens: Vec<&str> = text.split_whitespace().collect();
                keywords
                    .iter()
                    .find(|k| tokens.contains(&k.as_str()))
                    .cloned()
            }
            MatchMode::Regex => {
                self.evaluate_regex(text, keywords, budget, |regex, haystack| {
                    regex.is_match(haystack)
                })
                .await
            }
        }
    }

    /// Try each regex keyword in order, running `is_match` for it on the
    /// blocking pool within `budget`.
    async fn evaluate_regex<S>(
        &self,
        text: &str,
        keywords: &[String],
        budget: Duration,
        is_match: S,
    ) -> Option<String>
    where
        S: Fn(&Regex, &str) -> bool + Copy + Send + 'static,
    {
        let haystack: Arc<str> = Arc::from(text);

        for keyword in keywords {
            match self
                .search(keyword, Arc::clone(&haystack), budget, is_match)
                .await
            {
                Ok(true) => {
                    trace!(keyword = %keyword, "Regex keyword matched");
                    return Some(keyword.clone());
                }
                Ok(false) => {}
                Err(e @ MatchError::InvalidPattern { .. }) => {
                    warn!(keyword = %keyword, error = %e, "Invalid regex keyword, skipping");
                }
                Err(e @ MatchError::Timeout { .. }) => {
                    warn!(keyword = %keyword, error = %e, "Regex keyword timed out, skipping");
                    metrics::counter!("keyword_monitor_regex_timeouts_total").increment(1);
                }
                Err(e @ MatchError::Runtime(_)) => {
                    error!(keyword = %keyword, error = %e, "Regex keyword evaluation failed, skipping");
                    metrics::counter!("keyword_monitor_regex_errors_total").increment(1);
                }
            }
        }

        None
    }

    /// Compile (through the cache) and search one pattern within `budget`.
    async fn search<S>(
        &self,
        keyword: &str,
        haystack: Arc<str>,
        budget: Duration,
        is_match: S,
    ) -> Result<bool, MatchError>
    where
        S: Fn(&Regex, &str) -> bool + Send + 'static,
    {
        let patterns = self.patterns.clone();
        let pattern = keyword.to_string();

        run_bounded(budget, move || {
            let regex = patterns
                .try_get_with(pattern.clone(), || compile_pattern(&pattern).map(Arc::new))
                .map_err(|e| MatchError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
            Ok(is_match(&*regex, &*haystack))
        })
        .await?
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("cached_patterns", &self.patterns.entry_count())
            .finish()
    }
}

/// Run `work` on the blocking pool and wait at most `budget` for it.
///
/// On timeout the worker is detached and its result discarded; a panic in
/// the worker is reported as [`MatchError::Runtime`].
pub async fn run_bounded<F, T>(budget: Duration, work: F) -> Result<T, MatchError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);

    match tokio::time::timeout(budget, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_error)) => Err(MatchError::Runtime(join_error.to_string())),
        Err(_) => Err(MatchError::Timeout {
            budget_ms: budget.as_millis(),
        }),
    }
}
