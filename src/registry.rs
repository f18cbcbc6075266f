//! Rule registry: static configured rules plus temporary rules added at runtime.
//!
//! Static rule texts are parsed once when the registry is built; malformed
//! texts are logged at that point and never again. Temporary rules are
//! persisted in the key-value store under [`TEMP_RULES_KEY`] as a JSON array
//! of raw rule texts, append-only.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{AddRuleError, RuleError, StoreError};
use crate::matcher::MatchMode;
use crate::pattern::invalid_patterns;
use crate::rule::{Rule, compose, split_keywords};
use crate::store::KvStore;

/// Store key of the persisted temporary rule texts.
pub const TEMP_RULES_KEY: &str = "temp_rules";

/// Where a rule text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOrigin {
    /// Listed in the configuration file.
    Static,
    /// Added through [`RuleRegistry::add_temporary`] or reloaded from the store.
    Temporary,
}

impl std::fmt::Display for RuleOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleOrigin::Static => f.write_str("static"),
            RuleOrigin::Temporary => f.write_str("temporary"),
        }
    }
}

/// One rule text together with its parse outcome.
#[derive(Debug, Clone)]
pub struct RuleEntry {
    pub origin: RuleOrigin,
    pub text: String,
    pub parsed: Result<Arc<Rule>, RuleError>,
}

impl RuleEntry {
    fn new(origin: RuleOrigin, text: String) -> Self {
        let parsed = Rule::parse(&text).map(Arc::new);
        if let Err(e) = &parsed {
            tracing::warn!(origin = %origin, rule = %text, error = %e, "Skipping malformed rule");
        }
        Self {
            origin,
            text,
            parsed,
        }
    }

    /// The parsed rule, if the text was well formed.
    pub fn rule(&self) -> Option<&Arc<Rule>> {
        self.parsed.as_ref().ok()
    }
}

/// Active rule set shared by all dispatch paths.
pub struct RuleRegistry {
    static_entries: Vec<RuleEntry>,
    temporary: RwLock<Vec<RuleEntry>>,
    mode: MatchMode,
    store: Arc<dyn KvStore>,
    /// Serializes temporary rule additions.
    add_lock: tokio::sync::Mutex<()>,
}

impl RuleRegistry {
    /// Build a registry from configured rule texts.
    pub fn new(rule_texts: &[String], mode: MatchMode, store: Arc<dyn KvStore>) -> Self {
        let static_entries: Vec<RuleEntry> = rule_texts
            .iter()
            .map(|text| RuleEntry::new(RuleOrigin::Static, text.clone()))
            .collect();

        let valid = static_entries.iter().filter(|e| e.parsed.is_ok()).count();
        tracing::info!(
            rules = static_entries.len(),
            valid = valid,
            mode = %mode,
            "Rule registry initialized"
        );

        Self {
            static_entries,
            temporary: RwLock::new(Vec::new()),
            mode,
            store,
            add_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Rules monitoring `channel`, static before temporary, in definition order.
    pub fn rules_for(&self, channel: &str) -> Vec<Arc<Rule>> {
        let temporary = self.temporary.read().unwrap_or_else(PoisonError::into_inner);
        self.static_entries
            .iter()
            .chain(temporary.iter())
            .filter_map(RuleEntry::rule)
            .filter(|rule| rule.monitor_channel == channel)
            .cloned()
            .collect()
    }

    /// Every known rule text with its origin and parse outcome.
    pub fn entries(&self) -> Vec<RuleEntry> {
        let temporary = self.temporary.read().unwrap_or_else(PoisonError::into_inner);
        self.static_entries
            .iter()
            .chain(temporary.iter())
            .cloned()
            .collect()
    }

    /// Load persisted temporary rules into the active set.
    ///
    /// Texts already active are skipped. Returns the number of rules added.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read or the persisted
    /// value is not a JSON array of strings.
    pub async fn load_temporary(&self) -> Result<usize, StoreError> {
        let _guard = self.add_lock.lock().await;
        self.store.refresh().await?;
        let persisted = self.persisted_temporary().await?;

        let mut temporary = self.temporary.write().unwrap_or_else(PoisonError::into_inner);
        let mut loaded = 0;
        for text in persisted {
            if temporary.iter().any(|e| e.text == text) {
                continue;
            }
            temporary.push(RuleEntry::new(RuleOrigin::Temporary, text));
            loaded += 1;
        }

        if loaded > 0 {
            tracing::info!(loaded = loaded, total = temporary.len(), "Temporary rules loaded");
        } else {
            tracing::debug!(total = temporary.len(), "No new temporary rules");
        }
        Ok(loaded)
    }

    /// Reload persisted temporary rules every `period` until `cancel` fires,
    /// so rules added by another process sharing the store become active.
    pub async fn watch_temporary(&self, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.load_temporary().await {
                        tracing::warn!(error = %e, "Failed to reload temporary rules");
                    }
                }
            }
        }
    }

    /// Add a temporary rule, persist it and activate it immediately.
    ///
    /// The raw text `monitor|keywords_csv|notify` is composed verbatim and
    /// compared by exact string equality against the persisted set.
    ///
    /// # Errors
    ///
    /// * [`AddRuleError::EmptyKeywords`] if no keyword survives trimming.
    /// * [`AddRuleError::InvalidPattern`] in regex mode, listing every
    ///   keyword that does not compile.
    /// * [`AddRuleError::Malformed`] if the composed text is not a valid rule.
    /// * [`AddRuleError::AlreadyExists`] if the exact text is already persisted.
    /// * [`AddRuleError::Store`] if the store cannot be read or written.
    pub async fn add_temporary(
        &self,
        monitor_channel: &str,
        keywords_csv: &str,
        notify_channel: &str,
    ) -> Result<Arc<Rule>, AddRuleError> {
        let _guard = self.add_lock.lock().await;

        let keywords = split_keywords(keywords_csv);
        if keywords.is_empty() {
            return Err(AddRuleError::EmptyKeywords);
        }

        if self.mode == MatchMode::Regex {
            let invalid = invalid_patterns(&keywords);
            if !invalid.is_empty() {
                return Err(AddRuleError::InvalidPattern(invalid));
            }
        }

        let text = compose(monitor_channel, keywords_csv, notify_channel);
        let rule = Arc::new(Rule::parse(&text)?);

        self.store.refresh().await?;
        let mut persisted = self.persisted_temporary().await?;
        if persisted.contains(&text) {
            return Err(AddRuleError::AlreadyExists);
        }

        persisted.push(text.clone());
        let value = serde_json::to_string(&persisted)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.store.set(TEMP_RULES_KEY, value).await?;

        self.temporary
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RuleEntry {
                origin: RuleOrigin::Temporary,
                text: text.clone(),
                parsed: Ok(Arc::clone(&rule)),
            });

        tracing::info!(
            rule = %text,
            monitor = %rule.monitor_channel,
            notify = %rule.notify_channel,
            "Temporary rule added"
        );
        metrics::counter!("keyword_monitor_temporary_rules_added_total").increment(1);

        Ok(rule)
    }

    async fn persisted_temporary(&self) -> Result<Vec<String>, StoreError> {
        match self.store.get(TEMP_RULES_KEY).await? {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .map_err(|e| StoreError::Corrupt(format!("{TEMP_RULES_KEY}: {e}"))),
            _ => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let temporary = self.temporary.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RuleRegistry")
            .field("mode", &self.mode)
            .field("static_rules", &self.static_entries.len())
            .field("temporary_rules", &temporary.len())
            .finish()
    }
}
