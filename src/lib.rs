//! keyword-monitor - keyword watch and rate-limited notification relay for
//! chat channels.
//!
//! Messages from monitored channels are matched against per-channel keyword
//! rules; a match produces a templated notification to another channel, at
//! most once per interval for each pair of channels.

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ingest;
pub mod matcher;
pub mod metrics;
pub mod notify;
pub mod pattern;
pub mod registry;
pub mod rule;
pub mod store;
pub mod template;
pub mod throttle;
pub mod tools;

// Re-export commonly used types
pub use cli::LogFormat;
pub use dispatcher::{DispatchOutcome, DispatchSettings, Dispatcher, MessageEvent};
pub use matcher::{MatchMode, Matcher};
pub use metrics::{MetricsServer, register_metric_descriptions};
pub use notify::{Notifier, StdoutNotifier, WebhookNotifier, backoff_delay, build_notifier};
pub use registry::{RuleEntry, RuleOrigin, RuleRegistry};
pub use rule::Rule;
pub use store::{FileStore, KvStore, MemoryStore};
pub use template::NotificationComposer;
pub use throttle::{ThrottleKey, ThrottlePermit, ThrottleStore};
pub use tools::RuleTools;
