//! Command-line interface using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format for log aggregation.
    Json,
}

/// Keyword watch and rate-limited notification relay for chat channels.
#[derive(Parser, Debug)]
#[command(name = "keyword-monitor")]
#[command(version)]
#[command(about = "Keyword watch and rate-limited notification relay for chat channels")]
pub struct Cli {
    /// Path to configuration file.
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Validate configuration and exit.
    #[arg(long = "validate")]
    pub validate: bool,

    /// Log format: text or json.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, env = "LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Operation to run; defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read message events (JSON lines) and dispatch notifications.
    Run {
        /// Read events from this file instead of standard input.
        #[arg(short = 'i', long = "input")]
        input: Option<PathBuf>,
    },
    /// List every rule with its validity and last notification time.
    ListRules,
    /// Check a regular expression and optionally show what it matches.
    TestPattern {
        pattern: String,
        /// Sample text to search.
        sample: Option<String>,
    },
    /// Add a temporary rule to the store.
    AddRule {
        monitor_channel: String,
        /// Comma-separated keywords.
        keywords: String,
        notify_channel: String,
    },
}

impl Cli {
    /// The selected command, `run` from standard input when none is given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run { input: None })
    }
}
