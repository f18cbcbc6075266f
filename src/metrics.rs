//! Prometheus metrics exposition server.
//!
//! Counters are emitted with the `metrics` facade throughout the crate; this
//! module installs the Prometheus recorder and its HTTP listener when
//! `metrics.enabled` is set.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Counter names and their HELP text.
const COUNTERS: &[(&str, &str)] = &[
    (
        "keyword_monitor_messages_evaluated_total",
        "Messages received on a monitored channel",
    ),
    (
        "keyword_monitor_matches_total",
        "Rule matches, before throttling",
    ),
    (
        "keyword_monitor_notifications_sent_total",
        "Notifications delivered",
    ),
    (
        "keyword_monitor_notifications_throttled_total",
        "Matches suppressed because the notify interval had not elapsed",
    ),
    (
        "keyword_monitor_notifications_failed_total",
        "Notifications that could not be delivered",
    ),
    (
        "keyword_monitor_regex_timeouts_total",
        "Regex keywords abandoned after exceeding the time budget",
    ),
    (
        "keyword_monitor_regex_errors_total",
        "Regex keyword evaluations that failed unexpectedly",
    ),
    (
        "keyword_monitor_temporary_rules_added_total",
        "Temporary rules added at runtime",
    ),
    (
        "keyword_monitor_invalid_events_total",
        "Input lines that were not valid message events",
    ),
    (
        "keyword_monitor_dispatch_panics_total",
        "Dispatch tasks that panicked",
    ),
];

/// Register all metric descriptions for Prometheus.
///
/// Call once after the recorder is installed.
pub fn register_metric_descriptions() {
    for (name, help) in COUNTERS {
        metrics::describe_counter!(*name, *help);
    }
    metrics::describe_gauge!(
        "keyword_monitor_build_info",
        "Build information with version label (always 1)"
    );
}

/// Set every known counter to zero so it is visible before the first event.
pub fn initialize_metrics() {
    metrics::gauge!("keyword_monitor_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    for (name, _) in COUNTERS {
        metrics::counter!(*name).absolute(0);
    }
    tracing::debug!(counters = COUNTERS.len(), "Metrics initialized to zero");
}

/// Metrics server for Prometheus exposition on `/metrics`.
pub struct MetricsServer {
    port: u16,
    ready_tx: tokio::sync::oneshot::Sender<()>,
}

impl MetricsServer {
    /// Create a server bound to `port` on all interfaces that signals
    /// `ready_tx` once the recorder is installed, so no metric emitted
    /// afterwards is lost. `ready_tx` is dropped unsent if installation fails.
    pub fn with_ready_signal(port: u16, ready_tx: tokio::sync::oneshot::Sender<()>) -> Self {
        Self { port, ready_tx }
    }

    /// Install the global recorder and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be installed (port in use,
    /// or a recorder is already installed in this process).
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();

        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

        register_metric_descriptions();
        initialize_metrics();

        let _ = self.ready_tx.send(());

        info!(port = self.port, "Metrics server started on /metrics");

        cancel.cancelled().await;

        info!("Metrics server shutting down");
        Ok(())
    }
}
