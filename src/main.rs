//! keyword-monitor - keyword watch and rate-limited notification relay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use keyword_monitor::cli::{Cli, Command, LogFormat};
use keyword_monitor::config::{Config, RuntimeConfig, StoreConfig};
use keyword_monitor::{
    DispatchSettings, Dispatcher, FileStore, KvStore, MemoryStore, MetricsServer,
    NotificationComposer, RuleRegistry, RuleTools, ThrottleStore, build_notifier, ingest,
};

/// How long startup waits for the metrics recorder to be installed.
const METRICS_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize the tracing subscriber with the specified log format.
///
/// Logs always go to stderr; stdout carries notifications and reports.
fn init_logging(format: LogFormat, debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .with_env_filter(filter)
                .init();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load first so `enable_debug` can set the log level.
    let loaded = Config::load(&cli.config);
    init_logging(
        cli.log_format,
        loaded.as_ref().is_ok_and(|c| c.enable_debug),
    );

    let config = match loaded {
        Ok(c) => {
            info!(config_path = %cli.config.display(), "Configuration loaded");
            c
        }
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "Failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!(error = %e, "Configuration validation error");
        }
        error!(error_count = errors.len(), "Configuration validation failed");
        std::process::exit(1);
    }

    let warnings = config.rule_warnings();
    for warning in &warnings {
        warn!(warning = %warning, "Rule will be skipped or partially ignored");
    }

    if cli.validate {
        println!("Configuration is valid: {}", cli.config.display());
        println!(
            "  Rules: {} ({} with warnings)",
            config.monitor_rules.len(),
            warnings.len()
        );
        println!("  Match mode: {}", config.match_mode);
        println!("  Notify interval: {}s", config.notify_interval);
        println!("  Delivery: {}", config.delivery.kind());
        println!(
            "  Store: {}",
            config
                .store
                .path
                .as_ref()
                .map_or("in-memory".to_string(), |p| p.display().to_string())
        );
        println!(
            "  Metrics: {} (port {})",
            if config.metrics.enabled {
                "enabled"
            } else {
                "disabled"
            },
            config.metrics.port
        );
        for warning in &warnings {
            println!("  Warning: {}", warning);
        }
        return Ok(());
    }

    let runtime_config = config.compile()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(run(cli.command(), runtime_config));
    // A pending stdin read would otherwise keep the runtime alive after ctrl-c.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    match &config.path {
        Some(path) => {
            let store = FileStore::open(path)
                .await
                .with_context(|| format!("failed to open store {}", path.display()))?;
            info!(path = %path.display(), "Using file store");
            Ok(Arc::new(store))
        }
        None => {
            info!("Using in-memory store; throttle state and temporary rules are not kept across restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Main async entry point.
async fn run(command: Command, config: RuntimeConfig) -> Result<()> {
    let store = open_store(&config.store).await?;

    let registry = Arc::new(RuleRegistry::new(
        &config.monitor_rules,
        config.match_mode,
        store.clone(),
    ));
    if config.reload_temporary_rules
        && let Err(e) = registry.load_temporary().await
    {
        warn!(error = %e, "Failed to load temporary rules, continuing without them");
    }

    let throttle = Arc::new(ThrottleStore::new(store.clone()));
    let tools = RuleTools::new(
        registry.clone(),
        throttle.clone(),
        config.timezone,
        config.regex_timeout,
    );

    match command {
        Command::ListRules => {
            println!("{}", tools.list_rules().await);
            Ok(())
        }
        Command::TestPattern { pattern, sample } => {
            println!("{}", tools.test_pattern(&pattern, sample.as_deref()).await);
            Ok(())
        }
        Command::AddRule {
            monitor_channel,
            keywords,
            notify_channel,
        } => {
            if config.store.path.is_none() {
                warn!("No store path configured; the rule is lost when this command exits");
            }
            println!(
                "{}",
                tools
                    .add_temporary_rule(&monitor_channel, &keywords, &notify_channel)
                    .await
            );
            Ok(())
        }
        Command::Run { input } => {
            let dispatcher = Arc::new(Dispatcher::new(
                registry.clone(),
                throttle,
                NotificationComposer::new(config.notify_template.clone(), config.timezone),
                build_notifier(&config.delivery)?,
                DispatchSettings {
                    notify_interval: config.notify_interval,
                    regex_timeout: config.regex_timeout,
                },
            ));
            serve(dispatcher, registry, input, &config).await
        }
    }
}

async fn serve(
    dispatcher: Arc<Dispatcher>,
    registry: Arc<RuleRegistry>,
    input: Option<std::path::PathBuf>,
    config: &RuntimeConfig,
) -> Result<()> {
    let cancel = CancellationToken::new();

    let metrics_handle = if config.metrics.enabled {
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let server = MetricsServer::with_ready_signal(config.metrics.port, ready_tx);
        let cancel_metrics = cancel.clone();
        info!(port = config.metrics.port, "Starting metrics server");
        let handle = tokio::spawn(async move {
            if let Err(e) = server.run(cancel_metrics).await {
                error!(error = %e, "Metrics server error");
            }
        });

        // Counters emitted before the recorder is installed would be lost.
        match tokio::time::timeout(METRICS_READY_TIMEOUT, ready_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("Metrics server failed to start, continuing without metrics"),
            Err(_) => warn!("Metrics server not ready in time, continuing"),
        }
        Some(handle)
    } else {
        info!("Metrics server disabled");
        None
    };

    if config.reload_temporary_rules
        && let Some(period) = config.temp_rules_refresh
    {
        let cancel_watch = cancel.clone();
        info!(period_secs = period.as_secs(), "Watching store for new temporary rules");
        tokio::spawn(async move { registry.watch_temporary(period, cancel_watch).await });
    }

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c signal");
            return;
        }
        info!("Received shutdown signal, initiating graceful shutdown");
        cancel_clone.cancel();
    });

    info!(
        rules = config.monitor_rules.len(),
        mode = %config.match_mode,
        interval_secs = config.notify_interval.as_secs(),
        "keyword-monitor starting"
    );

    let result = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open input {}", path.display()))?;
            ingest::run(
                BufReader::new(file),
                dispatcher,
                config.max_in_flight,
                cancel.clone(),
            )
            .await
        }
        None => {
            ingest::run(
                BufReader::new(tokio::io::stdin()),
                dispatcher,
                config.max_in_flight,
                cancel.clone(),
            )
            .await
        }
    };

    cancel.cancel();
    if let Some(handle) = metrics_handle {
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    let stats = result.context("failed to read message events")?;
    info!(
        dispatched = stats.dispatched,
        invalid = stats.invalid,
        "keyword-monitor shutdown complete"
    );
    Ok(())
}
