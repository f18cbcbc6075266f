//! Message ingestion loop.
//!
//! Reads newline-delimited JSON [`MessageEvent`]s from a stream and hands
//! each one to the [`Dispatcher`] in its own task, so messages from different
//! channels are processed concurrently and a slow notification never blocks
//! reading.
//!
//! ```text
//! {"chat_key":"onebot_v11-group_123456","text":"urgent: db down","channel_name":"Ops"}
//! ```
//!
//! At most `max_in_flight` dispatches run at once; when the limit is reached
//! reading pauses until one finishes. Lines that are not valid events are
//! logged and skipped. The loop ends at end of input or on cancellation; in
//! both cases in-flight dispatches are awaited before returning.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatchOutcome, Dispatcher, MessageEvent};

/// Counters for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Events parsed and dispatched.
    pub dispatched: u64,
    /// Non-blank lines that were not valid events.
    pub invalid: u64,
}

/// Feed every event read from `reader` to `dispatcher` until end of input or
/// until `cancel` fires, with at most `max_in_flight` dispatches running.
///
/// # Errors
/// Returns the I/O error that stopped reading. Dispatch failures are never
/// returned.
pub async fn run<R>(
    reader: R,
    dispatcher: Arc<Dispatcher>,
    max_in_flight: usize,
    cancel: CancellationToken,
) -> std::io::Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let limit = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut lines = reader.lines();
    let mut tasks: JoinSet<Vec<DispatchOutcome>> = JoinSet::new();
    let mut stats = IngestStats::default();

    let read_result = loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Ingestion cancelled");
                break Ok(());
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("End of input");
                break Ok(());
            }
            Err(e) => break Err(e),
        };

        if line.trim().is_empty() {
            continue;
        }

        let event: MessageEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping invalid message event");
                metrics::counter!("keyword_monitor_invalid_events_total").increment(1);
                stats.invalid += 1;
                continue;
            }
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Ingestion cancelled");
                break Ok(());
            }
            permit = Arc::clone(&limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break Ok(()),
            },
        };

        let dispatcher = Arc::clone(&dispatcher);
        tasks.spawn(async move {
            let outcomes = dispatcher.handle(&event).await;
            drop(permit);
            outcomes
        });
        stats.dispatched += 1;

        while let Some(result) = tasks.try_join_next() {
            log_task_result(result);
        }
    };

    while let Some(result) = tasks.join_next().await {
        log_task_result(result);
    }

    info!(
        dispatched = stats.dispatched,
        invalid = stats.invalid,
        "Ingestion finished"
    );
    read_result.map(|()| stats)
}

fn log_task_result(result: Result<Vec<DispatchOutcome>, tokio::task::JoinError>) {
    match result {
        Ok(outcomes) => {
            debug!(rules = outcomes.len(), "Message dispatched");
        }
        Err(join_error) if join_error.is_panic() => {
            error!(error = %join_error, "Dispatch task panicked");
            metrics::counter!("keyword_monitor_dispatch_panics_total").increment(1);
        }
        Err(join_error) => {
            debug!(error = %join_error, "Dispatch task cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatchSettings;
    use crate::error::NotifyError;
    use crate::notify::Notifier;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;
    use crate::matcher::MatchMode;
    use crate::notify::StdoutNotifier;
    use crate::registry::RuleRegistry;
    use crate::store::{KvStore, MemoryStore};
    use crate::template::NotificationComposer;
    use crate::throttle::ThrottleStore;
    use std::time::Duration;

    fn make_dispatcher(rules: &[&str], store: Arc<MemoryStore>, out: tokio::fs::File) -> Arc<Dispatcher> {
        let texts: Vec<String> = rules.iter().map(|r| r.to_string()).collect();
        Arc::new(Dispatcher::new(
            Arc::new(RuleRegistry::new(&texts, MatchMode::Fuzzy, store.clone())),
            Arc::new(ThrottleStore::new(store)),
            NotificationComposer::new("{keyword}", chrono_tz::UTC),
            Arc::new(StdoutNotifier::with_writer(out)),
            DispatchSettings::default(),
        ))
    }

    #[tokio::test]
    async fn dispatches_valid_lines_and_skips_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.ndjson");
        let store = Arc::new(MemoryStore::new());
        let dispatcher = make_dispatcher(
            &["chatA|hello|chatB"],
            store.clone(),
            tokio::fs::File::create(&out_path).await.unwrap(),
        );

        let input = concat!(
            r#"{"chat_key":"chatA","text":"hello there"}"#,
            "\n\nnot json\n",
            r#"{"chat_key":"chatC","text":"hello"}"#,
            "\n",
        );

        let stats = run(input.as_bytes(), dispatcher, 16, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            stats,
            IngestStats {
                dispatched: 2,
                invalid: 1
            }
        );

        let out = std::fs::read_to_string(&out_path).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains(r#""channel":"chatB""#));
        assert!(store.get("notify_time_chatA_chatB").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let dispatcher = make_dispatcher(
            &[],
            store,
            tokio::fs::File::create(dir.path().join("out")).await.unwrap(),
        );

        // A duplex stream with no writer activity never reaches end of input.
        let (_writer, reader) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(tokio::io::BufReader::new(reader), dispatcher, 16, cancel.clone()));

        cancel.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("ingestion did not stop")
            .unwrap()
            .unwrap();

        assert_eq!(stats, IngestStats::default());
    }

    /// Blocks every send until the gate is opened.
    struct GatedNotifier {
        started: AtomicUsize,
        gate: Semaphore,
    }

    #[async_trait]
    impl Notifier for GatedNotifier {
        fn name(&self) -> &str {
            "gated"
        }

        fn notifier_type(&self) -> &str {
            "gated"
        }

        async fn send(&self, _channel: &str, _text: &str) -> Result<(), NotifyError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.gate
                .acquire()
                .await
                .map_err(|e| NotifyError::SendFailed(e.to_string()))?
                .forget();
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_waits_when_in_flight_limit_is_reached() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(GatedNotifier {
            started: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        });
        let texts: Vec<String> = ["a|x|b", "c|x|d", "e|x|f"].iter().map(|r| r.to_string()).collect();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(RuleRegistry::new(&texts, MatchMode::Fuzzy, store.clone())),
            Arc::new(ThrottleStore::new(store)),
            NotificationComposer::new("{keyword}", chrono_tz::UTC),
            notifier.clone(),
            DispatchSettings::default(),
        ));

        let (mut writer, reader) = tokio::io::duplex(1024);
        writer
            .write_all(
                concat!(
                    r#"{"chat_key":"a","text":"x"}"#, "\n",
                    r#"{"chat_key":"c","text":"x"}"#, "\n",
                    r#"{"chat_key":"e","text":"x"}"#, "\n",
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let handle = tokio::spawn(run(
            tokio::io::BufReader::new(reader),
            dispatcher,
            1,
            CancellationToken::new(),
        ));

        // Three independent channel pairs, but only one dispatch may run.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(notifier.started.load(Ordering::SeqCst), 1);
        assert!(!handle.is_finished());

        notifier.gate.add_permits(3);
        drop(writer);

        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("ingestion did not finish")
            .unwrap()
            .unwrap();
        assert_eq!(stats.dispatched, 3);
        assert_eq!(notifier.started.load(Ordering::SeqCst), 3);
    }
}
