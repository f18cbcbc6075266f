//! Standard output notifier.
//!
//! Writes one JSON object per notification, `{"channel": ..., "text": ...}`,
//! so the output can be piped to whatever relays messages to the platform.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::NotifyError;
use crate::notify::Notifier;

#[derive(Serialize)]
struct OutboundLine<'a> {
    channel: &'a str,
    text: &'a str,
}

/// Notifier writing JSON lines to a stream, standard output by default.
pub struct StdoutNotifier {
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl StdoutNotifier {
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }

    /// Write to `writer` instead of standard output.
    pub fn with_writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
        }
    }
}

impl Default for StdoutNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for StdoutNotifier {
    fn name(&self) -> &str {
        "stdout"
    }

    fn notifier_type(&self) -> &str {
        "stdout"
    }

    async fn send(&self, channel: &str, text: &str) -> Result<(), NotifyError> {
        let mut line = serde_json::to_vec(&OutboundLine { channel, text })
            .map_err(|e| NotifyError::SendFailed(format!("JSON serialization error: {}", e)))?;
        line.push(b'\n');

        // One lock per line so concurrent notifications never interleave.
        let mut out = self.out.lock().await;
        out.write_all(&line)
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;

        tracing::debug!(notify_channel = %channel, "Notification written to stdout");
        Ok(())
    }
}

impl std::fmt::Debug for StdoutNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdoutNotifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_one_json_line_per_notification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ndjson");
        let file = tokio::fs::File::create(&path).await.unwrap();
        let notifier = StdoutNotifier::with_writer(file);

        notifier.send("chatB", "line one\nline two").await.unwrap();
        notifier.send("chatC", "🔔 second").await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["channel"], "chatB");
        assert_eq!(lines[0]["text"], "line one\nline two");
        assert_eq!(lines[1]["channel"], "chatC");
        assert_eq!(lines[1]["text"], "🔔 second");
    }

    #[tokio::test]
    async fn identifies_as_stdout() {
        let notifier = StdoutNotifier::default();
        assert_eq!(notifier.name(), "stdout");
        assert_eq!(notifier.notifier_type(), "stdout");
    }
}
