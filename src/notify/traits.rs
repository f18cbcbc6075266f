//! Notifier trait definition.

use async_trait::async_trait;

use crate::error::NotifyError;

/// Outbound send primitive: delivers a rendered notification to a channel.
///
/// Implementations must be `Send + Sync` to be shared by dispatch tasks and
/// manage their own retry policy.
///
/// # Example
///
/// ```ignore
/// use keyword_monitor::notify::Notifier;
///
/// struct LogNotifier;
///
/// #[async_trait]
/// impl Notifier for LogNotifier {
///     fn name(&self) -> &str { "log" }
///     fn notifier_type(&self) -> &str { "log" }
///     async fn send(&self, channel: &str, text: &str) -> Result<(), NotifyError> {
///         tracing::info!(channel, text, "notification");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name of this notifier instance, used in logs and metrics.
    fn name(&self) -> &str;

    /// Kind of notifier (e.g. "webhook", "stdout").
    fn notifier_type(&self) -> &str;

    /// Deliver `text` to `channel`.
    ///
    /// Returns an error only once the notifier has given up; the caller
    /// does not retry.
    async fn send(&self, channel: &str, text: &str) -> Result<(), NotifyError>;
}

impl std::fmt::Debug for dyn Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("name", &self.name())
            .field("type", &self.notifier_type())
            .finish()
    }
}
