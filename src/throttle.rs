//! Notification throttling with persisted last-fire timestamps.
//!
//! Every rule connecting the same monitor channel to the same notify channel
//! shares one throttle bucket, identified by a [`ThrottleKey`]. A bucket fires
//! at most once per interval.
//!
//! # Architecture
//!
//! The last-fire timestamp of each bucket lives in the external key-value
//! store under `notify_time_<monitor>_<notify>`, as a decimal string. The
//! check and the update are serialized per bucket: callers obtain a
//! [`ThrottlePermit`] with [`ThrottleStore::acquire`], and hold it while the
//! notification is sent, so two concurrent matches on one bucket cannot both
//! pass the check.
//!
//! # Example
//!
//! ```ignore
//! let permit = throttle.acquire(&key).await;
//! if permit.should_fire(now, interval).await {
//!     notifier.send(channel, &text).await?;
//!     permit.record(now).await?;
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;

use crate::error::StoreError;
use crate::store::KvStore;

/// Prefix of the store key holding a bucket's last-fire timestamp.
pub const NOTIFY_TIME_PREFIX: &str = "notify_time_";

/// Identity of a throttle bucket, derived from a channel pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey(String);

impl ThrottleKey {
    /// Derive the key shared by all rules from `monitor_channel` to `notify_channel`.
    pub fn new(monitor_channel: &str, notify_channel: &str) -> Self {
        Self(format!("{monitor_channel}_{notify_channel}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the bucket's timestamp is stored.
    pub fn store_key(&self) -> String {
        format!("{NOTIFY_TIME_PREFIX}{}", self.0)
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Throttle state shared by all dispatch tasks.
pub struct ThrottleStore {
    store: Arc<dyn KvStore>,
    /// One async mutex per bucket, created on first use and never removed.
    locks: Mutex<HashMap<ThrottleKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThrottleStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Last-fire timestamp of `key` in epoch seconds, `None` if it never fired.
    ///
    /// Missing, unparsable and non-positive values all mean "never fired".
    /// A store read error is logged and treated the same way.
    pub async fn last_fired(&self, key: &ThrottleKey) -> Option<f64> {
        let raw = match self.store.get(&key.store_key()).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(throttle_key = %key, error = %e, "Failed to read throttle record, treating as never fired");
                return None;
            }
        };

        match raw.trim().parse::<f64>() {
            Ok(ts) if ts.is_finite() && ts > 0.0 => Some(ts),
            Ok(_) => None,
            Err(_) => {
                tracing::warn!(throttle_key = %key, value = %raw, "Unparsable throttle record, treating as never fired");
                None
            }
        }
    }

    /// Returns `true` if `key` has no record or its last fire is at least
    /// `interval` before `now`.
    ///
    /// This check alone is not atomic with [`record`](Self::record); use
    /// [`acquire`](Self::acquire) when a notification may follow.
    pub async fn should_fire(&self, key: &ThrottleKey, now: f64, interval: Duration) -> bool {
        match self.last_fired(key).await {
            None => true,
            Some(last) => now - last >= interval.as_secs_f64(),
        }
    }

    /// Persist `timestamp` as the last fire of `key`.
    ///
    /// # Errors
    ///
    /// Propagates the store's write error.
    pub async fn record(&self, key: &ThrottleKey, timestamp: f64) -> Result<(), StoreError> {
        self.store.set(&key.store_key(), timestamp.to_string()).await
    }

    /// Take exclusive access to the bucket of `key`.
    ///
    /// Waits while another task holds a permit for the same bucket. Permits
    /// for different buckets never contend.
    pub async fn acquire(&self, key: &ThrottleKey) -> ThrottlePermit<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let guard = lock.lock_owned().await;
        tracing::trace!(throttle_key = %key, "Throttle permit acquired");

        ThrottlePermit {
            store: self,
            key: key.clone(),
            _guard: guard,
        }
    }

    /// Number of buckets that have been acquired at least once.
    pub fn bucket_count(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for ThrottleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottleStore")
            .field("bucket_count", &self.bucket_count())
            .finish()
    }
}

/// Exclusive access to one throttle bucket; released on drop.
pub struct ThrottlePermit<'a> {
    store: &'a ThrottleStore,
    key: ThrottleKey,
    _guard: OwnedMutexGuard<()>,
}

impl ThrottlePermit<'_> {
    pub fn key(&self) -> &ThrottleKey {
        &self.key
    }

    /// See [`ThrottleStore::should_fire`].
    pub async fn should_fire(&self, now: f64, interval: Duration) -> bool {
        self.store.should_fire(&self.key, now, interval).await
    }

    /// See [`ThrottleStore::record`].
    pub async fn record(&self, timestamp: f64) -> Result<(), StoreError> {
        self.store.record(&self.key, timestamp).await
    }
}

impl fmt::Debug for ThrottlePermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottlePermit").field("key", &self.key).finish()
    }
}
