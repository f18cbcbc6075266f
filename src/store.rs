//! Key-value store collaborator.
//!
//! The engine persists two kinds of values through this interface:
//! last-notification timestamps (`notify_time_<monitor>_<notify>`) and the
//! temporary rule list (`temp_rules`). Two implementations are provided:
//!
//! - [`MemoryStore`]: process-local, used in tests and when no path is configured.
//! - [`FileStore`]: a JSON object on disk, merged and rewritten atomically on
//!   each `set` so several processes can share it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Durable string key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, overwriting any previous one.
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Pick up values written by other processes sharing the same backing
    /// storage. A no-op for stores that are never shared.
    async fn refresh(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").finish_non_exhaustive()
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by a single JSON file, shareable between processes.
///
/// Reads are served from an in-memory copy. Every `set` takes an exclusive
/// lock on a `<file>.lock` sibling, re-reads the file, applies its one key and
/// writes the result through a temporary sibling and a rename. Keys written by
/// other processes are kept and become visible here after the next `set` or
/// [`refresh`](KvStore::refresh).
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, loading existing content if the file exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read and
    /// [`StoreError::Corrupt`] if it is not a JSON object of strings.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let read_path = path.clone();
        let entries = blocking(move || read_entries(&read_path)).await?;

        tracing::debug!(path = %path.display(), entries = entries.len(), "File store opened");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        // Hold the write lock across the file update so sets from this process persist in order.
        let mut entries = self.entries.write().await;

        let path = self.path.clone();
        let key = key.to_string();
        *entries = blocking(move || write_entry(&path, &key, value)).await?;
        Ok(())
    }

    async fn refresh(&self) -> Result<(), StoreError> {
        let path = self.path.clone();
        let fresh = blocking(move || read_entries(&path)).await?;
        *self.entries.write().await = fresh;
        Ok(())
    }
}

async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn read_entries(path: &Path) -> Result<HashMap<String, String>, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
        Ok(content) => serde_json::from_str(&content)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

/// Merge one key into the file under the cross-process lock and return the
/// merged map.
fn write_entry(
    path: &Path,
    key: &str,
    value: String,
) -> Result<HashMap<String, String>, StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let lock = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(sibling(path, ".lock"))?;
    // Released when `lock` is dropped.
    lock.lock()?;

    let mut entries = read_entries(path)?;
    entries.insert(key.to_string(), value);

    let content =
        serde_json::to_string_pretty(&entries).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let tmp = sibling(path, ".tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn memory_store_get_set() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "1".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));

        store.set("k", "2".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.json");

        {
            let store = FileStore::open(&path).await.unwrap();
            store.set("notify_time_a_b", "1000".to_string()).await.unwrap();
            store.set("temp_rules", r#"["a|x|b"]"#.to_string()).await.unwrap();
        }

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(
            store.get("notify_time_a_b").await.unwrap().as_deref(),
            Some("1000")
        );
        assert_eq!(
            store.get("temp_rules").await.unwrap().as_deref(),
            Some(r#"["a|x|b"]"#)
        );
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("absent.json")).await.unwrap();
        assert_eq!(store.get("anything").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        let result = FileStore::open(&path).await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn file_store_keeps_keys_written_by_another_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let running = FileStore::open(&path).await.unwrap();
        let other = FileStore::open(&path).await.unwrap();

        other.set("temp_rules", r#"["chatX|deploy|chatY"]"#.to_string()).await.unwrap();
        running.set("notify_time_chatA_chatB", "1000".to_string()).await.unwrap();

        // The merged write also updated the running handle's view.
        assert_eq!(
            running.get("temp_rules").await.unwrap().as_deref(),
            Some(r#"["chatX|deploy|chatY"]"#)
        );

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("temp_rules").await.unwrap().as_deref(),
            Some(r#"["chatX|deploy|chatY"]"#)
        );
        assert_eq!(
            reopened.get("notify_time_chatA_chatB").await.unwrap().as_deref(),
            Some("1000")
        );
    }

    #[tokio::test]
    async fn file_store_refresh_reads_other_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let reader = FileStore::open(&path).await.unwrap();
        let writer = FileStore::open(&path).await.unwrap();
        writer.set("k", "v".to_string()).await.unwrap();

        assert_eq!(reader.get("k").await.unwrap(), None);
        reader.refresh().await.unwrap();
        assert_eq!(reader.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn file_store_concurrent_writers_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut tasks = Vec::new();
        for handle in 0..4 {
            let store = Arc::new(FileStore::open(&path).await.unwrap());
            for n in 0..10 {
                let store = Arc::clone(&store);
                tasks.push(tokio::spawn(async move {
                    store.set(&format!("k_{handle}_{n}"), n.to_string()).await.unwrap();
                }));
            }
        }
        futures_util::future::join_all(tasks).await;

        let reopened = FileStore::open(&path).await.unwrap();
        for handle in 0..4 {
            for n in 0..10 {
                assert_eq!(
                    reopened.get(&format!("k_{handle}_{n}")).await.unwrap(),
                    Some(n.to_string())
                );
            }
        }
    }

    #[tokio::test]
    async fn memory_store_refresh_is_a_no_op() {
        let store = MemoryStore::new();
        store.set("k", "v".to_string()).await.unwrap();
        store.refresh().await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn store_is_object_safe() {
        let store: Box<dyn KvStore> = Box::new(MemoryStore::new());
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(format!("{:?}", store).contains("KvStore"));
    }
}
