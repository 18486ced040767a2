//! File-backed key-value store.
//!
//! Layout under the root directory:
//!
//! ```text
//! .writer.lock          exclusive lock held by the single writer
//! .intent.json          pending batch, present only while a batch is applied
//! <hex(namespace)>/     one directory per namespace
//!     <hex(key)>        one file per key
//! ```
//!
//! Single writes go to a temporary file that is synced and renamed over the
//! target. A batch is first recorded in the intent file, then applied; an
//! intent left behind by a crash is replayed on the next writable open, so a
//! batch is either fully visible or not at all. Readers never take the lock.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::kv::{KvStore, KvWrite, validate_key, validate_namespace};

const LOCK_FILE: &str = ".writer.lock";
const INTENT_FILE: &str = ".intent.json";

#[derive(Debug, Serialize, Deserialize)]
struct Intent {
    namespace: String,
    writes: Vec<KvWrite>,
}

#[derive(Debug)]
struct Layout {
    root: PathBuf,
}

impl Layout {
    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(hex::encode(namespace))
    }

    fn key_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.namespace_dir(namespace).join(hex::encode(key))
    }

    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> StorageResult<()> {
        let dir = target
            .parent()
            .ok_or_else(|| StorageError::Internal(format!("{} has no parent", target.display())))?;
        fs::create_dir_all(dir)?;
        let mut tmp_name = target.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, target)?;
        sync_dir(dir);
        Ok(())
    }

    fn read(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.key_path(namespace, key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        match fs::remove_file(self.key_path(namespace, key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let dir = self.namespace_dir(namespace);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            // Leftover temporaries from an interrupted write are not keys.
            if name.ends_with(".tmp") {
                continue;
            }
            let Ok(raw) = hex::decode(name) else { continue };
            if let Ok(key) = String::from_utf8(raw) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn apply(&self, intent: &Intent) -> StorageResult<()> {
        for write in &intent.writes {
            match write {
                KvWrite::Put { key, value } => {
                    self.write_atomic(&self.key_path(&intent.namespace, key), value)?;
                },
                KvWrite::Delete { key } => {
                    self.remove(&intent.namespace, key)?;
                },
            }
        }
        Ok(())
    }

    fn write_batch(&self, intent: &Intent) -> StorageResult<()> {
        let intent_path = self.root.join(INTENT_FILE);
        let encoded = serde_json::to_vec(intent).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.write_atomic(&intent_path, &encoded)?;
        self.apply(intent)?;
        fs::remove_file(&intent_path)?;
        sync_dir(&self.root);
        Ok(())
    }

    fn replay_intent(&self) -> StorageResult<bool> {
        let intent_path = self.root.join(INTENT_FILE);
        let bytes = match fs::read(&intent_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<Intent>(&bytes) {
            Ok(intent) => {
                warn!(
                    namespace = %intent.namespace,
                    writes = intent.writes.len(),
                    "Replaying interrupted batch"
                );
                self.apply(&intent)?;
            },
            // The intent itself never finished writing, so nothing was applied.
            Err(e) => warn!(error = %e, "Discarding torn batch intent"),
        }
        fs::remove_file(&intent_path)?;
        Ok(true)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Durable key-value store on the local filesystem.
#[derive(Debug)]
pub struct FileKvStore {
    layout: Arc<Layout>,
    // Held for the lifetime of a writable store; dropping it releases the lock.
    lock: Option<File>,
}

impl FileKvStore {
    /// Open (creating if needed) a writable store at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another writer holds the store, or
    /// an I/O error if the directory cannot be prepared.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(root.join(LOCK_FILE))?;
        lock.try_lock_exclusive()
            .map_err(|_| StorageError::Locked(root.display().to_string()))?;

        let layout = Layout { root };
        if layout.replay_intent()? {
            debug!(root = %layout.root.display(), "Recovered pending batch");
        }
        Ok(Self {
            layout: Arc::new(layout),
            lock: Some(lock),
        })
    }

    /// Open an existing store for reading only. Takes no lock.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `root` does not exist.
    pub fn open_read_only(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(StorageError::Io(format!("{} is not a directory", root.display())));
        }
        Ok(Self {
            layout: Arc::new(Layout { root }),
            lock: None,
        })
    }

    /// The store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    fn writable(&self) -> StorageResult<()> {
        if self.lock.is_some() { Ok(()) } else { Err(StorageError::ReadOnly) }
    }

    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Layout) -> StorageResult<T> + Send + 'static,
    {
        let layout = Arc::clone(&self.layout);
        tokio::task::spawn_blocking(move || op(&layout))
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))?
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.blocking(move |layout| layout.read(&namespace, &key)).await
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.writable()?;
        validate_namespace(namespace)?;
        validate_key(key)?;
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.blocking(move |layout| layout.write_atomic(&layout.key_path(&namespace, &key), &value))
            .await
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        self.writable()?;
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.blocking(move |layout| layout.remove(&namespace, &key)).await
    }

    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        Ok(self.get(namespace, key).await?.is_some())
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let namespace = namespace.to_string();
        self.blocking(move |layout| layout.keys(&namespace)).await
    }

    async fn clear_namespace(&self, namespace: &str) -> StorageResult<u64> {
        self.writable()?;
        let namespace = namespace.to_string();
        self.blocking(move |layout| {
            let keys = layout.keys(&namespace)?;
            let count = u64::try_from(keys.len()).unwrap_or(u64::MAX);
            let intent = Intent {
                namespace,
                writes: keys.into_iter().map(|key| KvWrite::Delete { key }).collect(),
            };
            layout.write_batch(&intent)?;
            Ok(count)
        })
        .await
    }

    async fn write_batch(&self, namespace: &str, writes: Vec<KvWrite>) -> StorageResult<()> {
        self.writable()?;
        validate_namespace(namespace)?;
        for write in &writes {
            match write {
                KvWrite::Put { key, .. } | KvWrite::Delete { key } => validate_key(key)?,
            }
        }
        let intent = Intent {
            namespace: namespace.to_string(),
            writes,
        };
        self.blocking(move |layout| layout.write_batch(&intent)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_get_set_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::open(dir.path()).unwrap();
        store.set("audit:entries", "00000000000000000001", b"one".to_vec()).await.unwrap();
        assert_eq!(
            store.get("audit:entries", "00000000000000000001").await.unwrap(),
            Some(b"one".to_vec())
        );
        assert!(store.delete("audit:entries", "00000000000000000001").await.unwrap());
        assert_eq!(store.get("audit:entries", "00000000000000000001").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileKvStore::open(dir.path()).unwrap();
            store.set("ns", "k", b"v".to_vec()).await.unwrap();
        }
        let store = FileKvStore::open(dir.path()).unwrap();
        assert_eq!(store.get("ns", "k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_file_second_writer_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let _first = FileKvStore::open(dir.path()).unwrap();
        assert!(matches!(FileKvStore::open(dir.path()), Err(StorageError::Locked(_))));
        // Readers are never blocked.
        assert!(FileKvStore::open_read_only(dir.path()).is_ok());
    }

    #[tokio::test]
    async fn test_file_read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::open_read_only(dir.path()).unwrap();
        assert!(matches!(
            store.set("ns", "k", vec![]).await,
            Err(StorageError::ReadOnly)
        ));
    }

    #[tokio::test]
    async fn test_file_batch_and_sorted_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::open(dir.path()).unwrap();
        let writes = ["b", "c", "a"]
            .into_iter()
            .map(|k| KvWrite::Put {
                key: k.to_string(),
                value: k.as_bytes().to_vec(),
            })
            .collect();
        store.write_batch("ns", writes).await.unwrap();
        assert_eq!(store.list_keys("ns").await.unwrap(), vec!["a", "b", "c"]);
        assert!(!dir.path().join(INTENT_FILE).exists());
        assert_eq!(store.clear_namespace("ns").await.unwrap(), 3);
        assert!(store.list_keys("ns").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_batch_replayed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let intent = Intent {
            namespace: "ns".into(),
            writes: vec![KvWrite::Put {
                key: "k".into(),
                value: b"recovered".to_vec(),
            }],
        };
        fs::write(dir.path().join(INTENT_FILE), serde_json::to_vec(&intent).unwrap()).unwrap();

        let store = FileKvStore::open(dir.path()).unwrap();
        assert_eq!(store.get("ns", "k").await.unwrap(), Some(b"recovered".to_vec()));
        assert!(!dir.path().join(INTENT_FILE).exists());
    }

    #[tokio::test]
    async fn test_torn_intent_discarded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(INTENT_FILE), b"{\"namespace\":").unwrap();
        let store = FileKvStore::open(dir.path()).unwrap();
        assert!(store.list_keys("ns").await.unwrap().is_empty());
    }
}
