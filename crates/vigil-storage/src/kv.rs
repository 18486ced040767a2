//! Raw key-value store trait and the in-memory implementation.
//!
//! All operations are scoped to a namespace. The audit subsystem keeps its
//! entries, index and checkpoint in separate `audit:*` namespaces.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Namespaces must be non-empty and free of null bytes.
pub(crate) fn validate_namespace(namespace: &str) -> StorageResult<()> {
    if namespace.is_empty() {
        return Err(StorageError::InvalidKey("namespace must not be empty".into()));
    }
    if namespace.contains('\0') {
        return Err(StorageError::InvalidKey("namespace must not contain null bytes".into()));
    }
    Ok(())
}

/// Keys must be non-empty and free of null bytes.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".into()));
    }
    if key.contains('\0') {
        return Err(StorageError::InvalidKey("key must not contain null bytes".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One mutation inside a [`KvStore::write_batch`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KvWrite {
    /// Insert or overwrite a key.
    Put {
        /// Key within the namespace.
        key: String,
        /// Raw value bytes.
        value: Vec<u8>,
    },
    /// Remove a key if present.
    Delete {
        /// Key within the namespace.
        key: String,
    },
}

impl KvWrite {
    fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Raw key-value store trait.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value by namespace and key.
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Set a value, overwriting any existing one.
    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Delete a key. Returns `true` if it existed.
    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    /// Check if a key exists.
    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    /// List all keys in a namespace, sorted ascending.
    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>>;

    /// Delete all keys in a namespace, returning how many were removed.
    async fn clear_namespace(&self, namespace: &str) -> StorageResult<u64>;

    /// Apply every write or none of them.
    async fn write_batch(&self, namespace: &str, writes: Vec<KvWrite>) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

type Namespaces = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// In-memory key-value store for tests and ephemeral chains.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: std::sync::RwLock<Namespaces>,
}

impl MemoryKvStore {
    /// Create a new empty in-memory KV store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, Namespaces>> {
        self.data.read().map_err(|e| StorageError::Internal(e.to_string()))
    }

    fn write(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, Namespaces>> {
        self.data.write().map_err(|e| StorageError::Internal(e.to_string()))
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.read()?.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_namespace(namespace)?;
        validate_key(key)?;
        self.write()?
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        Ok(self
            .write()?
            .get_mut(namespace)
            .is_some_and(|ns| ns.remove(key).is_some()))
    }

    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        Ok(self.read()?.get(namespace).is_some_and(|ns| ns.contains_key(key)))
    }

    async fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .read()?
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_namespace(&self, namespace: &str) -> StorageResult<u64> {
        let removed = self.write()?.remove(namespace).map_or(0, |ns| ns.len());
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn write_batch(&self, namespace: &str, writes: Vec<KvWrite>) -> StorageResult<()> {
        validate_namespace(namespace)?;
        for write in &writes {
            validate_key(write.key())?;
        }
        let mut data = self.write()?;
        let ns = data.entry(namespace.to_string()).or_default();
        for write in writes {
            match write {
                KvWrite::Put { key, value } => {
                    ns.insert(key, value);
                },
                KvWrite::Delete { key } => {
                    ns.remove(&key);
                },
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scoped view
// ---------------------------------------------------------------------------

/// A [`KvStore`] bound to a single namespace.
#[derive(Clone)]
pub struct ScopedKvStore {
    inner: Arc<dyn KvStore>,
    namespace: String,
}

impl std::fmt::Debug for ScopedKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedKvStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ScopedKvStore {
    /// Create a scoped view into `store` for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the namespace is empty or
    /// contains null bytes.
    pub fn new(store: Arc<dyn KvStore>, namespace: impl Into<String>) -> StorageResult<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        Ok(Self {
            inner: store,
            namespace,
        })
    }

    /// The namespace this store is scoped to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get a raw value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] for an invalid key, or a backend error.
    pub async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        self.inner.get(&self.namespace, key).await
    }

    /// Set a raw value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] for an invalid key, or a backend error.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_key(key)?;
        self.inner.set(&self.namespace, key, value).await
    }

    /// Delete a key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] for an invalid key, or a backend error.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.inner.delete(&self.namespace, key).await
    }

    /// List all keys, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn list_keys(&self) -> StorageResult<Vec<String>> {
        self.inner.list_keys(&self.namespace).await
    }

    /// Apply a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if any key is invalid or the backend fails; in that
    /// case no write is applied.
    pub async fn write_batch(&self, writes: Vec<KvWrite>) -> StorageResult<()> {
        self.inner.write_batch(&self.namespace, writes).await
    }

    /// Deserialize a JSON value. Returns `None` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if deserialization fails.
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        self.get(key)
            .await?
            .map(|b| serde_json::from_slice(&b).map_err(|e| StorageError::Serialization(e.to_string())))
            .transpose()
    }

    /// Serialize a value as JSON and store it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if serialization fails.
    pub async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.set(key, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_get_set_delete() {
        let store = MemoryKvStore::new();
        store.set("ns", "k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("ns", "k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.exists("ns", "k").await.unwrap());
        assert!(store.delete("ns", "k").await.unwrap());
        assert!(!store.delete("ns", "k").await.unwrap());
        assert_eq!(store.get("ns", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_namespace_isolation() {
        let store = MemoryKvStore::new();
        store.set("a", "k", b"1".to_vec()).await.unwrap();
        store.set("b", "k", b"2".to_vec()).await.unwrap();
        assert_eq!(store.get("a", "k").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.clear_namespace("a").await.unwrap(), 1);
        assert_eq!(store.get("b", "k").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_list_keys_sorted() {
        let store = MemoryKvStore::new();
        for key in ["003", "001", "002"] {
            store.set("ns", key, vec![]).await.unwrap();
        }
        assert_eq!(store.list_keys("ns").await.unwrap(), vec!["001", "002", "003"]);
    }

    #[tokio::test]
    async fn test_memory_batch_rejects_invalid_key_without_partial_write() {
        let store = MemoryKvStore::new();
        let writes = vec![
            KvWrite::Put {
                key: "good".into(),
                value: b"x".to_vec(),
            },
            KvWrite::Put {
                key: String::new(),
                value: b"y".to_vec(),
            },
        ];
        assert!(store.write_batch("ns", writes).await.is_err());
        assert!(!store.exists("ns", "good").await.unwrap());
    }

    #[test]
    fn test_validate_rejects_null_bytes() {
        assert!(validate_namespace("a\0b").is_err());
        assert!(validate_key("a\0b").is_err());
        assert!(validate_namespace("").is_err());
    }

    #[tokio::test]
    async fn test_scoped_json_round_trip() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Head {
            sequence: u64,
        }
        let scoped = ScopedKvStore::new(Arc::new(MemoryKvStore::new()), "audit:index").unwrap();
        scoped.set_json("head", &Head { sequence: 7 }).await.unwrap();
        assert_eq!(scoped.get_json::<Head>("head").await.unwrap(), Some(Head { sequence: 7 }));
        assert_eq!(scoped.get_json::<Head>("missing").await.unwrap(), None);
    }

    #[test]
    fn test_scoped_rejects_empty_namespace() {
        assert!(ScopedKvStore::new(Arc::new(MemoryKvStore::new()), "").is_err());
    }
}
