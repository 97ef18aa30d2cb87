//! Key/value storage and the artifact registry.
//!
//! The session manager leaves a few breadcrumbs in session storage during a
//! login round trip (where to come back to, which attempt this is). These
//! have to go on logout and on recovery from a bad redirect. The
//! [`ArtifactRegistry`] remembers each key it wrote and removes exactly
//! those. It never scans storage by prefix.
//!
//! The list of written keys is itself kept in storage, under
//! `"{namespace}._index"`, so a registry created on the next page load
//! can still clean up what the previous one left.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Errors from a [`Storage`] backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The backend refused the write (quota, private mode, ...).
    #[error("storage write rejected: {0}")]
    WriteRejected(String),

    /// The backend is not available at all.
    #[error("storage unavailable")]
    Unavailable,
}

/// A string key/value store with the semantics of browser session storage.
pub trait Storage: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// A [`Storage`] backed by a `BTreeMap`.
#[cfg(feature = "memory")]
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<std::collections::BTreeMap<String, String>>,
}

#[cfg(feature = "memory")]
impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, std::collections::BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(feature = "memory")]
impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ArtifactRegistry
// ---------------------------------------------------------------------------

/// Registry entry holding the newline-separated list of written keys.
const INDEX_NAME: &str = "_index";

/// Namespaced keys over a [`Storage`], with a record of what was written.
pub struct ArtifactRegistry {
    namespace: String,
    storage: Arc<dyn Storage>,
    written: Mutex<BTreeSet<String>>,
}

impl ArtifactRegistry {
    /// Creates a registry whose keys look like `"{namespace}.{name}"`,
    /// picking up keys recorded by an earlier registry on the same storage.
    pub fn new(namespace: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        let namespace = namespace.into();
        let index_key = format!("{namespace}.{INDEX_NAME}");
        let written = match storage.get(&index_key) {
            Ok(Some(list)) => list
                .lines()
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect(),
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                tracing::warn!(error = %e, "could not read artifact index, starting empty");
                BTreeSet::new()
            }
        };
        Self {
            namespace,
            storage,
            written: Mutex::new(written),
        }
    }

    /// The full storage key for `name`.
    pub fn key(&self, name: &str) -> String {
        format!("{}.{name}", self.namespace)
    }

    /// Writes `value` under `name` and remembers the key.
    pub fn put(&self, name: &str, value: &str) -> Result<(), StorageError> {
        let key = self.key(name);
        self.storage.set(&key, value)?;
        let mut written = self.written();
        if written.insert(key) {
            self.store_index(&written);
        }
        Ok(())
    }

    /// Reads `name`.
    pub fn get(&self, name: &str) -> Result<Option<String>, StorageError> {
        self.storage.get(&self.key(name))
    }

    /// Reads and removes `name`.
    pub fn take(&self, name: &str) -> Result<Option<String>, StorageError> {
        let key = self.key(name);
        let value = self.storage.get(&key)?;
        self.storage.remove(&key)?;
        let mut written = self.written();
        if written.remove(&key) {
            self.store_index(&written);
        }
        Ok(value)
    }

    /// Removes every key this registry wrote. Returns how many were removed.
    ///
    /// A key that fails to delete stays on the list for the next purge.
    pub fn purge(&self) -> usize {
        let mut written = self.written();
        let mut removed = 0;
        written.retain(|key| match self.storage.remove(key) {
            Ok(()) => {
                removed += 1;
                false
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to remove stored artifact");
                true
            }
        });
        if removed > 0 {
            tracing::debug!(removed, namespace = %self.namespace, "purged stored artifacts");
        }
        self.store_index(&written);
        removed
    }

    /// Keys written and not yet removed, sorted.
    pub fn written_keys(&self) -> Vec<String> {
        self.written().iter().cloned().collect()
    }

    /// Rewrites the index entry, removing it once nothing is left.
    fn store_index(&self, written: &BTreeSet<String>) {
        let key = self.key(INDEX_NAME);
        let result = if written.is_empty() {
            self.storage.remove(&key)
        } else {
            let list: Vec<&str> = written.iter().map(String::as_str).collect();
            self.storage.set(&key, &list.join("\n"))
        };
        if let Err(e) = result {
            tracing::warn!(%key, error = %e, "could not update artifact index");
        }
    }

    fn written(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.written.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ArtifactRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactRegistry")
            .field("namespace", &self.namespace)
            .field("written", &self.written_keys())
            .finish_non_exhaustive()
    }
}
