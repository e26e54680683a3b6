use indexmap::IndexMap;

/// Failures reported by a session store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("session storage is unavailable")]
    Unavailable,
    #[error("session storage quota exceeded while writing {0}")]
    QuotaExceeded(String),
}

/// Transient, session-scoped key-value storage.
///
/// Keys are reported in insertion order, oldest first; the governor relies
/// on that order when it prunes the store.
pub trait SessionStore {
    fn len(&self) -> Result<usize, StorageError>;

    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError>;

    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&mut self, key: &str, value: String) -> Result<(), StorageError>;

    /// Removes `key`. Returns whether it was present.
    fn remove(&mut self, key: &str) -> Result<bool, StorageError>;
}

/// In-memory store preserving insertion order.
///
/// Overwriting an existing key keeps its original position.
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    entries: IndexMap<String, String>,
    quota: Option<usize>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects writes of new keys once `quota` entries are stored.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            quota: Some(quota),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.len())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StorageError> {
        if let Some(quota) = self.quota {
            if !self.entries.contains_key(key) && self.entries.len() >= quota {
                return Err(StorageError::QuotaExceeded(key.to_string()));
            }
        }
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.shift_remove(key).is_some())
    }
}

/// Store for hosts without session storage; every call fails.
#[derive(Debug, Default)]
pub struct UnavailableSessionStore;

impl SessionStore for UnavailableSessionStore {
    fn len(&self) -> Result<usize, StorageError> {
        Err(StorageError::Unavailable)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Unavailable)
    }

    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable)
    }

    fn set(&mut self, _key: &str, _value: String) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }

    fn remove(&mut self, _key: &str) -> Result<bool, StorageError> {
        Err(StorageError::Unavailable)
    }
}
