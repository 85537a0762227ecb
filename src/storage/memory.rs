use std::collections::HashMap;
use std::sync::RwLock;

use super::TokenStorage;
use crate::error::StorageError;

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Unavailable("memory storage lock poisoned".to_string())
}

impl TokenStorage for MemoryStorage {
    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        storage.save("access_token", "A1").unwrap();
        storage.save("access_token", "A2").unwrap();
        assert_eq!(storage.load("access_token").unwrap().as_deref(), Some("A2"));
        assert_eq!(storage.len(), 1);

        // Removing twice is fine
        storage.remove("access_token").unwrap();
        storage.remove("access_token").unwrap();
        assert_eq!(storage.load("access_token").unwrap(), None);
        assert!(storage.is_empty());
    }
}
