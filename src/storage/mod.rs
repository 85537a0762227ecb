//! Persistence module for the Birii client
//!
//! Durable key/value storage for the token pair and the user snapshot.
//! Backends hold no policy: the session decides what to write and what to
//! do when a write fails.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;
use std::sync::Arc;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const SNAPSHOT_KEY: &str = "auth-storage";

/// Synchronous key/value store. All operations are idempotent.
#[cfg_attr(test, mockall::automock)]
pub trait TokenStorage: Send + Sync {
    fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Build the backend selected by configuration.
pub fn from_config(config: &StorageConfig) -> Arc<dyn TokenStorage> {
    match config.backend {
        StorageBackend::File => Arc::new(FileStorage::new(config.path.clone())),
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    }
}
