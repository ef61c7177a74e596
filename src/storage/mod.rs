//! Encrypted local persistence.

pub mod backend;
pub mod encrypted;

// Re-export commonly used types
pub use backend::{FileBackend, MemoryBackend, StorageBackend, StorageError};
pub use encrypted::{EncryptedStore, StoreError, DEFAULT_PREFIX};
