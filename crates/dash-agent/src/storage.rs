//! Durable key-value blob storage used to persist the conversation

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::Result;

/// A string blob store addressed by fixed keys
pub trait BlobStore: Send + Sync {
    /// Read the blob stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the blob stored under `key`
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process blob store; contents are lost when dropped
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.blobs.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
