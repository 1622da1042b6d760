//! Coordination Store
//!
//! The ordered key-value service elections are built on. Implementations
//! provide atomic unique-key creation, compare-and-swap writes, sorted
//! listing and blocking watches; TTL expiry is enforced by the service.
//!
//! Every operation is a future: dropping it cancels the call, and no result
//! is delivered afterwards.

mod etcd;
mod memory;

pub use etcd::EtcdStore;
pub use memory::{MemoryStore, Operation};

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A live key under an election path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNode {
    /// Full key path
    pub key: String,
    /// Stored value (the candidate id for membership keys)
    pub value: String,
    /// Revision of the last modification
    pub revision: u64,
}

/// Result of a blocking watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Key that changed
    pub key: String,
    /// New value, `None` if the key was deleted or expired
    pub value: Option<String>,
    /// Revision of the change
    pub revision: u64,
}

impl WatchEvent {
    /// Check if the change removed the key
    pub fn is_removal(&self) -> bool {
        self.value.is_none()
    }
}

/// Operations an election needs from the coordination service
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create a key under `path` that sorts after every key created there so far
    async fn create(&self, path: &str, value: &str, ttl: Duration) -> Result<KeyNode>;

    /// Overwrite `key` only if its revision is still `expected_revision`.
    /// Returns the new revision.
    async fn set(&self, key: &str, value: &str, ttl: Duration, expected_revision: u64) -> Result<u64>;

    /// List all live keys directly under `path` in ascending key order
    async fn list(&self, path: &str) -> Result<Vec<KeyNode>>;

    /// Block until `key` changes at or after `from_revision`
    async fn watch(&self, key: &str, from_revision: u64) -> Result<WatchEvent>;

    /// Delete `key` only if its revision is still `expected_revision`
    async fn delete(&self, key: &str, expected_revision: u64) -> Result<()>;
}
