//! In-Memory Coordination Store
//!
//! A single-process store with etcd-like semantics: a global modification
//! index, in-order keys, TTL expiry and a bounded event history for watches.
//! Used by tests and local development; faults can be injected per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use super::{CoordinationStore, KeyNode, WatchEvent};
use crate::error::{Error, Result};

/// Number of change events retained for watches
const HISTORY_LIMIT: usize = 1000;

/// Store operation, used to target injected faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Set,
    List,
    Watch,
    Delete,
}

/// Injected fault for the next call of an operation
enum Fault {
    /// Fail with a transport error
    Fail(String),
    /// Never complete
    Stall,
}

struct StoredKey {
    value: String,
    revision: u64,
    ttl: Option<Duration>,
}

#[derive(Default)]
struct StoreState {
    /// Last modification index handed out
    index: u64,
    /// Live keys, ordered by key
    keys: BTreeMap<String, StoredKey>,
    /// Recent change events, oldest first
    history: VecDeque<WatchEvent>,
    /// One-shot faults
    faults: HashMap<Operation, Fault>,
}

impl StoreState {
    fn record(&mut self, event: WatchEvent) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }

    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }
}

struct StoreInner {
    state: Mutex<StoreState>,
    changed: Notify,
}

/// In-memory coordination store handle
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::default()),
                changed: Notify::new(),
            }),
        }
    }

    /// Make the next call of `op` fail with a transport error
    pub async fn fail_next(&self, op: Operation, message: impl Into<String>) {
        let mut state = self.inner.state.lock().await;
        state.faults.insert(op, Fault::Fail(message.into()));
    }

    /// Make the next call of `op` hang forever
    pub async fn stall_next(&self, op: Operation) {
        let mut state = self.inner.state.lock().await;
        state.faults.insert(op, Fault::Stall);
    }

    /// Read a key
    pub async fn get(&self, key: &str) -> Option<KeyNode> {
        let state = self.inner.state.lock().await;
        state.keys.get(key).map(|stored| KeyNode {
            key: key.to_string(),
            value: stored.value.clone(),
            revision: stored.revision,
        })
    }

    /// Unconditionally delete a key, as an operator would
    pub async fn delete_key(&self, key: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.keys.remove(key).is_none() {
            return false;
        }

        let revision = state.next_index();
        state.record(WatchEvent { key: key.to_string(), value: None, revision });
        drop(state);

        self.inner.changed.notify_waiters();
        true
    }

    /// Unconditionally overwrite an existing key, keeping its TTL.
    /// Returns the new revision, or `None` if the key does not exist.
    pub async fn put(&self, key: &str, value: &str) -> Option<u64> {
        let mut state = self.inner.state.lock().await;
        if !state.keys.contains_key(key) {
            return None;
        }

        let revision = state.next_index();
        let ttl = {
            let stored = state.keys.get_mut(key)?;
            stored.value = value.to_string();
            stored.revision = revision;
            stored.ttl
        };
        state.record(WatchEvent {
            key: key.to_string(),
            value: Some(value.to_string()),
            revision,
        });
        drop(state);

        self.schedule_expiry(key, revision, ttl);
        self.inner.changed.notify_waiters();
        Some(revision)
    }

    async fn check_fault(&self, op: Operation) -> Result<()> {
        let fault = self.inner.state.lock().await.faults.remove(&op);
        match fault {
            None => Ok(()),
            Some(Fault::Fail(message)) => {
                tracing::debug!("Injected {:?} failure: {}", op, message);
                Err(Error::Transport(message))
            }
            Some(Fault::Stall) => {
                tracing::debug!("Injected {:?} stall", op);
                futures::future::pending().await
            }
        }
    }

    fn schedule_expiry(&self, key: &str, revision: u64, ttl: Option<Duration>) {
        if let Some(ttl) = ttl {
            tokio::spawn(expire_after(
                Arc::downgrade(&self.inner),
                key.to_string(),
                revision,
                ttl,
            ));
        }
    }
}

/// Remove `key` once `ttl` elapses, unless it was modified in the meantime
async fn expire_after(inner: Weak<StoreInner>, key: String, revision: u64, ttl: Duration) {
    tokio::time::sleep(ttl).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };

    let mut state = inner.state.lock().await;
    let current = state.keys.get(&key).map(|stored| stored.revision);
    if current != Some(revision) {
        return;
    }

    state.keys.remove(&key);
    let expired_at = state.next_index();
    state.record(WatchEvent { key: key.clone(), value: None, revision: expired_at });
    drop(state);

    tracing::debug!("Key {} expired after {:?}", key, ttl);
    inner.changed.notify_waiters();
}

fn child_prefix(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryStore {
    async fn create(&self, path: &str, value: &str, ttl: Duration) -> Result<KeyNode> {
        self.check_fault(Operation::Create).await?;

        let mut state = self.inner.state.lock().await;
        let revision = state.next_index();
        let key = format!("{}{:020}", child_prefix(path), revision);

        state.keys.insert(
            key.clone(),
            StoredKey { value: value.to_string(), revision, ttl: Some(ttl) },
        );
        state.record(WatchEvent {
            key: key.clone(),
            value: Some(value.to_string()),
            revision,
        });
        drop(state);

        self.schedule_expiry(&key, revision, Some(ttl));
        self.inner.changed.notify_waiters();

        Ok(KeyNode { key, value: value.to_string(), revision })
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration, expected_revision: u64) -> Result<u64> {
        self.check_fault(Operation::Set).await?;

        let mut state = self.inner.state.lock().await;
        match state.keys.get(key) {
            Some(stored) if stored.revision == expected_revision => {}
            _ => {
                return Err(Error::Conflict {
                    key: key.to_string(),
                    expected: expected_revision,
                })
            }
        }

        let revision = state.next_index();
        if let Some(stored) = state.keys.get_mut(key) {
            stored.value = value.to_string();
            stored.revision = revision;
            stored.ttl = Some(ttl);
        }
        state.record(WatchEvent {
            key: key.to_string(),
            value: Some(value.to_string()),
            revision,
        });
        drop(state);

        self.schedule_expiry(key, revision, Some(ttl));
        self.inner.changed.notify_waiters();

        Ok(revision)
    }

    async fn list(&self, path: &str) -> Result<Vec<KeyNode>> {
        self.check_fault(Operation::List).await?;

        let prefix = child_prefix(path);
        let state = self.inner.state.lock().await;

        Ok(state
            .keys
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, stored)| KeyNode {
                key: key.clone(),
                value: stored.value.clone(),
                revision: stored.revision,
            })
            .collect())
    }

    async fn watch(&self, key: &str, from_revision: u64) -> Result<WatchEvent> {
        self.check_fault(Operation::Watch).await?;

        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.inner.state.lock().await;
                if let Some(oldest) = state.history.front() {
                    if state.history.len() == HISTORY_LIMIT && from_revision < oldest.revision {
                        return Err(Error::Transport(format!(
                            "event index {} cleared (oldest retained is {})",
                            from_revision, oldest.revision
                        )));
                    }
                }

                if let Some(event) = state
                    .history
                    .iter()
                    .find(|event| event.key == key && event.revision >= from_revision)
                {
                    return Ok(event.clone());
                }
            }

            notified.await;
        }
    }

    async fn delete(&self, key: &str, expected_revision: u64) -> Result<()> {
        self.check_fault(Operation::Delete).await?;

        let mut state = self.inner.state.lock().await;
        match state.keys.get(key) {
            Some(stored) if stored.revision == expected_revision => {}
            _ => {
                return Err(Error::Conflict {
                    key: key.to_string(),
                    expected: expected_revision,
                })
            }
        }

        state.keys.remove(key);
        let revision = state.next_index();
        state.record(WatchEvent { key: key.to_string(), value: None, revision });
        drop(state);

        self.inner.changed.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_create_orders_keys_by_creation() {
        let store = MemoryStore::new();
        let a = store.create("/svc", "a", TTL).await.unwrap();
        let b = store.create("/svc/", "b", TTL).await.unwrap();
        store.create("/other", "x", TTL).await.unwrap();
        let c = store.create("/svc", "c", TTL).await.unwrap();

        assert_eq!(a.key, "/svc/00000000000000000001");
        assert!(a.key < b.key && b.key < c.key);

        let listed: Vec<String> = store
            .list("/svc")
            .await
            .unwrap()
            .into_iter()
            .map(|node| node.value)
            .collect();
        assert_eq!(listed, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_conditional_write() {
        let store = MemoryStore::new();
        let node = store.create("/svc", "a", TTL).await.unwrap();

        let revision = store.set(&node.key, "a", TTL, node.revision).await.unwrap();
        assert!(revision > node.revision);

        let err = store.set(&node.key, "a", TTL, node.revision).await.unwrap_err();
        assert!(err.is_conflict());

        store.delete_key(&node.key).await;
        let err = store.set(&node.key, "a", TTL, revision).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_conditional_delete() {
        let store = MemoryStore::new();
        let node = store.create("/svc", "a", TTL).await.unwrap();

        assert!(store.delete(&node.key, node.revision + 1).await.unwrap_err().is_conflict());
        store.delete(&node.key, node.revision).await.unwrap();
        assert!(store.get(&node.key).await.is_none());
    }

    #[tokio::test]
    async fn test_watch_returns_past_and_future_changes() {
        let store = MemoryStore::new();
        let node = store.create("/svc", "a", TTL).await.unwrap();
        let revision = store.set(&node.key, "a", TTL, node.revision).await.unwrap();

        // Already in history
        let event = store.watch(&node.key, node.revision + 1).await.unwrap();
        assert_eq!(event.revision, revision);
        assert_eq!(event.value.as_deref(), Some("a"));

        // Arrives later
        let watcher = {
            let store = store.clone();
            let key = node.key.clone();
            tokio::spawn(async move { store.watch(&key, revision + 1).await })
        };
        tokio::task::yield_now().await;
        store.delete_key(&node.key).await;

        let event = watcher.await.unwrap().unwrap();
        assert!(event.is_removal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_notifies_watchers() {
        let store = MemoryStore::new();
        let node = store.create("/svc", "a", Duration::from_secs(2)).await.unwrap();

        let event = store.watch(&node.key, node.revision + 1).await.unwrap();
        assert!(event.is_removal());
        assert!(store.list("/svc").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_postpones_expiry() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(2);
        let node = store.create("/svc", "a", ttl).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let revision = store.set(&node.key, "a", ttl, node.revision).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.get(&node.key).await.unwrap().revision, revision);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.get(&node.key).await.is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let store = MemoryStore::new();
        store.fail_next(Operation::List, "connection reset").await;

        let err = store.list("/svc").await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(store.list("/svc").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_operation_never_completes() {
        let store = MemoryStore::new();
        store.stall_next(Operation::Create).await;

        let result = tokio::time::timeout(
            Duration::from_secs(60),
            store.create("/svc", "a", TTL),
        )
        .await;
        assert!(result.is_err());
        assert!(store.list("/svc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_history_cleared() {
        let store = MemoryStore::new();
        let node = store.create("/svc", "a", TTL).await.unwrap();
        let mut revision = node.revision;
        for _ in 0..HISTORY_LIMIT {
            revision = store.set(&node.key, "a", TTL, revision).await.unwrap();
        }

        let err = store.watch(&node.key, node.revision).await.unwrap_err();
        assert!(err.to_string().contains("cleared"));
    }
}
