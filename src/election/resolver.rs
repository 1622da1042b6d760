//! Leader Resolution
//!
//! Reads the candidate set and works out where this candidate stands: the
//! lowest key is the leader, and every follower watches only the key
//! immediately ahead of its own. When a leader departs only the runner-up
//! wakes, so each departure costs one wake-up rather than one per candidate.

use crate::error::{Error, Result};
use crate::store::{CoordinationStore, KeyNode};

/// Where this candidate stands in one candidate set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Head of the candidate set
    pub leader: KeyNode,
    /// Our own entry, as listed
    pub own: KeyNode,
    /// Entry immediately before ours; `None` when we lead
    pub predecessor: Option<KeyNode>,
}

impl Resolution {
    /// Check if we hold the head of the set
    pub fn is_leader(&self) -> bool {
        self.predecessor.is_none()
    }

    /// Candidate id of the leader
    pub fn leader_id(&self) -> &str {
        &self.leader.value
    }
}

/// Evaluate an ascending candidate set against our key
pub fn evaluate(path: &str, candidates: &[KeyNode], our_key: &str) -> Result<Resolution> {
    let position = candidates
        .iter()
        .position(|node| node.key == our_key)
        .ok_or_else(|| Error::InvariantViolation {
            key: our_key.to_string(),
            path: path.to_string(),
        })?;

    Ok(Resolution {
        leader: candidates[0].clone(),
        own: candidates[position].clone(),
        predecessor: position.checked_sub(1).map(|i| candidates[i].clone()),
    })
}

/// Fetch a fresh candidate set and evaluate it
pub async fn resolve(store: &dyn CoordinationStore, path: &str, our_key: &str) -> Result<Resolution> {
    let candidates = store.list(path).await?;
    tracing::trace!("Candidate set under {} has {} entries", path, candidates.len());
    evaluate(path, &candidates, our_key)
}

/// Last observed leader, used to suppress duplicate notifications
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LeaderView {
    current: Option<String>,
}

impl LeaderView {
    /// Record `leader_id`; returns `true` if it differs from the last observation
    pub fn observe(&mut self, leader_id: &str) -> bool {
        if self.current.as_deref() == Some(leader_id) {
            return false;
        }
        self.current = Some(leader_id.to_string());
        true
    }

    /// Last observed leader
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Forget the last observation
    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn node(index: u64, value: &str) -> KeyNode {
        KeyNode {
            key: format!("/svc/{:020}", index),
            value: value.to_string(),
            revision: index,
        }
    }

    #[test]
    fn test_head_is_leader() {
        let set = vec![node(1, "a"), node(2, "b"), node(3, "c")];
        let resolution = evaluate("/svc", &set, &set[0].key).unwrap();

        assert!(resolution.is_leader());
        assert_eq!(resolution.leader_id(), "a");
        assert_eq!(resolution.own, set[0]);
    }

    #[test]
    fn test_follower_watches_immediate_predecessor() {
        let set = vec![node(1, "a"), node(2, "b"), node(3, "c")];
        let resolution = evaluate("/svc", &set, &set[2].key).unwrap();

        assert!(!resolution.is_leader());
        assert_eq!(resolution.leader_id(), "a");
        assert_eq!(resolution.predecessor, Some(set[1].clone()));
    }

    #[test]
    fn test_missing_key_is_invariant_violation() {
        let set = vec![node(1, "a")];
        let err = evaluate("/svc", &set, "/svc/00000000000000000009").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvariantViolation);

        let err = evaluate("/svc", &[], "/svc/00000000000000000009").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvariantViolation);
    }

    #[test]
    fn test_leader_view_deduplicates() {
        let mut view = LeaderView::default();
        assert!(view.observe("a"));
        assert!(!view.observe("a"));
        assert!(view.observe("b"));
        assert_eq!(view.current(), Some("b"));

        view.clear();
        assert!(view.observe("b"));
    }

    #[tokio::test]
    async fn test_resolve_reads_store() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);
        let a = store.create("/svc", "a", ttl).await.unwrap();
        let b = store.create("/svc", "b", ttl).await.unwrap();

        let resolution = resolve(&store, "/svc", &b.key).await.unwrap();
        assert_eq!(resolution.predecessor.map(|p| p.key), Some(a.key.clone()));

        store.delete_key(&a.key).await;
        let resolution = resolve(&store, "/svc", &b.key).await.unwrap();
        assert!(resolution.is_leader());
    }
}
