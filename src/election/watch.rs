//! Watch Chain
//!
//! A session keeps exactly one blocking watch: on its predecessor's key
//! while following, or on its own key while leading. Any change to a
//! predecessor means "re-evaluate". A change to our own key is either our
//! refresh (re-arm) or the key vanishing (restart).

use std::sync::Arc;
use futures::future::{BoxFuture, FutureExt};

use super::resolver::Resolution;
use crate::error::Result;
use crate::store::{CoordinationStore, WatchEvent};

/// Key a session is blocked on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// The candidate immediately ahead of us
    Predecessor { key: String, revision: u64 },
    /// Our own membership key, while leader
    Own { key: String, revision: u64 },
}

impl WatchTarget {
    /// Pick the watch a resolution calls for
    pub fn for_resolution(resolution: &Resolution) -> Self {
        match &resolution.predecessor {
            Some(predecessor) => WatchTarget::Predecessor {
                key: predecessor.key.clone(),
                revision: predecessor.revision,
            },
            None => WatchTarget::Own {
                key: resolution.own.key.clone(),
                revision: resolution.own.revision,
            },
        }
    }

    /// Watched key
    pub fn key(&self) -> &str {
        match self {
            WatchTarget::Predecessor { key, .. } | WatchTarget::Own { key, .. } => key,
        }
    }

    /// First revision the watch reports
    pub fn from_revision(&self) -> u64 {
        match self {
            WatchTarget::Predecessor { revision, .. } | WatchTarget::Own { revision, .. } => {
                revision + 1
            }
        }
    }
}

/// What a completed watch asks the session to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchReaction {
    /// Read the candidate set again
    Reevaluate,
    /// Keep watching our own key from a newer revision
    Rearm(WatchTarget),
    /// Our own key is gone; the session must restart
    OwnKeyLost,
}

/// Decide how to react to a completed watch
pub fn react(target: &WatchTarget, event: &WatchEvent) -> WatchReaction {
    match target {
        WatchTarget::Predecessor { .. } => WatchReaction::Reevaluate,
        WatchTarget::Own { key, .. } if event.is_removal() => {
            tracing::debug!("Own key {} removed at revision {}", key, event.revision);
            WatchReaction::OwnKeyLost
        }
        WatchTarget::Own { key, .. } => WatchReaction::Rearm(WatchTarget::Own {
            key: key.clone(),
            revision: event.revision,
        }),
    }
}

/// Outstanding watch; resolves with its target so the caller can react
pub type WatchFuture = BoxFuture<'static, (WatchTarget, Result<WatchEvent>)>;

/// Start a watch. Dropping the returned future cancels it.
pub fn arm(store: Arc<dyn CoordinationStore>, target: WatchTarget) -> WatchFuture {
    async move {
        tracing::trace!("Watching {} from revision {}", target.key(), target.from_revision());
        let result = store.watch(target.key(), target.from_revision()).await;
        (target, result)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyNode, MemoryStore};
    use std::time::Duration;

    fn event(value: Option<&str>, revision: u64) -> WatchEvent {
        WatchEvent {
            key: "/svc/00000000000000000001".into(),
            value: value.map(String::from),
            revision,
        }
    }

    #[test]
    fn test_target_from_resolution() {
        let leader = KeyNode { key: "/svc/1".into(), value: "a".into(), revision: 4 };
        let own = KeyNode { key: "/svc/2".into(), value: "b".into(), revision: 6 };

        let follower = Resolution {
            leader: leader.clone(),
            own: own.clone(),
            predecessor: Some(leader.clone()),
        };
        let target = WatchTarget::for_resolution(&follower);
        assert_eq!(target, WatchTarget::Predecessor { key: "/svc/1".into(), revision: 4 });
        assert_eq!(target.from_revision(), 5);

        let leading = Resolution { leader: own.clone(), own, predecessor: None };
        assert_eq!(
            WatchTarget::for_resolution(&leading),
            WatchTarget::Own { key: "/svc/2".into(), revision: 6 }
        );
    }

    #[test]
    fn test_predecessor_change_always_reevaluates() {
        let target = WatchTarget::Predecessor { key: "/svc/1".into(), revision: 1 };
        assert_eq!(react(&target, &event(Some("a"), 2)), WatchReaction::Reevaluate);
        assert_eq!(react(&target, &event(None, 3)), WatchReaction::Reevaluate);
    }

    #[test]
    fn test_own_key_refresh_rearms() {
        let target = WatchTarget::Own { key: "/svc/1".into(), revision: 1 };
        assert_eq!(
            react(&target, &event(Some("a"), 9)),
            WatchReaction::Rearm(WatchTarget::Own { key: "/svc/1".into(), revision: 9 })
        );
        assert_eq!(react(&target, &event(None, 9)), WatchReaction::OwnKeyLost);
    }

    #[tokio::test]
    async fn test_arm_completes_on_change() {
        let store = MemoryStore::new();
        let node = store.create("/svc", "a", Duration::from_secs(10)).await.unwrap();

        let target = WatchTarget::Own { key: node.key.clone(), revision: node.revision };
        let watch = arm(Arc::new(store.clone()), target.clone());
        store.put(&node.key, "a").await.unwrap();

        let (returned, result) = watch.await;
        assert_eq!(returned, target);
        assert!(matches!(react(&returned, &result.unwrap()), WatchReaction::Rearm(_)));
    }
}
