//! Membership Registration
//!
//! Creates this candidate's ephemeral key under the election path.

use std::time::Duration;

use crate::error::Result;
use crate::store::{CoordinationStore, KeyNode};

/// This candidate's membership key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// Full key path
    pub key: String,
    /// Candidate id stored at the key
    pub value: String,
    /// Revision of the last successful write
    pub revision: u64,
    /// TTL applied on every write
    pub ttl: Duration,
}

impl Membership {
    fn from_node(node: KeyNode, ttl: Duration) -> Self {
        Self {
            key: node.key,
            value: node.value,
            revision: node.revision,
            ttl,
        }
    }
}

/// Issue exactly one create-unique call for this candidate.
///
/// Failures are returned as-is; no retry is attempted.
pub async fn register(
    store: &dyn CoordinationStore,
    path: &str,
    candidate_id: &str,
    ttl: Duration,
) -> Result<Membership> {
    let node = store.create(path, candidate_id, ttl).await?;
    tracing::debug!("Created membership key {} at revision {}", node.key, node.revision);
    Ok(Membership::from_node(node, ttl))
}
