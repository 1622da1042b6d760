//! Membership Refresh
//!
//! Renews the membership key every half TTL with a conditional write on the
//! last known revision, so at least one renewal lands in every TTL window
//! even if one attempt is delayed.

use std::sync::Arc;
use std::time::Duration;
use futures::future::{BoxFuture, FutureExt};

use super::registrar::Membership;
use crate::error::{Error, Result};
use crate::store::CoordinationStore;

/// Pending refresh; resolves with the key's new revision
pub type RefreshFuture = BoxFuture<'static, Result<u64>>;

/// Schedule the next refresh of `membership` after `interval`.
///
/// With a `guard`, a call that gets no answer within that window fails with
/// [`Error::Timeout`]. Dropping the future cancels both the timer and the call.
pub fn schedule(
    store: Arc<dyn CoordinationStore>,
    membership: &Membership,
    interval: Duration,
    guard: Option<Duration>,
) -> RefreshFuture {
    let key = membership.key.clone();
    let value = membership.value.clone();
    let ttl = membership.ttl;
    let revision = membership.revision;

    async move {
        tokio::time::sleep(interval).await;

        tracing::debug!("Refreshing membership key {} from revision {}", key, revision);
        let call = store.set(&key, &value, ttl, revision);
        let new_revision = match guard {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| Error::Timeout {
                operation: format!("refresh of {}", key),
                after: limit,
            })??,
            None => call.await?,
        };

        tracing::debug!("Refreshed membership key {} (revision {})", key, new_revision);
        Ok(new_revision)
    }
    .boxed()
}
