//! WolfElect - Leader Election over a Coordination Service
//!
//! Lets any number of processes register as candidates for a named election
//! on an ordered key-value store (etcd-style create-in-order, compare-and-swap,
//! sorted listing and blocking watches). Exactly one candidate is leader at
//! any quiescent moment; the others learn who leads and are told promptly
//! when that changes.
//!
//! # Features
//!
//! - One watch per candidate, on its immediate predecessor, so a departure
//!   wakes one candidate instead of all of them
//! - Membership keys renewed every half TTL with conditional writes
//! - Leaders watch their own key and restart if it disappears
//! - Late completions from a stopped session are discarded
//! - etcd v2 backend and an in-memory store for tests
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use wolfelect::prelude::*;
//!
//! let store = Arc::new(MemoryStore::new());
//! let election = LeaderElection::new(store, ElectionConfig::new("/svc", "n1", Duration::from_secs(10)))?;
//! let mut events = election.subscribe();
//! election.start().await;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ElectionEvent::Elected => println!("leading"),
//!         ElectionEvent::Unelected => println!("no longer leading"),
//!         ElectionEvent::Leader(id) => println!("leader is {}", id),
//!         ElectionEvent::Error(e) => eprintln!("election stopped: {}", e),
//!     }
//! }
//! ```

pub mod config;
pub mod election;
pub mod error;
pub mod logging;
pub mod store;

pub use config::WolfElectConfig;
pub use error::{Error, ErrorKind, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ElectionConfig, WolfElectConfig};
    pub use crate::election::{ElectionEvent, ElectionState, LeaderElection, SessionStatus};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::store::{CoordinationStore, EtcdStore, KeyNode, MemoryStore, WatchEvent};
}
