//! Leader Election
//!
//! Candidates register an ephemeral, TTL-bound key under an election path.
//! The lowest key leads; every other candidate watches only the key
//! immediately ahead of its own and re-evaluates when it changes.
//!
//! - [`registrar`] creates the membership key
//! - [`resolver`] reads the candidate set and finds leader and predecessor
//! - [`watch`] manages the single outstanding watch
//! - [`refresh`] renews the key every half TTL
//! - [`LeaderElection`] composes them and owns the restart policy

pub mod events;
pub mod refresh;
pub mod registrar;
pub mod resolver;
pub mod watch;
mod session;

pub use events::ElectionEvent;
pub use registrar::Membership;
pub use resolver::{LeaderView, Resolution};
pub use session::{ElectionState, LeaderElection, SessionStatus};
pub use watch::{WatchReaction, WatchTarget};
