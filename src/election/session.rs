//! Election Session
//!
//! `LeaderElection` is the public handle for one candidate. Each start
//! launches a driver task for a new *generation*: the driver registers the
//! membership key, then processes completions of its outstanding operations
//! (resolve or watch, plus refresh) one at a time.
//!
//! Every state change is committed under the session lock and only if the
//! driver's generation is still current, so completions that arrive after a
//! stop or restart are discarded instead of touching the new session.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::{ElectionEvent, EventSink};
use super::refresh;
use super::registrar::{self, Membership};
use super::resolver::{self, LeaderView, Resolution};
use super::watch::{self, WatchReaction, WatchTarget};
use crate::config::ElectionConfig;
use crate::error::{Error, Result};
use crate::store::{CoordinationStore, WatchEvent};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ElectionState {
    /// Never started
    Idle,
    /// Start requested, driver not yet running
    Starting,
    /// Creating the membership key
    Registering,
    /// Holding the head of the candidate set
    Leader,
    /// Watching a predecessor
    Follower,
    /// Stopped by the caller or by a fatal error
    Stopped,
}

impl ElectionState {
    /// Check if the session is active
    pub fn is_running(&self) -> bool {
        !matches!(self, ElectionState::Idle | ElectionState::Stopped)
    }
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionState::Idle => write!(f, "IDLE"),
            ElectionState::Starting => write!(f, "STARTING"),
            ElectionState::Registering => write!(f, "REGISTERING"),
            ElectionState::Leader => write!(f, "LEADER"),
            ElectionState::Follower => write!(f, "FOLLOWER"),
            ElectionState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: ElectionState,
    pub candidate_id: String,
    pub path: String,
    pub key: Option<String>,
    pub revision: Option<u64>,
    pub leader: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    /// Internal restarts since construction
    pub restarts: u64,
}

/// Mutable session state, guarded by `Shared::session`
struct Session {
    state: ElectionState,
    generation: u64,
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    membership: Option<Membership>,
    leader: LeaderView,
    registered_at: Option<DateTime<Utc>>,
    restarts: u64,
}

struct Shared {
    store: Arc<dyn CoordinationStore>,
    config: ElectionConfig,
    events: EventSink,
    /// Parent of every generation's token; cancelled when the handle drops
    root: CancellationToken,
    session: Mutex<Session>,
}

impl Shared {
    /// Begin a new generation. `previous` is released before registering.
    fn launch(self: &Arc<Self>, session: &mut Session, previous: Option<Membership>) {
        session.generation += 1;
        session.state = ElectionState::Starting;

        let token = self.root.child_token();
        let driver = SessionDriver {
            shared: Arc::clone(self),
            generation: session.generation,
            token: token.clone(),
        };

        session.token = Some(token);
        session.task = Some(tokio::spawn(driver.run(previous)));
    }

    /// End the current generation and clear session state.
    /// Returns the membership key that should be released.
    fn halt(&self, session: &mut Session) -> Option<Membership> {
        if let Some(token) = session.token.take() {
            token.cancel();
        }
        session.generation += 1;

        if session.state == ElectionState::Leader {
            self.events.emit(ElectionEvent::Unelected);
        }

        session.state = ElectionState::Stopped;
        session.leader.clear();
        session.registered_at = None;
        session.membership.take()
    }

    async fn release(&self, membership: Membership) {
        if !self.config.release_on_stop {
            return;
        }

        let delete = self.store.delete(&membership.key, membership.revision);
        match tokio::time::timeout(membership.ttl, delete).await {
            Ok(Ok(())) => tracing::debug!("Released membership key {}", membership.key),
            Ok(Err(e)) => tracing::debug!("Membership key {} not released: {}", membership.key, e),
            Err(_) => tracing::warn!(
                "Timed out releasing membership key {}; it will expire by TTL",
                membership.key
            ),
        }
    }
}

/// A candidate in one election
pub struct LeaderElection {
    shared: Arc<Shared>,
}

impl LeaderElection {
    /// Create a candidate. Fails if the configuration is invalid.
    pub fn new(store: Arc<dyn CoordinationStore>, config: ElectionConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                store,
                config,
                events: EventSink::default(),
                root: CancellationToken::new(),
                session: Mutex::new(Session {
                    state: ElectionState::Idle,
                    generation: 0,
                    token: None,
                    task: None,
                    membership: None,
                    leader: LeaderView::default(),
                    registered_at: None,
                    restarts: 0,
                }),
            }),
        })
    }

    /// Subscribe to election events
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ElectionEvent> {
        self.shared.events.subscribe()
    }

    /// Join the election. No-op if already running.
    ///
    /// Registration happens on a spawned task, so a `stop` issued right
    /// after this returns cancels it before the store is contacted.
    pub async fn start(&self) {
        let mut session = self.shared.session.lock().await;
        if session.state.is_running() {
            return;
        }

        tracing::info!(
            "Starting election session for {} on {}",
            self.shared.config.name,
            self.shared.config.path
        );
        self.shared.launch(&mut session, None);
    }

    /// Leave the election. No-op if not running.
    ///
    /// All outstanding operations are cancelled before this returns and no
    /// further events are emitted for them. A leader emits `Unelected`.
    /// A registration already sent to the store is left to complete, and the
    /// key it created is released.
    pub async fn stop(&self) {
        let released = {
            let mut session = self.shared.session.lock().await;
            if !session.state.is_running() {
                return;
            }

            let task = session.task.take();
            let registering = matches!(
                session.state,
                ElectionState::Starting | ElectionState::Registering
            );
            if let (Some(task), false) = (task, registering) {
                task.abort();
            }
            self.shared.halt(&mut session)
        };

        tracing::info!(
            "Stopped election session for {} on {}",
            self.shared.config.name,
            self.shared.config.path
        );

        if let Some(membership) = released {
            self.shared.release(membership).await;
        }
    }

    /// Check if the session is running
    pub async fn is_running(&self) -> bool {
        self.shared.session.lock().await.state.is_running()
    }

    /// Check if this candidate currently leads
    pub async fn is_leader(&self) -> bool {
        self.shared.session.lock().await.state == ElectionState::Leader
    }

    /// Candidate id of the current leader, as last observed
    pub async fn current_leader(&self) -> Option<String> {
        self.shared.session.lock().await.leader.current().map(String::from)
    }

    /// Current state
    pub async fn state(&self) -> ElectionState {
        self.shared.session.lock().await.state
    }

    /// Snapshot of the session
    pub async fn status(&self) -> SessionStatus {
        let session = self.shared.session.lock().await;
        SessionStatus {
            state: session.state,
            candidate_id: self.shared.config.name.clone(),
            path: self.shared.config.path.clone(),
            key: session.membership.as_ref().map(|m| m.key.clone()),
            revision: session.membership.as_ref().map(|m| m.revision),
            leader: session.leader.current().map(String::from),
            registered_at: session.registered_at,
            restarts: session.restarts,
        }
    }

    /// This candidate's id
    pub fn candidate_id(&self) -> &str {
        &self.shared.config.name
    }

    /// Election path
    pub fn path(&self) -> &str {
        &self.shared.config.path
    }
}

impl Drop for LeaderElection {
    fn drop(&mut self) {
        // Orphaned drivers would otherwise keep refreshing forever
        self.shared.root.cancel();
    }
}

/// Completion of an outstanding operation
enum Completion {
    Resolved(Result<Resolution>),
    Watched(WatchTarget, Result<WatchEvent>),
    Refreshed(Result<u64>),
}

/// The resolve-or-watch slot; only one is outstanding at a time
type ChainFuture = BoxFuture<'static, Completion>;

/// Drives one generation of a session
struct SessionDriver {
    shared: Arc<Shared>,
    generation: u64,
    token: CancellationToken,
}

impl SessionDriver {
    fn is_current(&self, session: &Session) -> bool {
        session.generation == self.generation && !self.token.is_cancelled()
    }

    async fn run(self, previous: Option<Membership>) {
        let shared = Arc::clone(&self.shared);
        let config = &shared.config;

        if let Some(previous) = previous {
            shared.release(previous).await;
        }

        {
            let mut session = shared.session.lock().await;
            if !self.is_current(&session) {
                return;
            }
            session.state = ElectionState::Registering;
        }

        // Left running on stop, so a key created meanwhile is released below
        let registration =
            registrar::register(shared.store.as_ref(), &config.path, &config.name, config.ttl())
                .await;

        let mut membership = match registration {
            Ok(membership) => membership,
            Err(e) => return self.fail(e).await,
        };

        {
            let mut session = shared.session.lock().await;
            if !self.is_current(&session) {
                drop(session);
                tracing::debug!("Session stopped during registration; releasing {}", membership.key);
                shared.release(membership).await;
                return;
            }
            session.membership = Some(membership.clone());
            session.registered_at = Some(Utc::now());
        }

        tracing::info!("Registered {} as {}", config.name, membership.key);

        let mut chain = self.resolve_step(&membership.key);
        let mut refresh = self.refresh_step(&membership);

        loop {
            let completion = tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                completion = &mut chain => completion,
                result = &mut refresh => Completion::Refreshed(result),
            };

            match completion {
                Completion::Resolved(Ok(resolution)) => {
                    if !self.apply_resolution(&resolution).await {
                        return;
                    }
                    chain = self.watch_step(WatchTarget::for_resolution(&resolution));
                }
                Completion::Resolved(Err(e)) => return self.fail(e).await,
                Completion::Watched(target, Ok(event)) => match watch::react(&target, &event) {
                    WatchReaction::Reevaluate => {
                        tracing::debug!("Predecessor {} changed; re-evaluating", target.key());
                        chain = self.resolve_step(&membership.key);
                    }
                    WatchReaction::Rearm(target) => chain = self.watch_step(target),
                    WatchReaction::OwnKeyLost => return self.restart(None).await,
                },
                Completion::Watched(_, Err(e)) => return self.fail(e).await,
                Completion::Refreshed(Ok(revision)) => {
                    membership.revision = revision;
                    if !self.record_refresh(revision).await {
                        return;
                    }
                    refresh = self.refresh_step(&membership);
                }
                Completion::Refreshed(Err(Error::Timeout { after, .. })) => {
                    tracing::warn!(
                        "No refresh response for {} within {:?}; assuming the key expired",
                        membership.key,
                        after
                    );
                    return self.restart(None).await;
                }
                Completion::Refreshed(Err(e)) => return self.restart(Some(e)).await,
            }
        }
    }

    fn resolve_step(&self, our_key: &str) -> ChainFuture {
        let store = Arc::clone(&self.shared.store);
        let path = self.shared.config.path.clone();
        let our_key = our_key.to_string();

        async move { Completion::Resolved(resolver::resolve(store.as_ref(), &path, &our_key).await) }
            .boxed()
    }

    fn watch_step(&self, target: WatchTarget) -> ChainFuture {
        watch::arm(Arc::clone(&self.shared.store), target)
            .map(|(target, result)| Completion::Watched(target, result))
            .boxed()
    }

    fn refresh_step(&self, membership: &Membership) -> refresh::RefreshFuture {
        let config = &self.shared.config;
        refresh::schedule(
            Arc::clone(&self.shared.store),
            membership,
            config.refresh_interval(),
            config.refresh_timeout(),
        )
    }

    /// Commit a resolution and emit whatever changed. Returns `false` if stale.
    async fn apply_resolution(&self, resolution: &Resolution) -> bool {
        let shared = &self.shared;
        let name = &shared.config.name;

        let mut session = shared.session.lock().await;
        if !self.is_current(&session) {
            return false;
        }

        if resolution.is_leader() {
            session.leader.observe(name);
            if session.state != ElectionState::Leader {
                session.state = ElectionState::Leader;
                tracing::info!("{} won the election on {}, becoming LEADER", name, shared.config.path);
                shared.events.emit(ElectionEvent::Elected);
            }
            return true;
        }

        if session.state == ElectionState::Leader {
            tracing::warn!(
                "{} lost leadership of {} to {}",
                name,
                shared.config.path,
                resolution.leader_id()
            );
            shared.events.emit(ElectionEvent::Unelected);
        }
        session.state = ElectionState::Follower;

        if session.leader.observe(resolution.leader_id()) {
            tracing::info!("Leader of {} is now {}", shared.config.path, resolution.leader_id());
            shared
                .events
                .emit(ElectionEvent::Leader(resolution.leader_id().to_string()));
        }
        true
    }

    /// Commit a refreshed revision. Returns `false` if stale.
    async fn record_refresh(&self, revision: u64) -> bool {
        let mut session = self.shared.session.lock().await;
        if !self.is_current(&session) {
            return false;
        }
        if let Some(membership) = session.membership.as_mut() {
            membership.revision = revision;
        }
        true
    }

    /// Stop the session and report `error`
    async fn fail(&self, error: Error) {
        let released = {
            let mut session = self.shared.session.lock().await;
            if !self.is_current(&session) {
                return;
            }

            tracing::error!(
                "Election session for {} on {} failed: {}",
                self.shared.config.name,
                self.shared.config.path,
                error
            );

            // Detach rather than abort: this task is the one finishing
            session.task.take();
            let released = self.shared.halt(&mut session);
            self.shared.events.emit(ElectionEvent::Error(Arc::new(error)));
            released
        };

        if let Some(membership) = released {
            self.shared.release(membership).await;
        }
    }

    /// Stop and start again from registration, reporting `error` if given
    async fn restart(&self, error: Option<Error>) {
        let mut session = self.shared.session.lock().await;
        if !self.is_current(&session) {
            return;
        }

        match &error {
            Some(e) => tracing::warn!(
                "Refresh for {} failed ({}); restarting election session",
                self.shared.config.name,
                e
            ),
            None => tracing::warn!(
                "Membership of {} lost; restarting election session",
                self.shared.config.name
            ),
        }

        session.task.take();
        let previous = self.shared.halt(&mut session);
        if let Some(error) = error {
            self.shared.events.emit(ElectionEvent::Error(Arc::new(error)));
        }

        session.restarts += 1;
        self.shared.launch(&mut session, previous);
    }
}
