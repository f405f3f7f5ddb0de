//! Session registry: token to record mapping, connection counts, expiry.
//!
//! Every operation runs under one mutex held only for the map operation
//! itself, never across an await. That single lock also guards the sweeper's
//! Stopped/Running state, so a creation and the sweep that empties the map
//! cannot interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::SessionError;
use crate::server::sweeper;
use crate::token::{SessionToken, TokenSource, UuidTokens};

/// Tracked state for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub expires_at: Instant,
    pub active_connections: usize,
}

/// Result of one sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Sweep {
    pub deleted: Vec<SessionToken>,
    /// Earliest expiry among the survivors, `None` if none survived.
    pub next_expiry: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweeperState {
    Stopped,
    /// `wake_at` is the deadline the running sweeper is sleeping towards.
    Running { wake_at: Option<Instant> },
}

enum SweeperAction {
    Spawn(Handle),
    NoRuntime,
    Wake,
    Nothing,
}

struct Inner {
    sessions: HashMap<SessionToken, SessionRecord>,
    sweeper: SweeperState,
}

struct Shared {
    state: Mutex<Inner>,
    wake: Notify,
    tokens: Box<dyn TokenSource>,
}

/// Owns every session record. Cheap to clone; clones share state.
///
/// Created once at startup and handed to each connection handler. Creating a
/// session starts the expiry sweeper on the current tokio runtime if it is
/// not already running. Outside a runtime the session is still recorded and
/// the sweeper starts with the next creation that happens inside one.
#[derive(Clone)]
pub struct SessionRegistry {
    shared: Arc<Shared>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_token_source(UuidTokens)
    }

    pub fn with_token_source(tokens: impl TokenSource) -> Self {
        Self::from_boxed(Box::new(tokens))
    }

    pub(crate) fn from_boxed(tokens: Box<dyn TokenSource>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Inner {
                    sessions: HashMap::new(),
                    sweeper: SweeperState::Stopped,
                }),
                wake: Notify::new(),
                tokens,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Each critical section is a single map operation, so a panic
        // elsewhere cannot leave the map half-updated.
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mints a fresh token and inserts a record expiring at `now + ttl`.
    ///
    /// Candidate tokens are drawn until one is unused, inside the same
    /// critical section as the insert.
    pub fn create(&self, now: Instant, ttl: Duration) -> (SessionToken, Instant) {
        let expires_at = now + ttl;
        let runtime = Handle::try_current().ok();
        let (token, action) = {
            let mut inner = self.lock();
            let token = loop {
                let candidate = self.shared.tokens.generate();
                if !inner.sessions.contains_key(&candidate) {
                    break candidate;
                }
            };
            inner.sessions.insert(
                token.clone(),
                SessionRecord {
                    expires_at,
                    active_connections: 0,
                },
            );
            let action = match (inner.sweeper, runtime) {
                (SweeperState::Stopped, Some(runtime)) => {
                    inner.sweeper = SweeperState::Running { wake_at: None };
                    SweeperAction::Spawn(runtime)
                }
                (SweeperState::Stopped, None) => SweeperAction::NoRuntime,
                (
                    SweeperState::Running {
                        wake_at: Some(wake_at),
                    },
                    _,
                ) if expires_at < wake_at => SweeperAction::Wake,
                (SweeperState::Running { .. }, _) => SweeperAction::Nothing,
            };
            (token, action)
        };

        match action {
            SweeperAction::Spawn(runtime) => {
                sweeper::spawn(&runtime, self.clone());
            }
            SweeperAction::NoRuntime => {
                tracing::warn!(%token, "no tokio runtime, expiry sweeper not started");
            }
            SweeperAction::Wake => self.shared.wake.notify_one(),
            SweeperAction::Nothing => {}
        }
        (token, expires_at)
    }

    /// Refreshes a live session to expire at `now + ttl`.
    ///
    /// Expiry never moves backwards. A session already past its expiry is
    /// `InvalidToken` even if the sweeper has not deleted it yet.
    pub fn touch(
        &self,
        token: &SessionToken,
        now: Instant,
        ttl: Duration,
    ) -> Result<Instant, SessionError> {
        let mut inner = self.lock();
        match inner.sessions.get_mut(token) {
            Some(record) if record.expires_at > now => {
                record.expires_at = record.expires_at.max(now + ttl);
                Ok(record.expires_at)
            }
            _ => Err(SessionError::InvalidToken(token.to_string())),
        }
    }

    /// Counts one more duplex connection against a live session.
    ///
    /// Returns the new connection count.
    pub fn bind(&self, token: &SessionToken) -> Result<usize, SessionError> {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.sessions.get_mut(token) {
            Some(record) if record.expires_at > now => {
                record.active_connections += 1;
                Ok(record.active_connections)
            }
            _ => Err(SessionError::InvalidToken(token.to_string())),
        }
    }

    /// Releases one duplex connection.
    ///
    /// Returns the remaining count, or `None` if the session was already
    /// swept, which is not an error.
    pub fn unbind(&self, token: &SessionToken) -> Option<usize> {
        let mut inner = self.lock();
        inner.sessions.get_mut(token).map(|record| {
            record.active_connections = record.active_connections.saturating_sub(1);
            record.active_connections
        })
    }

    /// Deletes every session with `expires_at <= now`. This is the only way
    /// a session leaves the registry.
    pub fn sweep_expired(&self, now: Instant) -> Sweep {
        let mut inner = self.lock();
        sweep_locked(&mut inner, now)
    }

    /// Sweeper step: sweep, then either record the next wake-up or mark the
    /// sweeper stopped when nothing is left.
    pub(crate) fn sweep_and_plan(&self, now: Instant) -> Sweep {
        let mut inner = self.lock();
        let sweep = sweep_locked(&mut inner, now);
        inner.sweeper = match sweep.next_expiry {
            Some(next) => SweeperState::Running {
                wake_at: Some(next),
            },
            None => SweeperState::Stopped,
        };
        sweep
    }

    /// Resolves when a session was created with an expiry earlier than the
    /// sweeper's planned wake-up.
    pub(crate) async fn earlier_deadline(&self) {
        self.shared.wake.notified().await;
    }

    /// Whether `token` names a session that has not expired.
    pub fn contains(&self, token: &SessionToken) -> bool {
        let now = Instant::now();
        self.lock()
            .sessions
            .get(token)
            .is_some_and(|record| record.expires_at > now)
    }

    pub fn get(&self, token: &SessionToken) -> Option<SessionRecord> {
        self.lock().sessions.get(token).cloned()
    }

    pub fn active_connections(&self, token: &SessionToken) -> Option<usize> {
        self.lock()
            .sessions
            .get(token)
            .map(|record| record.active_connections)
    }

    pub fn expires_at(&self, token: &SessionToken) -> Option<Instant> {
        self.lock().sessions.get(token).map(|record| record.expires_at)
    }

    /// Number of records, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    pub fn sweeper_running(&self) -> bool {
        matches!(self.lock().sweeper, SweeperState::Running { .. })
    }
}

fn sweep_locked(inner: &mut Inner, now: Instant) -> Sweep {
    let mut deleted = Vec::new();
    inner.sessions.retain(|token, record| {
        let keep = record.expires_at > now;
        if !keep {
            deleted.push(token.clone());
        }
        keep
    });
    let next_expiry = inner.sessions.values().map(|r| r.expires_at).min();
    Sweep {
        deleted,
        next_expiry,
    }
}
