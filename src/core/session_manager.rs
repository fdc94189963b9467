//! Rotating session identity.
//!
//! Exactly one session is current at any time. Rotation replaces it with a
//! fresh id, persists it and tells listeners `(old, new, reason)`. Records
//! that were enqueued earlier keep the id they were stamped with.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::listeners::{ListenerId, ListenerRegistry};
use crate::platform::{elapsed_between, Clock};
use crate::storage::{Storage, SESSION_STORAGE_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotationReason {
    AppStart,
    MaxDurationExceeded,
    InactivityTimeout,
    AuthChange,
    Manual,
    BackgroundTimeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub rotation_reason: Option<RotationReason>,
}

impl Session {
    fn start(now: DateTime<Utc>, reason: RotationReason) -> Self {
        Self {
            id: format!("cf_session_{}_{}", now.timestamp_millis(), Uuid::new_v4().simple()),
            started_at: now,
            last_activity_at: now,
            rotation_reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub max_duration: Duration,
    pub inactivity_timeout: Duration,
    /// Time in background after which returning to the foreground rotates.
    pub background_threshold: Duration,
    pub rotate_on_auth_change: bool,
}

pub type SessionListener = dyn Fn(&str, &str, RotationReason) + Send + Sync;

struct SessionState {
    current: Session,
    background_since: Option<DateTime<Utc>>,
    authenticated_user: Option<String>,
}

pub struct SessionManager {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn Storage>,
    state: Mutex<SessionState>,
    listeners: ListenerRegistry<SessionListener>,
}

impl SessionManager {
    /// Restore the persisted session if it is still within both time
    /// limits, otherwise start a new one.
    pub fn new(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn Storage>,
        authenticated_user: Option<String>,
    ) -> Self {
        let now = clock.now();
        let restored = load_session(storage.as_ref())
            .filter(|session| expiry_reason(&config, session, now).is_none());

        let current = match restored {
            Some(session) => {
                tracing::debug!("Restored session {}", session.id);
                session
            }
            None => {
                let session = Session::start(now, RotationReason::AppStart);
                store_session(storage.as_ref(), &session);
                tracing::info!("Started session {}", session.id);
                session
            }
        };

        Self {
            config,
            clock,
            storage,
            state: Mutex::new(SessionState {
                current,
                background_since: None,
                authenticated_user,
            }),
            listeners: ListenerRegistry::new("session"),
        }
    }

    pub fn current_session_id(&self) -> String {
        self.state.lock().current.id.clone()
    }

    pub fn current_session(&self) -> Session {
        self.state.lock().current.clone()
    }

    /// Record user activity, rotating first if a time limit has passed.
    /// Returns the id that is current afterwards.
    pub fn update_activity(&self) -> String {
        let now = self.clock.now();
        let reason = {
            let mut state = self.state.lock();
            match expiry_reason(&self.config, &state.current, now) {
                Some(reason) => Some(reason),
                None => {
                    state.current.last_activity_at = now;
                    None
                }
            }
        };

        match reason {
            Some(reason) => self.rotate(reason),
            None => self.current_session_id(),
        }
    }

    pub fn force_session_rotation(&self) -> String {
        self.rotate(RotationReason::Manual)
    }

    /// Rotate when the authenticated user changes. Returns the new session
    /// id if a rotation happened.
    pub fn on_user_authentication_change(&self, user_id: Option<String>) -> Option<String> {
        let changed = {
            let mut state = self.state.lock();
            if state.authenticated_user == user_id {
                false
            } else {
                state.authenticated_user = user_id;
                true
            }
        };

        if changed && self.config.rotate_on_auth_change {
            Some(self.rotate(RotationReason::AuthChange))
        } else {
            None
        }
    }

    pub fn on_app_background(&self) {
        let now = self.clock.now();
        let snapshot = {
            let mut state = self.state.lock();
            state.background_since = Some(now);
            state.current.last_activity_at = now;
            state.current.clone()
        };
        store_session(self.storage.as_ref(), &snapshot);
    }

    pub fn on_app_foreground(&self) -> String {
        let now = self.clock.now();
        let background_for = self
            .state
            .lock()
            .background_since
            .take()
            .map(|since| elapsed_between(since, now));

        match background_for {
            Some(elapsed) if elapsed > self.config.background_threshold => {
                self.rotate(RotationReason::BackgroundTimeout)
            }
            _ => self.update_activity(),
        }
    }

    pub fn add_listener(&self, listener: Arc<SessionListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn clear_listeners(&self) {
        self.listeners.clear();
    }

    fn rotate(&self, reason: RotationReason) -> String {
        let now = self.clock.now();
        let (old_id, new_session) = {
            let mut state = self.state.lock();
            let new_session = Session::start(now, reason);
            let old = std::mem::replace(&mut state.current, new_session.clone());
            // Persisted under the lock so concurrent rotations land in order.
            store_session(self.storage.as_ref(), &new_session);
            (old.id, new_session)
        };

        tracing::info!(
            "Session rotated {} -> {} ({:?})",
            old_id,
            new_session.id,
            reason
        );
        self.listeners
            .notify(|listener| listener(&old_id, &new_session.id, reason));
        new_session.id
    }
}

fn expiry_reason(config: &SessionConfig, session: &Session, now: DateTime<Utc>) -> Option<RotationReason> {
    if elapsed_between(session.started_at, now) >= config.max_duration {
        Some(RotationReason::MaxDurationExceeded)
    } else if elapsed_between(session.last_activity_at, now) >= config.inactivity_timeout {
        Some(RotationReason::InactivityTimeout)
    } else {
        None
    }
}

fn load_session(storage: &dyn Storage) -> Option<Session> {
    let bytes = match storage.get(SESSION_STORAGE_KEY) {
        Ok(bytes) => bytes?,
        Err(e) => {
            tracing::warn!("Failed to read persisted session: {}", e);
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!("Discarding unreadable persisted session: {}", e);
            None
        }
    }
}

fn store_session(storage: &dyn Storage, session: &Session) {
    let result = serde_json::to_vec(session)
        .map_err(|e| crate::error::CFError::serialization("Failed to encode session", e))
        .and_then(|bytes| storage.set(SESSION_STORAGE_KEY, &bytes));

    if let Err(e) = result {
        tracing::warn!("Failed to persist session {}: {}", session.id, e);
    }
}
