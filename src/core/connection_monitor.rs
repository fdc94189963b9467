//! Aggregated connection state.
//!
//! Combines the host's connectivity signal, the offline-mode switch and the
//! outcome of every network call into one [`ConnectionInfo`]. Listeners are
//! told about status transitions only.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::CFError;
use crate::http::RetryPolicy;
use crate::listeners::{ListenerId, ListenerRegistry};
use crate::platform::{to_chrono, Clock, ConnectivitySignal, NetworkType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
    Offline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub status: ConnectionStatus,
    pub is_offline_mode: bool,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

pub type ConnectionListener = dyn Fn(&ConnectionInfo) + Send + Sync;

struct MonitorState {
    offline_mode: bool,
    network: NetworkType,
    last_error: Option<String>,
    last_success_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    next_retry_at: Option<DateTime<Utc>>,
}

impl MonitorState {
    fn status(&self) -> ConnectionStatus {
        if self.offline_mode {
            ConnectionStatus::Offline
        } else if !self.network.is_available() {
            ConnectionStatus::Disconnected
        } else if self.consecutive_failures > 0 || self.last_success_at.is_none() {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Connected
        }
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            status: self.status(),
            is_offline_mode: self.offline_mode,
            last_error: self.last_error.clone(),
            last_success_at: self.last_success_at,
            consecutive_failures: self.consecutive_failures,
            next_retry_at: self.next_retry_at,
        }
    }
}

pub struct ConnectionMonitor {
    state: Mutex<MonitorState>,
    listeners: ListenerRegistry<ConnectionListener>,
    retry_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn ConnectivitySignal>,
}

impl ConnectionMonitor {
    pub fn new(
        offline_mode: bool,
        retry_policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        connectivity: Arc<dyn ConnectivitySignal>,
    ) -> Self {
        let network = connectivity.current();
        Self {
            state: Mutex::new(MonitorState {
                offline_mode,
                network,
                last_error: None,
                last_success_at: None,
                consecutive_failures: 0,
                next_retry_at: None,
            }),
            listeners: ListenerRegistry::new("connection"),
            retry_policy,
            clock,
            connectivity,
        }
    }

    pub fn status(&self) -> ConnectionInfo {
        self.state.lock().info()
    }

    pub fn is_offline_mode(&self) -> bool {
        self.state.lock().offline_mode
    }

    pub fn set_offline_mode(&self, offline: bool) {
        self.update(|state| state.offline_mode = offline);
        tracing::info!("Offline mode {}", if offline { "enabled" } else { "disabled" });
    }

    pub fn record_success(&self) {
        let now = self.clock.now();
        self.update(|state| {
            state.last_success_at = Some(now);
            state.consecutive_failures = 0;
            state.last_error = None;
            state.next_retry_at = None;
        });
    }

    pub fn record_failure(&self, error: &CFError) {
        let now = self.clock.now();
        let policy = &self.retry_policy;
        self.update(|state| {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.last_error = Some(error.sanitized_message());
            let delay = policy.delay_for_attempt(state.consecutive_failures - 1);
            state.next_retry_at = Some(now + to_chrono(delay));
        });
    }

    pub fn on_connectivity_changed(&self, network: NetworkType) {
        self.update(|state| state.network = network);
    }

    /// Re-read the host connectivity signal.
    pub fn refresh_from_signal(&self) {
        let network = self.connectivity.current();
        self.on_connectivity_changed(network);
    }

    pub fn add_listener(&self, listener: Arc<ConnectionListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn clear_listeners(&self) {
        self.listeners.clear();
    }

    /// Apply `change` and, if the derived status moved, notify listeners
    /// after the lock is released.
    fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut MonitorState),
    {
        let transition = {
            let mut state = self.state.lock();
            let before = state.status();
            change(&mut state);
            let info = state.info();
            (info.status != before).then_some((before, info))
        };

        if let Some((before, info)) = transition {
            tracing::debug!("Connection status {:?} -> {:?}", before, info.status);
            self.listeners.notify(|listener| listener(&info));
        }
    }
}
