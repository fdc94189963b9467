use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use crate::core::{
    CFConfig, ConfigSynchronizer, ConnectionInfo, ConnectionMonitor, ConnectionStatus, EventPipeline, PollCallback,
    PollingManager, RotationReason, Session, SessionManager, UpdateResult,
};
use crate::error::{CFError, Result};
use crate::http::{
    CircuitBreakerRegistry, CircuitBreakerState, HttpClient, NetworkGuard, Transport,
};
use crate::listeners::ListenerId;
use crate::platform::{
    AppLifecycle, AppState, BatteryInfo, BatteryState, Clock, ConnectivitySignal, NetworkType,
    StaticSignals, SystemClock,
};
use crate::storage::{InMemoryStorage, Storage};
use crate::types::{CFUser, ConfigSnapshot, EventRecord, FlagValue, SummaryRecord};

/// Everything the client consumes from its host.
///
/// Defaults: a reqwest transport built from the config, in-memory storage,
/// the system clock and static "online, foreground, charged" signals.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Option<Arc<dyn Transport>>,
    pub storage: Arc<dyn Storage>,
    pub clock: Arc<dyn Clock>,
    pub connectivity: Arc<dyn ConnectivitySignal>,
    pub battery: Arc<dyn BatteryState>,
    pub lifecycle: Arc<dyn AppLifecycle>,
}

impl Default for Collaborators {
    fn default() -> Self {
        let signals = Arc::new(StaticSignals::default());
        Self {
            transport: None,
            storage: Arc::new(InMemoryStorage::new()),
            clock: Arc::new(SystemClock),
            connectivity: signals.clone(),
            battery: signals.clone(),
            lifecycle: signals,
        }
    }
}

impl Collaborators {
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn ConnectivitySignal>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_battery(mut self, battery: Arc<dyn BatteryState>) -> Self {
        self.battery = battery;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn AppLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }
}

/// The SDK client: flag reads, event tracking, lifecycle signals and
/// listener registration on top of the sync engine.
///
/// Must be created inside a tokio runtime; it spawns the polling and
/// flushing tasks immediately and starts the first config sync.
pub struct CFClient {
    config: CFConfig,
    runtime: Handle,
    user: Arc<RwLock<CFUser>>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn ConnectivitySignal>,
    battery: Arc<dyn BatteryState>,
    lifecycle: Arc<dyn AppLifecycle>,
    monitor: Arc<ConnectionMonitor>,
    breakers: Arc<CircuitBreakerRegistry>,
    sessions: Arc<SessionManager>,
    sync: Arc<ConfigSynchronizer>,
    pipeline: EventPipeline,
    polling: PollingManager,
    is_shutdown: AtomicBool,
}

impl CFClient {
    pub fn new(config: CFConfig, user: CFUser) -> Result<Self> {
        Self::with_collaborators(config, user, Collaborators::default())
    }

    pub fn with_collaborators(config: CFConfig, user: CFUser, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let runtime = Handle::try_current()
            .map_err(|e| CFError::internal(format!("CFClient requires a tokio runtime: {}", e)))?;

        let transport: Arc<dyn Transport> = match collaborators.transport {
            Some(transport) => transport,
            None => Arc::new(HttpClient::new(&config)?),
        };
        let clock = collaborators.clock;

        let monitor = Arc::new(ConnectionMonitor::new(
            config.offline_mode,
            config.retry_policy.clone(),
            Arc::clone(&clock),
            Arc::clone(&collaborators.connectivity),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.circuit_breaker.clone(),
            Arc::clone(&clock),
        ));
        let guard = Arc::new(NetworkGuard::new(
            Arc::clone(&breakers),
            config.retry_policy.clone(),
            Arc::clone(&monitor),
        ));

        let sessions = Arc::new(SessionManager::new(
            config.session_config(),
            Arc::clone(&clock),
            Arc::clone(&collaborators.storage),
            user.user_customer_id.clone(),
        ));

        let user = Arc::new(RwLock::new(user));
        let sync = Arc::new(ConfigSynchronizer::new(
            Arc::clone(&transport),
            Arc::clone(&guard),
            Arc::clone(&clock),
            Arc::clone(&user),
        ));

        let pipeline = EventPipeline::new(
            config.pipeline_config(),
            transport,
            guard,
            Arc::clone(&clock),
            collaborators.storage,
            Arc::clone(&user),
            Arc::clone(&sessions),
        );
        if let Err(e) = pipeline.restore_pending() {
            tracing::warn!("Could not restore pending events: {}", e);
        }

        let polling = PollingManager::new(
            config.polling_config(),
            collaborators.lifecycle.current(),
            collaborators.battery.current(),
        );

        let client = Self {
            config,
            runtime,
            user,
            clock,
            connectivity: collaborators.connectivity,
            battery: collaborators.battery,
            lifecycle: collaborators.lifecycle,
            monitor,
            breakers,
            sessions,
            sync,
            pipeline,
            polling,
            is_shutdown: AtomicBool::new(false),
        };
        client.start();
        Ok(client)
    }

    fn start(&self) {
        self.pipeline.start();

        let sync = Arc::clone(&self.sync);
        let callback: PollCallback = Arc::new(move || {
            let sync = Arc::clone(&sync);
            Box::pin(async move {
                match sync.check_for_update().await {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        tracing::debug!("Config poll failed: {}", e.sanitized_message());
                        Err(())
                    }
                }
            })
        });
        self.polling.start(callback);
        self.polling.poll_now();

        tracing::info!("CustomFit client started");
    }

    pub fn config(&self) -> &CFConfig {
        &self.config
    }

    // Configuration

    /// Wait for the first sync using the configured timeout.
    pub async fn await_first_sync(&self) -> Result<()> {
        self.sync.await_first_sync(self.config.first_sync_timeout).await
    }

    pub async fn await_first_sync_within(&self, timeout: Duration) -> Result<()> {
        self.sync.await_first_sync(timeout).await
    }

    pub async fn check_for_update(&self) -> Result<UpdateResult> {
        self.sync.check_for_update().await
    }

    pub async fn force_refresh(&self) -> Result<Arc<ConfigSnapshot>> {
        self.sync.force_refresh().await
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.sync.current_snapshot()
    }

    // Flag reads

    pub fn get_string(&self, key: &str, default_value: &str) -> String {
        match self.read_flag(key) {
            Some(FlagValue::String(value)) => value,
            other => self.fallback(key, other, default_value.to_string()),
        }
    }

    pub fn get_number(&self, key: &str, default_value: f64) -> f64 {
        match self.read_flag(key) {
            Some(FlagValue::Number(value)) => value,
            other => self.fallback(key, other, default_value),
        }
    }

    pub fn get_boolean(&self, key: &str, default_value: bool) -> bool {
        match self.read_flag(key) {
            Some(FlagValue::Bool(value)) => value,
            other => self.fallback(key, other, default_value),
        }
    }

    pub fn get_json(&self, key: &str, default_value: serde_json::Value) -> serde_json::Value {
        match self.read_flag(key) {
            Some(FlagValue::Json(value)) => value,
            other => self.fallback(key, other, default_value),
        }
    }

    pub fn get_all_flags(&self) -> HashMap<String, FlagValue> {
        self.sync.current_snapshot().values()
    }

    pub fn has_flag(&self, key: &str) -> bool {
        self.sync.current_snapshot().contains(key)
    }

    fn read_flag(&self, key: &str) -> Option<FlagValue> {
        let snapshot = self.sync.current_snapshot();
        let entry = snapshot.entry(key)?;

        if let Some(experience) = &entry.experience {
            let summary = SummaryRecord::from_experience(
                experience,
                &self.user.read(),
                self.sessions.current_session_id(),
                self.clock.now(),
            );
            if let Err(e) = self.pipeline.track_summary(summary) {
                tracing::debug!("Summary for '{}' not recorded: {}", key, e);
            }
        }

        Some(entry.value.clone())
    }

    fn fallback<T>(&self, key: &str, found: Option<FlagValue>, default_value: T) -> T {
        if let Some(value) = found {
            tracing::warn!(
                "Flag '{}' is {:?}, not the requested type; using default",
                key,
                value.flag_type()
            );
        }
        default_value
    }

    // Events

    pub fn track_event(
        &self,
        name: &str,
        properties: HashMap<String, serde_json::Value>,
    ) -> Result<EventRecord> {
        self.pipeline.track_event(name, properties)
    }

    pub async fn flush(&self) -> Result<usize> {
        self.pipeline.flush().await
    }

    pub fn pending_events(&self) -> usize {
        self.pipeline.pending_events()
    }

    pub fn pending_summaries(&self) -> usize {
        self.pipeline.pending_summaries()
    }

    // User and session

    pub fn user(&self) -> CFUser {
        self.user.read().clone()
    }

    /// Replace the current user and refetch configs for them.
    pub fn set_user(&self, user: CFUser) {
        let user_id = user.user_customer_id.clone();
        *self.user.write() = user;
        self.sessions.on_user_authentication_change(user_id);

        let sync = Arc::clone(&self.sync);
        self.runtime.spawn(async move {
            if let Err(e) = sync.force_refresh().await {
                tracing::debug!("Refresh after user change failed: {}", e.sanitized_message());
            }
        });
    }

    pub fn on_user_authentication_change(&self, user_id: Option<String>) -> Option<String> {
        self.sessions.on_user_authentication_change(user_id)
    }

    pub fn force_session_rotation(&self) -> String {
        self.sessions.force_session_rotation()
    }

    pub fn current_session_id(&self) -> String {
        self.sessions.current_session_id()
    }

    pub fn current_session(&self) -> Session {
        self.sessions.current_session()
    }

    // Connectivity and platform signals

    pub fn set_offline_mode(&self, offline: bool) {
        self.monitor.set_offline_mode(offline);
        if !offline {
            self.polling.poll_now();
        }
    }

    pub fn is_offline_mode(&self) -> bool {
        self.monitor.is_offline_mode()
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.monitor.status()
    }

    pub fn circuit_states(&self) -> HashMap<String, CircuitBreakerState> {
        self.breakers.states()
    }

    pub fn on_connectivity_changed(&self, network: NetworkType) {
        let was_available = self.monitor_has_network();
        self.monitor.on_connectivity_changed(network);
        if network.is_available() && !was_available {
            self.polling.poll_now();
        }
    }

    pub fn on_battery_changed(&self, battery: BatteryInfo) {
        self.polling.set_battery(battery);
    }

    pub fn on_app_state_changed(&self, app_state: AppState) {
        self.polling.set_app_state(app_state);
        match app_state {
            AppState::Background => self.sessions.on_app_background(),
            AppState::Foreground => {
                self.sessions.on_app_foreground();
                self.polling.poll_now();
            }
        }
    }

    /// Re-read all host signals and apply them.
    pub fn refresh_signals(&self) {
        self.on_connectivity_changed(self.connectivity.current());
        self.on_battery_changed(self.battery.current());
        self.polling.set_app_state(self.lifecycle.current());
    }

    fn monitor_has_network(&self) -> bool {
        self.monitor.status().status != ConnectionStatus::Disconnected
    }

    // Listeners

    pub fn add_flag_listener<F>(&self, key: &str, listener: F) -> ListenerId
    where
        F: Fn(&str, Option<&FlagValue>) + Send + Sync + 'static,
    {
        self.sync.add_flag_listener(key, Arc::new(listener))
    }

    pub fn remove_flag_listener(&self, id: ListenerId) -> bool {
        self.sync.remove_flag_listener(id)
    }

    pub fn add_all_flags_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&HashMap<String, FlagValue>) + Send + Sync + 'static,
    {
        self.sync.add_all_flags_listener(Arc::new(listener))
    }

    pub fn remove_all_flags_listener(&self, id: ListenerId) -> bool {
        self.sync.remove_all_flags_listener(id)
    }

    pub fn add_connection_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionInfo) + Send + Sync + 'static,
    {
        self.monitor.add_listener(Arc::new(listener))
    }

    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        self.monitor.remove_listener(id)
    }

    pub fn add_session_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str, &str, RotationReason) + Send + Sync + 'static,
    {
        self.sessions.add_listener(Arc::new(listener))
    }

    pub fn remove_session_listener(&self, id: ListenerId) -> bool {
        self.sessions.remove_listener(id)
    }

    // Lifecycle

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Stop background work, make one final flush bounded by the shutdown
    /// timeout, persist unsent events and drop every listener.
    pub async fn shutdown(&self) -> Result<()> {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.polling.stop();
        let result = self.pipeline.shutdown(self.config.shutdown_timeout).await;

        self.sync.clear_listeners();
        self.monitor.clear_listeners();
        self.sessions.clear_listeners();

        tracing::info!("CustomFit client shut down");
        result
    }
}
