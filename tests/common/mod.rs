#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use customfit::core::{
    CFConfig, ConfigSynchronizer, ConnectionMonitor, EventPipeline, PipelineConfig, SessionManager,
};
use customfit::http::{
    CircuitBreakerConfig, CircuitBreakerRegistry, ConfigMetadata, EventPayload, NetworkGuard,
    RetryPolicy, SdkSettings, SummaryPayload, Transport,
};
use customfit::platform::{ManualClock, StaticSignals};
use customfit::storage::{InMemoryStorage, Storage};
use customfit::types::{CFUser, EventRecord, SummaryRecord};
use customfit::{CFError, ErrorCode};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;

/// One observed transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Metadata,
    Settings,
    Configs,
    Events(usize),
    Summaries(usize),
}

/// Scriptable in-memory backend that records every call in order.
pub struct FakeTransport {
    calls: Mutex<Vec<Call>>,
    pub etag: Mutex<Option<String>>,
    pub settings: Mutex<SdkSettings>,
    pub configs: Mutex<serde_json::Value>,
    /// When set, every fetch fails with this code.
    pub fetch_error: Mutex<Option<ErrorCode>>,
    /// When set, every event and summary send fails with this code.
    pub send_error: Mutex<Option<ErrorCode>>,
    /// When set, every event and summary send waits this long first.
    pub send_delay: Mutex<Option<Duration>>,
    pub sent_events: Mutex<Vec<EventRecord>>,
    pub sent_summaries: Mutex<Vec<SummaryRecord>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            etag: Mutex::new(Some("\"v1\"".to_string())),
            settings: Mutex::new(SdkSettings::default()),
            configs: Mutex::new(serde_json::json!({ "configs": {} })),
            fetch_error: Mutex::new(None),
            send_error: Mutex::new(None),
            send_delay: Mutex::new(None),
            sent_events: Mutex::new(Vec::new()),
            sent_summaries: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_configs(configs: serde_json::Value) -> Arc<Self> {
        let transport = Self::default();
        *transport.configs.lock() = configs;
        Arc::new(transport)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matches(call)).count()
    }

    pub fn config_fetches(&self) -> usize {
        self.count(|call| *call == Call::Configs)
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn set_etag(&self, etag: &str) {
        *self.etag.lock() = Some(etag.to_string());
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    async fn delay_send(&self) {
        let delay = *self.send_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn fail_with(code: ErrorCode) -> CFError {
        CFError::new(code, format!("scripted failure: {}", code.as_str()))
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch_metadata(&self) -> customfit::Result<ConfigMetadata> {
        self.record(Call::Metadata);
        if let Some(code) = *self.fetch_error.lock() {
            return Err(Self::fail_with(code));
        }
        Ok(ConfigMetadata {
            etag: self.etag.lock().clone(),
            last_modified: None,
        })
    }

    async fn fetch_sdk_settings(&self) -> customfit::Result<SdkSettings> {
        self.record(Call::Settings);
        if let Some(code) = *self.fetch_error.lock() {
            return Err(Self::fail_with(code));
        }
        Ok(self.settings.lock().clone())
    }

    async fn fetch_user_configs(&self, _user: &CFUser) -> customfit::Result<serde_json::Value> {
        self.record(Call::Configs);
        if let Some(code) = *self.fetch_error.lock() {
            return Err(Self::fail_with(code));
        }
        Ok(self.configs.lock().clone())
    }

    async fn send_events(&self, payload: &EventPayload) -> customfit::Result<()> {
        self.record(Call::Events(payload.events.len()));
        self.delay_send().await;
        if let Some(code) = *self.send_error.lock() {
            return Err(Self::fail_with(code));
        }
        self.sent_events.lock().extend(payload.events.iter().cloned());
        Ok(())
    }

    async fn send_summaries(&self, payload: &SummaryPayload) -> customfit::Result<()> {
        self.record(Call::Summaries(payload.summaries.len()));
        self.delay_send().await;
        if let Some(code) = *self.send_error.lock() {
            return Err(Self::fail_with(code));
        }
        self.sent_summaries
            .lock()
            .extend(payload.summaries.iter().cloned());
        Ok(())
    }
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()))
}

/// Retry policy with millisecond delays so failing tests stay fast.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .initial_delay_ms(1)
        .max_delay_ms(5)
        .jitter_factor(0.0)
        .build()
}

pub fn test_config() -> CFConfig {
    CFConfig::builder("test-client-key")
        .retry_policy(fast_retry(1))
        .build()
}

/// The wiring shared by sync and pipeline tests.
pub struct Harness {
    pub transport: Arc<FakeTransport>,
    pub clock: Arc<ManualClock>,
    pub storage: Arc<InMemoryStorage>,
    pub monitor: Arc<ConnectionMonitor>,
    pub guard: Arc<NetworkGuard>,
    pub user: Arc<RwLock<CFUser>>,
    pub sessions: Arc<SessionManager>,
}

impl Harness {
    pub fn new(transport: Arc<FakeTransport>) -> Self {
        Self::with_retry(transport, fast_retry(1))
    }

    pub fn with_retry(transport: Arc<FakeTransport>, retry: RetryPolicy) -> Self {
        Self::with_storage(transport, retry, Arc::new(InMemoryStorage::new()))
    }

    pub fn with_storage(
        transport: Arc<FakeTransport>,
        retry: RetryPolicy,
        storage: Arc<InMemoryStorage>,
    ) -> Self {
        let clock = manual_clock();
        let monitor = Arc::new(ConnectionMonitor::new(
            false,
            retry.clone(),
            clock.clone(),
            Arc::new(StaticSignals::default()),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            clock.clone(),
        ));
        let guard = Arc::new(NetworkGuard::new(breakers, retry, monitor.clone()));
        let sessions = Arc::new(SessionManager::new(
            test_config().session_config(),
            clock.clone(),
            storage.clone(),
            Some("user-1".to_string()),
        ));

        Self {
            transport,
            clock,
            storage,
            monitor,
            guard,
            user: Arc::new(RwLock::new(CFUser::new("user-1"))),
            sessions,
        }
    }

    pub fn synchronizer(&self) -> ConfigSynchronizer {
        ConfigSynchronizer::new(
            self.transport.clone(),
            self.guard.clone(),
            self.clock.clone(),
            self.user.clone(),
        )
    }

    pub fn pipeline(&self, config: PipelineConfig) -> EventPipeline {
        let storage: Arc<dyn Storage> = self.storage.clone();
        EventPipeline::new(
            config,
            self.transport.clone(),
            self.guard.clone(),
            self.clock.clone(),
            storage,
            self.user.clone(),
            self.sessions.clone(),
        )
    }
}

/// Pipeline settings whose timers never fire during a test.
pub fn quiet_pipeline_config(queue_size: usize) -> PipelineConfig {
    PipelineConfig {
        events_queue_size: queue_size,
        events_flush_time_threshold: Duration::from_secs(3600),
        events_flush_interval: Duration::from_secs(3600),
        summaries_queue_size: queue_size,
        summaries_flush_time_threshold: Duration::from_secs(3600),
        summaries_flush_interval: Duration::from_secs(3600),
        max_stored_events: queue_size,
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn experience_configs() -> serde_json::Value {
    serde_json::json!({
        "configs": {
            "hero_text": {
                "variation": "Welcome",
                "variation_data_type": "STRING",
                "config_id": "cfg-hero",
                "variation_id": "var-a",
                "experience_behaviour_response": {
                    "experience_id": "exp-hero",
                    "behaviour_id": "beh-1",
                    "rule_id": "rule-1"
                }
            },
            "max_items": {"variation": 25, "variation_data_type": "NUMBER"},
            "dark_mode": {"variation": true, "variation_data_type": "BOOLEAN"},
            "layout": {"variation": {"columns": 3}, "variation_data_type": "JSON"}
        }
    })
}
