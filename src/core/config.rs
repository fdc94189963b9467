use std::time::Duration;

use super::event_pipeline::PipelineConfig;
use super::polling_manager::{PollingConfig, DEFAULT_JITTER_MS};
use super::session_manager::SessionConfig;
use crate::error::{CFError, ErrorCode, Result};
use crate::http::{CircuitBreakerConfig, RetryPolicy};
use crate::utils::jwt::dimension_id_from_client_key;

pub const DEFAULT_API_BASE_URL: &str = "https://api.customfit.ai";
pub const DEFAULT_SETTINGS_BASE_URL: &str = "https://sdk.customfit.ai";

pub const DEFAULT_EVENTS_QUEUE_SIZE: usize = 100;
pub const DEFAULT_EVENTS_FLUSH_TIME_THRESHOLD: Duration = Duration::from_secs(60);
pub const DEFAULT_EVENTS_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SUMMARIES_QUEUE_SIZE: usize = 100;
pub const DEFAULT_SUMMARIES_FLUSH_TIME_THRESHOLD: Duration = Duration::from_secs(60);
pub const DEFAULT_SUMMARIES_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_STORED_EVENTS: usize = 100;

pub const DEFAULT_SDK_SETTINGS_CHECK_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_BACKGROUND_POLLING_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_REDUCED_POLLING_INTERVAL: Duration = Duration::from_secs(7200);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_SESSION_MAX_DURATION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_SESSION_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SESSION_BACKGROUND_THRESHOLD: Duration = Duration::from_secs(15 * 60);

pub const DEFAULT_FIRST_SYNC_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Client configuration.
///
/// Build with [`CFConfig::builder`]; [`CFConfig::validate`] runs when the
/// client is constructed.
#[derive(Debug, Clone)]
pub struct CFConfig {
    pub client_key: String,
    pub api_base_url: String,
    pub settings_base_url: String,

    pub events_queue_size: usize,
    /// A queued event older than this triggers a flush on the next tick.
    pub events_flush_time_threshold: Duration,
    pub events_flush_interval: Duration,
    pub summaries_queue_size: usize,
    pub summaries_flush_time_threshold: Duration,
    pub summaries_flush_interval: Duration,
    /// Upper bound on events persisted at shutdown.
    pub max_stored_events: usize,

    pub sdk_settings_check_interval: Duration,
    pub background_polling_interval: Duration,
    pub disable_background_polling: bool,
    pub reduced_polling_interval: Duration,
    pub use_reduced_polling_when_battery_low: bool,

    pub retry_policy: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,

    pub offline_mode: bool,

    pub session_max_duration: Duration,
    pub session_inactivity_timeout: Duration,
    pub session_background_threshold: Duration,
    pub rotate_session_on_auth_change: bool,

    pub first_sync_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl CFConfig {
    pub fn new(client_key: impl Into<String>) -> Self {
        Self {
            client_key: client_key.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            settings_base_url: DEFAULT_SETTINGS_BASE_URL.to_string(),
            events_queue_size: DEFAULT_EVENTS_QUEUE_SIZE,
            events_flush_time_threshold: DEFAULT_EVENTS_FLUSH_TIME_THRESHOLD,
            events_flush_interval: DEFAULT_EVENTS_FLUSH_INTERVAL,
            summaries_queue_size: DEFAULT_SUMMARIES_QUEUE_SIZE,
            summaries_flush_time_threshold: DEFAULT_SUMMARIES_FLUSH_TIME_THRESHOLD,
            summaries_flush_interval: DEFAULT_SUMMARIES_FLUSH_INTERVAL,
            max_stored_events: DEFAULT_MAX_STORED_EVENTS,
            sdk_settings_check_interval: DEFAULT_SDK_SETTINGS_CHECK_INTERVAL,
            background_polling_interval: DEFAULT_BACKGROUND_POLLING_INTERVAL,
            disable_background_polling: false,
            reduced_polling_interval: DEFAULT_REDUCED_POLLING_INTERVAL,
            use_reduced_polling_when_battery_low: true,
            retry_policy: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            offline_mode: false,
            session_max_duration: DEFAULT_SESSION_MAX_DURATION,
            session_inactivity_timeout: DEFAULT_SESSION_INACTIVITY_TIMEOUT,
            session_background_threshold: DEFAULT_SESSION_BACKGROUND_THRESHOLD,
            rotate_session_on_auth_change: true,
            first_sync_timeout: DEFAULT_FIRST_SYNC_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn builder(client_key: impl Into<String>) -> CFConfigBuilder {
        CFConfigBuilder::new(client_key)
    }

    /// Routing id carried in the client key, used for the settings URL.
    pub fn dimension_id(&self) -> Option<String> {
        dimension_id_from_client_key(&self.client_key)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            events_queue_size: self.events_queue_size,
            events_flush_time_threshold: self.events_flush_time_threshold,
            events_flush_interval: self.events_flush_interval,
            summaries_queue_size: self.summaries_queue_size,
            summaries_flush_time_threshold: self.summaries_flush_time_threshold,
            summaries_flush_interval: self.summaries_flush_interval,
            max_stored_events: self.max_stored_events,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_duration: self.session_max_duration,
            inactivity_timeout: self.session_inactivity_timeout,
            background_threshold: self.session_background_threshold,
            rotate_on_auth_change: self.rotate_session_on_auth_change,
        }
    }

    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            foreground_interval: self.sdk_settings_check_interval,
            background_interval: self.background_polling_interval,
            disable_background_polling: self.disable_background_polling,
            reduced_interval: self.reduced_polling_interval,
            use_reduced_when_battery_low: self.use_reduced_polling_when_battery_low,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_key.trim().is_empty() {
            return Err(CFError::config_error(
                ErrorCode::ConfigMissingClientKey,
                "Client key is required",
            ));
        }

        for (name, url) in [
            ("api_base_url", &self.api_base_url),
            ("settings_base_url", &self.settings_base_url),
        ] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(CFError::config_error(
                    ErrorCode::ConfigInvalidUrl,
                    format!("{} must be an http(s) URL", name),
                ));
            }
        }

        if self.events_queue_size == 0 || self.summaries_queue_size == 0 {
            return Err(CFError::config_error(
                ErrorCode::ConfigInvalidQueueSize,
                "Queue sizes must be at least 1",
            ));
        }

        let intervals = [
            ("events_flush_interval", self.events_flush_interval),
            ("summaries_flush_interval", self.summaries_flush_interval),
            ("sdk_settings_check_interval", self.sdk_settings_check_interval),
            ("background_polling_interval", self.background_polling_interval),
            ("reduced_polling_interval", self.reduced_polling_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, interval)| interval.is_zero()) {
            return Err(CFError::config_error(
                ErrorCode::ConfigInvalidInterval,
                format!("{} must be positive", name),
            ));
        }

        if self.retry_policy.max_attempts == 0 {
            return Err(CFError::config_error(
                ErrorCode::ConfigInvalidInterval,
                "Retry policy needs at least one attempt",
            ));
        }

        Ok(())
    }
}

/// Builder for [`CFConfig`].
pub struct CFConfigBuilder {
    config: CFConfig,
}

impl CFConfigBuilder {
    pub fn new(client_key: impl Into<String>) -> Self {
        Self {
            config: CFConfig::new(client_key),
        }
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn settings_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.settings_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn events_queue_size(mut self, size: usize) -> Self {
        self.config.events_queue_size = size;
        self
    }

    pub fn events_flush_time_threshold(mut self, threshold: Duration) -> Self {
        self.config.events_flush_time_threshold = threshold;
        self
    }

    pub fn events_flush_interval(mut self, interval: Duration) -> Self {
        self.config.events_flush_interval = interval;
        self
    }

    pub fn summaries_queue_size(mut self, size: usize) -> Self {
        self.config.summaries_queue_size = size;
        self
    }

    pub fn summaries_flush_time_threshold(mut self, threshold: Duration) -> Self {
        self.config.summaries_flush_time_threshold = threshold;
        self
    }

    pub fn summaries_flush_interval(mut self, interval: Duration) -> Self {
        self.config.summaries_flush_interval = interval;
        self
    }

    pub fn max_stored_events(mut self, max: usize) -> Self {
        self.config.max_stored_events = max;
        self
    }

    pub fn sdk_settings_check_interval(mut self, interval: Duration) -> Self {
        self.config.sdk_settings_check_interval = interval;
        self
    }

    pub fn background_polling_interval(mut self, interval: Duration) -> Self {
        self.config.background_polling_interval = interval;
        self
    }

    pub fn disable_background_polling(mut self, disabled: bool) -> Self {
        self.config.disable_background_polling = disabled;
        self
    }

    pub fn reduced_polling_interval(mut self, interval: Duration) -> Self {
        self.config.reduced_polling_interval = interval;
        self
    }

    pub fn use_reduced_polling_when_battery_low(mut self, enabled: bool) -> Self {
        self.config.use_reduced_polling_when_battery_low = enabled;
        self
    }

    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.retry_policy.max_attempts = attempts;
        self
    }

    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.config.retry_policy.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_policy.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn retry_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.retry_policy.backoff_multiplier = multiplier;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry_policy = policy;
        self
    }

    pub fn circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.config.circuit_breaker.failure_threshold = threshold;
        self
    }

    pub fn circuit_breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.circuit_breaker.cooldown = cooldown;
        self
    }

    pub fn circuit_breaker_tracking_window(mut self, window: Duration) -> Self {
        self.config.circuit_breaker.tracking_window = window;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn offline_mode(mut self, offline: bool) -> Self {
        self.config.offline_mode = offline;
        self
    }

    pub fn session_max_duration(mut self, duration: Duration) -> Self {
        self.config.session_max_duration = duration;
        self
    }

    pub fn session_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_inactivity_timeout = timeout;
        self
    }

    pub fn session_background_threshold(mut self, threshold: Duration) -> Self {
        self.config.session_background_threshold = threshold;
        self
    }

    pub fn rotate_session_on_auth_change(mut self, enabled: bool) -> Self {
        self.config.rotate_session_on_auth_change = enabled;
        self
    }

    pub fn first_sync_timeout(mut self, timeout: Duration) -> Self {
        self.config.first_sync_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> CFConfig {
        self.config
    }
}
