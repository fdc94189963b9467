mod config;
mod config_sync;
mod connection_monitor;
mod event_pipeline;
mod polling_manager;
mod queue;
mod session_manager;

pub use config::{
    CFConfig, CFConfigBuilder, DEFAULT_API_BASE_URL, DEFAULT_EVENTS_FLUSH_INTERVAL,
    DEFAULT_EVENTS_FLUSH_TIME_THRESHOLD, DEFAULT_EVENTS_QUEUE_SIZE, DEFAULT_FIRST_SYNC_TIMEOUT,
    DEFAULT_MAX_STORED_EVENTS, DEFAULT_SDK_SETTINGS_CHECK_INTERVAL, DEFAULT_SETTINGS_BASE_URL,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_SUMMARIES_FLUSH_INTERVAL, DEFAULT_SUMMARIES_QUEUE_SIZE,
};
pub use config_sync::{
    parse_configs, AllFlagsListener, ConfigSynchronizer, FlagListener, KeyedFlagListener,
    UpdateResult,
};
pub use connection_monitor::{
    ConnectionInfo, ConnectionListener, ConnectionMonitor, ConnectionStatus,
};
pub use event_pipeline::{EventPipeline, PipelineConfig, MAX_EVENT_NAME_LENGTH};
pub use polling_manager::{PollCallback, PollingConfig, PollingManager, DEFAULT_JITTER_MS};
pub use queue::{BoundedQueue, PushResult, Queued};
pub use session_manager::{
    RotationReason, Session, SessionConfig, SessionListener, SessionManager,
};
