mod circuit_breaker;
mod client;
mod guard;
pub mod retry;

pub use circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitBreakerState, CircuitState, CONFIG_FETCH_KEY, EVENT_SEND_KEY, SUMMARY_SEND_KEY,
};
pub use client::{
    ConfigMetadata, EventPayload, HttpClient, SdkSettings, SummaryPayload, Transport,
};
pub use guard::NetworkGuard;
pub use retry::{is_retryable, RetryExecutor, RetryPolicy, RetryPolicyBuilder};
