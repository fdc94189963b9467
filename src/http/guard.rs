use std::future::Future;
use std::sync::Arc;

use super::circuit_breaker::CircuitBreakerRegistry;
use super::retry::{RetryExecutor, RetryPolicy};
use crate::core::ConnectionMonitor;
use crate::error::{ErrorCode, Result};

/// Routes every outbound call through offline check, circuit breaker and
/// retry loop, in that order, and reports the outcome to the connection
/// monitor.
///
/// The breaker sees one outcome per call: a call that succeeds after two
/// retries counts as a single success.
pub struct NetworkGuard {
    breakers: Arc<CircuitBreakerRegistry>,
    retry_policy: RetryPolicy,
    monitor: Arc<ConnectionMonitor>,
}

impl NetworkGuard {
    pub fn new(
        breakers: Arc<CircuitBreakerRegistry>,
        retry_policy: RetryPolicy,
        monitor: Arc<ConnectionMonitor>,
    ) -> Self {
        Self {
            breakers,
            retry_policy,
            monitor,
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    /// Run `operation` under breaker `key`. `operation_name` is only used
    /// for the offline error message.
    pub async fn call<T, F, Fut>(&self, key: &str, operation_name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.monitor.is_offline_mode() {
            return Err(crate::error::CFError::offline(operation_name));
        }

        let breaker = self.breakers.get(key);
        let policy = &self.retry_policy;
        let result = breaker
            .execute_async(|| RetryExecutor::execute(operation, policy))
            .await;

        match &result {
            Ok(_) => self.monitor.record_success(),
            Err(e) if e.code == ErrorCode::CircuitOpen => {}
            Err(e) if e.is_network_error() => {
                tracing::warn!("{} failed: {}", operation_name, e.sanitized_message());
                self.monitor.record_failure(e);
            }
            // The server answered, so the connection itself is healthy.
            Err(_) => self.monitor.record_success(),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConnectionStatus;
    use crate::error::CFError;
    use crate::http::CircuitBreakerConfig;
    use crate::platform::{SystemClock, StaticSignals};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn guard(offline: bool) -> NetworkGuard {
        let clock = Arc::new(SystemClock);
        let policy = RetryPolicy::builder()
            .max_attempts(2)
            .initial_delay_ms(1)
            .jitter_factor(0.0)
            .build();
        NetworkGuard::new(
            Arc::new(CircuitBreakerRegistry::new(
                CircuitBreakerConfig::new(1, Duration::from_secs(60)),
                clock.clone(),
            )),
            policy.clone(),
            Arc::new(ConnectionMonitor::new(
                offline,
                policy,
                clock,
                Arc::new(StaticSignals::default()),
            )),
        )
    }

    #[tokio::test]
    async fn test_offline_short_circuits() {
        let guard = guard(true);
        let calls = AtomicU32::new(0);
        let result: Result<()> = guard
            .call("config-fetch", "Config fetch", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(result.unwrap_err().code, ErrorCode::NetworkOffline);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_open_circuit_and_mark_connecting() {
        let guard = guard(false);
        let calls = AtomicU32::new(0);

        let first: Result<()> = guard
            .call("event-send", "Event send", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CFError::new(ErrorCode::HttpServerError, "500")) }
            })
            .await;
        assert!(first.unwrap_err().is_retries_exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let second: Result<()> = guard
            .call("event-send", "Event send", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert_eq!(second.unwrap_err().code, ErrorCode::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(guard.monitor().status().status, ConnectionStatus::Connecting);
        assert_eq!(guard.monitor().status().consecutive_failures, 1);
    }
}
