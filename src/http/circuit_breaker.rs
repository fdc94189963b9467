use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CFError, Result};
use crate::platform::{to_chrono, Clock, SystemClock};

/// Breaker key guarding the metadata probe, settings and config fetches.
pub const CONFIG_FETCH_KEY: &str = "config-fetch";
/// Breaker key guarding event delivery.
pub const EVENT_SEND_KEY: &str = "event-send";
/// Breaker key guarding summary delivery.
pub const SUMMARY_SEND_KEY: &str = "summary-send";

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);
pub const DEFAULT_TRACKING_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failures within the tracking window that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing a trial.
    pub cooldown: Duration,
    /// A failure older than this no longer counts toward the threshold.
    pub tracking_window: Duration,
    /// Cooldown growth applied each time a half-open trial fails.
    pub reopen_backoff_multiplier: f64,
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            tracking_window: DEFAULT_TRACKING_WINDOW,
            reopen_backoff_multiplier: 2.0,
            max_cooldown: DEFAULT_MAX_COOLDOWN,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            ..Default::default()
        }
    }

    fn reopen_cooldown(&self, reopen_count: u32) -> Duration {
        let grown = self.cooldown.as_millis() as f64
            * self.reopen_backoff_multiplier.max(1.0).powi(reopen_count.min(32) as i32);
        let capped = grown.min(self.max_cooldown.max(self.cooldown).as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// State of one breaker. Every transition is a function of the current
/// state, the call outcome and the time passed in.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    reopen_count: u32,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            next_attempt_at: None,
            trial_in_flight: false,
            reopen_count: 0,
        }
    }
}

impl CircuitBreakerState {
    /// Move an expired open circuit to half-open.
    fn refresh(&mut self, now: DateTime<Utc>) {
        if self.state == CircuitState::Open {
            if let Some(next) = self.next_attempt_at {
                if now >= next {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = false;
                }
            }
        }
    }

    /// Decide whether a call may proceed. In half-open only one trial is
    /// admitted until its outcome is recorded.
    pub fn admit(&mut self, now: DateTime<Utc>) -> bool {
        self.refresh(now);
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    false
                } else {
                    self.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn on_outcome(&mut self, outcome: CallOutcome, now: DateTime<Utc>, config: &CircuitBreakerConfig) {
        match outcome {
            CallOutcome::Success => {
                *self = CircuitBreakerState::default();
            }
            CallOutcome::Failure => match self.state {
                CircuitState::Closed => {
                    let within_window = self
                        .last_failure_at
                        .map(|last| now - last <= to_chrono(config.tracking_window))
                        .unwrap_or(false);
                    self.consecutive_failures = if within_window {
                        self.consecutive_failures + 1
                    } else {
                        1
                    };
                    self.last_failure_at = Some(now);

                    if self.consecutive_failures >= config.failure_threshold.max(1) {
                        self.state = CircuitState::Open;
                        self.reopen_count = 0;
                        self.next_attempt_at = Some(now + to_chrono(config.cooldown));
                    }
                }
                CircuitState::HalfOpen => {
                    self.reopen_count += 1;
                    self.consecutive_failures += 1;
                    self.last_failure_at = Some(now);
                    self.trial_in_flight = false;
                    self.state = CircuitState::Open;
                    self.next_attempt_at =
                        Some(now + to_chrono(config.reopen_cooldown(self.reopen_count)));
                }
                CircuitState::Open => {
                    // A call admitted before the circuit opened finished late.
                    self.consecutive_failures += 1;
                    self.last_failure_at = Some(now);
                }
            },
        }
    }
}

/// Three-state failure-isolation guard for one operation key.
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(key, config, Arc::new(SystemClock))
    }

    pub fn with_clock(key: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            key: key.into(),
            config,
            clock,
            state: Mutex::new(CircuitBreakerState::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        state.refresh(self.clock.now());
        state.state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let mut state = self.state.lock();
        state.refresh(self.clock.now());
        state.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Claim permission for one call. Fails fast with a circuit-open error.
    pub fn try_acquire(&self) -> Result<()> {
        let admitted = self.state.lock().admit(self.clock.now());
        if admitted {
            Ok(())
        } else {
            tracing::debug!("Circuit '{}' rejected call without network attempt", self.key);
            Err(CFError::circuit_open(&self.key))
        }
    }

    pub fn record_success(&self) {
        self.record(CallOutcome::Success);
    }

    pub fn record_failure(&self) {
        self.record(CallOutcome::Failure);
    }

    fn record(&self, outcome: CallOutcome) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let before = state.state;
        state.on_outcome(outcome, now, &self.config);
        if before != state.state {
            tracing::info!("Circuit '{}' {:?} -> {:?}", self.key, before, state.state);
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = CircuitBreakerState::default();
    }

    /// Run `action` through the breaker.
    ///
    /// Only retryable failures count against the circuit; a validation or
    /// permission error proves the remote side is reachable.
    pub async fn execute_async<T, F, Fut>(&self, action: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.try_acquire()?;

        match action().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.is_retryable() {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(e)
            }
        }
    }
}

/// One independent breaker per operation key.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        Arc::clone(breakers.entry(key.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::with_clock(
                key,
                self.config.clone(),
                Arc::clone(&self.clock),
            ))
        }))
    }

    pub fn states(&self) -> HashMap<String, CircuitBreakerState> {
        self.breakers
            .lock()
            .iter()
            .map(|(key, breaker)| (key.clone(), breaker.snapshot()))
            .collect()
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().values() {
            breaker.reset();
        }
    }
}
