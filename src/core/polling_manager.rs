//! Adaptive background polling for configuration updates.
//!
//! The cadence depends on two host signals: whether the app is in the
//! foreground and whether the battery is low. Signal changes reschedule the
//! next tick immediately.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::platform::{AppState, BatteryInfo};

/// Default jitter in milliseconds.
pub const DEFAULT_JITTER_MS: u64 = 1000;

/// Configuration for the polling manager.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    /// Interval while the app is in the foreground.
    pub foreground_interval: Duration,

    /// Interval while the app is in the background.
    pub background_interval: Duration,

    /// Stop polling entirely while in the background.
    pub disable_background_polling: bool,

    /// Interval used on low battery when not charging, if larger.
    pub reduced_interval: Duration,

    pub use_reduced_when_battery_low: bool,

    /// Maximum jitter added to each interval. Default: 1000ms
    pub jitter_ms: u64,
}

impl PollingConfig {
    /// Polling interval for the given signals, or `None` when polling is
    /// disabled.
    pub fn interval_for(&self, app_state: AppState, battery: BatteryInfo) -> Option<Duration> {
        let base = match app_state {
            AppState::Foreground => self.foreground_interval,
            AppState::Background if self.disable_background_polling => return None,
            AppState::Background => self.background_interval,
        };

        if self.use_reduced_when_battery_low && battery.is_low && !battery.is_charging {
            Some(base.max(self.reduced_interval))
        } else {
            Some(base)
        }
    }
}

/// Callback type for poll operations.
pub type PollCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), ()>> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Signals {
    app_state: AppState,
    battery: BatteryInfo,
}

/// Manages background polling for configuration updates.
pub struct PollingManager {
    config: PollingConfig,
    signals: Arc<Mutex<Signals>>,
    is_running: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    poll_now_tx: Mutex<Option<mpsc::Sender<()>>>,
    reschedule_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl PollingManager {
    pub fn new(config: PollingConfig, app_state: AppState, battery: BatteryInfo) -> Self {
        Self {
            config,
            signals: Arc::new(Mutex::new(Signals { app_state, battery })),
            is_running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Mutex::new(None),
            poll_now_tx: Mutex::new(None),
            reschedule_tx: Mutex::new(None),
        }
    }

    /// Start the polling loop with the given callback.
    pub fn start(&self, on_poll: PollCallback) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (poll_now_tx, mut poll_now_rx) = mpsc::channel::<()>(10);
        let (reschedule_tx, mut reschedule_rx) = mpsc::channel::<()>(10);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.poll_now_tx.lock() = Some(poll_now_tx);
        *self.reschedule_tx.lock() = Some(reschedule_tx);

        let config = self.config.clone();
        let signals = Arc::clone(&self.signals);
        let is_running = Arc::clone(&self.is_running);

        tokio::spawn(async move {
            loop {
                let current = *signals.lock();
                let next = config
                    .interval_for(current.app_state, current.battery)
                    .map(|interval| Self::with_jitter(&config, interval));

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Polling manager shutting down");
                        break;
                    }
                    _ = poll_now_rx.recv() => {
                        tracing::debug!("Immediate poll requested");
                        let _ = on_poll().await;
                    }
                    _ = reschedule_rx.recv() => {
                        tracing::debug!("Polling cadence changed, rescheduling");
                    }
                    _ = Self::sleep_or_park(next) => {
                        if !is_running.load(Ordering::SeqCst) {
                            break;
                        }
                        let _ = on_poll().await;
                    }
                }
            }

            is_running.store(false, Ordering::SeqCst);
        });

        tracing::debug!(
            "Polling manager started with foreground interval {:?}",
            self.config.foreground_interval
        );
    }

    async fn sleep_or_park(delay: Option<Duration>) {
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending::<()>().await,
        }
    }

    fn with_jitter(config: &PollingConfig, interval: Duration) -> Duration {
        let jitter = (rand::random::<f64>() * config.jitter_ms as f64) as u64;
        interval + Duration::from_millis(jitter)
    }

    pub fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.try_send(());
        }
        self.poll_now_tx.lock().take();
        self.reschedule_tx.lock().take();

        tracing::debug!("Polling manager stopped");
    }

    /// Trigger an immediate poll.
    pub fn poll_now(&self) {
        if let Some(tx) = self.poll_now_tx.lock().as_ref() {
            let _ = tx.try_send(());
        }
    }

    pub fn set_app_state(&self, app_state: AppState) {
        self.signals.lock().app_state = app_state;
        self.reschedule();
    }

    pub fn set_battery(&self, battery: BatteryInfo) {
        self.signals.lock().battery = battery;
        self.reschedule();
    }

    /// Interval that applies right now, `None` if polling is paused.
    pub fn current_interval(&self) -> Option<Duration> {
        let current = *self.signals.lock();
        self.config.interval_for(current.app_state, current.battery)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn reschedule(&self) {
        if let Some(tx) = self.reschedule_tx.lock().as_ref() {
            let _ = tx.try_send(());
        }
    }
}

impl Drop for PollingManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn config() -> PollingConfig {
        PollingConfig {
            foreground_interval: Duration::from_secs(300),
            background_interval: Duration::from_secs(3600),
            disable_background_polling: false,
            reduced_interval: Duration::from_secs(7200),
            use_reduced_when_battery_low: true,
            jitter_ms: 0,
        }
    }

    fn low_battery(is_charging: bool) -> BatteryInfo {
        BatteryInfo {
            level: 0.1,
            is_low: true,
            is_charging,
        }
    }

    #[test]
    fn test_cadence_by_signals() {
        let config = config();
        let battery = BatteryInfo::default();

        assert_eq!(
            config.interval_for(AppState::Foreground, battery),
            Some(Duration::from_secs(300))
        );
        assert_eq!(
            config.interval_for(AppState::Background, battery),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            config.interval_for(AppState::Foreground, low_battery(false)),
            Some(Duration::from_secs(7200))
        );
        assert_eq!(
            config.interval_for(AppState::Foreground, low_battery(true)),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_background_polling_can_be_disabled() {
        let config = PollingConfig {
            disable_background_polling: true,
            ..config()
        };
        assert_eq!(config.interval_for(AppState::Background, BatteryInfo::default()), None);
    }

    #[test]
    fn test_signal_updates_change_current_interval() {
        let manager = PollingManager::new(config(), AppState::Foreground, BatteryInfo::default());
        assert_eq!(manager.current_interval(), Some(Duration::from_secs(300)));

        manager.set_app_state(AppState::Background);
        assert_eq!(manager.current_interval(), Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let config = PollingConfig {
            foreground_interval: Duration::from_millis(50),
            ..config()
        };
        let manager = PollingManager::new(config, AppState::Foreground, BatteryInfo::default());

        let poll_count = Arc::new(AtomicU32::new(0));
        let poll_count_clone = Arc::clone(&poll_count);

        let callback: PollCallback = Arc::new(move || {
            let count = Arc::clone(&poll_count_clone);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        manager.start(callback);
        assert!(manager.is_running());

        tokio::time::sleep(Duration::from_millis(180)).await;

        manager.stop();
        assert!(!manager.is_running());
        assert!(poll_count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_poll_now() {
        let manager = PollingManager::new(config(), AppState::Foreground, BatteryInfo::default());

        let poll_count = Arc::new(AtomicU32::new(0));
        let poll_count_clone = Arc::clone(&poll_count);

        let callback: PollCallback = Arc::new(move || {
            let count = Arc::clone(&poll_count_clone);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        manager.start(callback);
        manager.poll_now();
        tokio::time::sleep(Duration::from_millis(50)).await;

        manager.stop();
        assert!(poll_count.load(Ordering::SeqCst) >= 1);
    }
}
