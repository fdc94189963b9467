//! Platform collaborator interfaces.
//!
//! The core never talks to device sensors directly. Hosts hand in these
//! signals (or push changes through `CFClient`), and tests substitute fakes.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::time::Duration;

/// Kind of network currently available to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    None,
    Wifi,
    Cellular,
    Other,
}

impl NetworkType {
    pub fn is_available(&self) -> bool {
        !matches!(self, NetworkType::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryInfo {
    /// Charge level between 0.0 and 1.0.
    pub level: f32,
    pub is_low: bool,
    pub is_charging: bool,
}

impl Default for BatteryInfo {
    fn default() -> Self {
        Self {
            level: 1.0,
            is_low: false,
            is_charging: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
}

pub trait ConnectivitySignal: Send + Sync {
    fn current(&self) -> NetworkType;
}

pub trait BatteryState: Send + Sync {
    fn current(&self) -> BatteryInfo;
}

pub trait AppLifecycle: Send + Sync {
    fn current(&self) -> AppState;
}

/// Source of wall-clock time for every time-based decision in the core.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += to_chrono(by);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Signals with fixed values, used when the host provides none.
#[derive(Debug, Clone, Copy)]
pub struct StaticSignals {
    pub network: NetworkType,
    pub battery: BatteryInfo,
    pub app_state: AppState,
}

impl Default for StaticSignals {
    fn default() -> Self {
        Self {
            network: NetworkType::Other,
            battery: BatteryInfo::default(),
            app_state: AppState::Foreground,
        }
    }
}

impl ConnectivitySignal for StaticSignals {
    fn current(&self) -> NetworkType {
        self.network
    }
}

impl BatteryState for StaticSignals {
    fn current(&self) -> BatteryInfo {
        self.battery
    }
}

impl AppLifecycle for StaticSignals {
    fn current(&self) -> AppState {
        self.app_state
    }
}

pub(crate) fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(36_500))
}

/// Time elapsed between two instants, zero if `later` is not after `earlier`.
pub(crate) fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}
