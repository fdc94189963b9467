//! CustomFit Rust SDK
//!
//! Client-side core of the CustomFit feature-flag and analytics SDK: keeps
//! the remote configuration in sync, delivers events and experience
//! summaries reliably, and tracks sessions and connectivity.
//!
//! # Quick Start
//!
//! ```no_run
//! use customfit::{CFConfig, CFUser, CustomFit};
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> customfit::Result<()> {
//!     let config = CFConfig::builder("your-client-key").build();
//!     let client = CustomFit::init(config, CFUser::new("user-123"))?;
//!
//!     client.await_first_sync().await?;
//!
//!     let dark_mode = client.get_boolean("dark_mode", false);
//!     let theme = client.get_string("theme", "light");
//!     println!("dark_mode={} theme={}", dark_mode, theme);
//!
//!     client.track_event("app_opened", HashMap::new())?;
//!     client.shutdown().await
//! }
//! ```

pub mod core;
pub mod error;
pub mod http;
pub mod listeners;
pub mod platform;
pub mod storage;
pub mod types;
pub mod utils;
mod client;

pub use client::{CFClient, Collaborators};

pub use error::{CFError, ErrorCode, ErrorKind, Result};

pub use types::{
    CFUser, ConfigSnapshot, EventRecord, ExperienceInfo, FlagEntry, FlagType, FlagValue,
    SummaryRecord,
};

pub use core::{
    CFConfig, CFConfigBuilder, ConnectionInfo, ConnectionStatus, RotationReason, Session,
    UpdateResult,
};

pub use http::{CircuitBreakerConfig, CircuitState, RetryPolicy};

pub use listeners::ListenerId;

pub use platform::{AppState, BatteryInfo, NetworkType};

pub use storage::{FileStorage, InMemoryStorage, Storage};

pub use utils::SDK_VERSION;

use once_cell::sync::OnceCell;
use std::sync::Arc;

static INSTANCE: OnceCell<Arc<CFClient>> = OnceCell::new();

/// Process-wide entry point holding the single shared client.
pub struct CustomFit;

impl CustomFit {
    /// Creates the shared client with default collaborators.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a client already exists or the config is invalid.
    pub fn init(config: CFConfig, user: CFUser) -> Result<&'static Arc<CFClient>> {
        Self::init_with(config, user, Collaborators::default())
    }

    pub fn init_with(
        config: CFConfig,
        user: CFUser,
        collaborators: Collaborators,
    ) -> Result<&'static Arc<CFClient>> {
        if INSTANCE.get().is_some() {
            return Err(CFError::already_initialized());
        }

        let client = Arc::new(CFClient::with_collaborators(config, user, collaborators)?);
        INSTANCE
            .set(client)
            .map_err(|_| CFError::already_initialized())?;

        Self::get_instance()
    }

    /// Returns the shared client.
    ///
    /// # Errors
    ///
    /// Returns `SdkNotInitialized` before [`CustomFit::init`] succeeded.
    pub fn get_instance() -> Result<&'static Arc<CFClient>> {
        INSTANCE.get().ok_or_else(CFError::not_initialized)
    }

    pub fn try_instance() -> Option<&'static Arc<CFClient>> {
        INSTANCE.get()
    }

    pub fn is_initialized() -> bool {
        INSTANCE.get().is_some()
    }
}
