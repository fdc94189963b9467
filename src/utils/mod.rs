//! Small helpers shared by the client.

pub mod jwt;

pub use jwt::dimension_id_from_client_key;

/// Version reported to the server as `cf_client_sdk_version`.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
