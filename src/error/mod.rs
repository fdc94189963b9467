use thiserror::Error;

pub mod sanitizer;

pub use sanitizer::sanitize_message;

/// Coarse error classification that drives retry and propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Validation,
    Permission,
    Serialization,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Permission => "permission",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Configuration errors
    ConfigMissingClientKey,
    ConfigInvalidClientKey,
    ConfigInvalidInterval,
    ConfigInvalidQueueSize,
    ConfigInvalidUrl,

    // Network errors
    NetworkError,
    NetworkTimeout,
    NetworkOffline,
    CircuitOpen,

    // HTTP errors
    HttpBadRequest,
    HttpUnauthorized,
    HttpForbidden,
    HttpNotFound,
    HttpRateLimited,
    HttpServerError,
    HttpInvalidResponse,

    // Account state
    AccountDisabled,

    // Serialization errors
    SerializationFailed,

    // Event pipeline errors
    EventInvalidName,
    SummaryInvalid,
    EventQueueFull,

    // Storage errors
    StorageReadError,
    StorageWriteError,

    // SDK lifecycle errors
    SdkNotInitialized,
    SdkAlreadyInitialized,
    SdkShutdown,
    FirstSyncTimeout,
    ShutdownTimeout,

    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingClientKey => "CONFIG_MISSING_CLIENT_KEY",
            ErrorCode::ConfigInvalidClientKey => "CONFIG_INVALID_CLIENT_KEY",
            ErrorCode::ConfigInvalidInterval => "CONFIG_INVALID_INTERVAL",
            ErrorCode::ConfigInvalidQueueSize => "CONFIG_INVALID_QUEUE_SIZE",
            ErrorCode::ConfigInvalidUrl => "CONFIG_INVALID_URL",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::NetworkOffline => "NETWORK_OFFLINE",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::HttpBadRequest => "HTTP_BAD_REQUEST",
            ErrorCode::HttpUnauthorized => "HTTP_UNAUTHORIZED",
            ErrorCode::HttpForbidden => "HTTP_FORBIDDEN",
            ErrorCode::HttpNotFound => "HTTP_NOT_FOUND",
            ErrorCode::HttpRateLimited => "HTTP_RATE_LIMITED",
            ErrorCode::HttpServerError => "HTTP_SERVER_ERROR",
            ErrorCode::HttpInvalidResponse => "HTTP_INVALID_RESPONSE",
            ErrorCode::AccountDisabled => "ACCOUNT_DISABLED",
            ErrorCode::SerializationFailed => "SERIALIZATION_FAILED",
            ErrorCode::EventInvalidName => "EVENT_INVALID_NAME",
            ErrorCode::SummaryInvalid => "SUMMARY_INVALID",
            ErrorCode::EventQueueFull => "EVENT_QUEUE_FULL",
            ErrorCode::StorageReadError => "STORAGE_READ_ERROR",
            ErrorCode::StorageWriteError => "STORAGE_WRITE_ERROR",
            ErrorCode::SdkNotInitialized => "SDK_NOT_INITIALIZED",
            ErrorCode::SdkAlreadyInitialized => "SDK_ALREADY_INITIALIZED",
            ErrorCode::SdkShutdown => "SDK_SHUTDOWN",
            ErrorCode::FirstSyncTimeout => "FIRST_SYNC_TIMEOUT",
            ErrorCode::ShutdownTimeout => "SHUTDOWN_TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::NetworkError
            | ErrorCode::NetworkOffline
            | ErrorCode::CircuitOpen
            | ErrorCode::HttpNotFound
            | ErrorCode::HttpRateLimited
            | ErrorCode::HttpServerError => ErrorKind::Network,

            ErrorCode::NetworkTimeout
            | ErrorCode::FirstSyncTimeout
            | ErrorCode::ShutdownTimeout => ErrorKind::Timeout,

            ErrorCode::ConfigMissingClientKey
            | ErrorCode::ConfigInvalidClientKey
            | ErrorCode::ConfigInvalidInterval
            | ErrorCode::ConfigInvalidQueueSize
            | ErrorCode::ConfigInvalidUrl
            | ErrorCode::HttpBadRequest
            | ErrorCode::EventInvalidName
            | ErrorCode::SummaryInvalid => ErrorKind::Validation,

            ErrorCode::HttpUnauthorized | ErrorCode::HttpForbidden | ErrorCode::AccountDisabled => {
                ErrorKind::Permission
            }

            ErrorCode::SerializationFailed | ErrorCode::HttpInvalidResponse => {
                ErrorKind::Serialization
            }

            ErrorCode::EventQueueFull
            | ErrorCode::StorageReadError
            | ErrorCode::StorageWriteError
            | ErrorCode::SdkNotInitialized
            | ErrorCode::SdkAlreadyInitialized
            | ErrorCode::SdkShutdown
            | ErrorCode::InternalError => ErrorKind::Internal,
        }
    }

    /// Whether a failed call with this code may be attempted again.
    ///
    /// Offline and circuit-open rejections never reached the network, so
    /// retrying them immediately would only spin.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::NetworkTimeout
                | ErrorCode::HttpServerError
                | ErrorCode::HttpRateLimited
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct CFError {
    pub code: ErrorCode,
    pub message: String,
    /// Set once a retry loop gave up; holds the number of attempts made.
    retries_exhausted: Option<u32>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CFError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retries_exhausted: None,
            source: None,
        }
    }

    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            retries_exhausted: None,
            source: Some(Box::new(source)),
        }
    }

    pub fn network(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn config_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn serialization(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::with_source(ErrorCode::SerializationFailed, message, source)
    }

    pub fn offline(operation: &str) -> Self {
        Self::new(
            ErrorCode::NetworkOffline,
            format!("{} skipped: client is in offline mode", operation),
        )
    }

    pub fn circuit_open(key: &str) -> Self {
        Self::new(
            ErrorCode::CircuitOpen,
            format!("Circuit breaker '{}' is open", key),
        )
    }

    pub fn not_initialized() -> Self {
        Self::new(
            ErrorCode::SdkNotInitialized,
            "SDK not initialized. Call CustomFit::init() first.",
        )
    }

    pub fn already_initialized() -> Self {
        Self::new(ErrorCode::SdkAlreadyInitialized, "SDK already initialized.")
    }

    /// Tag this error as the final failure of a retry loop.
    pub fn exhausted(mut self, attempts: u32) -> Self {
        self.retries_exhausted = Some(attempts);
        self
    }

    pub fn is_retries_exhausted(&self) -> bool {
        self.retries_exhausted.is_some()
    }

    pub fn attempts(&self) -> Option<u32> {
        self.retries_exhausted
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Timeout)
    }

    /// The message with client keys, emails and addresses redacted, for logs.
    pub fn sanitized_message(&self) -> String {
        sanitize_message(&self.message)
    }

    /// A source-less copy, used where an error must be both returned and recorded.
    pub fn duplicate(&self) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            retries_exhausted: self.retries_exhausted,
            source: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CFError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_contains_code() {
        let error = CFError::new(ErrorCode::NetworkTimeout, "Request timed out");
        assert_eq!(error.to_string(), "[NETWORK_TIMEOUT] Request timed out");
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ErrorCode::HttpServerError.kind(), ErrorKind::Network);
        assert_eq!(ErrorCode::NetworkTimeout.kind(), ErrorKind::Timeout);
        assert_eq!(ErrorCode::EventInvalidName.kind(), ErrorKind::Validation);
        assert_eq!(ErrorCode::HttpForbidden.kind(), ErrorKind::Permission);
        assert_eq!(ErrorCode::HttpInvalidResponse.kind(), ErrorKind::Serialization);
        assert_eq!(ErrorCode::EventQueueFull.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_offline_and_circuit_open_not_retryable() {
        assert!(!CFError::offline("config fetch").is_retryable());
        assert!(!CFError::circuit_open("config-fetch").is_retryable());
        assert!(CFError::offline("config fetch").is_network_error());
    }

    #[test]
    fn test_exhausted_tag_keeps_code() {
        let error = CFError::new(ErrorCode::HttpServerError, "503").exhausted(3);
        assert_eq!(error.code, ErrorCode::HttpServerError);
        assert!(error.is_retries_exhausted());
        assert_eq!(error.attempts(), Some(3));
    }

    #[test]
    fn test_duplicate_drops_source_only() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let error = CFError::with_source(ErrorCode::StorageWriteError, "write failed", io).exhausted(2);
        let copy = error.duplicate();
        assert_eq!(copy.code, ErrorCode::StorageWriteError);
        assert_eq!(copy.message, "write failed");
        assert!(copy.source.is_none());
        assert_eq!(copy.attempts(), Some(2));
    }

    #[test]
    fn test_sanitized_message_redacts_key() {
        let error = CFError::new(
            ErrorCode::HttpUnauthorized,
            "POST https://api.customfit.ai/v1/cfe?cfenc=abc.def.ghi failed",
        );
        assert!(!error.sanitized_message().contains("abc.def.ghi"));
    }
}
