use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, ETAG, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::core::CFConfig;
use crate::error::{CFError, ErrorCode, Result};
use crate::types::{CFUser, EventRecord, SummaryRecord};
use crate::utils::SDK_VERSION;

/// Validators returned by the metadata probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMetadata {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Account-level switches read from the SDK settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkSettings {
    #[serde(default = "default_account_enabled")]
    pub cf_account_enabled: bool,
    #[serde(default)]
    pub cf_skip_sdk: bool,
}

fn default_account_enabled() -> bool {
    true
}

impl Default for SdkSettings {
    fn default() -> Self {
        Self {
            cf_account_enabled: true,
            cf_skip_sdk: false,
        }
    }
}

impl SdkSettings {
    /// Whether user configs may be fetched for this account.
    pub fn allows_config_fetch(&self) -> bool {
        self.cf_account_enabled && !self.cf_skip_sdk
    }
}

/// Event delivery body. `session_id` is the session current at send time;
/// each record still carries the session it was tracked in.
#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    pub user: CFUser,
    pub session_id: String,
    pub events: Vec<EventRecord>,
    pub cf_client_sdk_version: String,
}

impl EventPayload {
    pub fn new(user: CFUser, session_id: impl Into<String>, events: Vec<EventRecord>) -> Self {
        Self {
            user,
            session_id: session_id.into(),
            events,
            cf_client_sdk_version: SDK_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryPayload {
    pub user: CFUser,
    pub session_id: String,
    pub summaries: Vec<SummaryRecord>,
    pub cf_client_sdk_version: String,
}

impl SummaryPayload {
    pub fn new(user: CFUser, session_id: impl Into<String>, summaries: Vec<SummaryRecord>) -> Self {
        Self {
            user,
            session_id: session_id.into(),
            summaries,
            cf_client_sdk_version: SDK_VERSION.to_string(),
        }
    }
}

#[derive(Serialize)]
struct UserConfigsRequest<'a> {
    user: &'a CFUser,
    include_only_features_flags: bool,
}

/// Every network call the client makes.
///
/// [`HttpClient`] is the production implementation; tests substitute fakes.
/// Implementations perform a single attempt. Retries and circuit breaking
/// are layered on top by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Cheap probe of the settings document returning only its validators.
    async fn fetch_metadata(&self) -> Result<ConfigMetadata>;

    async fn fetch_sdk_settings(&self) -> Result<SdkSettings>;

    /// Raw user-configs response body.
    async fn fetch_user_configs(&self, user: &CFUser) -> Result<serde_json::Value>;

    async fn send_events(&self, payload: &EventPayload) -> Result<()>;

    async fn send_summaries(&self, payload: &SummaryPayload) -> Result<()>;
}

pub struct HttpClient {
    client: Client,
    client_key: String,
    api_base_url: String,
    settings_url: String,
}

impl HttpClient {
    pub fn new(config: &CFConfig) -> Result<Self> {
        let dimension_id = config.dimension_id().ok_or_else(|| {
            CFError::config_error(
                ErrorCode::ConfigInvalidClientKey,
                "Client key does not carry a dimension_id",
            )
        })?;

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.connect_timeout + config.read_timeout)
            .user_agent(format!("CustomFit-Rust/{}", SDK_VERSION))
            .build()
            .map_err(|e| {
                CFError::with_source(ErrorCode::NetworkError, "Failed to create HTTP client", e)
            })?;

        Ok(Self {
            client,
            client_key: config.client_key.clone(),
            api_base_url: config.api_base_url.clone(),
            settings_url: settings_url(&config.settings_base_url, &dimension_id),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}?cfenc={}", self.api_base_url, path, self.client_key)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(convert_error)?;

        ensure_success(response).await
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let body = response.text().await.map_err(|e| {
            CFError::with_source(ErrorCode::HttpInvalidResponse, "Failed to read response", e)
        })?;

        serde_json::from_str(&body).map_err(|e| {
            CFError::with_source(
                ErrorCode::HttpInvalidResponse,
                format!("Failed to parse response: {}", e),
                e,
            )
        })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn fetch_metadata(&self) -> Result<ConfigMetadata> {
        let response = self
            .client
            .head(&self.settings_url)
            .send()
            .await
            .map_err(convert_error)?;
        let response = ensure_success(response).await?;

        let headers = response.headers();
        Ok(ConfigMetadata {
            etag: header_value(headers, ETAG),
            last_modified: header_value(headers, LAST_MODIFIED),
        })
    }

    async fn fetch_sdk_settings(&self) -> Result<SdkSettings> {
        let response = self
            .client
            .get(&self.settings_url)
            .send()
            .await
            .map_err(convert_error)?;
        let response = ensure_success(response).await?;
        Self::read_json(response).await
    }

    async fn fetch_user_configs(&self, user: &CFUser) -> Result<serde_json::Value> {
        let body = UserConfigsRequest {
            user,
            include_only_features_flags: true,
        };
        let response = self.post_json(&self.api_url("/v1/users/configs"), &body).await?;
        Self::read_json(response).await
    }

    async fn send_events(&self, payload: &EventPayload) -> Result<()> {
        self.post_json(&self.api_url("/v1/cfe"), payload).await?;
        tracing::debug!("Delivered {} events", payload.events.len());
        Ok(())
    }

    async fn send_summaries(&self, payload: &SummaryPayload) -> Result<()> {
        self.post_json(&self.api_url("/v1/config/request/summary"), payload)
            .await?;
        tracing::debug!("Delivered {} summaries", payload.summaries.len());
        Ok(())
    }
}

pub(crate) fn settings_url(settings_base_url: &str, dimension_id: &str) -> String {
    format!(
        "{}/{}/cf-sdk-settings.json",
        settings_base_url.trim_end_matches('/'),
        dimension_id
    )
}

fn header_value(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(status_to_error(status, &body))
    }
}

pub(crate) fn status_to_error(status: StatusCode, body: &str) -> CFError {
    let (code, category) = match status {
        StatusCode::BAD_REQUEST => (ErrorCode::HttpBadRequest, "Client Error"),
        StatusCode::UNAUTHORIZED => (ErrorCode::HttpUnauthorized, "Authentication Error"),
        StatusCode::FORBIDDEN => (ErrorCode::HttpForbidden, "Authorization Error"),
        StatusCode::NOT_FOUND => (ErrorCode::HttpNotFound, "Not Found"),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            (ErrorCode::NetworkTimeout, "Timeout")
        }
        StatusCode::TOO_MANY_REQUESTS => (ErrorCode::HttpRateLimited, "Rate Limited"),
        s if s.is_server_error() => (ErrorCode::HttpServerError, "Server Error"),
        s if s.is_client_error() => (ErrorCode::HttpBadRequest, "Client Error"),
        _ => (ErrorCode::HttpInvalidResponse, "Unexpected Status"),
    };

    CFError::network(code, format!("{}: {} - {}", category, status.as_u16(), body))
}

fn convert_error(error: reqwest::Error) -> CFError {
    if error.is_timeout() {
        CFError::with_source(ErrorCode::NetworkTimeout, "Request timed out", error)
    } else if error.is_connect() {
        CFError::with_source(ErrorCode::NetworkError, "Connection failed", error)
    } else {
        let message = error.to_string();
        CFError::with_source(ErrorCode::NetworkError, message, error)
    }
}
