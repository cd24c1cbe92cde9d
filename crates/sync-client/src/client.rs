//! REST client for the progress service.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use questsync_core::errors::StoreError;
use questsync_core::progress::encoding::opt_int_string;
use questsync_core::progress::{AuthoritativeStore, Identity, LocationSeq, ProgressRecord};

use crate::error::{Result, SyncClientError};

/// Used when `QUESTSYNC_API_URL` is unset.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8088";

/// Overall request timeout. The coordinator applies its own, shorter,
/// per-attempt limit on top.
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const CONNECT_TIMEOUT_SECS: u64 = 5;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Base URL of the progress service from `QUESTSYNC_API_URL`.
pub fn api_base_url() -> String {
    normalize_base_url(std::env::var("QUESTSYNC_API_URL").ok())
}

fn normalize_base_url(value: Option<String>) -> String {
    value
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: String,
    message: String,
    #[serde(default, with = "opt_int_string")]
    location: Option<LocationSeq>,
    #[serde(default, with = "opt_int_string")]
    total: Option<u64>,
}

/// [`AuthoritativeStore`] backed by the progress REST API.
///
/// The identity travels as the bearer credential on every request.
#[derive(Debug, Clone)]
pub struct HttpProgressStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProgressStore {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Client pointed at [`api_base_url`].
    pub fn from_env() -> Result<Self> {
        Self::new(&api_base_url())
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    fn headers(&self, identity: &Identity) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", identity.as_str()))
            .map_err(|_| SyncClientError::auth("Identity is not a valid header value"))?;
        headers.insert(AUTHORIZATION, auth_value);
        Ok(headers)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) else {
                return Err(SyncClientError::api(
                    status.as_u16(),
                    "UNKNOWN",
                    format!("Request failed: {}", body),
                ));
            };
            if let (Some(location), Some(total)) = (error.location, error.total) {
                if error.code == "INVALID_LOCATION" {
                    return Err(SyncClientError::InvalidLocation { location, total });
                }
            }
            return Err(SyncClientError::api(
                status.as_u16(),
                error.code,
                error.message,
            ));
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// `GET /api/v1/progress`
    pub async fn get_progress(&self, identity: &Identity) -> Result<ProgressRecord> {
        let url = format!("{}/api/v1/progress", self.base_url);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .headers(self.headers(identity)?)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// `PUT /api/v1/progress/locations/{seq}`
    pub async fn put_location(
        &self,
        identity: &Identity,
        location: LocationSeq,
    ) -> Result<ProgressRecord> {
        let url = format!("{}/api/v1/progress/locations/{}", self.base_url, location);
        debug!("PUT {}", url);
        let response = self
            .client
            .put(&url)
            .headers(self.headers(identity)?)
            .send()
            .await?;
        Self::parse_response(response).await
    }
}

#[async_trait]
impl AuthoritativeStore for HttpProgressStore {
    async fn write(
        &self,
        identity: &Identity,
        location: LocationSeq,
    ) -> std::result::Result<ProgressRecord, StoreError> {
        Ok(self.put_location(identity, location).await?)
    }

    async fn read(&self, identity: &Identity) -> std::result::Result<ProgressRecord, StoreError> {
        Ok(self.get_progress(identity).await?)
    }
}
