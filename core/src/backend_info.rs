use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::PilotErr;
use crate::error::Result;

/// Default idle window before a silent stream is treated as disconnected.
const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_REQUEST_MAX_RETRIES: u64 = 4;
const DEFAULT_PAGE_SIZE: usize = 50;

/// Description of the chat backend this client talks to. Deserialized
/// from the host application's config; everything is optional with
/// conservative defaults so a bare `base_url` entry works.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BackendInfo {
    /// Base URL, e.g. `https://api.example.com/v1/chat`.
    pub base_url: Option<String>,
    /// Bearer token attached to every request. Acquisition is the host's
    /// concern.
    pub auth_token: Option<String>,
    /// Extra static headers.
    pub http_headers: Option<HashMap<String, String>>,
    /// Retry budget for the *initial* streaming request. Mid-stream
    /// reconnect policy belongs to the caller.
    pub request_max_retries: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
    /// History page size for backward pagination.
    pub page_size: Option<usize>,
}

impl BackendInfo {
    pub fn base_url(&self) -> Result<&str> {
        self.base_url
            .as_deref()
            .ok_or_else(|| PilotErr::Stream("backend base_url is not configured".to_string()))
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(
            self.stream_idle_timeout_ms
                .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_MS),
        )
    }

    pub fn request_max_retries(&self) -> u64 {
        self.request_max_retries
            .unwrap_or(DEFAULT_REQUEST_MAX_RETRIES)
    }

    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn apply_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = self.auth_token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(headers) = &self.http_headers {
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
        }
        builder
    }
}
