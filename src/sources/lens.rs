//! Lens.org patent search API source implementation.

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::sources::{PatentSource, ScrollCursor, ScrollRequest, SearchPage, SearchRequest, SourceError};
use crate::utils::HttpClient;

/// Patent search endpoint of the Lens.org scholarly API
pub const DEFAULT_ENDPOINT: &str = "https://api.lens.org/patent/search";

/// Bearer token for the search API.
///
/// `Debug` is redacted so the token never ends up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiToken(***)")
    }
}

/// Lens.org patent search source
///
/// Uses `POST /patent/search` for both the initial query and scroll continuation.
#[derive(Debug, Clone)]
pub struct LensSource {
    http: HttpClient,
    endpoint: Url,
    token: ApiToken,
}

impl LensSource {
    /// Create a source against the public endpoint with the default timeout
    pub fn new(token: ApiToken) -> Result<Self, SourceError> {
        Self::with_endpoint(token, DEFAULT_ENDPOINT, crate::utils::DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a source against a custom endpoint (used for proxies and tests)
    pub fn with_endpoint(
        token: ApiToken,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| SourceError::InvalidConfig(format!("Invalid endpoint {:?}: {}", endpoint, e)))?;

        Ok(Self {
            http: HttpClient::with_timeout(timeout)?,
            endpoint,
            token,
        })
    }

    /// POST a JSON body and classify the response.
    ///
    /// `Ok(None)` is returned for HTTP 204.
    async fn post<B: Serialize + ?Sized>(&self, body: &B) -> Result<Option<SearchPage>, SourceError> {
        let response = self
            .http
            .client()
            .post(self.endpoint.clone())
            .bearer_auth(self.token.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| SourceError::Transport(format!("Request to Lens failed: {}", e)))?;

        Self::parse_response(response).await
    }

    async fn parse_response(response: Response) -> Result<Option<SearchPage>, SourceError> {
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SourceError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut message = error_message(&body);
            if message.is_empty() {
                message = status.canonical_reason().unwrap_or("no details").to_string();
            }
            return Err(SourceError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Transport(format!("Failed to read response body: {}", e)))?;
        let page: SearchPage = serde_json::from_slice(&bytes)?;

        Ok(Some(page))
    }
}

/// Best-effort message extraction from an error body: the JSON `message` field
/// when present, otherwise the body itself.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("message") {
            Some(Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => body.trim().to_string(),
        },
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl PatentSource for LensSource {
    fn name(&self) -> &str {
        "Lens.org"
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, SourceError> {
        tracing::debug!(
            size = request.size,
            scroll = request.scroll.as_deref().unwrap_or("-"),
            "Lens search request"
        );
        Ok(self.post(request).await?.unwrap_or_default())
    }

    async fn scroll(
        &self,
        cursor: &ScrollCursor,
        keep_alive: &str,
    ) -> Result<Option<SearchPage>, SourceError> {
        tracing::debug!("Lens scroll request");
        self.post(&ScrollRequest {
            scroll_id: cursor.as_str(),
            scroll: keep_alive,
        })
        .await
    }
}
