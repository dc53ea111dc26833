//! Remote patent search backends.
//!
//! This module defines the [`PatentSource`] trait that the retrieval pipeline talks
//! to. [`LensSource`] implements it over HTTP against the Lens.org patent search
//! API; [`MockSource`] replays scripted responses so the pagination state machine
//! can be exercised without a live endpoint.
//!
//! # Protocol
//!
//! - A search request carries a query, a page size, an optional field inclusion
//!   list and an optional scroll keep-alive. With a keep-alive the response carries
//!   a `scroll_id` that opens a server-side cursor.
//! - A scroll request carries only the cursor and the keep-alive. HTTP 204 means
//!   the cursor is exhausted.
//! - HTTP 429 means the caller must back off and repeat the same request.

mod lens;
pub mod mock;

pub use lens::{ApiToken, LensSource, DEFAULT_ENDPOINT};
pub use mock::{MockCall, MockResponse, MockSource};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{RawRecord, SearchQuery};

/// The PatentSource trait is the seam between the pipeline and a search backend.
#[async_trait]
pub trait PatentSource: Send + Sync + std::fmt::Debug {
    /// Human-readable name of this source
    fn name(&self) -> &str;

    /// Run a search; opens a cursor when `request.scroll` is set
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, SourceError>;

    /// Advance an open cursor. `Ok(None)` means the cursor is exhausted.
    async fn scroll(
        &self,
        cursor: &ScrollCursor,
        keep_alive: &str,
    ) -> Result<Option<SearchPage>, SourceError>;
}

/// Body of a search request
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: SearchQuery,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll: Option<String>,
}

impl SearchRequest {
    /// Plain search returning at most `size` records
    pub fn new(query: SearchQuery, size: usize) -> Self {
        Self {
            query,
            size,
            include: None,
            scroll: None,
        }
    }

    /// Size-zero request used to read the total hit count
    pub fn count(query: SearchQuery) -> Self {
        Self::new(query, 0)
    }

    /// Restrict the returned top-level fields
    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Open a scroll cursor that stays valid for `keep_alive` (e.g. "1m")
    pub fn scroll(mut self, keep_alive: impl Into<String>) -> Self {
        self.scroll = Some(keep_alive.into());
        self
    }
}

/// Body of a scroll continuation request
#[derive(Debug, Clone, Serialize)]
pub struct ScrollRequest<'a> {
    pub scroll_id: &'a str,
    pub scroll: &'a str,
}

/// Opaque server-issued cursor token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScrollCursor(String);

impl ScrollCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of search results
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    /// Total hits reported by the server for the whole query
    #[serde(default)]
    pub total: u64,

    /// Cursor for the next page, when the server issued one
    #[serde(default)]
    pub scroll_id: Option<ScrollCursor>,

    #[serde(default)]
    pub data: Vec<RawRecord>,
}

/// Errors that can occur when talking to a source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The server answered with a non-success status
    #[error("API error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Network, timeout or undecodable response
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP 429; the same request may be repeated after a delay
    #[error("Rate limited by the server")]
    RateLimited { retry_after: Option<Duration> },

    /// Rate limiting persisted past the configured retry bound
    #[error("Still rate limited after {attempts} attempts ({waited:?} spent waiting)")]
    RateLimitExhausted { attempts: u32, waited: Duration },

    /// The source could not be configured
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cancellation was requested while waiting out rate limiting
    #[error("Cancelled while rate limited")]
    Cancelled,
}

impl SourceError {
    /// HTTP status carried by a remote error
    pub fn status(&self) -> Option<u16> {
        match self {
            SourceError::Remote { status, .. } => Some(*status),
            SourceError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Transport(format!("Malformed JSON response: {}", err))
    }
}
