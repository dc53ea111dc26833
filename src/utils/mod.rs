//! Utility modules supporting retrieval runs.
//!
//! - [`HttpClient`]: shared HTTP client with timeouts
//! - [`RateLimitPolicy`] / [`with_rate_limit_backoff`] / [`with_cancellable_backoff`]:
//!   repeat a request while the server answers HTTP 429
//! - [`ProgressTracker`], [`RetrievalProgress`], [`ProgressObserver`]: per-page
//!   progress reporting
//! - [`CancelFlag`]: cooperative cancellation checked between pages and during backoff
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use patent_harvest::sources::{LensSource, ApiToken, PatentSource, ScrollCursor};
//! use patent_harvest::utils::{with_rate_limit_backoff, RateLimitPolicy};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = LensSource::new(ApiToken::new("token"))?;
//! let cursor = ScrollCursor::new("abc");
//! let page = with_rate_limit_backoff(&RateLimitPolicy::default(), || {
//!     source.scroll(&cursor, "1m")
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

mod http;
mod progress;
mod retry;

pub use http::{HttpClient, DEFAULT_REQUEST_TIMEOUT};
pub use progress::{CancelFlag, NoProgress, ProgressObserver, ProgressTracker, RetrievalProgress};
pub use retry::{with_cancellable_backoff, with_rate_limit_backoff, RateLimitPolicy, Retried};
