//! Single-request queries: hit count and first-page preview.

use tracing::{debug, info};

use crate::models::{FlatRow, SearchQuery, INCLUDE_FIELDS};
use crate::sources::{PatentSource, SearchRequest, SourceError};
use crate::utils::{with_rate_limit_backoff, RateLimitPolicy};

/// First page of a query, flattened
#[derive(Debug, Clone)]
pub struct Preview {
    /// Server-reported total for the whole query
    pub total_hits: u64,
    pub rows: Vec<FlatRow>,
}

/// Ask the source how many records match `query` without fetching any.
pub async fn count_matches(
    source: &dyn PatentSource,
    query: &SearchQuery,
    policy: &RateLimitPolicy,
) -> Result<u64, SourceError> {
    let request = SearchRequest::count(query.clone());
    debug!("Counting matches on {}", source.name());

    let page = with_rate_limit_backoff(policy, || source.search(&request))
        .await?
        .value;

    info!("{} reports {} matching records", source.name(), page.total);
    Ok(page.total)
}

/// Fetch up to `size` records of the first page without opening a cursor.
pub async fn preview(
    source: &dyn PatentSource,
    query: &SearchQuery,
    size: usize,
    include_raw_json: bool,
    policy: &RateLimitPolicy,
) -> Result<Preview, SourceError> {
    let request = SearchRequest::new(query.clone(), size).include(INCLUDE_FIELDS.iter().copied());

    let page = with_rate_limit_backoff(policy, || source.search(&request))
        .await?
        .value;

    let rows = page
        .data
        .iter()
        .take(size)
        .map(|record| super::flatten(record, include_raw_json))
        .collect();

    Ok(Preview {
        total_hits: page.total,
        rows,
    })
}
