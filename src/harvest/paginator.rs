//! Scroll-cursor pagination over a [`PatentSource`].

use async_stream::try_stream;
use futures_util::stream::Stream;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info};

use super::{HarvestError, HarvestSettings};
use crate::models::{FlatRow, RawRecord, SearchQuery, INCLUDE_FIELDS};
use crate::sources::{PatentSource, ScrollCursor, SearchPage, SearchRequest, SourceError};
use crate::utils::{with_cancellable_backoff, CancelFlag};

/// Where a paginator is in its run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginatorState {
    /// No request issued yet
    Opening,
    /// A cursor is open; the next request advances it
    Streaming(ScrollCursor),
    /// The server has no more results
    Exhausted,
    /// The record ceiling was reached with results remaining
    Capped,
    /// A request failed or the run was cancelled
    Failed,
}

impl PaginatorState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaginatorState::Opening | PaginatorState::Streaming(_))
    }
}

/// Records from one successful page
#[derive(Debug, Clone)]
pub struct PageBatch {
    /// 1-based page number within the run
    pub page: u64,
    /// Server-reported total for the query
    pub total_hits: u64,
    pub records: Vec<RawRecord>,
}

/// Drives the scroll protocol one page at a time.
///
/// The cursor lives inside [`PaginatorState::Streaming`] and is moved out for
/// each request, so a failed request leaves the paginator in
/// [`PaginatorState::Failed`] with no cursor to reuse.
#[derive(Debug)]
pub struct ScrollPaginator {
    source: Arc<dyn PatentSource>,
    settings: HarvestSettings,
    request: SearchRequest,
    cancel: CancelFlag,
    state: PaginatorState,
    total_hits: u64,
    delivered: u64,
    pages: u64,
    rate_limited: u64,
}

impl ScrollPaginator {
    pub fn new(
        source: Arc<dyn PatentSource>,
        query: SearchQuery,
        settings: HarvestSettings,
        cancel: CancelFlag,
    ) -> Self {
        let request = SearchRequest::new(query, settings.page_size)
            .include(INCLUDE_FIELDS.iter().copied())
            .scroll(settings.keep_alive.clone());

        Self {
            source,
            settings,
            request,
            cancel,
            state: PaginatorState::Opening,
            total_hits: 0,
            delivered: 0,
            pages: 0,
            rate_limited: 0,
        }
    }

    pub fn state(&self) -> &PaginatorState {
        &self.state
    }

    /// Server-reported total; 0 until the first page arrives
    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    /// Records handed out so far
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Rate-limited responses absorbed so far
    pub fn rate_limited(&self) -> u64 {
        self.rate_limited
    }

    /// Fetch the next batch.
    ///
    /// Returns `Ok(None)` once a terminal state is reached. Rate limiting is
    /// retried inside this call; any other failure moves the paginator to
    /// [`PaginatorState::Failed`] and is returned.
    pub async fn next_batch(&mut self) -> Result<Option<PageBatch>, HarvestError> {
        match std::mem::replace(&mut self.state, PaginatorState::Failed) {
            PaginatorState::Opening => {
                let source = &self.source;
                let request = &self.request;
                let retried = with_cancellable_backoff(&self.settings.rate_limit, &self.cancel, || {
                    source.search(request)
                })
                .await
                .map_err(|e| self.cancelled_or(e))?;
                self.rate_limited += u64::from(retried.rate_limited);

                let page = retried.value;
                self.total_hits = page.total;
                info!(
                    "Opened scroll on {}: {} total hits",
                    self.source.name(),
                    page.total
                );
                Ok(self.accept(page))
            }
            PaginatorState::Streaming(cursor) => {
                if self.cancel.is_cancelled() {
                    info!("Retrieval cancelled after {} records", self.delivered);
                    return Err(HarvestError::Cancelled {
                        records_processed: self.delivered,
                    });
                }

                if !self.settings.page_delay.is_zero() {
                    sleep(self.settings.page_delay).await;
                }

                let source = &self.source;
                let keep_alive = self.settings.keep_alive.as_str();
                let retried = with_cancellable_backoff(&self.settings.rate_limit, &self.cancel, || {
                    source.scroll(&cursor, keep_alive)
                })
                .await
                .map_err(|e| self.cancelled_or(e))?;
                self.rate_limited += u64::from(retried.rate_limited);

                match retried.value {
                    Some(page) => Ok(self.accept(page)),
                    None => {
                        info!("Cursor exhausted after {} records", self.delivered);
                        self.state = PaginatorState::Exhausted;
                        Ok(None)
                    }
                }
            }
            terminal => {
                self.state = terminal;
                Ok(None)
            }
        }
    }

    fn cancelled_or(&self, error: SourceError) -> HarvestError {
        match error {
            SourceError::Cancelled => HarvestError::Cancelled {
                records_processed: self.delivered,
            },
            other => HarvestError::Source(other),
        }
    }

    /// Take a successful page and decide the next state
    fn accept(&mut self, page: SearchPage) -> Option<PageBatch> {
        let SearchPage {
            scroll_id,
            data: mut records,
            ..
        } = page;

        let ceiling = self.settings.record_ceiling;
        let remaining = ceiling.saturating_sub(self.delivered);

        if records.is_empty() || remaining == 0 {
            self.state = if records.is_empty() {
                PaginatorState::Exhausted
            } else {
                PaginatorState::Capped
            };
            debug!("No further records accepted ({:?})", self.state);
            return None;
        }

        if records.len() as u64 > remaining {
            records.truncate(remaining as usize);
        }

        self.pages += 1;
        self.delivered += records.len() as u64;

        self.state = if self.total_hits > 0 && self.delivered >= self.total_hits {
            PaginatorState::Exhausted
        } else if self.delivered >= ceiling {
            info!(
                "Record ceiling of {} reached ({} hits on server)",
                ceiling, self.total_hits
            );
            PaginatorState::Capped
        } else {
            match scroll_id {
                Some(cursor) => PaginatorState::Streaming(cursor),
                None => PaginatorState::Exhausted,
            }
        };

        debug!(
            page = self.pages,
            records = records.len(),
            delivered = self.delivered,
            "Accepted page"
        );

        Some(PageBatch {
            page: self.pages,
            total_hits: self.total_hits,
            records,
        })
    }

    /// Turn the paginator into a stream of flattened row batches, one per page
    pub fn into_row_stream(mut self) -> impl Stream<Item = Result<Vec<FlatRow>, HarvestError>> {
        try_stream! {
            while let Some(batch) = self.next_batch().await? {
                let include_raw = self.settings.include_raw_json;
                let rows: Vec<FlatRow> = batch
                    .records
                    .iter()
                    .map(|record| super::flatten(record, include_raw))
                    .collect();
                yield rows;
            }
        }
    }
}
