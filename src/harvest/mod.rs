//! Bulk retrieval: count, preview and export of patent search results.
//!
//! [`Harvester`] ties a [`PatentSource`] to the scroll paginator and the CSV
//! sink. An export walks the cursor page by page, flattens every record and
//! appends it to a temporary file that is only made visible when the run ends
//! in [`StopReason::Exhausted`] or [`StopReason::Capped`]. Any failure, including
//! cancellation, deletes the partial file.

mod paginator;
mod probe;
mod sink;

pub use paginator::{PageBatch, PaginatorState, ScrollPaginator};
pub use probe::{count_matches, preview, Preview};
pub use sink::{RowSink, SinkError, UTF8_BOM};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::{FlatRow, RawRecord, SearchQuery};
use crate::sources::{PatentSource, SourceError};
use crate::utils::{CancelFlag, ProgressObserver, ProgressTracker, RateLimitPolicy};

/// Runtime tunables for a retrieval run
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSettings {
    /// Records requested per page
    pub page_size: usize,
    /// Cursor keep-alive sent with every request
    pub keep_alive: String,
    /// Pause before each scroll request
    pub page_delay: Duration,
    pub rate_limit: RateLimitPolicy,
    /// Maximum rows written per run
    pub record_ceiling: u64,
    /// Fill the `raw_json` column
    pub include_raw_json: bool,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            keep_alive: "1m".to_string(),
            page_delay: Duration::from_secs(1),
            rate_limit: RateLimitPolicy::default(),
            record_ceiling: 50_000,
            include_raw_json: true,
        }
    }
}

/// Errors that end a retrieval run
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Retrieval cancelled after {records_processed} records")]
    Cancelled { records_processed: u64 },
}

/// Why a successful run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every matching record was retrieved
    Exhausted,
    /// The record ceiling was hit with more results on the server
    Capped,
}

/// Summary of a completed export
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub path: PathBuf,
    pub total_hits: u64,
    pub records_written: u64,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
}

/// Result of an export that did not fail
#[derive(Debug, Clone)]
pub enum HarvestOutcome {
    /// The first page was empty; no file was produced
    NoResults { total_hits: u64 },
    Completed(HarvestReport),
}

/// Flatten one record, blanking `raw_json` when disabled
pub(crate) fn flatten(record: &RawRecord, include_raw_json: bool) -> FlatRow {
    let row = FlatRow::from_record(record);
    if include_raw_json {
        row
    } else {
        row.without_raw_json()
    }
}

/// Runs retrieval operations against one source
#[derive(Debug, Clone)]
pub struct Harvester {
    source: Arc<dyn PatentSource>,
    settings: HarvestSettings,
    cancel: CancelFlag,
}

impl Harvester {
    pub fn new(source: Arc<dyn PatentSource>, settings: HarvestSettings) -> Self {
        Self {
            source,
            settings,
            cancel: CancelFlag::new(),
        }
    }

    /// Share an externally controlled cancellation flag
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Number of records matching `query`
    pub async fn count(&self, query: &SearchQuery) -> Result<u64, SourceError> {
        count_matches(self.source.as_ref(), query, &self.settings.rate_limit).await
    }

    /// First `size` matching records, flattened
    pub async fn preview(&self, query: &SearchQuery, size: usize) -> Result<Preview, SourceError> {
        preview(
            self.source.as_ref(),
            query,
            size,
            self.settings.include_raw_json,
            &self.settings.rate_limit,
        )
        .await
    }

    /// A paginator over `query` for callers that consume pages themselves
    pub fn paginate(&self, query: SearchQuery) -> ScrollPaginator {
        ScrollPaginator::new(
            self.source.clone(),
            query,
            self.settings.clone(),
            self.cancel.clone(),
        )
    }

    /// Retrieve every record matching `query` (up to the ceiling) into a CSV file.
    ///
    /// With a destination the file is written next to it and renamed into place
    /// on success; without one the finished file is left in the temp directory.
    /// `progress` is called once per written page.
    pub async fn export(
        &self,
        query: SearchQuery,
        destination: Option<&Path>,
        progress: &mut dyn ProgressObserver,
    ) -> Result<HarvestOutcome, HarvestError> {
        let mut paginator = self.paginate(query);
        let mut tracker = ProgressTracker::start();
        let mut sink: Option<RowSink> = None;

        let result = self
            .drain(&mut paginator, &mut tracker, &mut sink, destination, progress)
            .await;

        if let Err(err) = result {
            warn!("Retrieval failed after {} records: {}", tracker.records_processed(), err);
            if let Some(sink) = sink {
                sink.discard();
            }
            return Err(err);
        }

        let Some(sink) = sink else {
            info!("Query matched no records");
            return Ok(HarvestOutcome::NoResults {
                total_hits: paginator.total_hits(),
            });
        };

        let records_written = sink.rows_written();
        let path = sink.finish()?;
        let stop_reason = match paginator.state() {
            PaginatorState::Capped => StopReason::Capped,
            _ => StopReason::Exhausted,
        };

        let report = HarvestReport {
            path,
            total_hits: paginator.total_hits(),
            records_written,
            stop_reason,
            elapsed: tracker.snapshot().elapsed,
        };
        info!(
            "Wrote {} of {} records to {} ({:?})",
            report.records_written,
            report.total_hits,
            report.path.display(),
            report.stop_reason
        );
        Ok(HarvestOutcome::Completed(report))
    }

    async fn drain(
        &self,
        paginator: &mut ScrollPaginator,
        tracker: &mut ProgressTracker,
        sink: &mut Option<RowSink>,
        destination: Option<&Path>,
        progress: &mut dyn ProgressObserver,
    ) -> Result<(), HarvestError> {
        while let Some(batch) = paginator.next_batch().await? {
            let rows: Vec<FlatRow> = batch
                .records
                .iter()
                .map(|record| flatten(record, self.settings.include_raw_json))
                .collect();

            let writer = match sink.take() {
                Some(writer) => writer,
                None => {
                    tracker.set_target(batch.total_hits, self.settings.record_ceiling);
                    RowSink::create(destination)?
                }
            };
            sink.insert(writer).append(&rows)?;

            tracker.add(rows.len() as u64);
            info!(
                "Page {}: {}/{} records",
                batch.page,
                tracker.records_processed(),
                tracker.records_target()
            );
            progress.on_progress(&tracker.snapshot());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchFilters;
    use crate::sources::{MockResponse, MockSource};
    use crate::utils::RetrievalProgress;
    use tempfile::tempdir;

    fn fast_settings() -> HarvestSettings {
        HarvestSettings {
            page_delay: Duration::ZERO,
            rate_limit: RateLimitPolicy {
                backoff: Duration::ZERO,
                max_retries: Some(5),
            },
            ..Default::default()
        }
    }

    fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
        let bytes = std::fs::read(path).unwrap();
        let mut reader = csv::Reader::from_reader(&bytes[UTF8_BOM.len()..]);
        assert_eq!(reader.headers().unwrap().len(), FlatRow::COLUMNS.len());
        reader.records().map(Result::unwrap).collect()
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_empty_match_produces_no_file() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MockSource::scripted([MockResponse::page(0, None, 0, 0)]));
        let harvester = Harvester::new(source.clone(), fast_settings());

        let mut calls = 0;
        let mut observer = |_: &RetrievalProgress| calls += 1;
        let outcome = harvester
            .export(
                SearchFilters::new().build(),
                Some(&dir.path().join("out.csv")),
                &mut observer,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, HarvestOutcome::NoResults { total_hits: 0 }));
        assert_eq!(source.call_count(), 1);
        assert_eq!(calls, 0);
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_exact_total_takes_three_requests() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("patents.csv");
        let source = Arc::new(MockSource::synthetic(250, 100));
        let harvester = Harvester::new(source.clone(), fast_settings());

        let mut seen = Vec::new();
        let mut observer =
            |p: &RetrievalProgress| seen.push((p.records_processed, p.records_target));
        let outcome = harvester
            .export(SearchFilters::new().build(), Some(&destination), &mut observer)
            .await
            .unwrap();

        let HarvestOutcome::Completed(report) = outcome else {
            panic!("Expected a completed run");
        };
        assert_eq!(report.path, destination);
        assert_eq!(report.total_hits, 250);
        assert_eq!(report.records_written, 250);
        assert_eq!(report.stop_reason, StopReason::Exhausted);
        assert_eq!(source.call_count(), 3);
        assert_eq!(seen, vec![(100, 250), (200, 250), (250, 250)]);

        let rows = read_rows(&destination);
        assert_eq!(rows.len(), 250);
        assert_eq!(&rows[249][0], "Patent 249");
    }

    #[tokio::test]
    async fn test_rate_limited_page_is_written_once() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("patents.csv");
        let source = Arc::new(MockSource::scripted([
            MockResponse::page(300, Some("c1"), 0, 100),
            MockResponse::RateLimited,
            MockResponse::page(300, Some("c2"), 100, 100),
            MockResponse::page(300, Some("c3"), 200, 100),
        ]));
        let harvester = Harvester::new(source, fast_settings());

        harvester
            .export(
                SearchFilters::new().build(),
                Some(&destination),
                &mut crate::utils::NoProgress,
            )
            .await
            .unwrap();

        let titles: Vec<String> = read_rows(&destination)
            .iter()
            .map(|r| r[0].to_string())
            .collect();
        let expected: Vec<String> = (0..300).map(|i| format!("Patent {}", i)).collect();
        assert_eq!(titles, expected);
    }

    #[tokio::test]
    async fn test_ceiling_caps_large_result_set() {
        let dir = tempdir().unwrap();
        let destination = dir.path().join("capped.csv");
        let mut settings = fast_settings();
        settings.include_raw_json = false;
        let source = Arc::new(MockSource::synthetic(120_000, 100));
        let harvester = Harvester::new(source.clone(), settings);

        let mut last = None;
        let mut observer = |p: &RetrievalProgress| last = Some(*p);
        let outcome = harvester
            .export(SearchFilters::new().build(), Some(&destination), &mut observer)
            .await
            .unwrap();

        let HarvestOutcome::Completed(report) = outcome else {
            panic!("Expected a completed run");
        };
        assert_eq!(report.records_written, 50_000);
        assert_eq!(report.total_hits, 120_000);
        assert_eq!(report.stop_reason, StopReason::Capped);
        assert_eq!(source.call_count(), 500);

        let last = last.unwrap();
        assert_eq!(last.records_processed, 50_000);
        assert_eq!(last.records_target, 50_000);
        assert_eq!(read_rows(&destination).len(), 50_000);
    }

    #[tokio::test]
    async fn test_failure_deletes_partial_file() {
        let dir = tempdir().unwrap();
        let source = Arc::new(MockSource::scripted([
            MockResponse::page(500, Some("c1"), 0, 100),
            MockResponse::page(500, Some("c2"), 100, 100),
            MockResponse::Transport("connection reset".to_string()),
        ]));
        let harvester = Harvester::new(source, fast_settings());

        let err = harvester
            .export(
                SearchFilters::new().build(),
                Some(&dir.path().join("out.csv")),
                &mut crate::utils::NoProgress,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Source(SourceError::Transport(_))));
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_cancellation_deletes_partial_file() {
        let dir = tempdir().unwrap();
        let cancel = CancelFlag::new();
        let source = Arc::new(MockSource::synthetic(1_000, 100));
        let harvester =
            Harvester::new(source.clone(), fast_settings()).with_cancel_flag(cancel.clone());

        let mut observer = |_: &RetrievalProgress| cancel.cancel();
        let err = harvester
            .export(
                SearchFilters::new().build(),
                Some(&dir.path().join("out.csv")),
                &mut observer,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HarvestError::Cancelled {
                records_processed: 100
            }
        ));
        assert_eq!(source.call_count(), 1);
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_zero_ceiling_writes_nothing() {
        let mut settings = fast_settings();
        settings.record_ceiling = 0;
        let source = Arc::new(MockSource::synthetic(10, 100));
        let harvester = Harvester::new(source, settings);

        let outcome = harvester
            .export(SearchFilters::new().build(), None, &mut crate::utils::NoProgress)
            .await
            .unwrap();

        assert!(matches!(outcome, HarvestOutcome::NoResults { total_hits: 10 }));
    }

    #[tokio::test]
    async fn test_count_and_preview() {
        let source = Arc::new(MockSource::synthetic(40, 100));
        let harvester = Harvester::new(source, fast_settings());
        let query = SearchFilters::new().build();

        assert_eq!(harvester.count(&query).await.unwrap(), 40);

        let preview = harvester.preview(&query, 10).await.unwrap();
        assert_eq!(preview.total_hits, 40);
        assert_eq!(preview.rows.len(), 10);
        assert!(preview.rows[0].raw_json.is_some());
    }
}
