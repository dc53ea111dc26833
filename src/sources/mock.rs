//! Mock source for testing purposes.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::models::RawRecord;
use crate::sources::{PatentSource, ScrollCursor, SearchPage, SearchRequest, SourceError};

/// A scripted response
#[derive(Debug, Clone)]
pub enum MockResponse {
    Page(SearchPage),
    /// HTTP 204
    NoContent,
    /// HTTP 429
    RateLimited,
    Remote { status: u16, message: String },
    Transport(String),
}

impl MockResponse {
    /// A page with `count` generated records starting at `first_id`
    pub fn page(total: u64, scroll_id: Option<&str>, first_id: u64, count: usize) -> Self {
        MockResponse::Page(SearchPage {
            total,
            scroll_id: scroll_id.map(ScrollCursor::new),
            data: (0..count as u64).map(|i| make_record(first_id + i)).collect(),
        })
    }
}

/// A request the mock received
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// Search body as JSON
    Search(serde_json::Value),
    /// Scroll cursor token
    Scroll(String),
}

#[derive(Debug)]
struct Synthetic {
    total: u64,
    page_size: usize,
    served: u64,
    pages: u64,
}

/// A mock source that replays scripted responses in order.
///
/// Once the script is empty, a synthetic result set (see
/// [`MockSource::synthetic`]) keeps serving pages; without one every further
/// request gets HTTP 204.
#[derive(Debug, Default)]
pub struct MockSource {
    script: Mutex<VecDeque<MockResponse>>,
    synthetic: Mutex<Option<Synthetic>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockSource {
    /// Create a new mock source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that replays `responses` in order.
    pub fn scripted(responses: impl IntoIterator<Item = MockResponse>) -> Self {
        let source = Self::new();
        source.script.lock().unwrap().extend(responses);
        source
    }

    /// Create a mock serving `total` generated records in pages of `page_size`.
    pub fn synthetic(total: u64, page_size: usize) -> Self {
        let source = Self::new();
        *source.synthetic.lock().unwrap() = Some(Synthetic {
            total,
            page_size,
            served: 0,
            pages: 0,
        });
        source
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_response(&self) -> MockResponse {
        if let Some(response) = self.script.lock().unwrap().pop_front() {
            return response;
        }

        let mut guard = self.synthetic.lock().unwrap();
        let Some(synthetic) = guard.as_mut() else {
            return MockResponse::NoContent;
        };

        let remaining = synthetic.total.saturating_sub(synthetic.served);
        if remaining == 0 {
            return MockResponse::NoContent;
        }

        let count = remaining.min(synthetic.page_size as u64) as usize;
        synthetic.pages += 1;
        let response = MockResponse::page(
            synthetic.total,
            Some(&format!("cursor-{}", synthetic.pages)),
            synthetic.served,
            count,
        );
        synthetic.served += count as u64;
        response
    }

    fn answer(response: MockResponse) -> Result<Option<SearchPage>, SourceError> {
        match response {
            MockResponse::Page(page) => Ok(Some(page)),
            MockResponse::NoContent => Ok(None),
            MockResponse::RateLimited => Err(SourceError::RateLimited {
                retry_after: Some(Duration::ZERO),
            }),
            MockResponse::Remote { status, message } => Err(SourceError::Remote { status, message }),
            MockResponse::Transport(message) => Err(SourceError::Transport(message)),
        }
    }
}

#[async_trait]
impl PatentSource for MockSource {
    fn name(&self) -> &str {
        "Mock Source"
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, SourceError> {
        let body = serde_json::to_value(request)?;
        self.calls.lock().unwrap().push(MockCall::Search(body));

        if request.size == 0 {
            // Count probes only need the total
            let total = self.synthetic.lock().unwrap().as_ref().map(|s| s.total);
            if let Some(total) = total {
                return Ok(SearchPage {
                    total,
                    ..Default::default()
                });
            }
        }

        Ok(Self::answer(self.next_response())?.unwrap_or_default())
    }

    async fn scroll(
        &self,
        cursor: &ScrollCursor,
        _keep_alive: &str,
    ) -> Result<Option<SearchPage>, SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push(MockCall::Scroll(cursor.as_str().to_string()));
        Self::answer(self.next_response())
    }
}

/// Helper function to create a mock patent record for testing.
pub fn make_record(id: u64) -> RawRecord {
    RawRecord::new(json!({
        "lens_id": format!("000-000-{:06}", id),
        "jurisdiction": "US",
        "doc_number": id.to_string(),
        "date_published": "2020-01-07",
        "biblio": {
            "invention_title": [{ "text": format!("Patent {}", id) }],
            "application_reference": { "date": "2018-05-02", "doc_number": format!("A{}", id) },
            "parties": {
                "applicants": [{ "residence": "US", "extracted_name": { "value": "ACME CORP" } }]
            },
            "cited_by": { "patent_count": 2 }
        },
        "legal_status": { "granted": true, "grant_date": "2020-01-07" }
    }))
}
