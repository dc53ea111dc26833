//! # Patent Harvest
//!
//! Bulk retrieval of patent search results from the Lens.org API into flat CSV
//! rows suitable for spreadsheet and statistical analysis.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`]: Search filters and the query tree, raw records and the flattened row
//! - [`sources`]: The [`PatentSource`] trait, the Lens HTTP client and a scripted mock
//! - [`harvest`]: Count probe, preview, scroll paginator and the CSV row sink
//! - [`utils`]: HTTP client, rate-limit backoff, progress and cancellation
//! - [`config`]: Configuration management
//! - [`ui`]: Terminal output for the command-line tool

pub mod config;
pub mod harvest;
pub mod models;
pub mod sources;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use harvest::{HarvestError, HarvestOutcome, HarvestSettings, Harvester};
pub use models::{FlatRow, SearchFilters, SearchQuery};
pub use sources::{ApiToken, LensSource, PatentSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
