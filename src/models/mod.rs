//! Core data models for patent search and flattening.

mod query;
mod record;
mod row;

pub use query::{
    Clause, DateType, QueryMode, SearchField, SearchFilters, SearchQuery, StatusFilter,
};
pub use record::{RawRecord, INCLUDE_FIELDS};
pub use row::FlatRow;
