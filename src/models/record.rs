//! Raw patent documents as returned by the search API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level fields requested for every record during bulk retrieval
pub const INCLUDE_FIELDS: &[&str] = &[
    "lens_id",
    "jurisdiction",
    "doc_number",
    "date_published",
    "biblio",
    "legal_status",
    "families",
    "abstract",
];

/// One nested patent document.
///
/// The document is kept as untyped JSON so that a malformed optional block never
/// prevents the rest of the record from being read. All accessors take a JSON
/// pointer and return `None` when the path is missing or has an unexpected type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Value);

impl RawRecord {
    /// Wrap a JSON document
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// String at `pointer`
    pub fn str_at(&self, pointer: &str) -> Option<&str> {
        self.0.pointer(pointer).and_then(Value::as_str)
    }

    /// Unsigned integer at `pointer`; integral floats are accepted
    pub fn u64_at(&self, pointer: &str) -> Option<u64> {
        let value = self.0.pointer(pointer)?;
        value.as_u64().or_else(|| {
            value
                .as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        })
    }

    /// Boolean at `pointer`
    pub fn bool_at(&self, pointer: &str) -> Option<bool> {
        self.0.pointer(pointer).and_then(Value::as_bool)
    }

    /// Array at `pointer`, empty when missing
    pub fn array_at(&self, pointer: &str) -> &[Value] {
        self.0
            .pointer(pointer)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Compact JSON serialization of the whole document
    pub fn to_json_string(&self) -> String {
        self.0.to_string()
    }
}

impl From<Value> for RawRecord {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
