//! Durable row sink: an incrementally written CSV file.
//!
//! Rows go to a temporary file that only becomes visible at its final location
//! when [`RowSink::finish`] is called. Dropping the sink without finishing deletes
//! the partial file.

use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// UTF-8 byte-order marker, written first for spreadsheet compatibility
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Errors raised while writing the output file
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(csv::Error),

    /// A row's field set differs from the header written for the first row
    #[error("Row has {found} fields but the header has {expected}")]
    SchemaMismatch { expected: u64, found: u64 },

    #[error("Failed to move output to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<csv::Error> for SinkError {
    fn from(err: csv::Error) -> Self {
        if let csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } = *err.kind()
        {
            return SinkError::SchemaMismatch {
                expected: expected_len,
                found: len,
            };
        }
        SinkError::Csv(err)
    }
}

/// CSV writer over a temporary file.
///
/// The header is taken from the field names of the first serialized row and
/// written exactly once, before any data row. Later rows must have the same
/// width or [`SinkError::SchemaMismatch`] is returned.
#[derive(Debug)]
pub struct RowSink {
    writer: csv::Writer<NamedTempFile>,
    destination: Option<PathBuf>,
    rows_written: u64,
}

impl RowSink {
    /// Create a sink.
    ///
    /// With a destination the temporary file is created next to it and renamed into
    /// place on finish; otherwise the finished file stays in the system temp dir.
    pub fn create(destination: Option<&Path>) -> Result<Self, SinkError> {
        let mut file = match destination {
            Some(path) => {
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                tempfile::Builder::new()
                    .prefix(".patent-harvest-")
                    .suffix(".part")
                    .tempfile_in(dir)?
            }
            None => tempfile::Builder::new()
                .prefix("patents-")
                .suffix(".csv")
                .tempfile()?,
        };

        file.write_all(UTF8_BOM)?;
        tracing::debug!("Opened row sink at {}", file.path().display());

        Ok(Self {
            writer: csv::WriterBuilder::new().has_headers(true).from_writer(file),
            destination: destination.map(Path::to_path_buf),
            rows_written: 0,
        })
    }

    /// Append a batch of rows and flush them to disk
    pub fn append<T: Serialize>(&mut self, rows: &[T]) -> Result<(), SinkError> {
        for row in rows {
            self.writer.serialize(row)?;
            self.rows_written += 1;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Data rows written so far (header excluded)
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Path of the temporary file currently being written
    pub fn temp_path(&self) -> &Path {
        self.writer.get_ref().path()
    }

    /// Finalize the file and make it visible; returns its path
    pub fn finish(self) -> Result<PathBuf, SinkError> {
        let file = self
            .writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))?;
        file.as_file().sync_all()?;

        match self.destination {
            Some(destination) => {
                file.persist(&destination).map_err(|e| SinkError::Persist {
                    path: destination.clone(),
                    source: e.error,
                })?;
                Ok(destination)
            }
            None => {
                let (_, path) = file.keep().map_err(|e| SinkError::Io(e.error))?;
                Ok(path)
            }
        }
    }

    /// Delete the partial file
    pub fn discard(self) {
        tracing::debug!(
            "Discarding partial output {} ({} rows)",
            self.temp_path().display(),
            self.rows_written
        );
        drop(self);
    }
}
