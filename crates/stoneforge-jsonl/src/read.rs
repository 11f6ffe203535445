//! JSONL reading operations.
//!
//! [`RecordReader`] reads one record per line from any async source with
//! line-number tracking for error context. [`read_resilient`] loads a whole
//! file, skipping damaged lines and reporting them as warnings.

use crate::warning::Warning;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::warn;

/// Async reader for JSONL data.
///
/// Wraps an async reader in a [`BufReader`] and deserializes one value per
/// line. Empty lines (after trimming) are skipped. The reader tracks the
/// 1-based number of the last line read so parse failures can be located.
pub struct RecordReader<R> {
    reader: BufReader<R>,
    line: usize,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    /// Creates a reader over the given async source.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: 0,
        }
    }

    /// 1-based number of the last line read; 0 before the first read.
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }

    /// Reads and deserializes the next record.
    ///
    /// Returns `Ok(None)` at end of input. Empty lines are skipped without
    /// being counted as records (they still advance the line counter).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on read failure and [`Error::Json`] when a
    /// non-empty line fails to parse. The reader remains usable after a
    /// parse error; the damaged line has been consumed.
    pub async fn next_record<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            let mut buf = String::new();
            let bytes = self.reader.read_line(&mut buf).await?;
            if bytes == 0 {
                return Ok(None);
            }
            self.line += 1;

            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            return serde_json::from_str(trimmed).map(Some).map_err(Error::Json);
        }
    }
}

/// Loads every parseable record from a JSONL file.
///
/// Damaged lines do not abort the load: each one is skipped and reported in
/// the returned warning list, preserving as much of the file as possible.
/// This is the loading mode used for element stores, where a single corrupt
/// line must not take the whole database down.
///
/// # Errors
///
/// Returns [`Error::Io`] only when the file itself cannot be opened or
/// read. Per-line parse failures are never errors here.
pub async fn read_resilient<T, P>(path: P) -> Result<(Vec<T>, Vec<Warning>)>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref()).await?;
    let mut reader = RecordReader::new(file);

    let mut records = Vec::new();
    let mut warnings = Vec::new();

    loop {
        match reader.next_record::<T>().await {
            Ok(Some(record)) => records.push(record),
            Ok(None) => break,
            Err(Error::Json(err)) => {
                warn!(line = reader.line(), %err, "skipping malformed JSONL line");
                warnings.push(Warning::MalformedLine {
                    line: reader.line(),
                    error: err.to_string(),
                });
            }
            Err(other) => return Err(other),
        }
    }

    Ok((records, warnings))
}
