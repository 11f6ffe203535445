//! JSONL writing operations.
//!
//! [`RecordWriter`] serializes one value per line with buffering.
//! [`write_atomic`] writes a whole file crash-safely: records go to a
//! sibling `.tmp` file which is renamed over the target once flushed, so
//! the target is never observed half-written. Renames within a filesystem
//! are atomic on POSIX.

use crate::Result;
use serde::Serialize;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Async writer for JSONL data.
///
/// Each value is serialized with serde and written as a single line
/// followed by `\n`. Output is buffered; call [`flush`](Self::flush)
/// before dropping to surface I/O errors.
pub struct RecordWriter<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    /// Creates a writer over the given async sink.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Serializes one value and writes it as a line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the underlying write
    /// fails. A failed write may leave a partial line in the buffer;
    /// callers doing whole-file writes should prefer [`write_atomic`].
    pub async fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Flushes buffered output to the underlying sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Atomically writes an iterator of values to a JSONL file.
///
/// All records are written to `<path>.tmp`, flushed, then renamed onto
/// `path`. On failure the original file is untouched; a stale `.tmp` may
/// remain and is overwritten by the next successful write.
///
/// # Errors
///
/// Returns an error if the temp file cannot be created, any value fails
/// to serialize, an I/O error occurs, or the rename fails.
pub async fn write_atomic<T, I, P>(path: P, values: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    let file = File::create(&temp_path).await?;
    let mut writer = RecordWriter::new(file);

    for value in values {
        writer.write(&value).await?;
    }
    writer.flush().await?;

    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}
