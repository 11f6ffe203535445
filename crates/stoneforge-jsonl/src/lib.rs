//! Async JSON Lines plumbing for the stoneforge core.
//!
//! JSONL (JSON Lines) is a text format where each line holds one JSON value,
//! UTF-8 encoded and LF-terminated. Stoneforge uses it for element storage
//! and for the incremental export/import protocol, so this crate provides
//! the small set of primitives both need:
//!
//! - [`RecordReader`]: buffered async reader with line tracking
//! - [`RecordWriter`]: buffered async writer, one value per line
//! - [`read_resilient`]: whole-file load that collects [`Warning`]s for
//!   malformed lines instead of aborting the stream
//! - [`write_atomic`]: crash-safe whole-file write (temp file + rename)
//!
//! # Examples
//!
//! ```no_run
//! use stoneforge_jsonl::{read_resilient, write_atomic};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Record {
//!     id: String,
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let records = vec![Record { id: "el-a3f".to_string() }];
//! write_atomic("elements.jsonl", records.iter()).await?;
//!
//! let (loaded, warnings) = read_resilient::<Record, _>("elements.jsonl").await?;
//! assert_eq!(loaded.len(), 1);
//! assert!(warnings.is_empty());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod read;
pub mod warning;
pub mod write;

pub use error::{Error, Result};
pub use read::{RecordReader, read_resilient};
pub use warning::Warning;
pub use write::{RecordWriter, write_atomic};
