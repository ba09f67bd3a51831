//! Sequential container format used to pack a directory tree into one byte
//! stream and back.
//!
//! The wire format is a flat sequence of records with no header, footer,
//! index, checksum, or compression:
//!
//! ```text
//! ┌────────────────┬────────────┬───────────────────┬───────────────┐
//! │ name length    │ name bytes │ content length    │ content bytes │
//! │ u32 LE         │ UTF-8      │ u32 LE            │ raw           │
//! └────────────────┴────────────┴───────────────────┴───────────────┘
//! (repeated until the underlying stream is exhausted)
//! ```
//!
//! There is no entry count or terminator record: end-of-data is signaled
//! purely by hitting end-of-stream while trying to read the next name length.
//! A stream that ends anywhere else inside a record is malformed and raises a
//! fatal [`crate::SearchboxError::Extraction`].
//!
//! Entries are strictly sequential; recovery order equals write order and
//! duplicate paths are not deduplicated. Path separators are normalized to
//! `/` on read regardless of what the writer's platform used.

mod reader;
mod writer;

pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;

/// Bounded intermediate buffer used when streaming entry content.
pub(crate) const COPY_BUF_SIZE: usize = 64 * 1024;

/// Upper bound on entry name byte length, enforced on both write and read.
/// The read-side check rejects corrupt length fields before any allocation.
pub(crate) const MAX_NAME_LEN: usize = 4096;
