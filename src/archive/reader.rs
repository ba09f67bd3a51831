//! Archive reader: unpacks records into streams or a directory tree.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::{COPY_BUF_SIZE, MAX_NAME_LEN};
use crate::errors::{SearchboxError, SearchboxResult};

/// Reads `{name length, name, content length, content}` records from any byte
/// source. [`ArchiveReader::read_entry_name`] must be called before
/// extracting that entry's content.
pub struct ArchiveReader<R: Read> {
    src: R,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(src: R) -> Self {
        Self { src }
    }

    /// Read the next entry's name, normalizing `\` to `/`.
    ///
    /// Returns `Ok(None)` when the stream is exhausted exactly at a record
    /// boundary, the format's only end-of-data signal. A stream that ends
    /// inside the name length or the name bytes is malformed.
    pub fn read_entry_name(&mut self) -> SearchboxResult<Option<String>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            let n = self.src.read(&mut len_buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(truncated("an entry's name length"));
            }
            filled += n;
        }

        let name_len = u32::from_le_bytes(len_buf) as usize;
        if name_len > MAX_NAME_LEN {
            return Err(SearchboxError::Extraction(format!(
                "entry name length {name_len} exceeds the {MAX_NAME_LEN}-byte limit"
            )));
        }
        let mut name_buf = vec![0u8; name_len];
        self.src
            .read_exact(&mut name_buf)
            .map_err(|_| truncated("an entry name"))?;
        let name = String::from_utf8(name_buf)
            .map_err(|_| SearchboxError::Extraction("entry name is not valid UTF-8".into()))?;

        Ok(Some(name.replace('\\', "/")))
    }

    /// Read the entry's content length, then copy exactly that many bytes to
    /// `dest` through a bounded buffer. Short reads from the source are not
    /// end-of-entry; copying loops until the declared length is satisfied or
    /// the source is exhausted, and premature exhaustion is fatal.
    pub fn extract_to_stream<W: Write>(&mut self, dest: &mut W) -> SearchboxResult<u64> {
        let mut len_buf = [0u8; 4];
        self.src
            .read_exact(&mut len_buf)
            .map_err(|_| truncated("an entry's content length"))?;
        let length = u64::from(u32::from_le_bytes(len_buf));

        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut remaining = length;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.src.read(&mut buf[..want])?;
            if n == 0 {
                return Err(truncated("an entry's content"));
            }
            dest.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        Ok(length)
    }

    /// Repeat {read name → create parent directories → extract to file} until
    /// the stream is exhausted. Returns the number of entries extracted.
    ///
    /// The cancellation signal is checked before each entry and again after
    /// the name read, before any filesystem writes; on cancellation the loop
    /// aborts immediately, leaving any partially written file for the entry
    /// in progress on disk (no rollback).
    pub fn extract_to_directory(
        &mut self,
        target: &Path,
        cancel: &CancellationToken,
    ) -> SearchboxResult<usize> {
        let mut count = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SearchboxError::Cancelled);
            }
            let Some(name) = self.read_entry_name()? else {
                break;
            };
            // The name read may have blocked for a while; re-check before
            // touching the filesystem.
            if cancel.is_cancelled() {
                return Err(SearchboxError::Cancelled);
            }

            let full_path = target.join(entry_relative_path(&name)?);
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut dest = File::create(&full_path)?;
            self.extract_to_stream(&mut dest)?;
            count += 1;
        }
        Ok(count)
    }
}

fn truncated(what: &str) -> SearchboxError {
    SearchboxError::Extraction(format!("stream ended inside {what}"))
}

/// Entry names must stay inside the target directory.
fn entry_relative_path(name: &str) -> SearchboxResult<PathBuf> {
    let path = Path::new(name);
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(SearchboxError::Extraction(format!(
            "entry path `{name}` escapes the target directory"
        )));
    }
    Ok(path.to_path_buf())
}
