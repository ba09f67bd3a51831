//! Archive writer: packs named streams or whole directory trees.

use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use walkdir::WalkDir;

use super::{COPY_BUF_SIZE, MAX_NAME_LEN};
use crate::errors::{SearchboxError, SearchboxResult};

/// Writes `{name length, name, content length, content}` records to any byte
/// sink. Additions are composable; every `add_*` method returns `&mut Self`
/// so callers can chain them.
pub struct ArchiveWriter<W: Write> {
    dest: W,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(dest: W) -> Self {
        Self { dest }
    }

    /// Recursively add every file under `root`, named by its path relative to
    /// `root` with separators normalized to `/`. Empty directories are not
    /// represented.
    pub fn add_directory(&mut self, root: &Path) -> SearchboxResult<&mut Self> {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                SearchboxError::Extraction(format!("walking {}: {e}", root.display()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(root).map_err(|e| {
                SearchboxError::Internal(format!(
                    "path {} not under {}: {e}",
                    entry.path().display(),
                    root.display()
                ))
            })?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let len = entry_len(&name, entry.metadata().map_err(|e| {
                SearchboxError::Extraction(format!("reading metadata for `{name}`: {e}"))
            })?.len())?;

            let mut file = File::open(entry.path())?;
            self.add_stream(&name, len, &mut file)?;
        }
        Ok(self)
    }

    /// Append one record, copying exactly `len` bytes from `source` through a
    /// bounded buffer. Errors if the source runs dry before `len` bytes.
    pub fn add_stream<R: Read>(
        &mut self,
        name: &str,
        len: u32,
        source: &mut R,
    ) -> SearchboxResult<&mut Self> {
        let name_bytes = name.as_bytes();
        if name_bytes.len() > MAX_NAME_LEN {
            return Err(SearchboxError::Extraction(format!(
                "entry name is {} bytes, exceeding the {MAX_NAME_LEN}-byte limit",
                name_bytes.len()
            )));
        }
        let name_len = name_bytes.len() as u32;

        self.dest.write_all(&name_len.to_le_bytes())?;
        self.dest.write_all(name_bytes)?;
        self.dest.write_all(&len.to_le_bytes())?;

        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut remaining = u64::from(len);
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = source.read(&mut buf[..want])?;
            if n == 0 {
                return Err(SearchboxError::Extraction(format!(
                    "source for `{name}` ended {remaining} bytes short of its declared length"
                )));
            }
            self.dest.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        Ok(self)
    }

    /// Convenience wrapper over [`ArchiveWriter::add_stream`] for in-memory
    /// content.
    pub fn add_bytes(&mut self, name: &str, bytes: &[u8]) -> SearchboxResult<&mut Self> {
        let len = entry_len(name, bytes.len() as u64)?;
        let mut source = bytes;
        self.add_stream(name, len, &mut source)
    }

    /// Flush and return the underlying sink.
    pub fn into_inner(mut self) -> SearchboxResult<W> {
        self.dest.flush()?;
        Ok(self.dest)
    }
}

impl<W: Write> fmt::Debug for ArchiveWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveWriter").finish_non_exhaustive()
    }
}

/// The content-length field is fixed at 32 bits, which caps per-entry size.
/// Oversized entries are rejected rather than silently widened.
fn entry_len(name: &str, len: u64) -> SearchboxResult<u32> {
    u32::try_from(len).map_err(|_| {
        SearchboxError::Extraction(format!(
            "entry `{name}` is {len} bytes, exceeding the 4 GiB record limit"
        ))
    })
}
