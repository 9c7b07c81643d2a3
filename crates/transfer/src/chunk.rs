use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::TransferError;

/// Number of chunks for a file of `file_size` bytes.
///
/// `ceil(file_size / chunk_size)`; a zero-byte file has zero chunks and
/// goes straight to finalize.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u32 {
    file_size.div_ceil(chunk_size) as u32
}

/// Half-open byte range `[start, end)` for the chunk at `index`.
///
/// Every chunk is exactly `chunk_size` bytes except the last, which is
/// the remainder.
pub fn byte_range(index: u32, file_size: u64, chunk_size: u64) -> (u64, u64) {
    let start = index as u64 * chunk_size;
    let end = (start + chunk_size).min(file_size);
    (start, end)
}

/// A re-readable source of file bytes.
///
/// The engine never owns the underlying handle: the caller supplies a
/// source at start/resume time and it may become unavailable (a revoked
/// handle after a reload). Reads must be re-entrant — retries re-read
/// the same range rather than caching, keeping memory bounded.
pub trait ByteSource: Send + Sync {
    /// The file's name, part of the session identity check.
    fn name(&self) -> &str;

    /// Total size in bytes, part of the session identity check.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-guess MIME type for the session descriptor.
    fn content_type(&self) -> &str {
        "application/octet-stream"
    }

    /// Reads the half-open range `[start, end)`.
    ///
    /// A failure here is a retryable [`TransferError::Read`] — treated
    /// identically to a network failure by the transfer loop.
    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, std::io::Error>;
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// A [`ByteSource`] backed by a path on disk.
///
/// The file is opened per read, not held open: a deleted or revoked path
/// surfaces as a read error on the next chunk instead of poisoning a
/// cached handle.
pub struct FileSource {
    path: PathBuf,
    name: String,
    len: u64,
    content_type: String,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let meta = std::fs::metadata(path).map_err(|e| TransferError::Read(e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = guess_content_type(&name).to_string();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            len: meta.len(),
            content_type,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, std::io::Error> {
        let mut file = std::fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

fn guess_content_type(name: &str) -> &'static str {
    match name.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// An in-memory [`ByteSource`], mainly for tests and small payloads.
pub struct MemorySource {
    name: String,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            data,
        }
    }
}

impl ByteSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, std::io::Error> {
        if end > self.data.len() as u64 || start > end {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "range out of bounds",
            ));
        }
        Ok(self.data[start as usize..end as usize].to_vec())
    }
}
