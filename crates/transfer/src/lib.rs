//! Resumable chunked upload engine.
//!
//! One [`UploadSession`] per file: chunks are read through a re-entrant
//! [`ByteSource`], sent strictly in ascending index order via a
//! [`SessionApi`] implementation, and acknowledged with server-confirmed
//! counters. The [`SessionRunner`] drives the loop with per-chunk retry,
//! exponential backoff, pause/resume/cancel, and speed/ETA tracking.

mod chunk;
mod client;
mod runner;
mod session;
mod speed;

pub use chunk::{ByteSource, FileSource, MemorySource, byte_range, total_chunks};
pub use client::{ApiFuture, SessionApi, with_deadline};
pub use runner::{SessionRunner, TransferConfig, UploadEvent, emit};
pub use session::{SessionSnapshot, UploadSession};
pub use speed::SpeedTracker;

use std::time::Duration;

/// Fixed chunk size: 5 MiB, matching the server's expectation.
///
/// A client/server mismatch here is a configuration error, never
/// negotiated at runtime.
pub const CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Attempts per chunk before the session goes to `error`.
pub const MAX_CHUNK_ATTEMPTS: u32 = 3;

/// Default per-call deadline for session API operations.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors produced by the upload engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Chunk extraction from the byte source failed. Retryable: the
    /// source may be a transiently unavailable handle.
    #[error("chunk read failed: {0}")]
    Read(String),

    /// Network or HTTP failure. Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// A call exceeded its deadline. Retryable, distinct from
    /// [`TransferError::Cancelled`].
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The caller aborted the operation. Never retried.
    #[error("cancelled")]
    Cancelled,

    /// A re-attached file does not match the session's descriptor.
    /// Never retried; the user must re-select the file.
    #[error("file doesn't match session: {0}")]
    FileMismatch(String),

    /// Last-mile chunk assembly failed. Terminal for this attempt; the
    /// caller may retry the session, which re-attempts finalize only.
    #[error("finalize failed: {0}")]
    Finalize(String),

    /// No session with the given id is known to the queue.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session is not in a state that permits the operation.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// No processor is registered for the session's upload kind.
    #[error("no processor registered for upload type: {0}")]
    NoProcessor(String),
}

impl TransferError {
    /// Whether the transfer loop may retry the failed chunk locally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Read(_) | TransferError::Transport(_) | TransferError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TransferError::Read("gone".into()).is_retryable());
        assert!(TransferError::Transport("503".into()).is_retryable());
        assert!(TransferError::Timeout(Duration::from_secs(1)).is_retryable());

        assert!(!TransferError::Cancelled.is_retryable());
        assert!(!TransferError::FileMismatch("size".into()).is_retryable());
        assert!(!TransferError::Finalize("assembly".into()).is_retryable());
    }
}
