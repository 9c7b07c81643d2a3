use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mediadrop_protocol::{
    CreateSessionResponse, FinalizeResponse, SaveThumbnailResponse, SessionDescriptor,
    SessionInfo, UploadChunkResponse,
};

use crate::TransferError;

/// Boxed future returned by [`SessionApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransferError>> + Send + 'a>>;

/// Abstract client for the upload session API.
///
/// One method per protocol operation. Implementations perform a single
/// network call and map transport failures to
/// [`TransferError::Transport`]; deadlines and cancellation are layered
/// on top by the caller via [`with_deadline`]. Using a trait keeps the
/// engine decoupled from the HTTP stack and testable with mocks.
pub trait SessionApi: Send + Sync {
    /// Creates a session for one file; the returned token is stable
    /// across pause/resume cycles.
    fn create_session<'a>(
        &'a self,
        descriptor: &'a SessionDescriptor,
    ) -> ApiFuture<'a, CreateSessionResponse>;

    /// Uploads one chunk. Idempotent for a re-sent index; the response
    /// counters are authoritative.
    fn upload_chunk<'a>(
        &'a self,
        session_token: &'a str,
        chunk_index: u32,
        data: Vec<u8>,
    ) -> ApiFuture<'a, UploadChunkResponse>;

    /// Assembles all chunks. Only valid once every chunk is uploaded.
    fn finalize_upload<'a>(&'a self, session_token: &'a str) -> ApiFuture<'a, FinalizeResponse>;

    /// Tells the server the session is paused (keeps its TTL warm).
    fn pause_session<'a>(&'a self, session_token: &'a str) -> ApiFuture<'a, ()>;

    /// Cancels and discards the session server-side.
    fn cancel_session<'a>(&'a self, session_token: &'a str) -> ApiFuture<'a, ()>;

    /// Lists sessions the server still considers resumable.
    fn list_active_sessions(&self) -> ApiFuture<'_, Vec<SessionInfo>>;

    /// Best-effort thumbnail attach; callers log and ignore failures.
    fn save_thumbnail<'a>(
        &'a self,
        session_token: &'a str,
        thumbnail_base64: &'a str,
    ) -> ApiFuture<'a, SaveThumbnailResponse>;
}

/// Runs `fut` under a per-call deadline and an external cancellation
/// token.
///
/// Either abort source stops the same underlying call, but the error
/// distinguishes them: a caller-initiated abort yields
/// [`TransferError::Cancelled`] (never retried) while an expired
/// deadline yields [`TransferError::Timeout`] (retryable).
pub async fn with_deadline<T>(
    fut: impl Future<Output = Result<T, TransferError>>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, TransferError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(TransferError::Timeout(timeout)),
        },
    }
}
