use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use mediadrop_protocol::{
    CreateSessionResponse, SessionDescriptor, SessionInfo, SessionMetadata, UploadChunkResponse,
    UploadKind, UploadStatus,
};

use crate::speed::SpeedTracker;
use crate::{ByteSource, TransferError};

/// One resumable upload attempt for a single file (thread-safe).
///
/// The session owns its cancellation token and retry bookkeeping, but
/// never the file handle — that is re-supplied by the caller on resume
/// and checked against the stored name/size identity. All progress
/// counters come from server acknowledgments; nothing here is
/// incremented locally.
pub struct UploadSession {
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    id: String,
    session_token: Option<String>,
    filename: String,
    file_size: u64,
    mime_type: String,
    upload_type: UploadKind,
    chunk_size: u64,
    total_chunks: u32,
    metadata: SessionMetadata,
    status: UploadStatus,
    uploaded_chunks: u32,
    uploaded_bytes: u64,
    speed: SpeedTracker,
    error: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    retry_count: u32,
    needs_file: bool,
    cancel: CancellationToken,
}

impl UploadSession {
    /// Creates a pending session for a local file.
    pub fn new(
        filename: &str,
        file_size: u64,
        mime_type: &str,
        upload_type: UploadKind,
        chunk_size: u64,
        metadata: SessionMetadata,
    ) -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                id: uuid::Uuid::new_v4().to_string(),
                session_token: None,
                filename: filename.to_string(),
                file_size,
                mime_type: mime_type.to_string(),
                upload_type,
                chunk_size,
                total_chunks: crate::total_chunks(file_size, chunk_size),
                metadata,
                status: UploadStatus::Pending,
                uploaded_chunks: 0,
                uploaded_bytes: 0,
                speed: SpeedTracker::default(),
                error: None,
                expires_at: None,
                retry_count: 0,
                needs_file: false,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Rebuilds a session from the server's view after a reload.
    ///
    /// The file handle is gone, so the session is `paused` and flagged
    /// as needing re-attachment — or `expired` outright if its TTL has
    /// already passed.
    pub fn from_remote(info: &SessionInfo) -> Self {
        let expired = info.expires_at <= Utc::now();
        Self {
            inner: RwLock::new(SessionInner {
                id: uuid::Uuid::new_v4().to_string(),
                session_token: Some(info.session_token.clone()),
                filename: info.filename.clone(),
                file_size: info.file_size,
                mime_type: info.mime_type.clone(),
                upload_type: info.upload_type,
                chunk_size: info.chunk_size,
                total_chunks: info.total_chunks,
                metadata: info.metadata.clone(),
                status: if expired {
                    UploadStatus::Expired
                } else {
                    UploadStatus::Paused
                },
                uploaded_chunks: info.uploaded_chunks,
                uploaded_bytes: info.uploaded_bytes,
                speed: SpeedTracker::default(),
                error: None,
                expires_at: Some(info.expires_at),
                retry_count: 0,
                needs_file: !expired,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The descriptor sent to `createSession`.
    pub fn descriptor(&self) -> SessionDescriptor {
        let s = self.inner.read().unwrap();
        SessionDescriptor {
            filename: s.filename.clone(),
            file_size: s.file_size,
            mime_type: s.mime_type.clone(),
            upload_type: s.upload_type,
            chunk_size: s.chunk_size,
            metadata: s.metadata.clone(),
        }
    }

    /// Adopts the server-issued token and counters after `createSession`.
    pub fn adopt(&self, resp: &CreateSessionResponse) {
        let mut s = self.inner.write().unwrap();
        s.session_token = Some(resp.session_token.clone());
        s.total_chunks = resp.total_chunks;
        s.expires_at = Some(resp.expires_at);
    }

    /// Applies server-confirmed counters after a chunk acknowledgment.
    ///
    /// The response values replace the local ones wholesale — never
    /// incremented locally, so re-sent chunks and concurrent tabs stay
    /// consistent.
    pub fn record_chunk(&self, resp: &UploadChunkResponse) {
        let mut s = self.inner.write().unwrap();
        s.uploaded_chunks = resp.uploaded_chunks.min(resp.total_chunks);
        s.uploaded_bytes = resp.uploaded_bytes;
        s.total_chunks = resp.total_chunks;
        let total = s.uploaded_bytes;
        s.speed.record(total);
    }

    /// Checks a re-attached file against the session identity.
    ///
    /// A mismatch is terminal: resuming with a different binary would
    /// silently corrupt the assembled artifact.
    pub fn verify_source(&self, source: &dyn ByteSource) -> Result<(), TransferError> {
        let s = self.inner.read().unwrap();
        if source.name() != s.filename {
            return Err(TransferError::FileMismatch(format!(
                "expected '{}', got '{}'",
                s.filename,
                source.name()
            )));
        }
        if source.len() != s.file_size {
            return Err(TransferError::FileMismatch(format!(
                "expected {} bytes, got {}",
                s.file_size,
                source.len()
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Status transitions
    // -----------------------------------------------------------------------

    /// Re-enters `pending` for resume/retry: clears the error, swaps in
    /// a fresh cancellation token, and marks the file re-attached.
    pub fn reset_for_resume(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = UploadStatus::Pending;
        s.error = None;
        s.needs_file = false;
        s.retry_count += 1;
        s.cancel = CancellationToken::new();
        s.speed.reset();
    }

    pub fn set_active(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = UploadStatus::Active;
    }

    /// Pauses: speed and ETA drop to zero, counters keep the last
    /// server-confirmed values.
    pub fn set_paused(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = UploadStatus::Paused;
        s.speed.reset();
    }

    pub fn set_finalizing(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = UploadStatus::Finalizing;
    }

    pub fn complete(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = UploadStatus::Completed;
        s.uploaded_chunks = s.total_chunks;
        s.uploaded_bytes = s.file_size;
        s.speed.reset();
    }

    pub fn fail(&self, error: &str) {
        let mut s = self.inner.write().unwrap();
        s.status = UploadStatus::Error;
        s.error = Some(error.to_string());
        s.speed.reset();
    }

    pub fn set_cancelled(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = UploadStatus::Cancelled;
        s.speed.reset();
    }

    pub fn set_expired(&self) {
        let mut s = self.inner.write().unwrap();
        s.status = UploadStatus::Expired;
        s.needs_file = false;
        s.speed.reset();
    }

    pub fn mark_needs_file(&self) {
        let mut s = self.inner.write().unwrap();
        s.needs_file = true;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> String {
        self.inner.read().unwrap().id.clone()
    }

    pub fn session_token(&self) -> Option<String> {
        self.inner.read().unwrap().session_token.clone()
    }

    pub fn status(&self) -> UploadStatus {
        self.inner.read().unwrap().status
    }

    pub fn upload_type(&self) -> UploadKind {
        self.inner.read().unwrap().upload_type
    }

    pub fn filename(&self) -> String {
        self.inner.read().unwrap().filename.clone()
    }

    pub fn file_size(&self) -> u64 {
        self.inner.read().unwrap().file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.inner.read().unwrap().chunk_size
    }

    pub fn uploaded_chunks(&self) -> u32 {
        self.inner.read().unwrap().uploaded_chunks
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.inner.read().unwrap().uploaded_bytes
    }

    pub fn total_chunks(&self) -> u32 {
        self.inner.read().unwrap().total_chunks
    }

    pub fn needs_file(&self) -> bool {
        self.inner.read().unwrap().needs_file
    }

    /// Paused or errored sessions can be resumed once a matching file
    /// is attached.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self.status(),
            UploadStatus::Paused | UploadStatus::Error
        )
    }

    /// A clone of the session's cancellation token. Cancelling it
    /// aborts only this session's in-flight call.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.read().unwrap().cancel.clone()
    }

    /// Aborts the in-flight request, if any.
    pub fn abort(&self) {
        self.inner.read().unwrap().cancel.cancel();
    }

    /// Point-in-time view for callers and events.
    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.inner.read().unwrap();
        let progress = if s.status == UploadStatus::Completed {
            100.0
        } else if s.total_chunks == 0 {
            0.0
        } else {
            s.uploaded_chunks as f64 / s.total_chunks as f64 * 100.0
        };
        let speed = s.speed.bytes_per_sec();
        let remaining = s.file_size.saturating_sub(s.uploaded_bytes);
        SessionSnapshot {
            id: s.id.clone(),
            session_token: s.session_token.clone(),
            filename: s.filename.clone(),
            file_size: s.file_size,
            mime_type: s.mime_type.clone(),
            upload_type: s.upload_type,
            status: s.status,
            uploaded_chunks: s.uploaded_chunks,
            total_chunks: s.total_chunks,
            uploaded_bytes: s.uploaded_bytes,
            progress,
            speed_bps: speed,
            eta_secs: s.speed.eta(remaining).map(|d| d.as_secs()),
            error: s.error.clone(),
            expires_at: s.expires_at,
            retry_count: s.retry_count,
            needs_file: s.needs_file,
        }
    }
}

/// Serializable point-in-time view of a session.
///
/// `progress` is always derived from the chunk counters, never stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub session_token: Option<String>,
    pub filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub upload_type: UploadKind,
    pub status: UploadStatus,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub uploaded_bytes: u64,
    pub progress: f64,
    pub speed_bps: f64,
    pub eta_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub needs_file: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySource;
    use chrono::Duration as ChronoDuration;

    fn sample_session() -> UploadSession {
        UploadSession::new(
            "movie.mp4",
            1000,
            "video/mp4",
            UploadKind::Video,
            100,
            SessionMetadata::default(),
        )
    }

    #[test]
    fn new_session_is_pending() {
        let session = sample_session();
        assert_eq!(session.status(), UploadStatus::Pending);
        assert_eq!(session.total_chunks(), 10);
        assert_eq!(session.uploaded_chunks(), 0);
        assert!(session.session_token().is_none());
        assert!(!session.needs_file());
    }

    #[test]
    fn adopt_stores_token_and_counts() {
        let session = sample_session();
        session.adopt(&CreateSessionResponse {
            session_token: "tok-1".into(),
            total_chunks: 10,
            expires_at: Utc::now() + ChronoDuration::hours(1),
        });
        assert_eq!(session.session_token().as_deref(), Some("tok-1"));
        assert_eq!(session.total_chunks(), 10);
    }

    #[test]
    fn record_chunk_adopts_server_counters() {
        let session = sample_session();
        session.record_chunk(&UploadChunkResponse {
            uploaded_chunks: 3,
            uploaded_bytes: 300,
            total_chunks: 10,
        });
        assert_eq!(session.uploaded_chunks(), 3);
        assert_eq!(session.uploaded_bytes(), 300);

        // Server re-confirming the same index does not double-count.
        session.record_chunk(&UploadChunkResponse {
            uploaded_chunks: 3,
            uploaded_bytes: 300,
            total_chunks: 10,
        });
        assert_eq!(session.uploaded_chunks(), 3);
        assert_eq!(session.uploaded_bytes(), 300);
    }

    #[test]
    fn progress_is_derived_from_chunks() {
        let session = sample_session();
        session.record_chunk(&UploadChunkResponse {
            uploaded_chunks: 5,
            uploaded_bytes: 500,
            total_chunks: 10,
        });
        let snap = session.snapshot();
        assert!((snap.progress - 50.0).abs() < f64::EPSILON);

        session.complete();
        let snap = session.snapshot();
        assert!((snap.progress - 100.0).abs() < f64::EPSILON);
        assert_eq!(snap.uploaded_chunks, 10);
    }

    #[test]
    fn pause_clears_speed_and_eta() {
        let session = sample_session();
        session.set_active();
        session.set_paused();
        let snap = session.snapshot();
        assert_eq!(snap.status, UploadStatus::Paused);
        assert_eq!(snap.speed_bps, 0.0);
        assert!(snap.eta_secs.is_none());
    }

    #[test]
    fn fail_records_error_message() {
        let session = sample_session();
        session.set_active();
        session.fail("transport error: connection reset");
        let snap = session.snapshot();
        assert_eq!(snap.status, UploadStatus::Error);
        assert_eq!(
            snap.error.as_deref(),
            Some("transport error: connection reset")
        );
        assert!(session.is_resumable());
    }

    #[test]
    fn reset_for_resume_clears_error_and_token_state() {
        let session = sample_session();
        session.fail("boom");
        let old_token = session.cancel_token();
        old_token.cancel();

        session.reset_for_resume();
        assert_eq!(session.status(), UploadStatus::Pending);
        assert!(session.snapshot().error.is_none());
        assert_eq!(session.snapshot().retry_count, 1);
        // Fresh token: the old cancelled one no longer aborts the run.
        assert!(!session.cancel_token().is_cancelled());
    }

    #[test]
    fn verify_source_accepts_matching_identity() {
        let session = sample_session();
        let src = MemorySource::new("movie.mp4", vec![0u8; 1000]);
        assert!(session.verify_source(&src).is_ok());
    }

    #[test]
    fn verify_source_rejects_wrong_name() {
        let session = sample_session();
        let src = MemorySource::new("other.mp4", vec![0u8; 1000]);
        let err = session.verify_source(&src).unwrap_err();
        assert!(matches!(err, TransferError::FileMismatch(_)));
    }

    #[test]
    fn verify_source_rejects_wrong_size() {
        let session = sample_session();
        let src = MemorySource::new("movie.mp4", vec![0u8; 999]);
        let err = session.verify_source(&src).unwrap_err();
        assert!(matches!(err, TransferError::FileMismatch(_)));
    }

    #[test]
    fn from_remote_needs_file() {
        let info = SessionInfo {
            session_token: "tok-9".into(),
            filename: "movie.mp4".into(),
            file_size: 1000,
            mime_type: "video/mp4".into(),
            upload_type: UploadKind::Video,
            chunk_size: 100,
            uploaded_chunks: 4,
            uploaded_bytes: 400,
            total_chunks: 10,
            status: UploadStatus::Active,
            expires_at: Utc::now() + ChronoDuration::hours(1),
            metadata: SessionMetadata::default(),
        };
        let session = UploadSession::from_remote(&info);
        assert_eq!(session.status(), UploadStatus::Paused);
        assert!(session.needs_file());
        assert_eq!(session.uploaded_chunks(), 4);
        assert_eq!(session.session_token().as_deref(), Some("tok-9"));
    }

    #[test]
    fn from_remote_expired_session() {
        let info = SessionInfo {
            session_token: "tok-old".into(),
            filename: "old.mp4".into(),
            file_size: 1000,
            mime_type: "video/mp4".into(),
            upload_type: UploadKind::Video,
            chunk_size: 100,
            uploaded_chunks: 1,
            uploaded_bytes: 100,
            total_chunks: 10,
            status: UploadStatus::Paused,
            expires_at: Utc::now() - ChronoDuration::minutes(5),
            metadata: SessionMetadata::default(),
        };
        let session = UploadSession::from_remote(&info);
        assert_eq!(session.status(), UploadStatus::Expired);
        assert!(!session.needs_file());
        assert!(!session.is_resumable());
    }

    #[test]
    fn abort_cancels_only_own_token() {
        let a = sample_session();
        let b = sample_session();
        a.abort();
        assert!(a.cancel_token().is_cancelled());
        assert!(!b.cancel_token().is_cancelled());
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let snap = sample_session().snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"uploadedChunks\""));
        assert!(json.contains("\"needsFile\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let session = Arc::new(sample_session());
        session.set_active();

        let mut handles = vec![];
        for i in 0..8 {
            let s = Arc::clone(&session);
            handles.push(thread::spawn(move || {
                for j in 0..100u32 {
                    s.record_chunk(&UploadChunkResponse {
                        uploaded_chunks: (i * 100 + j) % 10,
                        uploaded_bytes: 100,
                        total_chunks: 10,
                    });
                    let _ = s.snapshot();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        // No panics or poisoned locks.
        let _ = session.snapshot();
    }
}
