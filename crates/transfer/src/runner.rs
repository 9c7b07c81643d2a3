//! The per-session transfer loop.
//!
//! Chunks are sent strictly in ascending index order; the next chunk is
//! never started before the previous one is acknowledged. Each chunk
//! gets up to [`MAX_CHUNK_ATTEMPTS`](crate::MAX_CHUNK_ATTEMPTS)
//! attempts with exponential backoff before the failure escalates to
//! the session level.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mediadrop_protocol::{FinalizeResponse, UploadChunkResponse};

use crate::chunk::byte_range;
use crate::client::{SessionApi, with_deadline};
use crate::session::{SessionSnapshot, UploadSession};
use crate::{ByteSource, TransferError};

/// Tuning knobs for the transfer loop.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Per-call deadline for every session API operation.
    pub call_timeout: Duration,
    /// Attempts per chunk before escalating to session `error`.
    pub max_chunk_attempts: u32,
    /// Base of the retry backoff: `retry_base × 2^attempt`.
    pub retry_base: Duration,
    /// Optional delay between chunks, skipped for the first chunk of a
    /// run so resumes start immediately.
    pub throttle: Option<Duration>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            call_timeout: crate::DEFAULT_CALL_TIMEOUT,
            max_chunk_attempts: crate::MAX_CHUNK_ATTEMPTS,
            retry_base: Duration::from_millis(1500),
            throttle: None,
        }
    }
}

impl TransferConfig {
    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_base * 2u32.saturating_pow(attempt.min(16))
    }
}

/// Events emitted by the engine as sessions move through their
/// lifecycle. The transport (channel, callback bridge, pub/sub) is up
/// to the caller; the engine only promises discrete events.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// A session entered the queue.
    Added { snapshot: SessionSnapshot },
    /// A session's status changed (pause, resume, cancel, expire...).
    StatusChanged { snapshot: SessionSnapshot },
    /// A chunk was acknowledged.
    Progress { snapshot: SessionSnapshot },
    /// Finalize succeeded; the artifact is live.
    Completed {
        id: String,
        result: FinalizeResponse,
    },
    /// The session hit a terminal failure; it stays visible and
    /// retryable until explicitly removed.
    Failed { id: String, error: String },
    /// A recovered session needs its file re-selected before resuming.
    NeedsFile {
        id: String,
        session_token: Option<String>,
    },
    /// A session was removed from the queue.
    Removed { id: String },
}

/// Delivers an event without blocking the transfer.
///
/// Observers are advisory: a full or missing receiver drops the event
/// rather than stalling a chunk loop behind it.
pub fn emit(events: &mpsc::Sender<UploadEvent>, event: UploadEvent) {
    if let Err(mpsc::error::TrySendError::Full(_)) = events.try_send(event) {
        debug!("event observer lagging, event dropped");
    }
}

/// Drives one [`UploadSession`] from its first unconfirmed chunk to
/// finalize.
pub struct SessionRunner {
    api: Arc<dyn SessionApi>,
    config: TransferConfig,
}

impl SessionRunner {
    pub fn new(api: Arc<dyn SessionApi>, config: TransferConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Runs the transfer loop to completion.
    ///
    /// Expects the session to already be `active` (the queue reserves
    /// the slot before this future starts). On success the session is
    /// `completed`; on [`TransferError::Cancelled`] the session is left
    /// exactly as the canceller set it; any other error is returned for
    /// the caller to apply as session `error`.
    pub async fn run(
        &self,
        session: &Arc<UploadSession>,
        source: &Arc<dyn ByteSource>,
        events: &mpsc::Sender<UploadEvent>,
    ) -> Result<FinalizeResponse, TransferError> {
        let cancel = session.cancel_token();
        let id = session.id();

        // The token is assigned exactly once per logical attempt and
        // reused across pause/resume cycles.
        let token = match session.session_token() {
            Some(token) => token,
            None => {
                let descriptor = session.descriptor();
                let resp = with_deadline(
                    self.api.create_session(&descriptor),
                    self.config.call_timeout,
                    &cancel,
                )
                .await?;
                session.adopt(&resp);
                debug!(
                    session = %id,
                    token = %resp.session_token,
                    chunks = resp.total_chunks,
                    "session created"
                );
                resp.session_token
            }
        };

        let total = session.total_chunks();
        let mut first_chunk = true;
        let mut index = session.uploaded_chunks();

        while index < total {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            // Inter-chunk throttle, skipped for the first chunk of a
            // resumed run.
            if let Some(throttle) = self.config.throttle
                && !first_chunk
            {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    _ = tokio::time::sleep(throttle) => {}
                }
            }
            first_chunk = false;

            let resp = self
                .send_chunk_with_retry(session, source, &token, index, &cancel)
                .await?;
            session.record_chunk(&resp);
            emit(
                events,
                UploadEvent::Progress {
                    snapshot: session.snapshot(),
                },
            );

            // Counters are server-confirmed; a stale response can never
            // walk the index backwards.
            index = session.uploaded_chunks().max(index + 1);
        }

        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        session.set_finalizing();
        emit(
            events,
            UploadEvent::StatusChanged {
                snapshot: session.snapshot(),
            },
        );

        // Finalize failures are not chunk-retried; the caller may
        // restart the session, which re-attempts finalize only.
        let result = with_deadline(
            self.api.finalize_upload(&token),
            self.config.call_timeout,
            &cancel,
        )
        .await
        .map_err(|e| match e {
            TransferError::Cancelled => TransferError::Cancelled,
            other => TransferError::Finalize(other.to_string()),
        })?;

        session.complete();
        info!(
            session = %id,
            file_id = %result.file_id,
            url = %result.url,
            "upload completed"
        );
        emit(
            events,
            UploadEvent::Completed {
                id: id.clone(),
                result: result.clone(),
            },
        );

        Ok(result)
    }

    /// One chunk: read, send, retry with backoff on retryable errors.
    async fn send_chunk_with_retry(
        &self,
        session: &Arc<UploadSession>,
        source: &Arc<dyn ByteSource>,
        token: &str,
        index: u32,
        cancel: &CancellationToken,
    ) -> Result<UploadChunkResponse, TransferError> {
        let (start, end) = byte_range(index, session.file_size(), session.chunk_size());
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            match self.try_chunk(source, token, index, start, end, cancel).await {
                Ok(resp) => return Ok(resp),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.max_chunk_attempts {
                        warn!(
                            session = %session.id(),
                            chunk = index,
                            attempts = attempt,
                            error = %e,
                            "chunk failed, attempts exhausted"
                        );
                        return Err(e);
                    }

                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        session = %session.id(),
                        chunk = index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "chunk failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Reads the chunk range and performs one upload call.
    ///
    /// The range is re-read on every attempt — no caching, so memory
    /// stays bounded and a revoked handle surfaces as a read error.
    async fn try_chunk(
        &self,
        source: &Arc<dyn ByteSource>,
        token: &str,
        index: u32,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<UploadChunkResponse, TransferError> {
        let src = Arc::clone(source);
        let data = tokio::task::spawn_blocking(move || src.read_range(start, end))
            .await
            .map_err(|e| TransferError::Read(format!("read task join error: {e}")))?
            .map_err(|e| TransferError::Read(e.to_string()))?;

        with_deadline(
            self.api.upload_chunk(token, index, data),
            self.config.call_timeout,
            cancel,
        )
        .await
    }
}
