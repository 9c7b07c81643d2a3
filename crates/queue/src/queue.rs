//! The upload queue: ordered sessions, bounded admission.
//!
//! Admission is a single critical section — checking the in-flight
//! count and claiming a slot happen under one lock, so concurrent
//! completions can never admit more than `max_concurrent` sessions.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mediadrop_protocol::{SessionMetadata, UploadKind, UploadStatus};
use mediadrop_transfer::{
    ByteSource, CHUNK_SIZE, SessionApi, SessionSnapshot, TransferConfig, TransferError,
    UploadEvent, UploadSession, emit,
};

use crate::processor::{ChunkUploadProcessor, UploadProcessor};

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Sessions transferring at once; the rest wait in submission order.
    pub max_concurrent: usize,
    /// Chunk size for new sessions.
    pub chunk_size: u64,
    /// Transfer-loop settings passed to the default processor.
    pub transfer: TransferConfig,
    /// Delay between successive auto-resume admissions.
    pub resume_stagger: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            chunk_size: CHUNK_SIZE,
            transfer: TransferConfig::default(),
            resume_stagger: Duration::from_secs(1),
        }
    }
}

/// State shared between the queue handle and its transfer tasks.
pub(crate) struct Shared {
    pub(crate) api: Arc<dyn SessionApi>,
    pub(crate) config: QueueConfig,
    /// Submission order; pending sessions are admitted oldest-first.
    pub(crate) sessions: StdRwLock<Vec<Arc<UploadSession>>>,
    /// Attached byte sources by session id. A session without an entry
    /// cannot be admitted (recovered sessions start this way).
    pub(crate) sources: StdRwLock<HashMap<String, Arc<dyn ByteSource>>>,
    pub(crate) processors: StdRwLock<HashMap<UploadKind, Arc<dyn UploadProcessor>>>,
    pub(crate) in_flight: StdMutex<HashSet<String>>,
    /// Serializes check-and-admit in [`pump`].
    pub(crate) admit: tokio::sync::Mutex<()>,
    pub(crate) events_tx: mpsc::Sender<UploadEvent>,
    pub(crate) auto_resume_done: AtomicBool,
}

/// Manages concurrent uploads with an owned, injectable instance.
pub struct UploadQueue {
    pub(crate) shared: Arc<Shared>,
    events_rx: StdMutex<Option<mpsc::Receiver<UploadEvent>>>,
}

impl UploadQueue {
    /// Creates a queue with the chunked processor registered for every
    /// upload kind.
    pub fn new(api: Arc<dyn SessionApi>, config: QueueConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);

        let chunked: Arc<dyn UploadProcessor> = Arc::new(ChunkUploadProcessor::new(
            Arc::clone(&api),
            config.transfer.clone(),
        ));
        let mut processors: HashMap<UploadKind, Arc<dyn UploadProcessor>> = HashMap::new();
        processors.insert(UploadKind::Video, Arc::clone(&chunked));
        processors.insert(UploadKind::File, chunked);

        Self {
            shared: Arc::new(Shared {
                api,
                config,
                sessions: StdRwLock::new(Vec::new()),
                sources: StdRwLock::new(HashMap::new()),
                processors: StdRwLock::new(processors),
                in_flight: StdMutex::new(HashSet::new()),
                admit: tokio::sync::Mutex::new(()),
                events_tx,
                auto_resume_done: AtomicBool::new(false),
            }),
            events_rx: StdMutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Replaces the processor for an upload kind.
    pub fn register_processor(&self, kind: UploadKind, processor: Arc<dyn UploadProcessor>) {
        self.shared
            .processors
            .write()
            .unwrap()
            .insert(kind, processor);
    }

    /// Removes the processor for an upload kind. Pending sessions of
    /// that kind stop being admitted; active ones are left alone.
    pub fn unregister_processor(&self, kind: UploadKind) -> Option<Arc<dyn UploadProcessor>> {
        self.shared.processors.write().unwrap().remove(&kind)
    }

    // -----------------------------------------------------------------------
    // Caller surface
    // -----------------------------------------------------------------------

    /// Queues a new upload. The session is created on the server only
    /// when it is admitted, so a cancelled pending upload sends nothing.
    pub async fn start_upload(
        &self,
        source: Arc<dyn ByteSource>,
        upload_type: UploadKind,
        metadata: SessionMetadata,
    ) -> Result<SessionSnapshot, TransferError> {
        if !self
            .shared
            .processors
            .read()
            .unwrap()
            .contains_key(&upload_type)
        {
            return Err(TransferError::NoProcessor(upload_type.to_string()));
        }

        let session = Arc::new(UploadSession::new(
            source.name(),
            source.len(),
            source.content_type(),
            upload_type,
            self.shared.config.chunk_size,
            metadata,
        ));
        let id = session.id();
        info!(
            session = %id,
            file = %source.name(),
            size = source.len(),
            "upload queued"
        );

        self.shared
            .sessions
            .write()
            .unwrap()
            .push(Arc::clone(&session));
        self.shared.sources.write().unwrap().insert(id, source);
        emit(
            &self.shared.events_tx,
            UploadEvent::Added {
                snapshot: session.snapshot(),
            },
        );

        pump(&self.shared).await;
        Ok(session.snapshot())
    }

    /// Pauses a pending or active upload.
    ///
    /// The in-flight chunk call is aborted; confirmed counters stay.
    /// The server is notified best-effort so the session TTL stays warm.
    pub async fn pause_upload(&self, id: &str) -> Result<SessionSnapshot, TransferError> {
        let session = self.find(id)?;
        {
            // Status check and transition happen under the admission
            // lock: pump must never activate a session mid-pause.
            let _admit = self.shared.admit.lock().await;
            match session.status() {
                UploadStatus::Pending | UploadStatus::Active => {}
                other => {
                    return Err(TransferError::InvalidState(format!(
                        "cannot pause session in {other:?}"
                    )));
                }
            }
            session.abort();
            session.set_paused();
        }
        emit(
            &self.shared.events_tx,
            UploadEvent::StatusChanged {
                snapshot: session.snapshot(),
            },
        );

        if let Some(token) = session.session_token() {
            let api = Arc::clone(&self.shared.api);
            tokio::spawn(async move {
                if let Err(e) = api.pause_session(&token).await {
                    debug!(token = %token, error = %e, "pause notify failed");
                }
            });
        }
        Ok(session.snapshot())
    }

    /// Resumes a paused or errored upload.
    ///
    /// A supplied source is checked against the session's file identity;
    /// without one, the previously attached source is reused. The
    /// session re-enters `pending` and goes through normal admission.
    pub async fn resume_upload(
        &self,
        id: &str,
        source: Option<Arc<dyn ByteSource>>,
    ) -> Result<SessionSnapshot, TransferError> {
        let session = self.find(id)?;
        if !session.is_resumable() {
            return Err(TransferError::InvalidState(format!(
                "cannot resume session in {:?}",
                session.status()
            )));
        }

        if let Some(source) = source {
            session.verify_source(source.as_ref())?;
            self.shared
                .sources
                .write()
                .unwrap()
                .insert(session.id(), source);
        } else if !self
            .shared
            .sources
            .read()
            .unwrap()
            .contains_key(&session.id())
        {
            session.mark_needs_file();
            emit(
                &self.shared.events_tx,
                UploadEvent::NeedsFile {
                    id: session.id(),
                    session_token: session.session_token(),
                },
            );
            return Err(TransferError::InvalidState(
                "file must be re-attached before resume".into(),
            ));
        }

        session.reset_for_resume();
        emit(
            &self.shared.events_tx,
            UploadEvent::StatusChanged {
                snapshot: session.snapshot(),
            },
        );

        pump(&self.shared).await;
        Ok(session.snapshot())
    }

    /// Cancels an upload and removes it from the queue.
    ///
    /// A session that never activated holds no server token, so nothing
    /// is sent; otherwise the server discard is best-effort.
    pub async fn cancel_upload(&self, id: &str) -> Result<(), TransferError> {
        let session = self.find(id)?;
        {
            // Same admission exclusion as pause: a pending session must
            // not be activated while it is being cancelled.
            let _admit = self.shared.admit.lock().await;
            session.abort();
            session.set_cancelled();
        }

        if let Some(token) = session.session_token() {
            let api = Arc::clone(&self.shared.api);
            tokio::spawn(async move {
                if let Err(e) = api.cancel_session(&token).await {
                    debug!(token = %token, error = %e, "cancel notify failed");
                }
            });
        }

        let sid = session.id();
        self.shared
            .sessions
            .write()
            .unwrap()
            .retain(|s| s.id() != sid);
        self.shared.sources.write().unwrap().remove(&sid);
        emit(&self.shared.events_tx, UploadEvent::Removed { id: sid });

        pump(&self.shared).await;
        Ok(())
    }

    /// Removes a finished session from the list. In-progress uploads
    /// must be cancelled instead.
    pub async fn remove_upload(&self, id: &str) -> Result<(), TransferError> {
        let session = self.find(id)?;
        if matches!(
            session.status(),
            UploadStatus::Pending | UploadStatus::Active | UploadStatus::Finalizing
        ) {
            return Err(TransferError::InvalidState(
                "cancel an in-progress upload instead of removing it".into(),
            ));
        }

        let sid = session.id();
        self.shared
            .sessions
            .write()
            .unwrap()
            .retain(|s| s.id() != sid);
        self.shared.sources.write().unwrap().remove(&sid);
        emit(&self.shared.events_tx, UploadEvent::Removed { id: sid });
        Ok(())
    }

    /// Pauses every pending and active upload.
    pub async fn pause_all(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<_> = self.shared.sessions.read().unwrap().clone();
        let mut paused = Vec::new();
        for session in sessions {
            if matches!(
                session.status(),
                UploadStatus::Pending | UploadStatus::Active
            ) && let Ok(snap) = self.pause_upload(&session.id()).await
            {
                paused.push(snap);
            }
        }
        paused
    }

    /// Resumes every resumable session, attaching sources from `files`
    /// where the queue no longer holds one. The map is keyed by session
    /// id or server token — recovered sessions are only known to the
    /// caller by token.
    pub async fn resume_all(
        &self,
        files: &HashMap<String, Arc<dyn ByteSource>>,
    ) -> ResumeReport {
        let sessions: Vec<_> = self.shared.sessions.read().unwrap().clone();
        let mut report = ResumeReport::default();
        for session in sessions {
            if !session.is_resumable() {
                continue;
            }
            let id = session.id();
            let attached = lookup_source(files, &session);
            match self.resume_upload(&id, attached).await {
                Ok(_) => report.resumed.push(id),
                Err(_) => report.needs_file.push(id),
            }
        }
        report
    }

    /// Retries every errored session, preferring its retained source
    /// over the supplied map.
    pub async fn retry_all_failed(
        &self,
        files: &HashMap<String, Arc<dyn ByteSource>>,
    ) -> ResumeReport {
        let sessions: Vec<_> = self.shared.sessions.read().unwrap().clone();
        let mut report = ResumeReport::default();
        for session in sessions {
            if session.status() != UploadStatus::Error {
                continue;
            }
            let id = session.id();
            let attached = if self.shared.sources.read().unwrap().contains_key(&id) {
                None
            } else {
                lookup_source(files, &session)
            };
            match self.resume_upload(&id, attached).await {
                Ok(_) => report.resumed.push(id),
                Err(_) => report.needs_file.push(id),
            }
        }
        report
    }

    /// Attaches a thumbnail to a session, best-effort in the background.
    pub fn save_thumbnail(&self, id: &str, thumbnail_base64: &str) -> Result<(), TransferError> {
        let session = self.find(id)?;
        let token = session.session_token().ok_or_else(|| {
            TransferError::InvalidState("session has no server token yet".into())
        })?;

        let api = Arc::clone(&self.shared.api);
        let data = thumbnail_base64.to_string();
        tokio::spawn(async move {
            match api.save_thumbnail(&token, &data).await {
                Ok(resp) => {
                    debug!(token = %token, url = %resp.thumbnail_url, "thumbnail saved");
                }
                Err(e) => warn!(token = %token, error = %e, "thumbnail save failed"),
            }
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read-only views
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.shared
            .sessions
            .read()
            .unwrap()
            .iter()
            .find(|s| s.id() == id)
            .map(|s| s.snapshot())
    }

    /// All sessions in submission order.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.shared
            .sessions
            .read()
            .unwrap()
            .iter()
            .map(|s| s.snapshot())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.stats().active
    }

    pub fn paused_count(&self) -> usize {
        self.stats().paused
    }

    pub fn error_count(&self) -> usize {
        self.stats().errored
    }

    /// Paused or errored sessions, resumable once a file is attached.
    pub fn resumable_count(&self) -> usize {
        let stats = self.stats();
        stats.paused + stats.errored
    }

    pub fn stats(&self) -> QueueStats {
        let sessions = self.shared.sessions.read().unwrap();
        let mut stats = QueueStats::default();
        for session in sessions.iter() {
            let snap = session.snapshot();
            stats.total += 1;
            stats.total_bytes += snap.file_size;
            stats.uploaded_bytes += snap.uploaded_bytes;
            match snap.status {
                UploadStatus::Pending => stats.pending += 1,
                UploadStatus::Active | UploadStatus::Finalizing => stats.active += 1,
                UploadStatus::Paused => stats.paused += 1,
                UploadStatus::Completed => stats.completed += 1,
                UploadStatus::Error => stats.errored += 1,
                UploadStatus::Expired => stats.expired += 1,
                UploadStatus::Cancelled => {}
            }
        }
        stats
    }

    pub(crate) fn find(&self, id: &str) -> Result<Arc<UploadSession>, TransferError> {
        self.shared
            .sessions
            .read()
            .unwrap()
            .iter()
            .find(|s| s.id() == id)
            .cloned()
            .ok_or_else(|| TransferError::SessionNotFound(id.to_string()))
    }
}

/// Finds a caller-supplied source for a session, by local id first and
/// server token second.
fn lookup_source(
    files: &HashMap<String, Arc<dyn ByteSource>>,
    session: &UploadSession,
) -> Option<Arc<dyn ByteSource>> {
    if let Some(source) = files.get(&session.id()) {
        return Some(Arc::clone(source));
    }
    session
        .session_token()
        .and_then(|token| files.get(&token))
        .map(Arc::clone)
}

/// Per-status counts and byte totals across the queue.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub paused: usize,
    pub completed: usize,
    pub errored: usize,
    pub expired: usize,
    pub total_bytes: u64,
    pub uploaded_bytes: u64,
}

/// Outcome of a bulk resume/retry.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeReport {
    pub resumed: Vec<String>,
    /// Sessions that could not resume: no matching file attached.
    pub needs_file: Vec<String>,
}

/// Admits pending sessions while free slots remain.
///
/// Slot accounting and the `active` transition happen before the task
/// is spawned; the task gives its slot back on exit and pumps again.
pub(crate) async fn pump(shared: &Arc<Shared>) {
    let _admit = shared.admit.lock().await;

    loop {
        let free = {
            let in_flight = shared.in_flight.lock().unwrap();
            shared.config.max_concurrent.saturating_sub(in_flight.len())
        };
        if free == 0 {
            return;
        }

        // Oldest pending session with an attached source and a
        // registered processor. Sessions missing either stay pending.
        let candidate = {
            let sessions = shared.sessions.read().unwrap();
            let sources = shared.sources.read().unwrap();
            let processors = shared.processors.read().unwrap();
            let in_flight = shared.in_flight.lock().unwrap();
            sessions.iter().find_map(|s| {
                if s.status() != UploadStatus::Pending || in_flight.contains(&s.id()) {
                    return None;
                }
                let source = sources.get(&s.id())?;
                let processor = processors.get(&s.upload_type())?;
                Some((Arc::clone(s), Arc::clone(source), Arc::clone(processor)))
            })
        };
        let Some((session, source, processor)) = candidate else {
            return;
        };
        let id = session.id();

        shared.in_flight.lock().unwrap().insert(id.clone());
        session.set_active();
        debug!(session = %id, "upload admitted");
        emit(
            &shared.events_tx,
            UploadEvent::StatusChanged {
                snapshot: session.snapshot(),
            },
        );

        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            let tx = shared.events_tx.clone();
            match processor.process(&session, &source, &tx).await {
                Ok(_) => {}
                Err(TransferError::Cancelled) => {
                    // Pause/cancel already applied the status it wanted.
                    debug!(session = %session.id(), "transfer aborted");
                }
                Err(e) => {
                    let msg = e.to_string();
                    warn!(session = %session.id(), error = %msg, "upload failed");
                    session.fail(&msg);
                    emit(
                        &tx,
                        UploadEvent::Failed {
                            id: session.id(),
                            error: msg,
                        },
                    );
                }
            }

            shared.in_flight.lock().unwrap().remove(&session.id());
            repump(shared).await;
        });
    }
}

/// Re-entry into [`pump`] from a finished transfer task. The boxed
/// indirection keeps the spawned future a concrete type; recursing
/// through the opaque `async fn` type does not compile.
fn repump(shared: Arc<Shared>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move { pump(&shared).await })
}
