//! Scripted [`SessionApi`] shared by the queue test modules.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use mediadrop_protocol::{
    CreateSessionResponse, FinalizeResponse, SaveThumbnailResponse, SessionDescriptor,
    SessionInfo, UploadChunkResponse,
};
use mediadrop_transfer::{ApiFuture, SessionApi, TransferError, total_chunks};

pub(crate) struct TestApi {
    state: Mutex<TestState>,
    /// Latency injected into every `upload_chunk`, to keep sessions
    /// in flight long enough for concurrency assertions.
    pub(crate) upload_delay: Option<Duration>,
}

struct TestState {
    next_token: u32,
    // token -> (file_size, chunk_size, uploaded_chunks, uploaded_bytes)
    sessions: std::collections::HashMap<String, (u64, u64, u32, u64)>,
    remote_sessions: Vec<SessionInfo>,
    chunk_failures: u32,
    calls: Vec<String>,
}

impl TestApi {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TestState {
                next_token: 0,
                sessions: std::collections::HashMap::new(),
                remote_sessions: Vec::new(),
                chunk_failures: 0,
                calls: Vec::new(),
            }),
            upload_delay: None,
        }
    }

    pub(crate) fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    /// Every subsequent chunk call fails `n` more times.
    pub(crate) fn inject_chunk_failures(&self, n: u32) {
        self.state.lock().unwrap().chunk_failures = n;
    }

    /// Remote sessions are also seeded as live server state so resumed
    /// uploads against their tokens succeed.
    pub(crate) fn with_remote_sessions(self, infos: Vec<SessionInfo>) -> Self {
        {
            let mut s = self.state.lock().unwrap();
            for info in &infos {
                s.sessions.insert(
                    info.session_token.clone(),
                    (
                        info.file_size,
                        info.chunk_size,
                        info.uploaded_chunks,
                        info.uploaded_bytes,
                    ),
                );
            }
            s.remote_sessions = infos;
        }
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

impl SessionApi for TestApi {
    fn create_session<'a>(
        &'a self,
        descriptor: &'a SessionDescriptor,
    ) -> ApiFuture<'a, CreateSessionResponse> {
        Box::pin(async move {
            let mut s = self.state.lock().unwrap();
            s.next_token += 1;
            let token = format!("tok-{}", s.next_token);
            s.calls.push(format!("create:{}", descriptor.filename));
            s.sessions.insert(
                token.clone(),
                (descriptor.file_size, descriptor.chunk_size, 0, 0),
            );
            Ok(CreateSessionResponse {
                session_token: token,
                total_chunks: total_chunks(descriptor.file_size, descriptor.chunk_size),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        session_token: &'a str,
        chunk_index: u32,
        data: Vec<u8>,
    ) -> ApiFuture<'a, UploadChunkResponse> {
        Box::pin(async move {
            if let Some(delay) = self.upload_delay {
                tokio::time::sleep(delay).await;
            }
            let mut s = self.state.lock().unwrap();
            s.calls.push(format!("chunk:{session_token}:{chunk_index}"));
            if s.chunk_failures > 0 {
                s.chunk_failures -= 1;
                return Err(TransferError::Transport("injected failure".into()));
            }
            let (file_size, chunk_size, chunks, bytes) = *s
                .sessions
                .get(session_token)
                .ok_or_else(|| TransferError::Transport("unknown session".into()))?;
            let (chunks, bytes) = if chunk_index >= chunks {
                (chunk_index + 1, (bytes + data.len() as u64).min(file_size))
            } else {
                (chunks, bytes)
            };
            s.sessions
                .insert(session_token.to_string(), (file_size, chunk_size, chunks, bytes));
            Ok(UploadChunkResponse {
                uploaded_chunks: chunks,
                uploaded_bytes: bytes,
                total_chunks: total_chunks(file_size, chunk_size),
            })
        })
    }

    fn finalize_upload<'a>(&'a self, session_token: &'a str) -> ApiFuture<'a, FinalizeResponse> {
        Box::pin(async move {
            let mut s = self.state.lock().unwrap();
            s.calls.push(format!("finalize:{session_token}"));
            Ok(FinalizeResponse {
                file_id: format!("file-{session_token}"),
                video_id: None,
                url: format!("https://cdn.example/{session_token}"),
            })
        })
    }

    fn pause_session<'a>(&'a self, session_token: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut s = self.state.lock().unwrap();
            s.calls.push(format!("pause:{session_token}"));
            Ok(())
        })
    }

    fn cancel_session<'a>(&'a self, session_token: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let mut s = self.state.lock().unwrap();
            s.calls.push(format!("cancel:{session_token}"));
            s.sessions.remove(session_token);
            Ok(())
        })
    }

    fn list_active_sessions(&self) -> ApiFuture<'_, Vec<SessionInfo>> {
        Box::pin(async move {
            let mut s = self.state.lock().unwrap();
            s.calls.push("list".into());
            Ok(s.remote_sessions.clone())
        })
    }

    fn save_thumbnail<'a>(
        &'a self,
        session_token: &'a str,
        _thumbnail_base64: &'a str,
    ) -> ApiFuture<'a, SaveThumbnailResponse> {
        Box::pin(async move {
            let mut s = self.state.lock().unwrap();
            s.calls.push(format!("thumbnail:{session_token}"));
            Ok(SaveThumbnailResponse {
                thumbnail_url: "https://cdn.example/thumb".into(),
            })
        })
    }
}
