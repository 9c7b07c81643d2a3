//! Recovery of server-side sessions after a restart.
//!
//! The server's `list_active_sessions` is the source of truth for what
//! survived; local file handles never do. Recovered sessions therefore
//! enter the queue paused and flagged as needing their file
//! re-attached before they can resume.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use mediadrop_transfer::{SessionSnapshot, TransferError, UploadEvent, UploadSession, emit};

use crate::queue::UploadQueue;

/// Outcome of [`UploadQueue::reconcile`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Sessions adopted from the server, waiting for file re-attachment.
    pub recovered: Vec<SessionSnapshot>,
    /// Server sessions whose TTL already passed, kept visible as
    /// `expired`.
    pub expired: Vec<SessionSnapshot>,
    /// Server sessions the queue already tracks.
    pub already_known: usize,
}

impl UploadQueue {
    /// Merges the server's resumable sessions into the queue.
    ///
    /// Sessions with an unknown token are adopted via
    /// [`UploadSession::from_remote`]; ones past their TTL are marked
    /// `expired` locally and never auto-resumed — the server's own
    /// cleanup discards them, no cancel call is issued.
    pub async fn reconcile(&self) -> Result<ReconcileReport, TransferError> {
        let infos = self.shared.api.list_active_sessions().await?;
        debug!(count = infos.len(), "reconciling server sessions");

        let mut report = ReconcileReport::default();
        for info in &infos {
            let known = {
                let sessions = self.shared.sessions.read().unwrap();
                sessions
                    .iter()
                    .any(|s| s.session_token().as_deref() == Some(&info.session_token))
            };
            if known {
                report.already_known += 1;
                continue;
            }

            let session = Arc::new(UploadSession::from_remote(info));
            let snapshot = session.snapshot();
            let expired = info.expires_at <= Utc::now();
            self.shared.sessions.write().unwrap().push(session);

            emit(
                &self.shared.events_tx,
                UploadEvent::Added {
                    snapshot: snapshot.clone(),
                },
            );
            if expired {
                report.expired.push(snapshot);
            } else {
                emit(
                    &self.shared.events_tx,
                    UploadEvent::NeedsFile {
                        id: snapshot.id.clone(),
                        session_token: Some(info.session_token.clone()),
                    },
                );
                report.recovered.push(snapshot);
            }
        }

        info!(
            recovered = report.recovered.len(),
            expired = report.expired.len(),
            known = report.already_known,
            "reconcile finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueConfig;
    use crate::testing::TestApi;
    use chrono::Duration as ChronoDuration;
    use mediadrop_protocol::{
        SessionInfo, SessionMetadata, UploadKind, UploadStatus,
    };
    use mediadrop_transfer::{ByteSource, MemorySource, SessionApi};
    use std::sync::Arc;

    fn remote(token: &str, filename: &str, expired: bool) -> SessionInfo {
        let offset = if expired {
            -ChronoDuration::minutes(5)
        } else {
            ChronoDuration::hours(1)
        };
        SessionInfo {
            session_token: token.into(),
            filename: filename.into(),
            file_size: 8,
            mime_type: "application/octet-stream".into(),
            upload_type: UploadKind::File,
            chunk_size: 4,
            uploaded_chunks: 1,
            uploaded_bytes: 4,
            total_chunks: 2,
            status: UploadStatus::Paused,
            expires_at: Utc::now() + offset,
            metadata: SessionMetadata::default(),
        }
    }

    #[tokio::test]
    async fn reconcile_adopts_unknown_sessions() {
        let api = Arc::new(TestApi::new().with_remote_sessions(vec![
            remote("tok-a", "a.bin", false),
            remote("tok-b", "b.bin", true),
        ]));
        let queue = UploadQueue::new(api, QueueConfig::default());
        let mut rx = queue.take_events().unwrap();

        let report = queue.reconcile().await.unwrap();
        assert_eq!(report.recovered.len(), 1);
        assert_eq!(report.expired.len(), 1);
        assert_eq!(report.already_known, 0);

        // The live one keeps its server counters and waits for a file.
        let recovered = &report.recovered[0];
        assert_eq!(recovered.status, UploadStatus::Paused);
        assert_eq!(recovered.uploaded_chunks, 1);
        assert!(recovered.needs_file);

        // The stale one is visible but dead.
        assert_eq!(report.expired[0].status, UploadStatus::Expired);

        let mut needs_file = 0;
        while let Ok(event) = rx.try_recv() {
            if let UploadEvent::NeedsFile { session_token, .. } = event {
                assert_eq!(session_token.as_deref(), Some("tok-a"));
                needs_file += 1;
            }
        }
        assert_eq!(needs_file, 1);
    }

    #[tokio::test]
    async fn reconcile_skips_known_tokens() {
        let api = Arc::new(
            TestApi::new().with_remote_sessions(vec![remote("tok-a", "a.bin", false)]),
        );
        let queue = UploadQueue::new(api, QueueConfig::default());

        queue.reconcile().await.unwrap();
        let report = queue.reconcile().await.unwrap();
        assert_eq!(report.already_known, 1);
        assert!(report.recovered.is_empty());
        assert_eq!(queue.stats().total, 1);
    }

    #[tokio::test]
    async fn recovered_session_resumes_after_reattach() {
        let api = Arc::new(
            TestApi::new().with_remote_sessions(vec![remote("tok-a", "a.bin", false)]),
        );
        let queue = UploadQueue::new(
            Arc::clone(&api) as Arc<dyn SessionApi>,
            QueueConfig {
                chunk_size: 4,
                ..Default::default()
            },
        );

        let report = queue.reconcile().await.unwrap();
        let id = report.recovered[0].id.clone();

        // Resume without a file fails and flags the session.
        let err = queue.resume_upload(&id, None).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidState(_)));

        // Wrong file: rejected by the identity check.
        let wrong: Arc<dyn ByteSource> = Arc::new(MemorySource::new("other.bin", vec![1u8; 8]));
        let err = queue.resume_upload(&id, Some(wrong)).await.unwrap_err();
        assert!(matches!(err, TransferError::FileMismatch(_)));

        // Matching file: resumes from the confirmed chunk, no create.
        let right: Arc<dyn ByteSource> = Arc::new(MemorySource::new("a.bin", vec![1u8; 8]));
        queue.resume_upload(&id, Some(right)).await.unwrap();
        for _ in 0..500 {
            if queue.get(&id).map(|s| s.status) == Some(UploadStatus::Completed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(queue.get(&id).unwrap().status, UploadStatus::Completed);
        assert_eq!(api.count("create"), 0);
        assert_eq!(api.count("chunk:tok-a:1"), 1);
        assert_eq!(api.count("chunk:tok-a:0"), 0);
    }
}
