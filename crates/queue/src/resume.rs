//! Automatic resume of interrupted uploads.
//!
//! Runs once per queue lifetime, typically right after
//! [`reconcile`](crate::UploadQueue::reconcile). Only sessions that
//! still hold a live byte source are candidates; everything else waits
//! for the user to re-attach a file. Admissions are staggered so a
//! large backlog does not slam the server in one burst.

use std::sync::atomic::Ordering;

use tracing::info;

use mediadrop_protocol::UploadStatus;

use crate::queue::{ResumeReport, UploadQueue};

impl UploadQueue {
    /// Resumes every resumable session with an attached source,
    /// one every `resume_stagger`.
    ///
    /// One-shot: later calls return an empty report. Each candidate
    /// goes through [`resume_upload`](Self::resume_upload), so the
    /// concurrency ceiling still applies.
    pub async fn auto_resume(&self) -> ResumeReport {
        if self.shared.auto_resume_done.swap(true, Ordering::SeqCst) {
            return ResumeReport::default();
        }

        // Paused sessions with a live source; errored ones wait for an
        // explicit retry. A just-paused session may still have its
        // aborted task winding down — resume_upload handles that, the
        // session simply re-enters admission once the slot frees.
        let candidates: Vec<_> = {
            let sessions = self.shared.sessions.read().unwrap();
            let sources = self.shared.sources.read().unwrap();
            sessions
                .iter()
                .filter(|s| {
                    s.status() == UploadStatus::Paused && sources.contains_key(&s.id())
                })
                .cloned()
                .collect()
        };
        if candidates.is_empty() {
            return ResumeReport::default();
        }

        let mut report = ResumeReport::default();
        let mut first = true;
        for session in candidates {
            if !first {
                tokio::time::sleep(self.shared.config.resume_stagger).await;
            }
            first = false;

            let id = session.id();
            match self.resume_upload(&id, None).await {
                Ok(_) => report.resumed.push(id),
                Err(_) => report.needs_file.push(id),
            }
        }

        info!(
            resumed = report.resumed.len(),
            needs_file = report.needs_file.len(),
            "auto-resume finished"
        );
        report
    }
}
