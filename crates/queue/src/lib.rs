//! Upload queue with bounded concurrency.
//!
//! Owns the ordered list of [`UploadSession`]s, admits at most
//! `max_concurrent` of them into the transfer loop at a time, and keeps
//! the rest pending in submission order. Pause, resume, cancel and
//! retry all go through the queue so a freed slot immediately admits
//! the next pending session.
//!
//! [`UploadSession`]: mediadrop_transfer::UploadSession

mod processor;
mod queue;
mod registry;
mod resume;

#[cfg(test)]
mod testing;

pub use processor::{ChunkUploadProcessor, ProcessFuture, UploadProcessor};
pub use queue::{QueueConfig, QueueStats, ResumeReport, UploadQueue};
pub use registry::ReconcileReport;
