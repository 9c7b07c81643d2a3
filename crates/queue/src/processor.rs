use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use mediadrop_protocol::FinalizeResponse;
use mediadrop_transfer::{
    ByteSource, SessionApi, SessionRunner, TransferConfig, TransferError, UploadEvent,
    UploadSession,
};

/// Boxed future returned by [`UploadProcessor::process`].
pub type ProcessFuture<'a> =
    Pin<Box<dyn Future<Output = Result<FinalizeResponse, TransferError>> + Send + 'a>>;

/// Drives one admitted session to completion.
///
/// Registered per [`UploadKind`](mediadrop_protocol::UploadKind) so
/// different media types can take different pipelines while sharing the
/// queue's admission and lifecycle handling.
pub trait UploadProcessor: Send + Sync {
    fn process<'a>(
        &'a self,
        session: &'a Arc<UploadSession>,
        source: &'a Arc<dyn ByteSource>,
        events: &'a mpsc::Sender<UploadEvent>,
    ) -> ProcessFuture<'a>;
}

/// Default processor: the chunked transfer loop, unchanged.
pub struct ChunkUploadProcessor {
    runner: SessionRunner,
}

impl ChunkUploadProcessor {
    pub fn new(api: Arc<dyn SessionApi>, config: TransferConfig) -> Self {
        Self {
            runner: SessionRunner::new(api, config),
        }
    }
}

impl UploadProcessor for ChunkUploadProcessor {
    fn process<'a>(
        &'a self,
        session: &'a Arc<UploadSession>,
        source: &'a Arc<dyn ByteSource>,
        events: &'a mpsc::Sender<UploadEvent>,
    ) -> ProcessFuture<'a> {
        Box::pin(self.runner.run(session, source, events))
    }
}
