//! Wire types for the MediaDrop upload session API.
//!
//! The session API is a request/response protocol: a client creates a
//! session for one file, streams fixed-size chunks in ascending index
//! order, and finalizes once every chunk has been acknowledged. These
//! types are shared by the engine and by any client implementation.

pub mod messages;
pub mod types;

pub use messages::{
    CreateSessionResponse, FinalizeResponse, SaveThumbnailRequest, SaveThumbnailResponse,
    SessionInfo, UploadChunkRequest, UploadChunkResponse,
};
pub use types::{SessionDescriptor, SessionMetadata, UploadKind, UploadStatus};
