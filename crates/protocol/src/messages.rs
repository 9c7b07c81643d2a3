use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SessionMetadata, UploadKind, UploadStatus};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Sends one chunk of session data.
///
/// `data` is base64-encoded on the wire; the chunk index is 0-based and
/// must arrive in ascending order. Re-sending an index is idempotent on
/// the server side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkRequest {
    pub chunk_index: u32,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Attaches a thumbnail to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveThumbnailRequest {
    /// Base64-encoded image data.
    pub thumbnail: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Server acknowledgment of a new session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_token: String,
    pub total_chunks: u32,
    pub expires_at: DateTime<Utc>,
}

/// Server-confirmed counters after a chunk upload.
///
/// These are authoritative: the client must adopt them rather than
/// increment its own counters, so a re-sent chunk never double-counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    pub uploaded_chunks: u32,
    pub uploaded_bytes: u64,
    pub total_chunks: u32,
}

/// Result of assembling all chunks into the finished artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    pub url: String,
}

/// Result of the best-effort thumbnail save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveThumbnailResponse {
    pub thumbnail_url: String,
}

/// A session as reported by `listActiveSessions`.
///
/// Carries everything needed to rebuild a local session record after a
/// reload, except the file handle itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_token: String,
    pub filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub upload_type: UploadKind,
    pub chunk_size: u64,
    pub uploaded_chunks: u32,
    pub uploaded_bytes: u64,
    pub total_chunks: u32,
    pub status: UploadStatus,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: SessionMetadata,
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
