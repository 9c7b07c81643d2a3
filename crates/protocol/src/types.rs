use serde::{Deserialize, Serialize};

/// What kind of media a session carries.
///
/// The engine is agnostic to the distinction; it only routes sessions to
/// the processor registered for their kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadKind {
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "file")]
    File,
}

impl std::fmt::Display for UploadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadKind::Video => write!(f, "video"),
            UploadKind::File => write!(f, "file"),
        }
    }
}

/// Current state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "finalizing")]
    Finalizing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "expired")]
    Expired,
}

impl UploadStatus {
    /// Returns `true` if no further transitions are possible without an
    /// explicit retry or file re-attachment.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Cancelled | UploadStatus::Expired
        )
    }
}

/// Caller-supplied metadata attached to a session.
///
/// Opaque to the engine; the server stores it and applies it to the
/// finished artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Immutable description of the file behind a session.
///
/// Sent once at session creation; `filename` and `file_size` double as
/// the identity check when a file handle is re-attached on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub upload_type: UploadKind,
    pub chunk_size: u64,
    #[serde(default)]
    pub metadata: SessionMetadata,
}
