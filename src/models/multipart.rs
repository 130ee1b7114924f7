//! Represents multipart upload sessions and parts.

use super::{acl::Acl, object::UserMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::fmt;

/// Largest part number accepted by the coordinator.
pub const MAX_PART_ID: u32 = 10_000;

/// Lifecycle of a multipart session.
///
/// `Initiated -> InProgress -> {Completed, Aborted}`. Terminal states accept
/// no further transitions.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SessionState {
    Initiated,
    InProgress,
    Completed,
    Aborted,
}

impl SessionState {
    /// States from which a session may still accept parts or terminate.
    pub const LIVE: [SessionState; 2] = [SessionState::Initiated, SessionState::InProgress];

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initiated => "initiated",
            SessionState::InProgress => "in_progress",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A multipart upload session, initiated before uploading an object in parts.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartSession {
    /// Opaque upload token returned to the client.
    pub upload_id: String,

    /// Target bucket.
    pub bucket_name: String,

    /// Target object name.
    pub object_name: String,

    /// Custom metadata applied to the assembled object.
    pub metadata: Json<UserMetadata>,

    /// ACL applied to the assembled object.
    pub acl: Json<Acl>,

    /// Current lifecycle state.
    pub state: SessionState,

    /// When the session was created. The GC TTL is measured from here.
    pub created_at: DateTime<Utc>,

    /// When the state last changed.
    pub updated_at: DateTime<Utc>,
}

/// A single uploaded part. Owned by its session.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartPart {
    /// Owning session.
    pub upload_id: String,

    /// Part number (1-based). Assembly order is ascending part number.
    pub part_id: i64,

    /// Digest of the part bytes.
    pub content_hash: String,

    /// Blob location in the object-data pool.
    pub backend_key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Timestamp when this part was uploaded.
    pub uploaded_at: DateTime<Utc>,
}
