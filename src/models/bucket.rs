//! Represents a logical bucket, the top-level container for objects.

use super::acl::Acl;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};

/// A storage bucket.
///
/// Buckets are metadata-only: creating one touches no backend pool. The name
/// is immutable and globally unique (exact, case-sensitive match).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Globally unique bucket name.
    pub name: String,

    /// Actor that created the bucket.
    pub owner_id: String,

    /// Bucket ACL. Objects do not inherit it.
    pub acl: Json<Acl>,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
