//! Represents an object stored in a bucket.

use super::acl::Acl;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::collections::BTreeMap;

/// Custom metadata collected from prefixed request headers.
///
/// Keys are ordered by name; each key holds every value supplied for it.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct UserMetadata(pub BTreeMap<String, Vec<String>>);

impl UserMetadata {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }
}

/// Metadata row for a committed object.
///
/// The row exists only while `backend_key` resolves to committed bytes in the
/// object-data pool.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Parent bucket name.
    pub bucket_name: String,

    /// Object name, unique within its bucket.
    pub object_name: String,

    /// Content digest echoed to clients as the ETag.
    pub content_hash: String,

    /// Custom metadata.
    pub metadata: Json<UserMetadata>,

    /// Object ACL, independent of the bucket ACL.
    pub acl: Json<Acl>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Blob location in the object-data pool.
    pub backend_key: String,

    /// Timestamp of the write that produced this row.
    pub last_modified: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_metadata_keeps_repeated_values() {
        let mut metadata = UserMetadata::default();
        metadata.insert("c-meta-tag", "a");
        metadata.insert("c-meta-tag", "b");

        assert_eq!(metadata.get("c-meta-tag").unwrap(), ["a", "b"]);
        assert!(metadata.get("c-meta-other").is_none());
        assert_eq!(
            serde_json::to_string(&metadata).unwrap(),
            r#"{"c-meta-tag":["a","b"]}"#
        );
    }
}
