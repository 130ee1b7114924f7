//! src/services/storage_service.rs
//!
//! StorageService: bucket and single-shot object operations. Payload bytes
//! live in the object-data pool of the backend, durable records in the
//! metadata store.
//!
//! Writes always go to a fresh backend key and the metadata row is swapped
//! afterwards, so a reader sees either the old bytes or the new bytes, and a
//! metadata row never points at bytes that were not fully written. The blob a
//! swap replaces is queued in `retired_blobs` and only deleted by the GC once
//! a grace period has passed, so reads already in flight can finish.

use crate::{
    errors::{StorageError, StorageResult},
    models::{
        acl::{Acl, Action},
        bucket::Bucket,
        object::{Object, UserMetadata},
    },
    services::{
        acl,
        byte_stream::ByteStream,
        metadata_store::MetadataStore,
        object_backend::{BackendError, ObjectBackend, Pool},
    },
};
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use sqlx::types::Json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_OBJECT_NAME_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
/// Row lookups per read when the blob vanished under a concurrent overwrite.
const READ_ATTEMPTS: usize = 3;

/// Payload and attributes of a single-shot write.
#[derive(Debug)]
pub struct NewObject {
    pub data: ByteStream,
    /// Client-supplied `Content-MD5`, hex or base64.
    pub content_md5: Option<String>,
    pub metadata: UserMetadata,
    pub acl: Acl,
}

/// StorageService provides the bucket/object operations:
/// - Create a bucket (metadata only)
/// - Put an object (backend write, then metadata upsert)
/// - Get an object (metadata lookup, then backend read)
/// - Delete an object (backend delete, then metadata delete)
#[derive(Clone)]
pub struct StorageService {
    pub store: MetadataStore,
    pub backend: Arc<dyn ObjectBackend>,
    /// Largest single-shot object or part accepted, in bytes.
    pub max_object_bytes: u64,
}

impl StorageService {
    pub fn new(store: MetadataStore, backend: Arc<dyn ObjectBackend>) -> Self {
        Self {
            store,
            backend,
            max_object_bytes: u64::MAX,
        }
    }

    pub fn with_max_object_bytes(mut self, limit: u64) -> Self {
        self.max_object_bytes = limit;
        self
    }

    /// Validate bucket name format.
    ///
    /// - 3 to 63 characters
    /// - ASCII letters, digits, dots, hyphens and underscores only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots
    ///
    /// Names are compared case-sensitively.
    fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| {
            Err(StorageError::Validation(format!(
                "bucket `{name}` invalid: {reason}"
            )))
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return invalid("must be between 3 and 63 characters");
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return invalid("allowed characters are letters, digits, dots, hyphens and underscores");
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return invalid("must start and end with a letter, digit or underscore");
        }
        if name.contains("..") {
            return invalid("cannot contain consecutive dots");
        }
        Ok(())
    }

    pub(crate) fn ensure_object_name_safe(name: &str) -> StorageResult<()> {
        if name.is_empty() || name.len() > MAX_OBJECT_NAME_LEN {
            return Err(StorageError::Validation(
                "object name must be 1-1024 bytes".into(),
            ));
        }
        if name.bytes().any(|b| b.is_ascii_control()) {
            return Err(StorageError::Validation(
                "object name contains control characters".into(),
            ));
        }
        Ok(())
    }

    /// Fetch bucket metadata. Returns NotFound if missing.
    pub async fn fetch_bucket(&self, name: &str) -> StorageResult<Bucket> {
        self.store
            .fetch_bucket(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("bucket `{name}`")))
    }

    /// Confirm the bucket exists and `actor` may create objects in it.
    pub async fn authorize_bucket_write(&self, actor: &str, bucket: &str) -> StorageResult<Bucket> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        acl::require(actor, &bucket_rec.acl, Action::Write, bucket)?;
        Ok(bucket_rec)
    }

    /// Create a bucket owned by `owner`.
    ///
    /// Returns Conflict if the name is taken.
    pub async fn create_bucket(&self, owner: &str, name: &str, mut acl: Acl) -> StorageResult<Bucket> {
        Self::ensure_bucket_name_safe(name)?;
        acl.owner_id = owner.to_string();

        let bucket = Bucket {
            name: name.to_string(),
            owner_id: owner.to_string(),
            acl: Json(acl),
            created_at: Utc::now(),
        };
        self.store.insert_bucket(&bucket).await?;

        info!(bucket = %name, owner = %owner, "bucket created");
        Ok(bucket)
    }

    /// Replace the bucket ACL. Requires FullControl; the owner is kept.
    pub async fn set_bucket_acl(&self, actor: &str, name: &str, mut acl: Acl) -> StorageResult<Bucket> {
        let mut bucket = self.fetch_bucket(name).await?;
        acl::require(actor, &bucket.acl, Action::FullControl, name)?;

        acl.owner_id = bucket.owner_id.clone();
        if !self.store.update_bucket_acl(name, &acl).await? {
            return Err(StorageError::NotFound(format!("bucket `{name}`")));
        }
        bucket.acl = Json(acl);
        debug!(bucket = %name, actor = %actor, "bucket acl replaced");
        Ok(bucket)
    }

    /// Delete an empty bucket. Requires FullControl.
    ///
    /// Returns Conflict while the bucket holds objects or live uploads.
    pub async fn delete_bucket(&self, actor: &str, name: &str) -> StorageResult<()> {
        let bucket = self.fetch_bucket(name).await?;
        acl::require(actor, &bucket.acl, Action::FullControl, name)?;

        if self.store.bucket_has_contents(name).await? {
            return Err(StorageError::Conflict(format!("bucket `{name}` is not empty")));
        }
        if !self.store.delete_bucket(name).await? {
            return Err(StorageError::NotFound(format!("bucket `{name}`")));
        }
        info!(bucket = %name, actor = %actor, "bucket deleted");
        Ok(())
    }

    /// Write an object.
    ///
    /// - Requires Write on the bucket.
    /// - Streams bytes to a fresh backend key, hashing as they pass.
    /// - Commits the metadata row, replacing any prior version and queueing
    ///   its blob for retirement.
    ///
    /// A backend failure leaves metadata untouched.
    pub async fn put_object(
        &self,
        actor: &str,
        bucket: &str,
        object: &str,
        input: NewObject,
    ) -> StorageResult<Object> {
        Self::ensure_object_name_safe(object)?;
        self.authorize_bucket_write(actor, bucket).await?;

        let target = format!("{bucket}/{object}");
        let backend_key = Uuid::new_v4().to_string();
        let (content_hash, size_bytes) = self
            .write_blob(
                &backend_key,
                input.data,
                self.max_object_bytes,
                input.content_md5.as_deref(),
                "put_object",
                &target,
            )
            .await?;

        let mut acl = input.acl;
        acl.owner_id = actor.to_string();
        let record = Object {
            bucket_name: bucket.to_string(),
            object_name: object.to_string(),
            content_hash,
            metadata: Json(input.metadata),
            acl: Json(acl),
            size_bytes,
            backend_key,
            last_modified: Utc::now(),
        };

        if let Err(err) = self.store.replace_object(&record).await {
            self.discard_blob(&record.backend_key, "put_object").await;
            return Err(err);
        }

        debug!(
            bucket = %bucket,
            object = %object,
            actor = %actor,
            size = size_bytes,
            "object stored"
        );
        Ok(record)
    }

    /// Read an object. Requires Read on the object's own ACL.
    ///
    /// If the blob disappeared because the object was overwritten after its
    /// row was read, the current row is read again. A row whose blob is
    /// missing is a backend error, not NotFound.
    pub async fn get_object(
        &self,
        actor: &str,
        bucket: &str,
        object: &str,
    ) -> StorageResult<(Object, ByteStream)> {
        let target = format!("{bucket}/{object}");
        let mut record = self.fetch_object(bucket, object).await?;
        acl::require(actor, &record.acl, Action::Read, &target)?;

        let mut attempts = 0;
        loop {
            let err = match self.backend.open(Pool::ObjectData, &record.backend_key).await {
                Ok(data) => return Ok((record, data)),
                Err(err) => err,
            };
            attempts += 1;
            if !matches!(err, BackendError::NotFound { .. }) || attempts >= READ_ATTEMPTS {
                return Err(StorageError::backend("get_object", target.as_str())(err));
            }

            let current = self.fetch_object(bucket, object).await?;
            if current.backend_key == record.backend_key {
                return Err(StorageError::backend("get_object", target.as_str())(err));
            }
            debug!(bucket = %bucket, object = %object, "object replaced during read");
            acl::require(actor, &current.acl, Action::Read, &target)?;
            record = current;
        }
    }

    /// Delete an object. Requires Write on the object's ACL.
    ///
    /// The blob goes first, then the row. A blob that is already gone is
    /// treated as deleted so a retry can finish removing the row.
    pub async fn delete_object(&self, actor: &str, bucket: &str, object: &str) -> StorageResult<Object> {
        let record = self.fetch_object(bucket, object).await?;
        acl::require(actor, &record.acl, Action::Write, &format!("{bucket}/{object}"))?;

        match self.backend.delete(Pool::ObjectData, &record.backend_key).await {
            Ok(()) => {}
            Err(BackendError::NotFound { .. }) => {
                debug!(bucket = %bucket, object = %object, "blob already missing");
            }
            Err(err) => {
                return Err(StorageError::backend(
                    "delete_object",
                    format!("{bucket}/{object}"),
                )(err));
            }
        }

        if !self
            .store
            .delete_object(bucket, object, &record.backend_key)
            .await?
        {
            debug!(bucket = %bucket, object = %object, "object replaced during delete");
        }
        info!(bucket = %bucket, object = %object, actor = %actor, "object deleted");
        Ok(record)
    }

    async fn fetch_object(&self, bucket: &str, object: &str) -> StorageResult<Object> {
        self.store
            .fetch_object(bucket, object)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("object `{object}` in bucket `{bucket}`")))
    }

    /// Stream `data` to `backend_key` and verify it against `supplied_md5`.
    /// Returns the stored content hash and the size.
    ///
    /// More than `limit` bytes is `TooLarge`. A digest mismatch discards the
    /// written blob.
    pub(crate) async fn write_blob(
        &self,
        backend_key: &str,
        data: ByteStream,
        limit: u64,
        supplied_md5: Option<&str>,
        op: &'static str,
        target: &str,
    ) -> StorageResult<(String, i64)> {
        let (data, meter) = data.metered(limit);
        let written = self
            .backend
            .put_stream(Pool::ObjectData, backend_key, data)
            .await;
        let measured = meter.finish();
        if let Err(err) = written {
            if measured.too_large {
                return Err(StorageError::TooLarge(format!(
                    "`{target}` exceeds {limit} bytes"
                )));
            }
            return Err(StorageError::backend(op, target)(err));
        }

        match resolve_content_hash(&measured.digest, supplied_md5) {
            Ok(hash) => Ok((hash, i64::try_from(measured.size).unwrap_or(i64::MAX))),
            Err(err) => {
                self.discard_blob(backend_key, op).await;
                Err(err)
            }
        }
    }

    /// Delete a blob that was written but never committed. Failure leaves an
    /// orphan, which is logged.
    pub(crate) async fn discard_blob(&self, backend_key: &str, op: &str) {
        match self.backend.delete(Pool::ObjectData, backend_key).await {
            Ok(()) | Err(BackendError::NotFound { .. }) => {}
            Err(err) => warn!(%backend_key, %op, error = %err, "failed to discard blob"),
        }
    }
}

/// Resolve the content hash stored for bytes with MD5 `digest`.
///
/// Without a supplied value this is the lowercase hex MD5. A supplied value
/// (hex or base64 digest, optionally quoted) must match the bytes and is kept
/// verbatim.
pub fn resolve_content_hash(digest: &md5::Digest, supplied: Option<&str>) -> StorageResult<String> {
    let hex = format!("{digest:x}");

    let Some(raw) = supplied.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(hex);
    };
    let unquoted = raw.trim_matches('"');

    let matches_hex = unquoted.eq_ignore_ascii_case(&hex);
    let matches_b64 = general_purpose::STANDARD
        .decode(unquoted)
        .is_ok_and(|bytes| bytes.as_slice() == digest.0.as_slice());

    if matches_hex || matches_b64 {
        Ok(unquoted.to_string())
    } else {
        Err(StorageError::Validation(format!(
            "Content-MD5 `{raw}` does not match the received bytes"
        )))
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::*, *};
    use crate::{
        models::acl::{CannedPolicy, Permission},
        services::{
            metadata_store::testing::memory_store,
            object_backend::memory::{GatedBackend, MemoryBackend},
        },
    };
    use chrono::Duration;

    #[tokio::test]
    async fn create_bucket_once_then_conflict() {
        let (svc, _) = service().await;
        let bucket = svc
            .create_bucket("alice", "photos", Acl::private("ignored"))
            .await
            .unwrap();
        assert_eq!(bucket.acl.owner_id, "alice");

        assert!(matches!(
            svc.create_bucket("bob", "photos", Acl::private("bob")).await,
            Err(StorageError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn rejects_malformed_bucket_names() {
        let (svc, _) = service().await;
        for name in ["ab", "-photos", "pho..tos", "with space"] {
            assert!(matches!(
                svc.create_bucket("alice", name, Acl::private("alice")).await,
                Err(StorageError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn put_then_get_returns_same_bytes() {
        let (svc, _) = service().await;
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();

        let mut input = new_object(b"meow");
        input.metadata.insert("c-meta-color", "grey");
        let stored = svc.put_object("alice", "photos", "cat.txt", input).await.unwrap();
        assert_eq!(stored.content_hash, format!("{:x}", md5::compute(b"meow")));

        let (record, data) = read_object(&svc, "photos", "cat.txt").await;
        assert_eq!(&data[..], b"meow");
        assert_eq!(record.metadata.get("c-meta-color").unwrap(), ["grey"]);
    }

    #[tokio::test]
    async fn put_requires_bucket_write() {
        let (svc, _) = service().await;
        svc.create_bucket(
            "alice",
            "photos",
            Acl::private("alice").with_policy(CannedPolicy::PublicRead),
        )
        .await
        .unwrap();

        assert!(matches!(
            svc.put_object("bob", "photos", "x", new_object(b"x")).await,
            Err(StorageError::Forbidden(_))
        ));
        assert!(matches!(
            svc.put_object("bob", "missing", "x", new_object(b"x")).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn get_checks_object_acl_not_bucket_acl() {
        let (svc, _) = service().await;
        svc.create_bucket(
            "alice",
            "photos",
            Acl::private("alice").grant("bob", Permission::Write),
        )
        .await
        .unwrap();

        svc.put_object("bob", "photos", "mine", new_object(b"b"))
            .await
            .unwrap();
        svc.put_object("alice", "photos", "hers", new_object(b"a"))
            .await
            .unwrap();

        assert!(svc.get_object("bob", "photos", "mine").await.is_ok());
        assert!(matches!(
            svc.get_object("bob", "photos", "hers").await,
            Err(StorageError::Forbidden(_))
        ));
        assert!(matches!(
            svc.get_object("bob", "photos", "absent").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn backend_failure_leaves_metadata_untouched() {
        let (svc, backend) = service().await;
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();
        svc.put_object("alice", "photos", "cat", new_object(b"v1"))
            .await
            .unwrap();

        backend.fail_writes(true);
        assert!(matches!(
            svc.put_object("alice", "photos", "cat", new_object(b"v2")).await,
            Err(StorageError::Backend { .. })
        ));
        backend.fail_writes(false);

        let (_, data) = read_object(&svc, "photos", "cat").await;
        assert_eq!(&data[..], b"v1");
        assert_eq!(backend.len(Pool::ObjectData), 1);
    }

    #[tokio::test]
    async fn content_md5_mismatch_discards_written_blob() {
        let (svc, backend) = service().await;
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();

        let mut input = new_object(b"meow");
        input.content_md5 = Some(format!("{:x}", md5::compute(b"purr")));
        assert!(matches!(
            svc.put_object("alice", "photos", "cat", input).await,
            Err(StorageError::Validation(_))
        ));
        assert_eq!(backend.len(Pool::ObjectData), 0);
        assert!(svc.store.fetch_object("photos", "cat").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_object_is_too_large() {
        let (svc, backend) = service().await;
        let svc = svc.with_max_object_bytes(4);
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();

        svc.put_object("alice", "photos", "fits", new_object(b"four"))
            .await
            .unwrap();
        assert!(matches!(
            svc.put_object("alice", "photos", "big", new_object(b"fives")).await,
            Err(StorageError::TooLarge(_))
        ));
        assert_eq!(backend.len(Pool::ObjectData), 1);
        assert!(svc.store.fetch_object("photos", "big").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwrite_queues_previous_blob_for_retirement() {
        let (svc, backend) = service().await;
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();
        let first = svc
            .put_object("alice", "photos", "cat", new_object(b"v1"))
            .await
            .unwrap();
        let second = svc
            .put_object("alice", "photos", "cat", new_object(b"v2"))
            .await
            .unwrap();

        assert!(backend.contains(Pool::ObjectData, &first.backend_key));
        assert!(backend.contains(Pool::ObjectData, &second.backend_key));

        let due = svc
            .store
            .due_retired_blobs(Utc::now() + Duration::seconds(1), 10)
            .await
            .unwrap();
        assert_eq!(due, vec![first.backend_key]);
    }

    #[tokio::test]
    async fn reader_racing_an_overwrite_gets_the_old_bytes() {
        let backend = Arc::new(MemoryBackend::default());
        let gate = Arc::new(GatedBackend::new(backend.clone()));
        let svc = StorageService::new(memory_store().await, gate.clone());
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();
        let first = svc
            .put_object("alice", "photos", "cat", new_object(b"v1"))
            .await
            .unwrap();

        gate.arm();
        let reader = tokio::spawn({
            let svc = svc.clone();
            async move { read_object(&svc, "photos", "cat").await }
        });
        gate.entered().await;

        svc.put_object("alice", "photos", "cat", new_object(b"v2"))
            .await
            .unwrap();
        gate.release();

        let (record, data) = reader.await.unwrap();
        assert_eq!(record.backend_key, first.backend_key);
        assert_eq!(&data[..], b"v1");
        assert!(backend.contains(Pool::ObjectData, &first.backend_key));
    }

    #[tokio::test]
    async fn reader_follows_overwrite_when_old_blob_is_gone() {
        let backend = Arc::new(MemoryBackend::default());
        let gate = Arc::new(GatedBackend::new(backend.clone()));
        let svc = StorageService::new(memory_store().await, gate.clone());
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();
        let first = svc
            .put_object("alice", "photos", "cat", new_object(b"v1"))
            .await
            .unwrap();

        gate.arm();
        let reader = tokio::spawn({
            let svc = svc.clone();
            async move { read_object(&svc, "photos", "cat").await }
        });
        gate.entered().await;

        let second = svc
            .put_object("alice", "photos", "cat", new_object(b"v2"))
            .await
            .unwrap();
        backend.remove(Pool::ObjectData, &first.backend_key);
        gate.release();

        let (record, data) = reader.await.unwrap();
        assert_eq!(record.backend_key, second.backend_key);
        assert_eq!(&data[..], b"v2");
    }

    #[tokio::test]
    async fn missing_blob_is_backend_error() {
        let (svc, backend) = service().await;
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();
        let stored = svc
            .put_object("alice", "photos", "cat", new_object(b"v1"))
            .await
            .unwrap();
        backend.remove(Pool::ObjectData, &stored.backend_key);

        assert!(matches!(
            svc.get_object("alice", "photos", "cat").await,
            Err(StorageError::Backend {
                source: BackendError::NotFound { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn delete_object_removes_blob_and_row() {
        let (svc, backend) = service().await;
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();
        svc.put_object("alice", "photos", "cat", new_object(b"v1"))
            .await
            .unwrap();

        assert!(matches!(
            svc.delete_object("bob", "photos", "cat").await,
            Err(StorageError::Forbidden(_))
        ));
        svc.delete_object("alice", "photos", "cat").await.unwrap();
        assert_eq!(backend.len(Pool::ObjectData), 0);
        assert!(matches!(
            svc.get_object("alice", "photos", "cat").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_blob_delete_keeps_object() {
        let (svc, backend) = service().await;
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();
        let stored = svc
            .put_object("alice", "photos", "cat", new_object(b"v1"))
            .await
            .unwrap();

        backend.fail_deletes(true);
        assert!(matches!(
            svc.delete_object("alice", "photos", "cat").await,
            Err(StorageError::Backend { op: "delete_object", .. })
        ));
        backend.fail_deletes(false);

        assert!(backend.contains(Pool::ObjectData, &stored.backend_key));
        let (_, data) = read_object(&svc, "photos", "cat").await;
        assert_eq!(&data[..], b"v1");
    }

    #[tokio::test]
    async fn failed_blob_read_is_backend_error() {
        let (svc, backend) = service().await;
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();
        svc.put_object("alice", "photos", "cat", new_object(b"v1"))
            .await
            .unwrap();

        backend.fail_reads(true);
        assert!(matches!(
            svc.get_object("alice", "photos", "cat").await,
            Err(StorageError::Backend {
                source: BackendError::Io(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn delete_bucket_requires_empty() {
        let (svc, _) = service().await;
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();
        svc.put_object("alice", "photos", "cat", new_object(b"v1"))
            .await
            .unwrap();

        assert!(matches!(
            svc.delete_bucket("alice", "photos").await,
            Err(StorageError::Conflict(_))
        ));
        svc.delete_object("alice", "photos", "cat").await.unwrap();
        assert!(matches!(
            svc.delete_bucket("bob", "photos").await,
            Err(StorageError::Forbidden(_))
        ));
        svc.delete_bucket("alice", "photos").await.unwrap();
        assert!(matches!(
            svc.fetch_bucket("photos").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn set_bucket_acl_keeps_owner() {
        let (svc, _) = service().await;
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();

        let updated = svc
            .set_bucket_acl(
                "alice",
                "photos",
                Acl::private("mallory").with_policy(CannedPolicy::PublicReadWrite),
            )
            .await
            .unwrap();
        assert_eq!(updated.acl.owner_id, "alice");
        assert!(
            svc.put_object("bob", "photos", "x", new_object(b"x"))
                .await
                .is_ok()
        );
        assert!(matches!(
            svc.set_bucket_acl("bob", "photos", Acl::private("bob")).await,
            Err(StorageError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_overwrites_never_mix_bytes() {
        let (svc, backend) = service().await;
        svc.create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();

        let payloads: [&'static [u8]; 4] = [b"AAAAAAAA", b"BBBBBBBB", b"CCCCCCCC", b"DDDDDDDD"];
        let writes = payloads
            .iter()
            .map(|p| svc.put_object("alice", "photos", "race", new_object(*p)));
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let (record, data) = read_object(&svc, "photos", "race").await;
        assert!(payloads.iter().any(|p| &data[..] == *p));
        assert!(backend.contains(Pool::ObjectData, &record.backend_key));
        assert_eq!(backend.len(Pool::ObjectData), 4);
        assert_eq!(svc.store.count_retired_blobs().await.unwrap(), 3);
    }

    #[test]
    fn content_md5_accepts_hex_and_base64() {
        let hex = format!("{:x}", md5::compute(b"hello"));
        let b64 = general_purpose::STANDARD.encode(md5::compute(b"hello").0);

        let digest = md5::compute(b"hello");

        assert_eq!(resolve_content_hash(&digest, None).unwrap(), hex);
        assert_eq!(resolve_content_hash(&digest, Some(&hex)).unwrap(), hex);
        assert_eq!(resolve_content_hash(&digest, Some(&b64)).unwrap(), b64);
        assert!(matches!(
            resolve_content_hash(&digest, Some("deadbeef")),
            Err(StorageError::Validation(_))
        ));
    }
}
