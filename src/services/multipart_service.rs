//! src/services/multipart_service.rs
//!
//! Multipart upload coordinator. A session moves
//! `Initiated -> InProgress -> {Completed, Aborted}`; every move out of a live
//! state is a compare-and-swap in the metadata store, so a client completion
//! racing a client or GC abort has exactly one winner.

use crate::{
    errors::{StorageError, StorageResult},
    models::{
        acl::Acl,
        multipart::{MAX_PART_ID, MultipartPart, MultipartSession, SessionState},
        object::{Object, UserMetadata},
    },
    services::{
        byte_stream::ByteStream,
        metadata_store::Commit,
        object_backend::{BackendError, Pool},
        storage_service::StorageService,
    },
};
use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use sqlx::types::Json;
use std::{collections::BTreeMap, io};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One entry of a completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_id: u32,
    /// When present, must equal the stored part hash.
    pub etag: Option<String>,
}

impl CompletedPart {
    pub fn new(part_id: u32) -> Self {
        Self {
            part_id,
            etag: None,
        }
    }
}

#[derive(Clone)]
pub struct MultipartService {
    storage: StorageService,
}

impl MultipartService {
    pub fn new(storage: StorageService) -> Self {
        Self { storage }
    }

    /// Start an upload. Requires Write on the bucket.
    ///
    /// Returns Conflict while another live upload targets the same object.
    pub async fn create_session(
        &self,
        actor: &str,
        bucket: &str,
        object: &str,
        metadata: UserMetadata,
        mut acl: Acl,
    ) -> StorageResult<MultipartSession> {
        StorageService::ensure_object_name_safe(object)?;
        self.storage.authorize_bucket_write(actor, bucket).await?;
        acl.owner_id = actor.to_string();

        let now = Utc::now();
        let session = MultipartSession {
            upload_id: Uuid::new_v4().simple().to_string(),
            bucket_name: bucket.to_string(),
            object_name: object.to_string(),
            metadata: Json(metadata),
            acl: Json(acl),
            state: SessionState::Initiated,
            created_at: now,
            updated_at: now,
        };
        self.storage.store.insert_session(&session).await?;

        info!(
            bucket = %bucket,
            object = %object,
            upload_id = %session.upload_id,
            actor = %actor,
            "multipart upload created"
        );
        Ok(session)
    }

    /// Fetch a live session, or NotFound if it is unknown or terminal.
    pub async fn live_session(&self, upload_id: &str) -> StorageResult<MultipartSession> {
        match self.storage.store.fetch_session(upload_id).await? {
            Some(session) if !session.state.is_terminal() => Ok(session),
            _ => Err(StorageError::NotFound(format!("upload `{upload_id}`"))),
        }
    }

    /// Fetch a session and check that it targets `bucket/object`.
    pub async fn session_for(
        &self,
        upload_id: &str,
        bucket: &str,
        object: &str,
    ) -> StorageResult<MultipartSession> {
        match self.storage.store.fetch_session(upload_id).await? {
            Some(session) if session.bucket_name == bucket && session.object_name == object => {
                Ok(session)
            }
            _ => Err(StorageError::NotFound(format!(
                "upload `{upload_id}` for `{bucket}/{object}`"
            ))),
        }
    }

    /// Store one part. Re-uploading a part number replaces the earlier part,
    /// whose blob is queued for retirement.
    ///
    /// The first part moves the session to `InProgress`. Fails with NotFound
    /// if the session is unknown or already terminal.
    pub async fn upload_part(
        &self,
        upload_id: &str,
        part_id: u32,
        data: impl Into<ByteStream>,
        content_md5: Option<&str>,
    ) -> StorageResult<MultipartPart> {
        validate_part_id(part_id)?;
        let session = self.live_session(upload_id).await?;

        if session.state == SessionState::Initiated {
            self.storage
                .store
                .transition(upload_id, &[SessionState::Initiated], SessionState::InProgress)
                .await?;
        }

        let target = format!("{upload_id}#{part_id}");
        let backend_key = Uuid::new_v4().to_string();
        let (content_hash, size_bytes) = self
            .storage
            .write_blob(
                &backend_key,
                data.into(),
                self.storage.max_object_bytes,
                content_md5,
                "upload_part",
                &target,
            )
            .await?;

        let part = MultipartPart {
            upload_id: upload_id.to_string(),
            part_id: i64::from(part_id),
            content_hash,
            backend_key,
            size_bytes,
            uploaded_at: Utc::now(),
        };
        if let Err(err) = self.storage.store.upsert_part(&part).await {
            self.storage.discard_blob(&part.backend_key, "upload_part").await;
            return Err(err);
        }

        // The session may have terminated while the bytes were in flight.
        match self.live_session(upload_id).await {
            Ok(_) => {}
            Err(StorageError::NotFound(what)) => {
                self.release_part(&part).await;
                return Err(StorageError::NotFound(what));
            }
            // Unknown state; the part stays for completion or the GC.
            Err(err) => return Err(err),
        }

        debug!(upload_id = %upload_id, part_id, size = part.size_bytes, "part stored");
        Ok(part)
    }

    /// Assemble the listed parts into the target object.
    ///
    /// Parts are concatenated in ascending part number, whatever order the
    /// caller lists them in. A listed part that was never uploaded fails with
    /// Validation and leaves the session live. Completing a terminal session
    /// is a Conflict.
    pub async fn complete_upload(
        &self,
        upload_id: &str,
        requested: &[CompletedPart],
    ) -> StorageResult<Object> {
        let session = match self.storage.store.fetch_session(upload_id).await? {
            None => return Err(StorageError::NotFound(format!("upload `{upload_id}`"))),
            Some(s) if s.state.is_terminal() => {
                return Err(StorageError::Conflict(format!(
                    "upload `{upload_id}` is already {}",
                    s.state
                )));
            }
            Some(s) => s,
        };
        if requested.is_empty() {
            return Err(StorageError::Validation(
                "completion must list at least one part".into(),
            ));
        }

        let stored = self.storage.store.fetch_parts(upload_id).await?;
        let by_id: BTreeMap<i64, &MultipartPart> = stored.iter().map(|p| (p.part_id, p)).collect();

        let mut selected: BTreeMap<i64, &MultipartPart> = BTreeMap::new();
        for entry in requested {
            let id = i64::from(entry.part_id);
            let part = by_id.get(&id).ok_or_else(|| {
                StorageError::Validation(format!("missing part {}", entry.part_id))
            })?;
            if let Some(etag) = entry.etag.as_deref().map(|e| e.trim().trim_matches('"')) {
                if !etag.is_empty() && etag != part.content_hash {
                    return Err(StorageError::Validation(format!(
                        "part {} ETag `{etag}` does not match",
                        entry.part_id
                    )));
                }
            }
            selected.insert(id, part);
        }

        let backend = self.storage.backend.clone();
        let keys: Vec<String> = selected.values().map(|p| p.backend_key.clone()).collect();
        let assembled = stream::iter(keys)
            .then(move |key| {
                let backend = backend.clone();
                async move {
                    backend
                        .open(Pool::ObjectData, &key)
                        .await
                        .map_err(io::Error::from)
                }
            })
            .try_flatten();

        let target = format!("{}/{}", session.bucket_name, session.object_name);
        let backend_key = Uuid::new_v4().to_string();
        let (content_hash, size_bytes) = self
            .storage
            .write_blob(
                &backend_key,
                ByteStream::new(assembled),
                u64::MAX,
                None,
                "complete_upload",
                &target,
            )
            .await?;

        let record = Object {
            bucket_name: session.bucket_name.clone(),
            object_name: session.object_name.clone(),
            content_hash,
            metadata: session.metadata.clone(),
            acl: session.acl.clone(),
            size_bytes,
            backend_key,
            last_modified: Utc::now(),
        };

        let commit = match self.storage.store.complete_session(upload_id, &record).await {
            Ok(commit) => commit,
            Err(err) => {
                self.storage.discard_blob(&record.backend_key, "complete_upload").await;
                return Err(err);
            }
        };
        let replaced = match commit {
            Commit::Applied { superseded } => superseded.is_some(),
            Commit::Rejected => {
                self.storage.discard_blob(&record.backend_key, "complete_upload").await;
                return Err(StorageError::Conflict(format!(
                    "upload `{upload_id}` was terminated concurrently"
                )));
            }
        };

        let released = self.release_parts_or_warn(upload_id).await;
        info!(
            bucket = %record.bucket_name,
            object = %record.object_name,
            upload_id = %upload_id,
            parts = selected.len(),
            released,
            replaced,
            "multipart upload completed"
        );
        Ok(record)
    }

    /// Abort a live upload and delete its parts. Aborting a terminal session
    /// is a Conflict.
    pub async fn abort_upload(&self, upload_id: &str) -> StorageResult<()> {
        if self.storage.store.fetch_session(upload_id).await?.is_none() {
            return Err(StorageError::NotFound(format!("upload `{upload_id}`")));
        }
        if !self.terminate(upload_id).await? {
            return Err(StorageError::Conflict(format!(
                "upload `{upload_id}` is already terminal"
            )));
        }
        info!(upload_id = %upload_id, "multipart upload aborted");
        Ok(())
    }

    /// Move a live session to `Aborted` and release its parts. Returns false
    /// if the session was not live, in which case nothing is touched.
    pub async fn terminate(&self, upload_id: &str) -> StorageResult<bool> {
        let won = self
            .storage
            .store
            .transition(upload_id, &SessionState::LIVE, SessionState::Aborted)
            .await?;
        if won {
            self.release_parts_or_warn(upload_id).await;
        }
        Ok(won)
    }

    /// Release parts after a terminal transition. The transition already
    /// stands, so a failure here is logged and left to the GC orphan scan.
    async fn release_parts_or_warn(&self, upload_id: &str) -> usize {
        match self.release_parts(upload_id).await {
            Ok(released) => released,
            Err(err) => {
                warn!(
                    upload_id = %upload_id,
                    error = %err,
                    "failed to release parts, leaving them for the collector"
                );
                0
            }
        }
    }

    /// Delete every part of a session, blob first. Returns how many parts
    /// were removed; parts whose blob could not be deleted stay for the GC.
    pub async fn release_parts(&self, upload_id: &str) -> StorageResult<usize> {
        let parts = self.storage.store.fetch_parts(upload_id).await?;
        let mut released = 0;
        for part in &parts {
            if self.release_part(part).await {
                released += 1;
            }
        }
        Ok(released)
    }

    /// Delete one part's blob and then its row.
    pub async fn release_part(&self, part: &MultipartPart) -> bool {
        match self
            .storage
            .backend
            .delete(Pool::ObjectData, &part.backend_key)
            .await
        {
            Ok(()) | Err(BackendError::NotFound { .. }) => {}
            Err(err) => {
                warn!(
                    upload_id = %part.upload_id,
                    part_id = part.part_id,
                    error = %err,
                    "failed to delete part blob, leaving it for the collector"
                );
                return false;
            }
        }

        match self
            .storage
            .store
            .delete_part(&part.upload_id, part.part_id, &part.backend_key)
            .await
        {
            Ok(removed) => removed,
            Err(err) => {
                warn!(
                    upload_id = %part.upload_id,
                    part_id = part.part_id,
                    error = %err,
                    "failed to delete part row, leaving it for the collector"
                );
                false
            }
        }
    }
}

fn validate_part_id(part_id: u32) -> StorageResult<()> {
    if (1..=MAX_PART_ID).contains(&part_id) {
        Ok(())
    } else {
        Err(StorageError::Validation(format!(
            "part number {part_id} must be between 1 and {MAX_PART_ID}"
        )))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::services::{
        object_backend::memory::MemoryBackend,
        storage_service::testing::service,
    };
    use std::sync::Arc;

    /// Coordinator over a fresh store with bucket `photos` owned by alice.
    pub async fn coordinator() -> (MultipartService, StorageService, Arc<MemoryBackend>) {
        let (storage, backend) = service().await;
        storage
            .create_bucket("alice", "photos", Acl::private("alice"))
            .await
            .unwrap();
        (MultipartService::new(storage.clone()), storage, backend)
    }

    pub async fn session(mp: &MultipartService, object: &str) -> String {
        mp.create_session(
            "alice",
            "photos",
            object,
            UserMetadata::default(),
            Acl::private("alice"),
        )
        .await
        .unwrap()
        .upload_id
    }
}
