//! src/services/metadata_store.rs
//!
//! Durable records for buckets, objects, multipart sessions and parts, kept
//! in SQLite. Every public method wraps driver failures with the operation
//! name and the resource key.
//!
//! Multi-statement writes open their transaction with a write so SQLite takes
//! the write lock up front instead of upgrading from a read lock mid-flight.

use crate::{
    errors::{StorageError, StorageResult},
    models::{
        acl::Acl,
        bucket::Bucket,
        multipart::{MultipartPart, MultipartSession, SessionState},
        object::Object,
    },
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::sync::Arc;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const OBJECT_COLUMNS: &str = "bucket_name, object_name, content_hash, metadata, acl, \
                              size_bytes, backend_key, last_modified";
const SESSION_COLUMNS: &str = "upload_id, bucket_name, object_name, metadata, acl, state, \
                               created_at, updated_at";
const PART_COLUMNS: &str = "upload_id, part_id, content_hash, backend_key, size_bytes, uploaded_at";

/// Result of a guarded completion.
#[derive(Debug, PartialEq, Eq)]
pub enum Commit {
    /// The session moved to `Completed` and the object row was committed.
    /// Carries the backend key of the object version it replaced.
    Applied { superseded: Option<String> },
    /// The session was no longer live; nothing was written.
    Rejected,
}

#[derive(Clone, Debug)]
pub struct MetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StorageResult<usize> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in &statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt)
                .execute(&*self.db)
                .await
                .map_err(StorageError::metadata("migrate", "schema"))?;
        }
        Ok(statements.len())
    }

    /// Lightweight connectivity check.
    pub async fn ping(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
            .map(|_| ())
            .map_err(StorageError::metadata("ping", "sqlite"))
    }

    // --- buckets ---

    /// Insert a bucket row. A duplicate name is a `Conflict`.
    pub async fn insert_bucket(&self, bucket: &Bucket) -> StorageResult<()> {
        let result = sqlx::query(
            "INSERT INTO buckets (name, owner_id, acl, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&bucket.name)
        .bind(&bucket.owner_id)
        .bind(&bucket.acl)
        .bind(bucket.created_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StorageError::Conflict(format!(
                "bucket `{}` already exists",
                bucket.name
            ))),
            Err(err) => Err(StorageError::metadata("insert_bucket", &bucket.name)(err)),
        }
    }

    pub async fn fetch_bucket(&self, name: &str) -> StorageResult<Option<Bucket>> {
        sqlx::query_as::<_, Bucket>(
            "SELECT name, owner_id, acl, created_at FROM buckets WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.db)
        .await
        .map_err(StorageError::metadata("fetch_bucket", name))
    }

    pub async fn update_bucket_acl(&self, name: &str, acl: &Acl) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE buckets SET acl = ? WHERE name = ?")
            .bind(Json(acl))
            .bind(name)
            .execute(&*self.db)
            .await
            .map_err(StorageError::metadata("update_bucket_acl", name))?;
        Ok(result.rows_affected() == 1)
    }

    /// True if the bucket still holds objects or live multipart sessions.
    pub async fn bucket_has_contents(&self, name: &str) -> StorageResult<bool> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT EXISTS(SELECT 1 FROM objects WHERE bucket_name = ",
        );
        builder.push_bind(name);
        builder.push(") OR EXISTS(SELECT 1 FROM multipart_sessions WHERE bucket_name = ");
        builder.push_bind(name);
        push_state_filter(&mut builder, &SessionState::LIVE);
        builder.push(")");

        builder
            .build_query_scalar::<bool>()
            .fetch_one(&*self.db)
            .await
            .map_err(StorageError::metadata("bucket_has_contents", name))
    }

    pub async fn delete_bucket(&self, name: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM buckets WHERE name = ?")
            .bind(name)
            .execute(&*self.db)
            .await
            .map_err(StorageError::metadata("delete_bucket", name))?;
        Ok(result.rows_affected() == 1)
    }

    // --- objects ---

    pub async fn fetch_object(&self, bucket: &str, object: &str) -> StorageResult<Option<Object>> {
        sqlx::query_as::<_, Object>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE bucket_name = ? AND object_name = ?"
        ))
        .bind(bucket)
        .bind(object)
        .fetch_optional(&*self.db)
        .await
        .map_err(StorageError::metadata("fetch_object", object_ref(bucket, object)))
    }

    /// Commit `object` as the current version of its key. The replaced
    /// version's blob is queued in `retired_blobs`, and its key is returned.
    pub async fn replace_object(&self, object: &Object) -> StorageResult<Option<String>> {
        let key = object_ref(&object.bucket_name, &object.object_name);
        let wrap = || StorageError::metadata("replace_object", key.clone());

        let mut tx = self.db.begin().await.map_err(wrap())?;
        let superseded = replace_object_in(&mut tx, object).await.map_err(wrap())?;
        tx.commit().await.map_err(wrap())?;
        Ok(superseded)
    }

    /// Remove the object row if it still points at `backend_key`. A row
    /// that was overwritten in the meantime is left alone.
    pub async fn delete_object(
        &self,
        bucket: &str,
        object: &str,
        backend_key: &str,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            "DELETE FROM objects WHERE bucket_name = ? AND object_name = ? AND backend_key = ?",
        )
        .bind(bucket)
        .bind(object)
        .bind(backend_key)
        .execute(&*self.db)
        .await
        .map_err(StorageError::metadata("delete_object", object_ref(bucket, object)))?;
        Ok(result.rows_affected() == 1)
    }

    // --- multipart sessions ---

    /// Insert a new session. A live session already targeting the same
    /// object is a `Conflict`.
    pub async fn insert_session(&self, session: &MultipartSession) -> StorageResult<()> {
        let result = sqlx::query(&format!(
            "INSERT INTO multipart_sessions ({SESSION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&session.upload_id)
        .bind(&session.bucket_name)
        .bind(&session.object_name)
        .bind(&session.metadata)
        .bind(&session.acl)
        .bind(session.state)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StorageError::Conflict(format!(
                "an upload for `{}` is already in progress",
                object_ref(&session.bucket_name, &session.object_name)
            ))),
            Err(err) => Err(StorageError::metadata("insert_session", &session.upload_id)(err)),
        }
    }

    pub async fn fetch_session(&self, upload_id: &str) -> StorageResult<Option<MultipartSession>> {
        sqlx::query_as::<_, MultipartSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM multipart_sessions WHERE upload_id = ?"
        ))
        .bind(upload_id)
        .fetch_optional(&*self.db)
        .await
        .map_err(StorageError::metadata("fetch_session", upload_id))
    }

    /// Compare-and-swap on the session state. Returns true only for the
    /// caller whose expected prior state matched.
    pub async fn transition(
        &self,
        upload_id: &str,
        from: &[SessionState],
        to: SessionState,
    ) -> StorageResult<bool> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE multipart_sessions SET state = ");
        builder.push_bind(to);
        builder.push(", updated_at = ");
        builder.push_bind(Utc::now());
        builder.push(" WHERE upload_id = ");
        builder.push_bind(upload_id);
        push_state_filter(&mut builder, from);

        let result = builder
            .build()
            .execute(&*self.db)
            .await
            .map_err(StorageError::metadata("transition_session", upload_id))?;
        Ok(result.rows_affected() == 1)
    }

    /// Move a live session to `Completed` and commit the assembled object in
    /// one transaction.
    pub async fn complete_session(&self, upload_id: &str, object: &Object) -> StorageResult<Commit> {
        let wrap = || StorageError::metadata("complete_session", upload_id);

        let mut tx = self.db.begin().await.map_err(wrap())?;

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE multipart_sessions SET state = ");
        builder.push_bind(SessionState::Completed);
        builder.push(", updated_at = ");
        builder.push_bind(Utc::now());
        builder.push(" WHERE upload_id = ");
        builder.push_bind(upload_id);
        push_state_filter(&mut builder, &SessionState::LIVE);
        let claimed = builder.build().execute(&mut *tx).await.map_err(wrap())?;

        if claimed.rows_affected() != 1 {
            tx.rollback().await.map_err(wrap())?;
            return Ok(Commit::Rejected);
        }

        let superseded = replace_object_in(&mut tx, object).await.map_err(wrap())?;
        tx.commit().await.map_err(wrap())?;
        Ok(Commit::Applied { superseded })
    }

    /// Live sessions created strictly before `cutoff`.
    pub async fn expired_sessions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<MultipartSession>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {SESSION_COLUMNS} FROM multipart_sessions WHERE created_at < "
        ));
        builder.push_bind(cutoff);
        push_state_filter(&mut builder, &SessionState::LIVE);
        builder.push(" ORDER BY created_at ASC");

        builder
            .build_query_as::<MultipartSession>()
            .fetch_all(&*self.db)
            .await
            .map_err(StorageError::metadata("expired_sessions", cutoff.to_rfc3339()))
    }

    // --- parts ---

    /// Insert or overwrite the part row for `(upload_id, part_id)`. The
    /// replaced part's blob is queued in `retired_blobs`, and its key is
    /// returned.
    pub async fn upsert_part(&self, part: &MultipartPart) -> StorageResult<Option<String>> {
        let key = part_ref(&part.upload_id, part.part_id);
        let wrap = || StorageError::metadata("upsert_part", key.clone());

        let mut tx = self.db.begin().await.map_err(wrap())?;
        let superseded = sqlx::query_scalar::<_, String>(
            "DELETE FROM multipart_parts WHERE upload_id = ? AND part_id = ? RETURNING backend_key",
        )
        .bind(&part.upload_id)
        .bind(part.part_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(wrap())?;
        if let Some(old_key) = &superseded {
            retire_in(&mut tx, old_key).await.map_err(wrap())?;
        }

        sqlx::query(&format!(
            "INSERT INTO multipart_parts ({PART_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"
        ))
        .bind(&part.upload_id)
        .bind(part.part_id)
        .bind(&part.content_hash)
        .bind(&part.backend_key)
        .bind(part.size_bytes)
        .bind(part.uploaded_at)
        .execute(&mut *tx)
        .await
        .map_err(wrap())?;

        tx.commit().await.map_err(wrap())?;
        Ok(superseded)
    }

    /// All parts of a session in ascending part order.
    pub async fn fetch_parts(&self, upload_id: &str) -> StorageResult<Vec<MultipartPart>> {
        sqlx::query_as::<_, MultipartPart>(&format!(
            "SELECT {PART_COLUMNS} FROM multipart_parts WHERE upload_id = ? ORDER BY part_id ASC"
        ))
        .bind(upload_id)
        .fetch_all(&*self.db)
        .await
        .map_err(StorageError::metadata("fetch_parts", upload_id))
    }

    /// Remove a part row if it still points at `backend_key`.
    pub async fn delete_part(
        &self,
        upload_id: &str,
        part_id: i64,
        backend_key: &str,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            "DELETE FROM multipart_parts WHERE upload_id = ? AND part_id = ? AND backend_key = ?",
        )
        .bind(upload_id)
        .bind(part_id)
        .bind(backend_key)
        .execute(&*self.db)
        .await
        .map_err(StorageError::metadata("delete_part", part_ref(upload_id, part_id)))?;
        Ok(result.rows_affected() == 1)
    }

    // --- retired blobs ---

    /// Retired blob keys queued strictly before `cutoff`, oldest first.
    pub async fn due_retired_blobs(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StorageResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT backend_key FROM retired_blobs WHERE retired_at < ? \
             ORDER BY retired_at ASC LIMIT ?",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&*self.db)
        .await
        .map_err(StorageError::metadata("due_retired_blobs", cutoff.to_rfc3339()))
    }

    pub async fn count_retired_blobs(&self) -> StorageResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM retired_blobs")
            .fetch_one(&*self.db)
            .await
            .map_err(StorageError::metadata("count_retired_blobs", "retired_blobs"))
    }

    /// Drop a retired blob entry once its bytes are gone.
    pub async fn forget_retired_blob(&self, backend_key: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM retired_blobs WHERE backend_key = ?")
            .bind(backend_key)
            .execute(&*self.db)
            .await
            .map_err(StorageError::metadata("forget_retired_blob", backend_key))?;
        Ok(result.rows_affected() == 1)
    }

    /// Parts whose session is missing or already terminal.
    pub async fn orphaned_parts(&self, limit: i64) -> StorageResult<Vec<MultipartPart>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT p.upload_id, p.part_id, p.content_hash, p.backend_key, p.size_bytes, \
             p.uploaded_at FROM multipart_parts p \
             LEFT JOIN multipart_sessions s ON s.upload_id = p.upload_id \
             WHERE s.upload_id IS NULL OR s.state IN (",
        );
        builder.push_bind(SessionState::Completed);
        builder.push(", ");
        builder.push_bind(SessionState::Aborted);
        builder.push(") ORDER BY p.upload_id, p.part_id LIMIT ");
        builder.push_bind(limit);

        builder
            .build_query_as::<MultipartPart>()
            .fetch_all(&*self.db)
            .await
            .map_err(StorageError::metadata("orphaned_parts", "multipart_parts"))
    }
}

/// Delete-then-insert of the object row inside an open transaction.
async fn replace_object_in(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    object: &Object,
) -> Result<Option<String>, sqlx::Error> {
    let superseded = sqlx::query_scalar::<_, String>(
        "DELETE FROM objects WHERE bucket_name = ? AND object_name = ? RETURNING backend_key",
    )
    .bind(&object.bucket_name)
    .bind(&object.object_name)
    .fetch_optional(&mut **tx)
    .await?;
    if let Some(old_key) = &superseded {
        retire_in(tx, old_key).await?;
    }

    sqlx::query(&format!(
        "INSERT INTO objects ({OBJECT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&object.bucket_name)
    .bind(&object.object_name)
    .bind(&object.content_hash)
    .bind(&object.metadata)
    .bind(&object.acl)
    .bind(object.size_bytes)
    .bind(&object.backend_key)
    .bind(object.last_modified)
    .execute(&mut **tx)
    .await?;

    Ok(superseded)
}

/// Queue a blob no row refers to any more for delayed deletion.
async fn retire_in(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    backend_key: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO retired_blobs (backend_key, retired_at) VALUES (?, ?)")
        .bind(backend_key)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Append ` AND state IN (...)` to a query under construction.
fn push_state_filter(builder: &mut QueryBuilder<'_, Sqlite>, states: &[SessionState]) {
    builder.push(" AND state IN (");
    let mut separated = builder.separated(", ");
    for state in states {
        separated.push_bind(*state);
    }
    separated.push_unseparated(")");
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn object_ref(bucket: &str, object: &str) -> String {
    format!("{bucket}/{object}")
}

fn part_ref(upload_id: &str, part_id: i64) -> String {
    format!("{upload_id}#{part_id}")
}
