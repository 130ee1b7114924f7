//! Backend object store contract.
//!
//! Blobs are addressed by `(pool, key)`. Keys are opaque to the backend; the
//! core allocates a fresh key for every write so an existing blob is never
//! rewritten in place.

use super::byte_stream::ByteStream;
use async_trait::async_trait;
use bytes::Bytes;
use std::{fmt, io};
use thiserror::Error;

/// Logical namespaces that must exist before the core operates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pool {
    /// Object and part payloads.
    ObjectData,
    /// Actor to owned-bucket associations.
    UserIndex,
    /// Per-bucket object listings.
    BucketIndex,
}

impl Pool {
    pub const ALL: [Pool; 3] = [Pool::ObjectData, Pool::UserIndex, Pool::BucketIndex];

    /// Name of the pool on the backend.
    pub fn name(&self) -> &'static str {
        match self {
            Pool::ObjectData => "rgw.bucket.data",
            Pool::UserIndex => "rgw.user.uid",
            Pool::BucketIndex => "rgw.bucket.index",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("blob `{key}` not found in pool `{pool}`")]
    NotFound { pool: Pool, key: String },
    #[error("pool `{0}` is unavailable")]
    PoolUnavailable(Pool),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Byte-addressable blob store split into pools.
///
/// Implementations may retry internally; the core treats every call as a
/// single attempt.
#[async_trait]
pub trait ObjectBackend: Send + Sync + 'static {
    /// Stream `data` into `key`, returning the number of bytes written. The
    /// blob is visible only once fully written; an error from `data` aborts
    /// the write and leaves nothing behind.
    async fn put_stream(&self, pool: Pool, key: &str, data: ByteStream) -> BackendResult<u64>;

    /// Open the blob at `key` for reading.
    async fn open(&self, pool: Pool, key: &str) -> BackendResult<ByteStream>;

    /// Remove the blob at `key`. Returns `NotFound` if it was already gone.
    async fn delete(&self, pool: Pool, key: &str) -> BackendResult<()>;

    /// Verify every pool in [`Pool::ALL`] is reachable.
    async fn check_pools(&self) -> BackendResult<()>;

    /// Store a small in-memory blob.
    async fn put(&self, pool: Pool, key: &str, data: Bytes) -> BackendResult<()> {
        self.put_stream(pool, key, data.into()).await.map(|_| ())
    }

    /// Read a small blob into memory.
    async fn get(&self, pool: Pool, key: &str) -> BackendResult<Bytes> {
        Ok(self.open(pool, key).await?.into_bytes().await?)
    }
}

impl From<BackendError> for io::Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Io(err) => err,
            BackendError::NotFound { .. } => io::Error::new(io::ErrorKind::NotFound, err),
            other => io::Error::other(other),
        }
    }
}
