//! src/services/fs_backend.rs
//!
//! Local-disk implementation of [`ObjectBackend`]. Each pool is a directory
//! beneath `base_path`, and blobs are sharded beneath
//! `base_path/{pool}/{shard}/{shard}/{key}`.

use super::{
    byte_stream::ByteStream,
    object_backend::{BackendError, BackendResult, ObjectBackend, Pool},
};
use async_trait::async_trait;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_BACKEND_KEY_LEN: usize = 255;

#[derive(Clone, Debug)]
pub struct FsBackend {
    /// Base directory holding one subdirectory per pool.
    pub base_path: PathBuf,
}

impl FsBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create every pool directory. Bootstrap only; request handling never
    /// creates pools.
    pub async fn provision(&self) -> BackendResult<()> {
        for pool in Pool::ALL {
            fs::create_dir_all(self.pool_root(pool)).await?;
        }
        Ok(())
    }

    fn pool_root(&self, pool: Pool) -> PathBuf {
        self.base_path.join(pool.name())
    }

    /// Reject keys that could escape the pool directory.
    fn ensure_key_safe(key: &str) -> BackendResult<()> {
        let unsafe_key = key.is_empty()
            || key.len() > MAX_BACKEND_KEY_LEN
            || key.contains('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if unsafe_key {
            return Err(BackendError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid backend key `{key}`"),
            )));
        }
        Ok(())
    }

    /// Two-level shard identifiers from MD5(key), as lowercase hex.
    fn key_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, pool: Pool, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::key_shards(key);
        let mut path = self.pool_root(pool);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn ensure_pool(&self, pool: Pool) -> BackendResult<()> {
        match fs::metadata(self.pool_root(pool)).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(BackendError::PoolUnavailable(pool)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BackendError::PoolUnavailable(pool))
            }
            Err(err) => Err(BackendError::Io(err)),
        }
    }

    /// Remove empty shard directories up to the pool root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectBackend for FsBackend {
    /// Streams into a temporary file, fsyncs, then renames into place so the
    /// blob is never observed half-written.
    async fn put_stream(&self, pool: Pool, key: &str, mut data: ByteStream) -> BackendResult<u64> {
        Self::ensure_key_safe(key)?;
        self.ensure_pool(pool).await?;

        let path = self.blob_path(pool, key);
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BackendError::Io(io::Error::other("blob path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = match File::create(&tmp_path).await {
                // Shard directory pruned by a concurrent delete.
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    fs::create_dir_all(&parent).await?;
                    File::create(&tmp_path).await?
                }
                other => other?,
            };
            let mut size = 0u64;
            while let Some(chunk) = data.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                size += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &path).await?;
            Ok::<_, io::Error>(size)
        }
        .await;

        match written {
            Ok(size) => Ok(size),
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(BackendError::Io(err))
            }
        }
    }

    async fn open(&self, pool: Pool, key: &str) -> BackendResult<ByteStream> {
        Self::ensure_key_safe(key)?;
        self.ensure_pool(pool).await?;
        match File::open(self.blob_path(pool, key)).await {
            Ok(file) => Ok(ByteStream::new(ReaderStream::new(file))),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(BackendError::NotFound {
                pool,
                key: key.to_string(),
            }),
            Err(err) => Err(BackendError::Io(err)),
        }
    }

    async fn delete(&self, pool: Pool, key: &str) -> BackendResult<()> {
        Self::ensure_key_safe(key)?;
        self.ensure_pool(pool).await?;
        let path = self.blob_path(pool, key);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed blob {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BackendError::NotFound {
                    pool,
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(BackendError::Io(err)),
        }

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent, &self.pool_root(pool)).await;
        }
        Ok(())
    }

    async fn check_pools(&self) -> BackendResult<()> {
        for pool in Pool::ALL {
            self.ensure_pool(pool).await?;
        }
        Ok(())
    }
}
