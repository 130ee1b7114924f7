//! Background reclamation of abandoned multipart uploads and retired blobs.
//!
//! Each sweep aborts live sessions older than the TTL through the same path
//! as a client abort, deletes parts whose session is gone or terminal, then
//! deletes blobs that were replaced longer ago than the grace period.

use crate::{
    errors::StorageResult,
    services::{
        multipart_service::MultipartService,
        object_backend::{BackendError, Pool},
        storage_service::StorageService,
    },
};
use chrono::{DateTime, Duration, Utc};
use futures::{StreamExt, stream};
use std::time::Duration as StdDuration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SWEEP_CONCURRENCY: usize = 4;
const ORPHAN_BATCH: i64 = 1000;
const RETIRED_BATCH: i64 = 1000;
/// How long a replaced blob stays readable by requests already in flight.
pub const DEFAULT_BLOB_GRACE_SECS: i64 = 300;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_sessions: usize,
    pub orphaned_parts: usize,
    pub retired_blobs: usize,
}

#[derive(Clone)]
pub struct GarbageCollector {
    multipart: MultipartService,
    storage: StorageService,
    ttl: Duration,
    blob_grace: Duration,
}

impl GarbageCollector {
    pub fn new(multipart: MultipartService, storage: StorageService, ttl: Duration) -> Self {
        Self {
            multipart,
            storage,
            ttl,
            blob_grace: Duration::seconds(DEFAULT_BLOB_GRACE_SECS),
        }
    }

    pub fn with_blob_grace(mut self, grace: Duration) -> Self {
        self.blob_grace = grace;
        self
    }

    /// Run one sweep as of `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> StorageResult<SweepReport> {
        let store = &self.storage.store;
        let cutoff = now - self.ttl;
        let expired = store.expired_sessions(cutoff).await?;

        let outcomes = stream::iter(expired)
            .map(|session| async move {
                let result = self.multipart.terminate(&session.upload_id).await;
                (session, result)
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        let mut report = SweepReport::default();
        for (session, result) in outcomes {
            match result {
                Ok(true) => {
                    debug!(
                        upload_id = %session.upload_id,
                        bucket = %session.bucket_name,
                        object = %session.object_name,
                        "expired upload aborted"
                    );
                    report.expired_sessions += 1;
                }
                // Completed or aborted by a client since the scan.
                Ok(false) => {}
                Err(err) => warn!(upload_id = %session.upload_id, error = %err, "failed to expire upload"),
            }
        }

        for part in store.orphaned_parts(ORPHAN_BATCH).await? {
            if self.multipart.release_part(&part).await {
                report.orphaned_parts += 1;
            }
        }

        let retired_cutoff = now - self.blob_grace;
        for backend_key in store.due_retired_blobs(retired_cutoff, RETIRED_BATCH).await? {
            if self.reclaim_blob(&backend_key).await {
                report.retired_blobs += 1;
            }
        }

        if report != SweepReport::default() {
            info!(
                expired_sessions = report.expired_sessions,
                orphaned_parts = report.orphaned_parts,
                retired_blobs = report.retired_blobs,
                "garbage collection sweep finished"
            );
        }
        Ok(report)
    }

    /// Delete a retired blob, then its queue entry.
    async fn reclaim_blob(&self, backend_key: &str) -> bool {
        match self.storage.backend.delete(Pool::ObjectData, backend_key).await {
            Ok(()) | Err(BackendError::NotFound { .. }) => {}
            Err(err) => {
                warn!(%backend_key, error = %err, "failed to delete retired blob");
                return false;
            }
        }
        match self.storage.store.forget_retired_blob(backend_key).await {
            Ok(forgotten) => forgotten,
            Err(err) => {
                warn!(%backend_key, error = %err, "failed to drop retired blob entry");
                false
            }
        }
    }

    /// Sweep every `interval` until `token` is cancelled.
    pub fn spawn(self, interval: StdDuration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("garbage collector shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep(Utc::now()).await {
                            warn!(error = %err, "garbage collection sweep failed");
                        }
                    }
                }
            }
        })
    }
}
