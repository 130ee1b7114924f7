//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, no I/O
//! - GET /readyz   -> metadata store ping plus a probe blob in every pool

use crate::{services::object_backend::Pool, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

const PROBE: &[u8] = b"readyz";

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 200 when every check passes, 503 otherwise. The body reports each check
/// by name (`sqlite` and one entry per pool).
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let sqlite = match state.storage.store.ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(err) => CheckStatus::failed(err.to_string()),
    };
    checks.insert("sqlite", sqlite);

    for pool in Pool::ALL {
        checks.insert(pool.name(), probe_pool(&state, pool).await);
    }

    let ready = checks.values().all(|check| check.ok);
    if !ready {
        tracing::warn!(?checks, "readiness check failed");
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok".into() } else { "error".into() },
        checks,
    };
    (status, Json(body))
}

/// Write, read back and delete a throwaway blob.
async fn probe_pool(state: &AppState, pool: Pool) -> CheckStatus {
    let backend = &state.storage.backend;
    let key = format!(".readyz-{}", Uuid::new_v4().simple());

    if let Err(err) = backend.put(pool, &key, Bytes::from_static(PROBE)).await {
        return CheckStatus::failed(format!("write failed: {err}"));
    }
    let read = backend.get(pool, &key).await;
    let cleanup = backend.delete(pool, &key).await;

    match (read, cleanup) {
        (Ok(bytes), Ok(())) if bytes.as_ref() == PROBE => CheckStatus::ok(),
        (Ok(bytes), Err(err)) if bytes.as_ref() == PROBE => CheckStatus {
            ok: true,
            error: Some(format!("could not remove probe: {err}")),
        },
        (Ok(_), _) => CheckStatus::failed("probe content mismatch".into()),
        (Err(err), _) => CheckStatus::failed(format!("read failed: {err}")),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Debug, Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
