//! HTTP handlers for multipart uploads.

use crate::{
    errors::AppError,
    handlers::{
        actor::ActorId,
        headers::{acl_from_headers, content_md5, user_metadata},
        object_handlers::{body_stream, etag_response, etag_value},
    },
    services::multipart_service::CompletedPart,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(rename = "UploadId")]
    pub upload_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PartQuery {
    #[serde(rename = "UploadId")]
    pub upload_id: String,
    #[serde(rename = "PartNumber")]
    pub part_number: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedUpload {
    #[serde(rename = "uploadID")]
    pub upload_id: String,
    pub bucket: String,
    pub object: String,
}

#[derive(Debug, Serialize)]
pub struct CompletedUpload {
    pub bucket: String,
    pub object: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    pub size: i64,
}

/// Completion body: `{"Parts": [...]}` or a bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CompleteRequest {
    Wrapped {
        #[serde(rename = "Parts")]
        parts: Vec<PartEntry>,
    },
    Bare(Vec<PartEntry>),
}

#[derive(Debug, Deserialize)]
struct PartEntry {
    #[serde(rename = "PartID")]
    part_id: PartNumber,
    #[serde(rename = "ETag", default)]
    etag: Option<String>,
}

/// Part numbers arrive as JSON numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PartNumber {
    Number(u32),
    Text(String),
}

impl PartNumber {
    fn resolve(&self) -> Result<u32, AppError> {
        match self {
            PartNumber::Number(n) => Ok(*n),
            PartNumber::Text(text) => parse_part_number(text),
        }
    }
}

fn parse_part_number(text: &str) -> Result<u32, AppError> {
    text.trim()
        .parse::<u32>()
        .map_err(|_| AppError::bad_request(format!("invalid part number `{text}`")))
}

fn parse_complete_body(body: &[u8]) -> Result<Vec<CompletedPart>, AppError> {
    let request: CompleteRequest = serde_json::from_slice(body)
        .map_err(|err| AppError::bad_request(format!("malformed completion body: {err}")))?;
    let entries = match request {
        CompleteRequest::Wrapped { parts } | CompleteRequest::Bare(parts) => parts,
    };
    entries
        .into_iter()
        .map(|entry| {
            Ok(CompletedPart {
                part_id: entry.part_id.resolve()?,
                etag: entry.etag,
            })
        })
        .collect()
}

/// `POST /uploads/create/{bucket}/{object}`
pub async fn create_multipart_upload(
    State(state): State<AppState>,
    actor: ActorId,
    Path((bucket, object)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let acl = acl_from_headers(actor.as_str(), &headers)?;
    let session = state
        .multipart
        .create_session(actor.as_str(), &bucket, &object, user_metadata(&headers), acl)
        .await?;

    Ok(Json(CreatedUpload {
        upload_id: session.upload_id,
        bucket,
        object,
    }))
}

/// `POST /uploads/upload/{bucket}/{object}?PartNumber=&UploadId=`
pub async fn upload_part(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(q): Query<PartQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let part_id = parse_part_number(&q.part_number)?;
    state
        .multipart
        .session_for(&q.upload_id, &bucket, &object)
        .await?;

    let part = state
        .multipart
        .upload_part(
            &q.upload_id,
            part_id,
            body_stream(body),
            content_md5(&headers).as_deref(),
        )
        .await?;
    Ok(etag_response(StatusCode::OK, &part.content_hash, Body::empty()))
}

/// `POST /uploads/complete/{bucket}/{object}?UploadId=`
pub async fn complete_multipart_upload(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(q): Query<UploadQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    let parts = parse_complete_body(&body)?;
    state
        .multipart
        .session_for(&q.upload_id, &bucket, &object)
        .await?;

    let stored = state.multipart.complete_upload(&q.upload_id, &parts).await?;
    let payload = CompletedUpload {
        bucket,
        object,
        etag: stored.content_hash.clone(),
        size: stored.size_bytes,
    };
    let mut response = Json(payload).into_response();
    if let Some(etag) = etag_value(&stored.content_hash) {
        response.headers_mut().insert(header::ETAG, etag);
    }
    Ok(response)
}

/// `POST /uploads/abort/{bucket}/{object}?UploadId=`
pub async fn abort_multipart_upload(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(q): Query<UploadQuery>,
) -> Result<impl IntoResponse, AppError> {
    state
        .multipart
        .session_for(&q.upload_id, &bucket, &object)
        .await?;
    state.multipart.abort_upload(&q.upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
