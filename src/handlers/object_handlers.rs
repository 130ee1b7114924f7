//! HTTP handlers for bucket and single-shot object operations.
//! Header parsing lives in `headers`; storage concerns are delegated to
//! `StorageService`.

use crate::{
    errors::AppError,
    handlers::{
        actor::ActorId,
        headers::{acl_from_headers, content_md5, user_metadata, write_user_metadata},
    },
    models::{bucket::Bucket, object::Object},
    services::{byte_stream::ByteStream, storage_service::NewObject},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::Serialize;
use std::io;

#[derive(Debug, Serialize)]
pub struct BucketView {
    pub bucket: String,
    pub owner: String,
    pub acl: String,
}

impl From<&Bucket> for BucketView {
    fn from(bucket: &Bucket) -> Self {
        Self {
            bucket: bucket.name.clone(),
            owner: bucket.owner_id.clone(),
            acl: bucket.acl.default_policy.to_string(),
        }
    }
}

/// `GET /createbucket/{bucket}`
pub async fn create_bucket(
    State(state): State<AppState>,
    actor: ActorId,
    Path(bucket): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let acl = acl_from_headers(actor.as_str(), &headers)?;
    let created = state
        .storage
        .create_bucket(actor.as_str(), &bucket, acl)
        .await?;
    Ok(Json(BucketView::from(&created)))
}

/// `POST /acl/{bucket}`: replace the bucket ACL from the ACL headers.
pub async fn set_bucket_acl(
    State(state): State<AppState>,
    actor: ActorId,
    Path(bucket): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let acl = acl_from_headers(actor.as_str(), &headers)?;
    let updated = state
        .storage
        .set_bucket_acl(actor.as_str(), &bucket, acl)
        .await?;
    Ok(Json(BucketView::from(&updated)))
}

/// `DELETE /deletebucket/{bucket}`
pub async fn delete_bucket(
    State(state): State<AppState>,
    actor: ActorId,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.storage.delete_bucket(actor.as_str(), &bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /upload/{bucket}/{object}`
pub async fn upload_object(
    State(state): State<AppState>,
    actor: ActorId,
    Path((bucket, object)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let input = NewObject {
        data: body_stream(body),
        content_md5: content_md5(&headers),
        metadata: user_metadata(&headers),
        acl: acl_from_headers(actor.as_str(), &headers)?,
    };
    let stored = state
        .storage
        .put_object(actor.as_str(), &bucket, &object, input)
        .await?;

    Ok(etag_response(StatusCode::OK, &stored.content_hash, Body::empty()))
}

/// `GET /download/{bucket}/{object}`
pub async fn get_object(
    State(state): State<AppState>,
    actor: ActorId,
    Path((bucket, object)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, data) = state
        .storage
        .get_object(actor.as_str(), &bucket, &object)
        .await?;

    let mut response = etag_response(StatusCode::OK, &meta.content_hash, Body::from_stream(data));
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// `DELETE /delete/{bucket}/{object}`
pub async fn delete_object(
    State(state): State<AppState>,
    actor: ActorId,
    Path((bucket, object)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    state
        .storage
        .delete_object(actor.as_str(), &bucket, &object)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request body as a chunk stream, without buffering it.
pub(crate) fn body_stream(body: Body) -> ByteStream {
    ByteStream::new(body.into_data_stream().map_err(io::Error::other))
}

/// Response with the content hash echoed as a quoted `ETag`.
pub(crate) fn etag_response(status: StatusCode, hash: &str, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Some(value) = etag_value(hash) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

pub(crate) fn etag_value(hash: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("\"{hash}\"")).ok()
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", meta.object_name))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    write_user_metadata(headers, &meta.metadata);
}
