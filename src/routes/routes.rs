//! Route table for the gateway.
//!
//! ## Structure
//! - **Probes**: `GET /healthz`, `GET /readyz`
//! - **Buckets**
//!   - `GET    /createbucket/{bucket}`
//!   - `DELETE /deletebucket/{bucket}`
//!   - `POST   /acl/{bucket}`
//! - **Objects**
//!   - `POST   /upload/{bucket}/{object}`
//!   - `GET    /download/{bucket}/{object}`
//!   - `DELETE /delete/{bucket}/{object}`
//! - **Multipart**, all `POST /uploads/{op}/{bucket}/{object}` with the
//!   upload id in the `UploadId` query parameter (except `create`).

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        multipart_handlers::{
            abort_multipart_upload, complete_multipart_upload, create_multipart_upload,
            upload_part,
        },
        object_handlers::{
            create_bucket, delete_bucket, delete_object, get_object, set_bucket_acl,
            upload_object,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build the router. Buffered request bodies larger than `max_body_bytes`
/// are rejected with 413 before reaching a handler; streamed uploads are
/// bounded by the storage service.
pub fn routes(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Bucket-level routes
        .route("/createbucket/{bucket}", get(create_bucket))
        .route("/deletebucket/{bucket}", delete(delete_bucket))
        .route("/acl/{bucket}", post(set_bucket_acl))
        // Object-level routes
        .route("/upload/{bucket}/{object}", post(upload_object))
        .route("/download/{bucket}/{object}", get(get_object))
        .route("/delete/{bucket}/{object}", delete(delete_object))
        // Multipart routes
        .route(
            "/uploads/create/{bucket}/{object}",
            post(create_multipart_upload),
        )
        .route("/uploads/upload/{bucket}/{object}", post(upload_part))
        .route(
            "/uploads/complete/{bucket}/{object}",
            post(complete_multipart_upload),
        )
        .route(
            "/uploads/abort/{bucket}/{object}",
            post(abort_multipart_upload),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::actor::ActorId,
        services::{
            object_backend::Pool,
            storage_service::{StorageService, testing::service},
        },
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
        response::Response,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    async fn app() -> (Router, StorageService) {
        let (storage, _) = service().await;
        let router = routes(1024 * 1024).with_state(AppState::new(storage.clone()));
        (router, storage)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        actor: &str,
        headers: &[(&str, &str)],
        body: impl Into<Body>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(body.into()).unwrap();
        request.extensions_mut().insert(ActorId(actor.to_string()));
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_then_download_round_trips_bytes_and_metadata() {
        let (app, _) = app().await;

        let res = send(&app, Method::GET, "/createbucket/photos", "alice", &[], Body::empty()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let bucket = json(res).await;
        assert_eq!(bucket["owner"], "alice");
        assert_eq!(bucket["acl"], "private");

        let res = send(
            &app,
            Method::POST,
            "/upload/photos/cat.png",
            "alice",
            &[("c-meta-color", "grey")],
            "meow",
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let etag = res.headers()[header::ETAG].to_str().unwrap().to_string();
        assert_eq!(etag, format!("\"{:x}\"", md5::compute(b"meow")));

        let res = send(&app, Method::GET, "/download/photos/cat.png", "alice", &[], Body::empty()).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::ETAG], etag.as_str());
        assert_eq!(res.headers()["c-meta-color"], "grey");
        assert_eq!(res.headers()[header::CONTENT_LENGTH], "4");
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"meow");
    }

    #[tokio::test]
    async fn error_statuses_follow_error_kind() {
        let (app, _) = app().await;
        send(&app, Method::GET, "/createbucket/photos", "alice", &[], Body::empty()).await;

        let res = send(&app, Method::GET, "/createbucket/photos", "bob", &[], Body::empty()).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(json(res).await["status"], 409);

        let res = send(&app, Method::POST, "/upload/photos/a.txt", "bob", &[], "x").await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = send(&app, Method::GET, "/download/photos/none", "alice", &[], Body::empty()).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = send(
            &app,
            Method::GET,
            "/createbucket/other",
            "alice",
            &[("c-acl", "world-writable")],
            Body::empty(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = send(
            &app,
            Method::POST,
            "/upload/photos/a.txt",
            "alice",
            &[("content-md5", "00000000000000000000000000000000")],
            "x",
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn public_read_object_is_readable_by_anyone() {
        let (app, _) = app().await;
        send(&app, Method::GET, "/createbucket/photos", "alice", &[], Body::empty()).await;
        send(
            &app,
            Method::POST,
            "/upload/photos/open.txt",
            "alice",
            &[("c-acl", "public-read")],
            "hi",
        )
        .await;

        let res = send(&app, Method::GET, "/download/photos/open.txt", "bob", &[], Body::empty()).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(&app, Method::DELETE, "/delete/photos/open.txt", "bob", &[], Body::empty()).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = send(&app, Method::DELETE, "/delete/photos/open.txt", "alice", &[], Body::empty()).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn multipart_over_http() {
        let (app, storage) = app().await;
        send(&app, Method::GET, "/createbucket/photos", "alice", &[], Body::empty()).await;

        let res = send(
            &app,
            Method::POST,
            "/uploads/create/photos/big.bin",
            "alice",
            &[],
            Body::empty(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let upload_id = json(res).await["uploadID"].as_str().unwrap().to_string();

        for (n, chunk) in [(2, "BB"), (1, "AA")] {
            let uri = format!("/uploads/upload/photos/big.bin?PartNumber={n}&UploadId={upload_id}");
            let res = send(&app, Method::POST, &uri, "alice", &[], chunk).await;
            assert_eq!(res.status(), StatusCode::OK);
            assert!(res.headers().contains_key(header::ETAG));
        }

        let wrong = format!("/uploads/upload/photos/other.bin?PartNumber=3&UploadId={upload_id}");
        let res = send(&app, Method::POST, &wrong, "alice", &[], "CC").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let uri = format!("/uploads/complete/photos/big.bin?UploadId={upload_id}");
        let body = r#"{"Parts":[{"PartID":"2"},{"PartID":1}]}"#;
        let res = send(&app, Method::POST, &uri, "alice", &[], body).await;
        assert_eq!(res.status(), StatusCode::OK);
        let completed = json(res).await;
        assert_eq!(completed["size"], 4);
        assert_eq!(completed["ETag"], format!("{:x}", md5::compute(b"AABB")));

        let (_, data) = storage.get_object("alice", "photos", "big.bin").await.unwrap();
        assert_eq!(&data.into_bytes().await.unwrap()[..], b"AABB");

        let res = send(&app, Method::POST, &uri, "alice", &[], body).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn abort_over_http_is_terminal() {
        let (app, _) = app().await;
        send(&app, Method::GET, "/createbucket/photos", "alice", &[], Body::empty()).await;
        let res = send(
            &app,
            Method::POST,
            "/uploads/create/photos/big.bin",
            "alice",
            &[],
            Body::empty(),
        )
        .await;
        let upload_id = json(res).await["uploadID"].as_str().unwrap().to_string();

        let uri = format!("/uploads/abort/photos/big.bin?UploadId={upload_id}");
        let res = send(&app, Method::POST, &uri, "alice", &[], Body::empty()).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let res = send(&app, Method::POST, &uri, "alice", &[], Body::empty()).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let part = format!("/uploads/upload/photos/big.bin?PartNumber=1&UploadId={upload_id}");
        let res = send(&app, Method::POST, &part, "alice", &[], "AA").await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let (storage, backend) = service().await;
        let storage = storage.with_max_object_bytes(8);
        let app = routes(1024).with_state(AppState::new(storage.clone()));
        send(&app, Method::GET, "/createbucket/photos", "alice", &[], Body::empty()).await;

        let res = send(&app, Method::POST, "/upload/photos/a", "alice", &[], "0123456789").await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(storage.store.fetch_object("photos", "a").await.unwrap().is_none());
        assert_eq!(backend.len(Pool::ObjectData), 0);

        let res = send(&app, Method::POST, "/upload/photos/a", "alice", &[], "01234567").await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn download_streams_body_with_declared_length() {
        let (app, _) = app().await;
        send(&app, Method::GET, "/createbucket/photos", "alice", &[], Body::empty()).await;

        let chunks: Vec<Result<bytes::Bytes, std::io::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"chunk-one|")),
            Ok(bytes::Bytes::from_static(b"chunk-two")),
        ];
        let body = Body::from_stream(futures::stream::iter(chunks));
        let res = send(&app, Method::POST, "/upload/photos/log", "alice", &[], body).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(&app, Method::GET, "/download/photos/log", "alice", &[], Body::empty()).await;
        assert_eq!(res.headers()[header::CONTENT_LENGTH], "19");
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"chunk-one|chunk-two");
    }

    #[tokio::test]
    async fn readiness_reports_every_pool() {
        let (app, _) = app().await;
        let res = send(&app, Method::GET, "/readyz", "root", &[], Body::empty()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json(res).await;
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["rgw.bucket.data"]["ok"], true);
        assert_eq!(body["checks"]["rgw.user.uid"]["ok"], true);
        assert_eq!(body["checks"]["rgw.bucket.index"]["ok"], true);
    }
}
