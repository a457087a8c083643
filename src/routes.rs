use crate::errors::{ApiError, StorageError};
use crate::storage::{Download, FileData, FileStorage, StoredReference};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, Query, Request},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post, put},
};
use headers::{Authorization, HeaderMapExt, authorization::Bearer};
use http::{HeaderValue, header};
use mime::Mime;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct ReferenceQuery {
    reference: String,
}

#[derive(Deserialize)]
struct QrCodeRequest {
    content: String,
}

#[derive(Serialize)]
struct UploadedFile {
    filename: Option<String>,
    reference: Option<String>,
}

pub fn router(storage: FileStorage, auth_token: String, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/storage/{*path}", get(serve_file))
        .route("/resolve", get(resolve))
        .route("/display-url", get(display_url))
        .merge(
            Router::new()
                .route(
                    "/upload/{folder}",
                    post(upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
                )
                .route("/files", delete(delete_file))
                .route("/files/exists", get(file_exists))
                .route("/artifacts/{artifact_id}/qr-code", put(store_qr_code))
                .route("/admin/migrate-storage", post(migrate_storage))
                .layer(middleware::from_fn(move |req: Request, next: Next| {
                    let token = auth_token.clone();
                    async move {
                        let bearer = req.headers().typed_get::<Authorization<Bearer>>();
                        match bearer {
                            Some(auth) if auth.token() == token => next.run(req).await,
                            _ => ApiError::Unauthorized.into_response(),
                        }
                    }
                })),
        )
        .layer(Extension(storage))
}

async fn health(Extension(storage): Extension<FileStorage>) -> String {
    format!("OK\nStorage backend: {}", storage.active_kind())
}

async fn upload(
    Path(folder): Path<String>,
    Extension(storage): Extension<FileStorage>,
    mut multipart: Multipart,
) -> Result<Json<Vec<UploadedFile>>, ApiError> {
    let mut files_info = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let content_type = field.content_type().and_then(|m| m.parse::<Mime>().ok());
        let filename = field.file_name().map(|s| s.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let file_data = FileData {
            bytes: data.to_vec(),
            content_type,
            filename: filename.clone(),
        };

        let reference = storage.upload(&file_data, &folder).await;
        if reference.is_none() {
            tracing::warn!(filename = ?filename, folder = %folder, "File was not stored");
        }

        files_info.push(UploadedFile {
            filename,
            reference: reference.map(|r| r.to_string()),
        });
    }

    if files_info.is_empty() {
        return Err(ApiError::BadRequest("No file uploaded".to_string()));
    }

    Ok(Json(files_info))
}

/// Serves bytes for local references only. URLs are handed back to the client
/// as redirects and never fetched on its behalf.
async fn serve_file(
    Path(path): Path<String>,
    Extension(storage): Extension<FileStorage>,
) -> Result<Response, ApiError> {
    match storage.classify(&path) {
        Ok(StoredReference::Local(_)) => {}
        Ok(StoredReference::Cloud(url) | StoredReference::External(url)) => {
            return Ok(Redirect::temporary(&url).into_response());
        }
        Err(_) => {
            tracing::warn!(path = %path, "Rejected storage path");
            return Err(ApiError::Forbidden);
        }
    }

    match storage.download(&path).await {
        Download::Found {
            bytes,
            content_type,
        } => {
            let mut response = Bytes::from(bytes).into_response();
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=31536000"),
            );
            headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
            Ok(response)
        }
        Download::NotFound => {
            tracing::warn!(path = %path, "File not found");
            Err(ApiError::NotFound)
        }
        Download::Rejected => Err(ApiError::Forbidden),
    }
}

async fn resolve(
    Query(query): Query<ReferenceQuery>,
    Extension(storage): Extension<FileStorage>,
) -> Result<Redirect, ApiError> {
    match storage.classify(&query.reference) {
        Ok(StoredReference::Local(path)) => Ok(Redirect::temporary(&format!("/storage/{path}"))),
        Ok(StoredReference::Cloud(url) | StoredReference::External(url)) => {
            Ok(Redirect::temporary(&url))
        }
        Err(_) => Err(ApiError::Forbidden),
    }
}

async fn display_url(
    Query(query): Query<ReferenceQuery>,
    Extension(storage): Extension<FileStorage>,
) -> Json<serde_json::Value> {
    let url = storage.display_url(Some(&query.reference)).await;
    Json(serde_json::json!({ "url": url }))
}

async fn delete_file(
    Query(query): Query<ReferenceQuery>,
    Extension(storage): Extension<FileStorage>,
) -> Json<serde_json::Value> {
    let deleted = storage.delete(Some(&query.reference)).await;
    Json(serde_json::json!({ "deleted": deleted }))
}

async fn file_exists(
    Query(query): Query<ReferenceQuery>,
    Extension(storage): Extension<FileStorage>,
) -> Json<serde_json::Value> {
    let exists = storage.exists(&query.reference).await;
    Json(serde_json::json!({ "exists": exists }))
}

async fn store_qr_code(
    Path(artifact_id): Path<i64>,
    Extension(storage): Extension<FileStorage>,
    Json(request): Json<QrCodeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match storage.store_qr_code(&request.content, artifact_id).await {
        Some(reference) => Ok(Json(serde_json::json!({ "reference": reference.to_string() }))),
        None if request.content.trim().is_empty() => {
            Err(ApiError::BadRequest("QR code content is empty".to_string()))
        }
        None => Err(ApiError::Internal),
    }
}

async fn migrate_storage(
    Extension(storage): Extension<FileStorage>,
) -> Result<impl IntoResponse, ApiError> {
    match storage.migrate_local_files().await {
        Ok(report) => Ok(Json(report)),
        Err(StorageError::NotConfigured(_)) => Err(ApiError::BadRequest(
            "Object storage is not available".to_string(),
        )),
        Err(e) => {
            tracing::error!(error = %e, "Storage migration failed");
            Err(ApiError::Internal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalFileStorage;
    use axum::body::{Body, to_bytes};
    use http::StatusCode;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    const TOKEN: &str = "secret";
    const BOUNDARY: &str = "acervo-boundary";

    fn app() -> (TempDir, Router) {
        let dir = tempdir().unwrap();
        let local =
            LocalFileStorage::new(dir.path().join("uploads"), dir.path().join("static")).unwrap();
        let storage =
            FileStorage::new(Arc::new(local.clone()), local, "cloudinary.com".into()).unwrap();
        (
            dir,
            router(storage, TOKEN.to_string(), crate::config::DEFAULT_MAX_UPLOAD_BYTES),
        )
    }

    fn multipart_upload(folder: &str, filename: &str, bytes: &str, token: Option<&str>) -> Request {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: image/jpeg\r\n\r\n{bytes}\r\n--{BOUNDARY}--\r\n"
        );
        let mut builder = http::Request::builder()
            .method("POST")
            .uri(format!("/upload/{folder}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn get(uri: &str) -> Request {
        http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_then_serve() {
        let (_dir, app) = app();

        let response = app
            .clone()
            .oneshot(multipart_upload("gallery", "photo.jpg", "0123456789", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body[0]["filename"], "photo.jpg");
        let reference = body[0]["reference"].as_str().unwrap().to_string();
        assert!(reference.starts_with("gallery/"));
        assert!(reference.ends_with("_photo.jpg"));

        let response = app
            .oneshot(get(&format!("/storage/{reference}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "public, max-age=31536000"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"0123456789");
    }

    #[tokio::test]
    async fn uploads_above_the_axum_default_limit_are_accepted() {
        let (_dir, app) = app();
        let scan = "p".repeat(3 * 1024 * 1024);

        let response = app
            .oneshot(multipart_upload("3d_models", "scan.ply", &scan, Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let reference = json(response).await[0]["reference"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(reference.starts_with("3d_models/"));
        assert!(reference.ends_with("_scan.ply"));
    }

    #[tokio::test]
    async fn uploads_above_the_configured_limit_are_refused() {
        let dir = tempdir().unwrap();
        let local =
            LocalFileStorage::new(dir.path().join("uploads"), dir.path().join("static")).unwrap();
        let storage =
            FileStorage::new(Arc::new(local.clone()), local, "cloudinary.com".into()).unwrap();
        let app = router(storage, TOKEN.to_string(), 1024);

        let response = app
            .oneshot(multipart_upload("gallery", "photo.jpg", &"x".repeat(4096), Some(TOKEN)))
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn storage_route_redirects_urls_instead_of_fetching_them() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/internal-secret")
            .with_status(200)
            .with_body("TOP-SECRET")
            .expect(0)
            .create_async()
            .await;
        let (_dir, app) = app();
        let url = format!("{}/internal-secret", server.url());

        let response = app.oneshot(get(&format!("/storage/{url}"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], url.as_str());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("TOP-SECRET"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upload_requires_token() {
        let (_dir, app) = app();

        let missing = app
            .clone()
            .oneshot(multipart_upload("gallery", "photo.jpg", "x", None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .oneshot(multipart_upload("gallery", "photo.jpg", "x", Some("nope")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unusable_filename_yields_null_reference() {
        let (_dir, app) = app();

        let response = app
            .oneshot(multipart_upload("gallery", "..", "x", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(json(response).await[0]["reference"].is_null());
    }

    #[tokio::test]
    async fn serving_traversal_is_forbidden_and_missing_is_404() {
        let (_dir, app) = app();

        let traversal = app
            .clone()
            .oneshot(get("/storage/%2E%2E/%2E%2E/etc/passwd"))
            .await
            .unwrap();
        assert_eq!(traversal.status(), StatusCode::FORBIDDEN);

        let missing = app.oneshot(get("/storage/gallery/nothing.jpg")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn resolve_redirects_by_reference_kind() {
        let (_dir, app) = app();

        let cloud = app
            .clone()
            .oneshot(get(
                "/resolve?reference=https%3A%2F%2Fres.cloudinary.com%2Fdemo%2Fimage%2Fupload%2Fa.jpg",
            ))
            .await
            .unwrap();
        assert_eq!(cloud.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            cloud.headers()[header::LOCATION],
            "https://res.cloudinary.com/demo/image/upload/a.jpg"
        );

        let local = app
            .clone()
            .oneshot(get("/resolve?reference=gallery%2Fa.jpg"))
            .await
            .unwrap();
        assert_eq!(local.headers()[header::LOCATION], "/storage/gallery/a.jpg");

        let rejected = app
            .oneshot(get("/resolve?reference=..%2Fsecret"))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn delete_and_exists() {
        let (_dir, app) = app();

        let response = app
            .clone()
            .oneshot(multipart_upload("cvs", "cv.pdf", "pdf", Some(TOKEN)))
            .await
            .unwrap();
        let reference = json(response).await[0]["reference"]
            .as_str()
            .unwrap()
            .to_string();
        let encoded = urlencoding::encode(&reference).into_owned();

        let authed = |method: &str, uri: String| {
            http::Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap()
        };

        let exists = app
            .clone()
            .oneshot(authed("GET", format!("/files/exists?reference={encoded}")))
            .await
            .unwrap();
        assert_eq!(json(exists).await["exists"], true);

        let deleted = app
            .clone()
            .oneshot(authed("DELETE", format!("/files?reference={encoded}")))
            .await
            .unwrap();
        assert_eq!(json(deleted).await["deleted"], true);

        let exists = app
            .oneshot(authed("GET", format!("/files/exists?reference={encoded}")))
            .await
            .unwrap();
        assert_eq!(json(exists).await["exists"], false);
    }

    #[tokio::test]
    async fn qr_code_is_stored_and_served() {
        let (_dir, app) = app();
        let store = |content: &str| {
            http::Request::builder()
                .method("PUT")
                .uri("/artifacts/42/qr-code")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::json!({ "content": content }).to_string()))
                .unwrap()
        };

        let response = app.clone().oneshot(store("ARQ-0042")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["reference"], "qrcodes/qrcode_42.png");

        let served = app
            .clone()
            .oneshot(get("/storage/qrcodes/qrcode_42.png"))
            .await
            .unwrap();
        assert_eq!(served.status(), StatusCode::OK);
        assert_eq!(served.headers()[header::CONTENT_TYPE], "image/png");

        let empty = app.oneshot(store("")).await.unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn migration_needs_object_store() {
        let (_dir, app) = app();

        let response = app
            .oneshot(
                http::Request::builder()
                    .method("POST")
                    .uri("/admin/migrate-storage")
                    .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn display_url_for_missing_file_is_placeholder() {
        let (_dir, app) = app();

        let response = app
            .oneshot(get("/display-url?reference=gallery%2Fmissing.jpg"))
            .await
            .unwrap();
        assert_eq!(
            json(response).await["url"],
            crate::storage::PLACEHOLDER_IMAGE
        );
    }
}
