//! 路由装配：在挂载前缀下注册文件处理器并挂上中间件。

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::any;
use axum::{Router, middleware};
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::files;
use crate::http::{add_cors_headers, add_security_headers, client_ip};
use crate::storage::Storage;
use crate::upload::UploadConfig;

/// `mount_prefix` 需已规范化（见 `config::normalize_mount_prefix`），空串表示挂在根路径。
pub fn build_router(
    storage: Arc<Storage>,
    upload: Arc<UploadConfig>,
    mount_prefix: &str,
) -> Router {
    let mut router = Router::new()
        .route(&format!("{mount_prefix}/"), any(files::browse_root))
        .route(&format!("{mount_prefix}/{{*path}}"), any(files::browse_path));
    if !mount_prefix.is_empty() {
        router = router.route(mount_prefix, any(files::browse_root));
    }

    router
        .layer(DefaultBodyLimit::max(upload.body_limit()))
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_cors_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip = client_ip(request),
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(upload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body as AxumBody, to_bytes};
    use axum::http::{Method, StatusCode, header};
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::http::CORS_ALLOWED_METHODS;
    use crate::test_support::multipart_request;

    fn make_router(prefix: &str, max_upload: u64) -> (tempfile::TempDir, Arc<Storage>, Router) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(&root).expect("create storage root");
        let storage = Arc::new(Storage::new(root));
        let upload = Arc::new(UploadConfig {
            max_part_size: max_upload,
            max_form_size: max_upload,
        });
        let router = build_router(storage.clone(), upload, prefix);
        (temp, storage, router)
    }

    fn get(uri: &str) -> Request<AxumBody> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(AxumBody::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn responses_carry_cors_headers() {
        let (_temp, _storage, router) = make_router("/browse", 1024);
        let response = router.oneshot(get("/browse/")).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            CORS_ALLOWED_METHODS
        );
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    }

    #[tokio::test]
    async fn error_responses_carry_cors_headers() {
        let (_temp, _storage, router) = make_router("/browse", 1024);
        let response = router.oneshot(get("/browse/missing")).await.expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn bare_prefix_serves_root_listing() {
        let (_temp, _storage, router) = make_router("/browse", 1024);
        let response = router.oneshot(get("/browse")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn nested_percent_encoded_path_is_decoded() {
        let (_temp, storage, router) = make_router("/browse", 1024);
        let dir = storage.root_path().join("my docs");
        std::fs::create_dir(&dir).expect("create dir");
        std::fs::write(dir.join("a b.txt"), b"spaced").expect("write file");

        let response = router
            .oneshot(get("/browse/my%20docs/a%20b.txt"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert_eq!(&body[..], b"spaced");
    }

    #[tokio::test]
    async fn traversal_stays_inside_root() {
        let (temp, _storage, router) = make_router("/browse", 1024);
        std::fs::write(temp.path().join("outside.txt"), b"secret").expect("write file");

        let response = router
            .oneshot(get("/browse/..%2Foutside.txt"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn root_mount_serves_from_slash() {
        let (_temp, storage, router) = make_router("", 1024);
        std::fs::write(storage.root_path().join("top.txt"), b"top").expect("write file");

        let response = router.oneshot(get("/top.txt")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oversize_body_is_bad_request() {
        let (_temp, storage, router) = make_router("/browse", 16);
        let big = "x".repeat(128 * 1024);
        let request = multipart_request("/browse/", &[("files", "big.bin", big.as_str())]);

        let response = router.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let entries = std::fs::read_dir(storage.root_path()).expect("read dir").count();
        assert_eq!(entries, 0);
    }
}
