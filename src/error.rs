//! 统一的 API 错误类型与文件系统错误分类。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::io::{self, ErrorKind};
use tracing::warn;

use crate::storage::StorageError;

pub const NOT_FOUND_MESSAGE: &str = "404 page not found";
pub const FORBIDDEN_MESSAGE: &str = "403 Forbidden";
pub const INTERNAL_MESSAGE: &str = "500 Internal Server Error";
pub const PROTECTED_ROUTE_MESSAGE: &str = "This route is protected.";
pub const ALLOWED_METHODS: &str = "GET, HEAD, POST, DELETE, OPTIONS";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Forbidden(String),
    Internal(String),
    RangeNotSatisfiable(u64),
    PreconditionFailed,
    MethodNotAllowed,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
            ApiError::RangeNotSatisfiable(size) => {
                let mut headers = HeaderMap::new();
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
                (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    headers,
                    "range not satisfiable",
                )
                    .into_response()
            }
            ApiError::PreconditionFailed => {
                (StatusCode::PRECONDITION_FAILED, "precondition failed").into_response()
            }
            ApiError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS))],
                "method not allowed",
            )
                .into_response(),
        }
    }
}

/// 文件系统错误只在发生处分类一次：不存在、无权限、其余一律视为内部错误。
impl From<io::Error> for ApiError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => ApiError::NotFound(NOT_FOUND_MESSAGE.into()),
            ErrorKind::PermissionDenied => ApiError::Forbidden(FORBIDDEN_MESSAGE.into()),
            _ => {
                warn!(error = %err, "filesystem operation failed");
                ApiError::Internal(INTERNAL_MESSAGE.into())
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::ProtectedRoot => ApiError::Forbidden(PROTECTED_ROUTE_MESSAGE.into()),
            StorageError::Io(err) => err.into(),
            StorageError::Remove(err) => {
                warn!(error = %err, "remove failed");
                ApiError::Internal(err.to_string())
            }
        }
    }
}
