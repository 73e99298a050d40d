//! 文件资源处理器：按方法与查询参数分派到列目录、读取、上传、建目录与删除。

use axum::extract::{Extension, Path, Query, Request};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use crate::content::serve_file;
use crate::error::ApiError;
use crate::storage::{ResolvedPath, Storage};
use crate::upload::{UploadConfig, upload_files};

pub const DOWNLOAD_ACTION: &str = "download";
pub const FOLDER_TYPE: &str = "folder";
pub const FOLDER_EXISTS_MESSAGE: &str = "This folder already exists";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

const ACTION_PARAM: &str = "action";
const TYPE_PARAM: &str = "type";

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct BrowseQuery {
    action: Option<String>,
    kind: Option<String>,
}

impl BrowseQuery {
    /// 重复出现的参数只取第一个值，未知参数忽略。
    fn from_uri(uri: &Uri) -> Result<Self, ApiError> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        let mut query = BrowseQuery::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                ACTION_PARAM => &mut query.action,
                TYPE_PARAM => &mut query.kind,
                _ => continue,
            };
            slot.get_or_insert(value);
        }
        Ok(query)
    }
}

/// 请求可映射到的操作。GET/HEAD 在 stat 之后再区分列目录与读取文件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Fetch { download: bool },
    Upload,
    CreateFolder,
    Delete,
    Preflight,
}

impl Operation {
    fn classify(method: &Method, query: &BrowseQuery) -> Option<Self> {
        match *method {
            Method::GET | Method::HEAD => Some(Operation::Fetch {
                download: query.action.as_deref() == Some(DOWNLOAD_ACTION),
            }),
            Method::POST if query.kind.as_deref() == Some(FOLDER_TYPE) => {
                Some(Operation::CreateFolder)
            }
            Method::POST => Some(Operation::Upload),
            Method::DELETE => Some(Operation::Delete),
            Method::OPTIONS => Some(Operation::Preflight),
            _ => None,
        }
    }
}

/// 挂载点本身（存储根目录）。
pub async fn browse_root(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    request: Request,
) -> Result<Response, ApiError> {
    dispatch(&storage, &upload, "", request).await
}

/// 挂载点下的任意路径。
pub async fn browse_path(
    Path(path): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    request: Request,
) -> Result<Response, ApiError> {
    dispatch(&storage, &upload, &path, request).await
}

async fn dispatch(
    storage: &Storage,
    upload: &UploadConfig,
    request_path: &str,
    request: Request,
) -> Result<Response, ApiError> {
    let query = BrowseQuery::from_uri(request.uri())?;
    let operation =
        Operation::classify(request.method(), &query).ok_or(ApiError::MethodNotAllowed)?;
    let target = storage.resolve(request_path);
    debug!(?operation, path = %target.relative().display(), "dispatch");

    match operation {
        Operation::Fetch { download } => fetch(storage, &target, request.headers(), download).await,
        Operation::Upload => Ok(upload_files(&target, upload, request).await?.into_response()),
        Operation::CreateFolder => create_folder(storage, &target).await,
        Operation::Delete => delete_entry(storage, &target).await,
        Operation::Preflight => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn fetch(
    storage: &Storage,
    target: &ResolvedPath,
    headers: &HeaderMap,
    download: bool,
) -> Result<Response, ApiError> {
    let metadata = fs::metadata(target.as_path()).await?;
    if !metadata.is_dir() {
        return serve_file(target.as_path(), headers, download).await;
    }

    let listing = storage.list_dir(target.as_path()).await?;
    info!(
        path = %target.relative().display(),
        directories = listing.directories.len(),
        files = listing.files.len(),
        "list directory"
    );
    let body = serde_json::to_vec(&listing).map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(JSON_CONTENT_TYPE),
        )],
        body,
    )
        .into_response())
}

async fn create_folder(storage: &Storage, target: &ResolvedPath) -> Result<Response, ApiError> {
    match storage.create_dir(target).await {
        Ok(()) => {
            info!(path = %target.relative().display(), "create folder");
            Ok(StatusCode::CREATED.into_response())
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            Err(ApiError::BadRequest(FOLDER_EXISTS_MESSAGE.into()))
        }
        Err(err) => Err(err.into()),
    }
}

async fn delete_entry(storage: &Storage, target: &ResolvedPath) -> Result<Response, ApiError> {
    storage.delete_path(target).await?;
    info!(path = %target.relative().display(), "delete entry");
    Ok(StatusCode::OK.into_response())
}
