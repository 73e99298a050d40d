//! multipart 上传：`files` 字段中的每个分段保存为目标目录下的新文件。

use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::staging::StagedFile;
use crate::storage::ResolvedPath;

pub const UPLOAD_FIELD: &str = "files";
const DEFAULT_UPLOAD_NAME: &str = "upload";
/// Allowance on top of the form cap for multipart boundaries and part headers.
const MULTIPART_FRAMING_ALLOWANCE: usize = 64 * 1024;

#[derive(Debug)]
pub struct UploadConfig {
    pub max_part_size: u64,
    pub max_form_size: u64,
}

impl UploadConfig {
    /// Request body limit handed to `DefaultBodyLimit`.
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_form_size)
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_FRAMING_ALLOWANCE)
    }

    fn too_large(&self) -> ApiError {
        ApiError::BadRequest(format!(
            "The uploaded file is too big. Please use a file less than {} bytes in size",
            self.max_part_size
        ))
    }
}

/// 接收并保存上传文件，全部写入后返回 201。
///
/// 所有分段先完整暂存，再依次提交；超限或解析失败时丢弃全部暂存文件，
/// 提交阶段失败时已提交的文件保留。
pub async fn upload_files(
    target: &ResolvedPath,
    config: &UploadConfig,
    request: Request,
) -> Result<StatusCode, ApiError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| {
            warn!(error = %rejection.body_text(), "invalid multipart request");
            ApiError::Internal(rejection.body_text())
        })?;

    let mut staged = Vec::new();
    if let Err(err) = stage_parts(&mut multipart, target.as_path(), config, &mut staged).await {
        for file in staged {
            file.discard().await;
        }
        return Err(err);
    }

    let total = commit_staged(staged).await?;
    info!(path = %target.relative().display(), files = total, "upload complete");
    Ok(StatusCode::CREATED)
}

/// 依次提交暂存文件，返回提交数量。
///
/// 某个文件提交失败时，之前已提交的文件保留，其余暂存文件被丢弃。
async fn commit_staged(staged: Vec<StagedFile>) -> Result<usize, ApiError> {
    let total = staged.len();
    let mut pending = staged.into_iter();
    while let Some(file) = pending.next() {
        let original = file.original_name().to_string();
        match file.commit().await {
            Ok(path) => info!(name = original, path = %path.display(), "uploaded file"),
            Err(err) => {
                warn!(name = original, error = %err, "upload commit failed");
                for rest in pending {
                    rest.discard().await;
                }
                return Err(ApiError::Internal(err.to_string()));
            }
        }
    }
    Ok(total)
}

async fn stage_parts(
    multipart: &mut Multipart,
    dir: &Path,
    config: &UploadConfig,
    staged: &mut Vec<StagedFile>,
) -> Result<(), ApiError> {
    let mut form_size: u64 = 0;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, config))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let original = original_file_name(field.file_name());
        let mut file = StagedFile::create(dir, &original)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        match stream_part(&mut field, &mut file, config, &mut form_size).await {
            Ok(()) => staged.push(file),
            Err(err) => {
                file.discard().await;
                return Err(err);
            }
        }
    }

    Ok(())
}

async fn stream_part(
    field: &mut Field<'_>,
    file: &mut StagedFile,
    config: &UploadConfig,
    form_size: &mut u64,
) -> Result<(), ApiError> {
    let mut part_size: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| multipart_error(err, config))?
    {
        part_size += chunk.len() as u64;
        *form_size += chunk.len() as u64;
        if part_size > config.max_part_size || *form_size > config.max_form_size {
            warn!(
                name = file.original_name(),
                part_size,
                form_size = *form_size,
                "upload rejected: too large"
            );
            return Err(config.too_large());
        }
        file.file_mut()
            .map_err(|err| ApiError::Internal(err.to_string()))?
            .write_all(&chunk)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
    }
    Ok(())
}

fn multipart_error(err: MultipartError, config: &UploadConfig) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!("upload rejected: request body too large");
        return config.too_large();
    }
    warn!(error = %err.body_text(), "multipart parse failed");
    ApiError::Internal(err.body_text())
}

/// 只保留客户端文件名的最后一段并去掉控制字符。
fn original_file_name(raw: Option<&str>) -> String {
    let base: String = raw
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .unwrap_or_default()
        .chars()
        .filter(|ch| !ch.is_control())
        .collect();
    let base = base.trim();
    if base.is_empty() || base.chars().all(|ch| ch == '.') {
        return DEFAULT_UPLOAD_NAME.to_string();
    }
    base.to_string()
}
