//! 文件内容输出：Range、条件请求、缓存相关头与下载模式。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use httpdate::fmt_http_date;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::etag::{Precondition, etag_from_metadata, evaluate_preconditions, if_range_matches};

/// 输出文件内容；`download` 为真时附加 `Content-Disposition: attachment`。
///
/// 打开与 stat 阶段的错误在写出任何字节之前完成分类；开始流式输出后
/// 的读错误只能截断响应体。
pub async fn serve_file(
    target: &Path,
    request_headers: &HeaderMap,
    download: bool,
) -> Result<Response, ApiError> {
    let file = File::open(target).await?;
    let metadata = file.metadata().await?;
    let file_size = metadata.len();
    let modified = metadata.modified().ok();
    let etag = etag_from_metadata(&metadata);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ETAG, header_value(&etag)?);
    if let Some(modified) = modified {
        response_headers.insert(header::LAST_MODIFIED, header_value(&fmt_http_date(modified))?);
    }

    match evaluate_preconditions(request_headers, &etag, modified) {
        Precondition::Proceed => {}
        Precondition::NotModified => {
            debug!(path = %target.display(), "not modified");
            return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
        }
        Precondition::Failed => return Err(ApiError::PreconditionFailed),
    }

    let mime = mime_guess::from_path(target).first_or_octet_stream();
    response_headers.insert(header::CONTENT_TYPE, header_value(mime.essence_str())?);
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if download {
        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        response_headers.insert(header::CONTENT_DISPOSITION, attachment_disposition(&name)?);
    }

    let range = if if_range_matches(request_headers, &etag, modified) {
        parse_range(request_headers.get(header::RANGE), file_size)?
    } else {
        None
    };

    if let Some((start, end)) = range {
        let length = end - start + 1;
        debug!(path = %target.display(), start, end, length, "range request accepted");
        let mut file = file;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        response_headers.insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes {start}-{end}/{file_size}"))?,
        );
        response_headers.insert(header::CONTENT_LENGTH, header_value(&length.to_string())?);
        let stream = ReaderStream::new(file.take(length));
        return Ok((
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            AxumBody::from_stream(stream),
        )
            .into_response());
    }

    response_headers.insert(header::CONTENT_LENGTH, header_value(&file_size.to_string())?);
    info!(path = %target.display(), size = file_size, download, "serve file");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::Internal("invalid response header".into()))
}

fn attachment_disposition(name: &str) -> Result<HeaderValue, ApiError> {
    let mut escaped = String::with_capacity(name.len());
    for ch in name.chars().filter(|ch| !ch.is_control()) {
        if ch == '"' || ch == '\\' {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    header_value(&format!("attachment; filename=\"{escaped}\""))
}

/// 解析单段 Range 头；多段请求回退为完整响应。
fn parse_range(
    value: Option<&HeaderValue>,
    file_size: u64,
) -> Result<Option<(u64, u64)>, ApiError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if file_size == 0 {
        return Err(ApiError::RangeNotSatisfiable(file_size));
    }
    let range = value
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("bytes="))
        .ok_or(ApiError::RangeNotSatisfiable(file_size))?;
    if range.contains(',') {
        return Ok(None);
    }

    let invalid = || ApiError::RangeNotSatisfiable(file_size);
    let (start_part, end_part) = range.trim().split_once('-').ok_or_else(invalid)?;

    let (start, end) = if start_part.is_empty() {
        let suffix: u64 = end_part.parse().map_err(|_| invalid())?;
        if suffix == 0 {
            return Err(invalid());
        }
        (file_size.saturating_sub(suffix), file_size - 1)
    } else {
        let start: u64 = start_part.parse().map_err(|_| invalid())?;
        let end: u64 = if end_part.is_empty() {
            file_size - 1
        } else {
            end_part.parse().map_err(|_| invalid())?
        };
        (start, end.min(file_size - 1))
    };

    if start > end || start >= file_size {
        return Err(invalid());
    }
    Ok(Some((start, end)))
}
