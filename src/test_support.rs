//! 测试辅助：构造 multipart 上传请求。

use axum::body::Body as AxumBody;
use axum::extract::Request;
use axum::http::{Method, header};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::io::ReaderStream;

const BOUNDARY: &str = "browse-test-boundary";

/// Builds a POST whose body carries one part per `(field, filename, contents)`.
pub fn multipart_request(uri: &str, parts: &[(&str, &str, &str)]) -> Request {
    let mut body = Vec::new();
    for (field, filename, data) in parts {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(AxumBody::from(body))
        .expect("request")
}

/// Builds a POST that sends the headers and the start of one part, then waits.
///
/// The body stays pending until the returned writer is dropped.
pub async fn stalled_multipart_request(
    uri: &str,
    field: &str,
    filename: &str,
    partial: &str,
) -> (Request, DuplexStream) {
    let (mut writer, reader) = tokio::io::duplex(64 * 1024);
    writer
        .write_all(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n{partial}"
            )
            .as_bytes(),
        )
        .await
        .expect("write partial body");

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(AxumBody::from_stream(ReaderStream::new(reader)))
        .expect("request");
    (request, writer)
}
