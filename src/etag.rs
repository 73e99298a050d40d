//! ETag 计算与条件请求（If-Match / If-None-Match / If-Modified-Since 等）判定。

use axum::http::{HeaderMap, header};
use httpdate::parse_http_date;
use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

/// 条件请求的判定结果。
#[derive(Debug, PartialEq, Eq)]
pub enum Precondition {
    Proceed,
    NotModified,
    Failed,
}

/// 根据文件元数据生成弱 ETag。
pub fn etag_from_metadata(metadata: &Metadata) -> String {
    let size = metadata.len();
    if let Ok(modified) = metadata.modified()
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        return format!(
            "W/\"{}-{}-{}\"",
            size,
            duration.as_secs(),
            duration.subsec_nanos()
        );
    }
    format!("W/\"{}\"", size)
}

/// 依次校验 If-Match、If-Unmodified-Since、If-None-Match、If-Modified-Since。
pub fn evaluate_preconditions(
    headers: &HeaderMap,
    etag: &str,
    modified: Option<SystemTime>,
) -> Precondition {
    if let Some(value) = header_str(headers, header::IF_MATCH) {
        if value.trim() != "*" && !etag_matches(value, etag) {
            return Precondition::Failed;
        }
    } else if let Some(since) = header_date(headers, header::IF_UNMODIFIED_SINCE)
        && let Some(modified) = modified.and_then(unix_secs)
        && modified > since
    {
        return Precondition::Failed;
    }

    if let Some(value) = header_str(headers, header::IF_NONE_MATCH) {
        if value.trim() == "*" || etag_matches(value, etag) {
            return Precondition::NotModified;
        }
    } else if let Some(since) = header_date(headers, header::IF_MODIFIED_SINCE)
        && let Some(modified) = modified.and_then(unix_secs)
        && modified <= since
    {
        return Precondition::NotModified;
    }

    Precondition::Proceed
}

/// If-Range 不存在或与当前版本一致时才允许按 Range 返回部分内容。
pub fn if_range_matches(headers: &HeaderMap, etag: &str, modified: Option<SystemTime>) -> bool {
    let Some(value) = header_str(headers, header::IF_RANGE) else {
        return true;
    };
    match parse_http_date(value) {
        Ok(date) => match (modified.and_then(unix_secs), unix_secs(date)) {
            (Some(modified), Some(date)) => modified <= date,
            _ => false,
        },
        Err(_) => strong_match(value.trim(), etag),
    }
}

/// 强比较：任一方为弱 ETag 即不匹配。
fn strong_match(left: &str, right: &str) -> bool {
    !left.starts_with("W/") && !right.starts_with("W/") && left == right
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn header_date(headers: &HeaderMap, name: header::HeaderName) -> Option<u64> {
    header_str(headers, name)
        .and_then(|value| parse_http_date(value).ok())
        .and_then(unix_secs)
}

// HTTP dates carry whole seconds only.
fn unix_secs(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

fn etag_matches(header_value: &str, current: &str) -> bool {
    header_value
        .split(',')
        .map(|item| item.trim())
        .any(|item| item == current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use httpdate::fmt_http_date;
    use std::time::Duration;

    const ETAG: &str = "W/\"42-1700000000-0\"";

    fn modified() -> Option<SystemTime> {
        Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }

    fn with_header(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).expect("header value"));
        headers
    }

    #[test]
    fn no_conditions_proceed() {
        assert_eq!(
            evaluate_preconditions(&HeaderMap::new(), ETAG, modified()),
            Precondition::Proceed
        );
    }

    #[test]
    fn matching_if_none_match_is_not_modified() {
        let headers = with_header(header::IF_NONE_MATCH, &format!("\"other\", {ETAG}"));
        assert_eq!(
            evaluate_preconditions(&headers, ETAG, modified()),
            Precondition::NotModified
        );
    }

    #[test]
    fn if_modified_since_compares_whole_seconds() {
        let since = fmt_http_date(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let headers = with_header(header::IF_MODIFIED_SINCE, &since);
        let later = Some(UNIX_EPOCH + Duration::from_millis(1_700_000_000_400));
        assert_eq!(
            evaluate_preconditions(&headers, ETAG, later),
            Precondition::NotModified
        );

        let older = fmt_http_date(UNIX_EPOCH + Duration::from_secs(1_600_000_000));
        let headers = with_header(header::IF_MODIFIED_SINCE, &older);
        assert_eq!(
            evaluate_preconditions(&headers, ETAG, modified()),
            Precondition::Proceed
        );
    }

    #[test]
    fn if_none_match_takes_priority_over_if_modified_since() {
        let mut headers = with_header(header::IF_NONE_MATCH, "\"stale\"");
        let since = fmt_http_date(UNIX_EPOCH + Duration::from_secs(1_800_000_000));
        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_str(&since).expect("header value"),
        );
        assert_eq!(
            evaluate_preconditions(&headers, ETAG, modified()),
            Precondition::Proceed
        );
    }

    #[test]
    fn mismatched_if_match_fails() {
        let headers = with_header(header::IF_MATCH, "\"stale\"");
        assert_eq!(
            evaluate_preconditions(&headers, ETAG, modified()),
            Precondition::Failed
        );
        let headers = with_header(header::IF_MATCH, "*");
        assert_eq!(
            evaluate_preconditions(&headers, ETAG, modified()),
            Precondition::Proceed
        );
    }

    #[test]
    fn if_unmodified_since_before_change_fails() {
        let before = fmt_http_date(UNIX_EPOCH + Duration::from_secs(1_600_000_000));
        let headers = with_header(header::IF_UNMODIFIED_SINCE, &before);
        assert_eq!(
            evaluate_preconditions(&headers, ETAG, modified()),
            Precondition::Failed
        );
    }

    #[test]
    fn if_range_accepts_current_validators_only() {
        assert!(if_range_matches(&HeaderMap::new(), ETAG, modified()));
        assert!(!if_range_matches(
            &with_header(header::IF_RANGE, "\"other\""),
            ETAG,
            modified()
        ));
        let current = fmt_http_date(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        assert!(if_range_matches(
            &with_header(header::IF_RANGE, &current),
            ETAG,
            modified()
        ));
        let older = fmt_http_date(UNIX_EPOCH + Duration::from_secs(1_600_000_000));
        assert!(!if_range_matches(
            &with_header(header::IF_RANGE, &older),
            ETAG,
            modified()
        ));
    }

    #[test]
    fn if_range_requires_strong_etags() {
        assert!(!if_range_matches(
            &with_header(header::IF_RANGE, ETAG),
            ETAG,
            modified()
        ));
        let strong = "\"42-1700000000-0\"";
        assert!(!if_range_matches(
            &with_header(header::IF_RANGE, strong),
            ETAG,
            modified()
        ));
        assert!(if_range_matches(
            &with_header(header::IF_RANGE, strong),
            strong,
            modified()
        ));
        assert!(!if_range_matches(
            &with_header(header::IF_RANGE, ETAG),
            strong,
            modified()
        ));
    }
}
