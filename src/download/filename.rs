//! File naming for downloads.

use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use tracing::debug;
use url::Url;

/// Suffix of the temporary file written while a download is in flight.
pub const PARTIAL_SUFFIX: &str = "part";

/// Temporary path for `file_name` inside `dir`.
#[must_use]
pub fn partial_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(format!("{file_name}.{PARTIAL_SUFFIX}"))
}

/// Name derived from the response: Content-Disposition first, then the URL's
/// last path segment. `None` when neither yields a usable name.
pub(crate) fn name_from_response(headers: &HeaderMap, url: &Url) -> Option<String> {
    if let Some(name) = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_disposition)
        .map(|name| sanitize_filename(&name))
        .filter(|name| is_usable(name))
    {
        return Some(name);
    }
    name_from_url(url)
}

/// Name from the URL's last non-empty path segment, percent-decoded.
pub(crate) fn name_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(
        |e| {
            debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
            last.to_string()
        },
        std::borrow::Cow::into_owned,
    );
    Some(sanitize_filename(&decoded)).filter(|name| is_usable(name))
}

/// Timestamp-based name used when nothing better is known.
pub(crate) fn timestamp_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("download_{millis}")
}

/// Extracts the filename from a Content-Disposition value.
///
/// Handles `filename="a.pdf"`, `filename=a.pdf` and the RFC 5987
/// `filename*=UTF-8''a%20b.pdf` form, preferring the latter.
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + "filename*=".len()..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + "filename=".len()..].trim();
    if let Some(stripped) = value.strip_prefix('"') {
        return stripped.find('"').map(|end| stripped[..end].to_string());
    }
    let end = value.find(';').unwrap_or(value.len());
    let name = value[..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Replaces characters that are invalid on common filesystems and
/// neutralises path components such as `..`.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }
    if is_safe_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

fn is_usable(name: &str) -> bool {
    !name.trim_matches('_').is_empty()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("a:b*c?.txt"), "a_b_c_.txt");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename(""), "_");
    }

    #[test]
    fn test_parse_content_disposition_variants() {
        assert_eq!(
            parse_content_disposition("attachment; filename=\"report.pdf\""),
            Some("report.pdf".to_string())
        );
        assert_eq!(
            parse_content_disposition("attachment; filename=plain.txt; size=3"),
            Some("plain.txt".to_string())
        );
        assert_eq!(
            parse_content_disposition("attachment; filename*=UTF-8''na%C3%AFve%20file.txt"),
            Some("naïve file.txt".to_string())
        );
        assert_eq!(parse_content_disposition("inline"), None);
    }

    #[test]
    fn test_name_from_response_prefers_disposition() {
        let url = Url::parse("https://example.com/files/fallback.bin?x=1").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"real.zip\""),
        );
        assert_eq!(name_from_response(&headers, &url), Some("real.zip".to_string()));
        assert_eq!(
            name_from_response(&HeaderMap::new(), &url),
            Some("fallback.bin".to_string())
        );
    }

    #[test]
    fn test_name_from_url_decodes_and_rejects_empty() {
        let url = Url::parse("https://example.com/a%20b.txt").unwrap();
        assert_eq!(name_from_url(&url), Some("a b.txt".to_string()));
        let root = Url::parse("https://example.com/").unwrap();
        assert_eq!(name_from_url(&root), None);
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        let path = partial_path(Path::new("/tmp/out"), "file.iso");
        assert_eq!(path, PathBuf::from("/tmp/out/file.iso.part"));
    }

    #[test]
    fn test_timestamp_name_prefix() {
        assert!(timestamp_name().starts_with("download_"));
    }
}
