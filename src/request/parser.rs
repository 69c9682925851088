//! Body parsers that turn raw response bytes into typed results.

use std::marker::PhantomData;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A body that could not be converted.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ParseError {
    message: String,
}

impl ParseError {
    /// Creates a parse error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(error.to_string())
    }
}

/// Converts a response body into the caller's result type.
///
/// Parsers run on worker tasks and must not block for long.
pub trait ResponseParser: Send + Sync + 'static {
    /// Parsed result type.
    type Output: Send + 'static;

    /// Parses `body` given the response `headers`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the body is not valid for this parser.
    fn parse(&self, headers: &HeaderMap, body: &Bytes) -> Result<Self::Output, ParseError>;
}

/// Returns the raw body.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesParser;

impl ResponseParser for BytesParser {
    type Output = Bytes;

    fn parse(&self, _headers: &HeaderMap, body: &Bytes) -> Result<Bytes, ParseError> {
        Ok(body.clone())
    }
}

/// Decodes the body as text.
///
/// UTF-8 is assumed; a `charset` other than UTF-8 or ASCII in Content-Type is
/// decoded lossily.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringParser;

impl ResponseParser for StringParser {
    type Output = String;

    fn parse(&self, headers: &HeaderMap, body: &Bytes) -> Result<String, ParseError> {
        let strict = charset(headers).is_none_or(|cs| {
            cs.eq_ignore_ascii_case("utf-8")
                || cs.eq_ignore_ascii_case("utf8")
                || cs.eq_ignore_ascii_case("us-ascii")
        });
        if strict {
            String::from_utf8(body.to_vec())
                .map_err(|e| ParseError::new(format!("response is not valid UTF-8: {e}")))
        } else {
            Ok(String::from_utf8_lossy(body).into_owned())
        }
    }
}

/// Deserializes a JSON body into `T`.
#[derive(Debug)]
pub struct JsonParser<T>(PhantomData<fn() -> T>);

impl<T> JsonParser<T> {
    /// Creates a JSON parser for `T`.
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonParser<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> ResponseParser for JsonParser<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn parse(&self, _headers: &HeaderMap, body: &Bytes) -> Result<T, ParseError> {
        Ok(serde_json::from_slice(body)?)
    }
}

fn charset(headers: &HeaderMap) -> Option<&str> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn with_content_type(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_string_parser_utf8() {
        let body = Bytes::from_static("héllo".as_bytes());
        let text = StringParser.parse(&HeaderMap::new(), &body).unwrap();
        assert_eq!(text, "héllo");
    }

    #[test]
    fn test_string_parser_rejects_invalid_utf8() {
        let body = Bytes::from_static(&[0xff, 0xfe]);
        let headers = with_content_type("text/plain; charset=utf-8");
        assert!(StringParser.parse(&headers, &body).is_err());
    }

    #[test]
    fn test_string_parser_lossy_for_other_charsets() {
        let body = Bytes::from_static(&[b'a', 0xe9]);
        let headers = with_content_type("text/plain; charset=\"ISO-8859-1\"");
        let text = StringParser.parse(&headers, &body).unwrap();
        assert!(text.starts_with('a'));
    }

    #[test]
    fn test_json_parser() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Item {
            id: u32,
        }
        let body = Bytes::from_static(br#"{"id": 4}"#);
        let item = JsonParser::<Item>::new().parse(&HeaderMap::new(), &body).unwrap();
        assert_eq!(item, Item { id: 4 });

        let bad = Bytes::from_static(b"not json");
        assert!(JsonParser::<Item>::new().parse(&HeaderMap::new(), &bad).is_err());
    }

    #[test]
    fn test_charset_extraction() {
        assert_eq!(
            charset(&with_content_type("text/html; charset=UTF-8")),
            Some("UTF-8")
        );
        assert_eq!(charset(&with_content_type("text/html")), None);
    }
}
