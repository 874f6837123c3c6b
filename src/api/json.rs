//! Strict JSON request body extractor.
//!
//! Bodies are capped at [`MAX_BODY_BYTES`], must hold exactly one JSON value,
//! and every decode failure is turned into a client-readable 400 message.

use axum::{
    body::to_bytes,
    extract::{FromRequest, Request},
};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::error::Category;
use std::sync::OnceLock;

use super::error::ApiError;

pub const MAX_BODY_BYTES: usize = 1_048_576;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, _state: &S) -> Result<Self, Self::Rejection> {
        // The only read failure on a buffered request body is the length limit.
        let bytes = to_bytes(request.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|_| {
                ApiError::bad_request(format!(
                    "body must not be larger than {MAX_BODY_BYTES} bytes"
                ))
            })?;
        decode(&bytes).map(JsonBody)
    }
}

/// Decode exactly one JSON value from `bytes`.
///
/// # Errors
/// Returns `ApiError::BadRequest` with a message describing the first problem found.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::bad_request("body must not be empty"));
    }

    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    let value = T::deserialize(&mut deserializer).map_err(|err| describe(bytes, &err))?;
    deserializer
        .end()
        .map_err(|_| ApiError::bad_request("body must contain only a single JSON value"))?;
    Ok(value)
}

fn describe(bytes: &[u8], err: &serde_json::Error) -> ApiError {
    let offset = byte_offset(bytes, err.line(), err.column());
    let message = match err.classify() {
        Category::Eof => "body contains badly-formed JSON".to_string(),
        Category::Syntax | Category::Io => {
            format!("body contains badly-formed JSON (at character {offset})")
        }
        Category::Data => {
            let text = err.to_string();
            if let Some(field) = unknown_field(&text) {
                format!("body contains unknown key \"{field}\"")
            } else if let Some(field) = field_before(bytes, offset) {
                format!("body contains incorrect JSON type for field \"{field}\"")
            } else {
                format!("body contains incorrect JSON type (at character {offset})")
            }
        }
    };
    ApiError::BadRequest(message)
}

/// Convert serde_json's 1-based line/column position into a byte offset.
fn byte_offset(bytes: &[u8], line: usize, column: usize) -> usize {
    let line_start: usize = bytes
        .split(|b| *b == b'\n')
        .take(line.saturating_sub(1))
        .map(|line| line.len() + 1)
        .sum();
    (line_start + column).min(bytes.len())
}

fn unknown_field(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("unknown field `")?;
    rest.split('`').next()
}

/// Name of the last object key that precedes `offset`.
fn field_before(bytes: &[u8], offset: usize) -> Option<String> {
    let prefix = String::from_utf8_lossy(&bytes[..offset.min(bytes.len())]);
    static KEY: OnceLock<Option<Regex>> = OnceLock::new();
    let key = KEY
        .get_or_init(|| Regex::new(r#""([^"\\]+)"\s*:"#).ok())
        .as_ref()?;
    key.captures_iter(&prefix)
        .last()
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct Input {
        name: String,
        #[serde(default)]
        age: i32,
    }

    fn message(result: Result<Input, ApiError>) -> String {
        match result {
            Err(ApiError::BadRequest(message)) => message,
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn decodes_a_single_value() {
        let input: Input = decode(br#" {"name": "Alice", "age": 30} "#).unwrap();
        assert_eq!(
            input,
            Input {
                name: "Alice".to_string(),
                age: 30
            }
        );
    }

    #[test]
    fn empty_body() {
        assert_eq!(message(decode(b"")), "body must not be empty");
        assert_eq!(message(decode(b"  \n")), "body must not be empty");
    }

    #[test]
    fn syntax_error_reports_offset() {
        assert_eq!(
            message(decode(br#"{"name" "Alice"}"#)),
            "body contains badly-formed JSON (at character 9)"
        );
    }

    #[test]
    fn truncated_body() {
        assert_eq!(
            message(decode(br#"{"name": "Alice""#)),
            "body contains badly-formed JSON"
        );
    }

    #[test]
    fn wrong_type_names_the_field() {
        assert_eq!(
            message(decode(br#"{"name": "Alice", "age": "thirty"}"#)),
            "body contains incorrect JSON type for field \"age\""
        );
    }

    #[test]
    fn field_before_reuses_one_pattern() {
        let body = br#"{"title": "x", "year": "1999"}"#;
        assert_eq!(field_before(body, 13).as_deref(), Some("title"));
        assert_eq!(field_before(body, body.len()).as_deref(), Some("year"));
        assert_eq!(field_before(b"[1, 2]", 4), None);
    }

    #[test]
    fn wrong_top_level_type_reports_offset() {
        assert!(message(decode(b"[1, 2]"))
            .starts_with("body contains incorrect JSON type (at character "));
    }

    #[test]
    fn unknown_key() {
        assert_eq!(
            message(decode(br#"{"name": "Alice", "rating": 5}"#)),
            "body contains unknown key \"rating\""
        );
    }

    #[test]
    fn multiple_values() {
        assert_eq!(
            message(decode(br#"{"name": "Alice"}{"name": "Bob"}"#)),
            "body must contain only a single JSON value"
        );
    }

    #[test]
    fn byte_offset_spans_lines() {
        let bytes = b"{\n  \"a\": x\n}";
        assert_eq!(byte_offset(bytes, 2, 8), 10);
        assert_eq!(byte_offset(bytes, 1, 1), 1);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let mut body = br#"{"name": ""#.to_vec();
        body.extend(std::iter::repeat(b'a').take(MAX_BODY_BYTES));
        body.extend(br#""}"#);
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/")
            .body(Body::from(body))
            .unwrap();

        let result = JsonBody::<Input>::from_request(request, &()).await;
        match result {
            Err(ApiError::BadRequest(message)) => {
                assert_eq!(message, "body must not be larger than 1048576 bytes");
            }
            other => panic!("expected bad request, got {other:?}"),
        }
    }
}
