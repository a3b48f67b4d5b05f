//! Decoding of upstream response bodies into JSON values.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

const PREVIEW_CHARS: usize = 200;

/// How a response body is interpreted, derived from its `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Must parse as JSON; anything else is an error.
    Json,
    /// Parsed as JSON when possible, otherwise kept as a string.
    Text,
}

impl BodyKind {
    /// `application/json` and `+json` media types are [`BodyKind::Json`].
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return BodyKind::Text;
        };
        let media_type = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        if media_type == "application/json" || media_type.ends_with("+json") {
            BodyKind::Json
        } else {
            BodyKind::Text
        }
    }
}

/// A body declared as JSON that did not parse.
#[derive(Debug, Error)]
#[error("malformed JSON body (status {status}): {source}; body: {preview}")]
pub struct BodyDecodeError {
    pub status: StatusCode,
    #[source]
    source: serde_json::Error,
    preview: String,
}

impl BodyDecodeError {
    /// Whitespace-collapsed start of the offending body.
    pub fn preview(&self) -> &str {
        &self.preview
    }
}

/// Decodes `text` according to `kind`. Empty bodies are `null` for both kinds.
///
/// # Errors
///
/// Returns [`BodyDecodeError`] when a [`BodyKind::Json`] body is not valid JSON.
pub fn decode_body(text: &str, kind: BodyKind, status: StatusCode) -> Result<Value, BodyDecodeError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    match kind {
        BodyKind::Json => serde_json::from_str(text).map_err(|source| BodyDecodeError {
            status,
            source,
            preview: preview(text, PREVIEW_CHARS),
        }),
        BodyKind::Text => Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))),
    }
}

fn preview(text: &str, limit: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &collapsed[..cut]),
        None => collapsed,
    }
}
