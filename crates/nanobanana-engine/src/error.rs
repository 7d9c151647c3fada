use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Failure>;

/// Category of a terminal pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Every capture strategy failed.
    Capture,
    Encode,
    Decode,
    MissingCredential,
    /// Non-success HTTP status from the generation API.
    Http(u16),
    Timeout,
    Connection,
    /// The API answered with neither image nor text.
    NoContent,
    Persist,
    Cancelled,
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Capture => "capture_failure",
            ErrorKind::Encode => "encode_error",
            ErrorKind::Decode => "decode_error",
            ErrorKind::MissingCredential => "missing_credential",
            ErrorKind::Http(_) => "http_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection_error",
            ErrorKind::NoContent => "no_content",
            ErrorKind::Persist => "persist_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config_error",
        }
    }

    pub fn http_status(self) -> Option<u16> {
        match self {
            ErrorKind::Http(status) => Some(status),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Http(status) => write!(f, "http_error({status})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A typed failure with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capture, message)
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encode, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }

    pub fn persist(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persist, message)
    }

    pub fn missing_credential() -> Self {
        Self::new(
            ErrorKind::MissingCredential,
            "no API key configured (set GEMINI_API_KEY or run `nanobanana set-key`)",
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "run cancelled before completion")
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::{error_chain_text, truncate_text, ErrorKind, Failure};

    #[test]
    fn display_includes_kind_and_message() {
        let failure = Failure::new(ErrorKind::Http(503), "backend overloaded");
        assert_eq!(failure.to_string(), "http_error(503): backend overloaded");
        assert_eq!(failure.kind.http_status(), Some(503));
        assert_eq!(Failure::cancelled().kind.http_status(), None);
    }

    #[test]
    fn failures_convert_into_anyhow() {
        let err: anyhow::Error = Failure::decode("bad png").into();
        assert_eq!(
            err.downcast_ref::<Failure>().map(|failure| failure.kind),
            Some(ErrorKind::Decode)
        );
    }

    #[test]
    fn error_chain_text_preserves_nested_contexts() {
        let err = anyhow::anyhow!("file not written")
            .context("render-to-file failed")
            .context("capture strategy failed");
        let rendered = error_chain_text(&err, 400);
        assert_eq!(
            rendered,
            "capture strategy failed | caused by: render-to-file failed | caused by: file not written"
        );
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }
}
