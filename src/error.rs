//! Error types: the crate-wide `Error` enum and the normalized `ApiError`
//! shape shared by every provider adapter.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::providers::ProviderId;

/// Errors that can occur during client and agent operations.
///
/// Provider-reported HTTP failures always arrive as [`Error::Api`] with a
/// normalized payload. Transport failures (`Http`) and response decode
/// failures (`Json`) keep their native types; they are the only two ways a
/// raw, unnormalized failure reaches the caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("thread error: {0}")]
    Thread(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("duplicate tool `{name}` provided by {first} and {second}")]
    DuplicateTool {
        name: String,
        first: String,
        second: String,
    },

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("tool loop exceeded {0} turns")]
    MaxTurns(usize),
}

/// Coarse classification of a provider-reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Vendor failure that fits no more specific bucket.
    ApiError,
    RateLimit,
    InvalidRequest,
    Authentication,
    ServerError,
}

impl ErrorKind {
    /// Classify from the HTTP status alone. Total and deterministic: any
    /// status outside the mapped ranges (or no status at all) lands on
    /// [`ErrorKind::ApiError`].
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(401) => ErrorKind::Authentication,
            Some(429) => ErrorKind::RateLimit,
            Some(s) if (400..500).contains(&s) => ErrorKind::InvalidRequest,
            Some(s) if s >= 500 => ErrorKind::ServerError,
            _ => ErrorKind::ApiError,
        }
    }

    /// Stable snake_case name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ApiError => "api_error",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Authentication => "authentication",
            ErrorKind::ServerError => "server_error",
        }
    }
}

/// A provider failure normalized into one vendor-independent shape.
///
/// `code` preserves the vendor's own error code verbatim when the error
/// envelope carried one; otherwise it is the synthetic `<provider>_error`.
/// `details` keeps the raw response body for debugging.
#[serde_with::skip_serializing_none]
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{provider} API error ({code}): {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub provider: ProviderId,
    pub details: Option<Value>,
}

impl ApiError {
    /// Build a normalized error from whatever the vendor gave us.
    pub fn new(
        provider: ProviderId,
        status: Option<u16>,
        code: Option<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self {
            code: code
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| format!("{}_error", provider)),
            message: message.into(),
            kind: ErrorKind::from_status(status),
            status,
            provider,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_status() {
        assert_eq!(ErrorKind::from_status(Some(401)), ErrorKind::Authentication);
        assert_eq!(ErrorKind::from_status(Some(429)), ErrorKind::RateLimit);
        assert_eq!(ErrorKind::from_status(Some(400)), ErrorKind::InvalidRequest);
        assert_eq!(ErrorKind::from_status(Some(404)), ErrorKind::InvalidRequest);
        assert_eq!(ErrorKind::from_status(Some(500)), ErrorKind::ServerError);
        assert_eq!(ErrorKind::from_status(Some(503)), ErrorKind::ServerError);
        assert_eq!(ErrorKind::from_status(None), ErrorKind::ApiError);
        assert_eq!(ErrorKind::from_status(Some(302)), ErrorKind::ApiError);
    }

    #[test]
    fn test_synthetic_code_when_vendor_gave_none() {
        let err = ApiError::new(ProviderId::OpenAi, Some(401), None, "bad key", None);
        assert_eq!(err.code, "openai_error");
        assert_eq!(err.kind, ErrorKind::Authentication);

        let err = ApiError::new(ProviderId::Gemini, Some(429), Some(String::new()), "slow down", None);
        assert_eq!(err.code, "gemini_error");
        assert_eq!(err.kind, ErrorKind::RateLimit);
    }

    #[test]
    fn test_vendor_code_preserved_verbatim() {
        let err = ApiError::new(
            ProviderId::Anthropic,
            Some(400),
            Some("invalid_request_error".to_string()),
            "bad field",
            None,
        );
        assert_eq!(err.code, "invalid_request_error");
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_display_includes_provider_and_code() {
        let err = ApiError::new(ProviderId::DeepSeek, Some(500), None, "boom", None);
        let rendered = err.to_string();
        assert!(rendered.contains("deepseek"));
        assert!(rendered.contains("deepseek_error"));
        assert!(rendered.contains("boom"));
    }

    #[test]
    fn test_kind_serde_names() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::RateLimit).unwrap(),
            "\"rate_limit\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::ApiError).unwrap(),
            "\"api_error\""
        );
        assert_eq!(ErrorKind::Authentication.as_str(), "authentication");
    }
}
