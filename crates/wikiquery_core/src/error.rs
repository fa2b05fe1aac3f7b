use std::fmt;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WikiError>;

/// Configuration, protocol and data-integrity failures are fatal and must not
/// be retried. `Api` carries the server's code and message verbatim.
#[derive(Debug, Error)]
pub enum WikiError {
    /// Invalid partition size, unsupported parameter value, incompatible flags.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The server echoed the continuation that was just sent.
    #[error("continuation loop detected: server repeated continuation [{}]", keys.join(", "))]
    ContinuationLoop { keys: Vec<String> },

    /// The response is missing data that a well-behaved server always returns.
    #[error("unexpected API data: {message}")]
    UnexpectedData { message: String },

    #[error("invalid title {title:?}: {reason}")]
    InvalidTitle { title: String, reason: String },

    #[error("circular redirect detected: {}", render_trace(trace))]
    CircularRedirect { trace: Vec<String> },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("MediaWiki API request failed with HTTP {status}")]
    Http { status: StatusCode },

    #[error("failed to call MediaWiki API: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode MediaWiki API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl WikiError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedData {
            message: message.into(),
        }
    }

    /// Returns `true` for failures that point at a library bug, a bad request
    /// or corrupt wiki data rather than a remote or network condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::ContinuationLoop { .. }
                | Self::UnexpectedData { .. }
                | Self::InvalidTitle { .. }
                | Self::CircularRedirect { .. }
        )
    }

    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Self::Api(error) => Some(error.kind),
            _ => None,
        }
    }
}

fn render_trace(trace: &[String]) -> String {
    trace.join("->")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    BadToken,
    Conflict,
    Unauthorized,
    ServerLag,
    ReadOnly,
    Throttled,
    Generic,
}

impl ApiErrorKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "badtoken" | "notoken" => Self::BadToken,
            "editconflict" | "articleexists" | "pagedeleted" => Self::Conflict,
            "permissiondenied" | "readapidenied" | "writeapidenied" | "assertuserfailed"
            | "assertbotfailed" | "protectedpage" | "cascadeprotected" | "mustbeloggedin"
            | "badaccess-groups" => Self::Unauthorized,
            "maxlag" => Self::ServerLag,
            "readonly" => Self::ReadOnly,
            "ratelimited" | "throttled" => Self::Throttled,
            _ => Self::Generic,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadToken => "bad_token",
            Self::Conflict => "conflict",
            Self::Unauthorized => "unauthorized",
            Self::ServerLag => "server_lag",
            Self::ReadOnly => "read_only",
            Self::Throttled => "throttled",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured `error` object returned by the server.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("MediaWiki API error [{code}]: {info}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub code: String,
    pub info: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, info: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: ApiErrorKind::from_code(&code),
            code,
            info: info.into(),
        }
    }

    pub fn with_kind(kind: ApiErrorKind, code: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            info: info.into(),
        }
    }

    /// Extract the top-level `error` node of a response, if present.
    pub fn from_response(payload: &Value) -> Option<Self> {
        let error = payload.get("error")?;
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        Some(Self::new(code, info))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn api_error_codes_map_to_kinds() {
        assert_eq!(ApiErrorKind::from_code("badtoken"), ApiErrorKind::BadToken);
        assert_eq!(ApiErrorKind::from_code("editconflict"), ApiErrorKind::Conflict);
        assert_eq!(
            ApiErrorKind::from_code("permissiondenied"),
            ApiErrorKind::Unauthorized
        );
        assert_eq!(ApiErrorKind::from_code("maxlag"), ApiErrorKind::ServerLag);
        assert_eq!(ApiErrorKind::from_code("readonly"), ApiErrorKind::ReadOnly);
        assert_eq!(ApiErrorKind::from_code("ratelimited"), ApiErrorKind::Throttled);
        assert_eq!(ApiErrorKind::from_code("whatever"), ApiErrorKind::Generic);
    }

    #[test]
    fn api_error_is_extracted_verbatim() {
        let payload = json!({
            "error": {"code": "editconflict", "info": "Edit conflict detected."}
        });
        let error = ApiError::from_response(&payload).expect("error node");
        assert_eq!(error.kind, ApiErrorKind::Conflict);
        assert_eq!(error.code, "editconflict");
        assert_eq!(error.info, "Edit conflict detected.");
        assert!(ApiError::from_response(&json!({"query": {}})).is_none());
    }

    #[test]
    fn circular_redirect_renders_trace() {
        let error = WikiError::CircularRedirect {
            trace: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert!(error.to_string().contains("A->B->A"));
        assert!(error.is_fatal());
    }

    #[test]
    fn remote_failures_are_not_fatal() {
        let error = WikiError::from(ApiError::new("maxlag", "lagged"));
        assert!(!error.is_fatal());
        assert_eq!(error.api_kind(), Some(ApiErrorKind::ServerLag));
    }
}
