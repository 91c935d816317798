//! Shared error types for talking to the chama API server.

use serde::Deserialize;

/// Error body shapes the API server is known to return.
///
/// RFC7807 problem documents use `detail`/`title`; older endpoints answer with
/// `{ "message": ... }` or `{ "error": ... }`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Attempt to parse a JSON error body into a user-facing message.
/// Prefers `detail`, then `message`, then `error`, then `title`.
pub fn try_error_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    [parsed.detail, parsed.message, parsed.error, parsed.title]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// HTTP status code, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Message suitable for showing next to stale data.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { status, body } => try_error_detail(body)
                .unwrap_or_else(|| format!("Request failed with status {status}")),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_detail_is_preferred() {
        let body = r#"{"type":"about:blank","title":"Not Found","status":404,"detail":"No such user"}"#;
        assert_eq!(try_error_detail(body).as_deref(), Some("No such user"));
    }

    #[test]
    fn message_body_is_understood() {
        let err = ApiError::Http {
            status: 500,
            body: r#"{"message":"Database unavailable"}"#.to_string(),
        };
        assert_eq!(err.user_message(), "Database unavailable");
        assert!(!err.is_not_found());
    }

    #[test]
    fn opaque_body_falls_back_to_status() {
        let err = ApiError::Http {
            status: 404,
            body: "<html>not found</html>".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.user_message(), "Request failed with status 404");
    }
}
