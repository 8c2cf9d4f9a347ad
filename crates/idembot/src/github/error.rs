//! GitHub API error types.

use thiserror::Error;

/// Errors that can occur when talking to the GitHub REST API.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// The request never produced a response.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The response body did not match the expected payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// GitHub answered with a non-2xx status.
    #[error("API error ({status}) on {method} {path}: {message}")]
    Api {
        status: u16,
        method: &'static str,
        path: String,
        message: String,
    },

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl GitHubError {
    /// HTTP status for API errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            GitHubError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Whether the failure is an exhausted quota rather than a bad request.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        match self {
            GitHubError::Api {
                status, message, ..
            } => *status == 429 || (*status == 403 && message.contains("rate limit")),
            _ => false,
        }
    }
}

/// Pull the `message` field out of a GitHub error body, falling back to the
/// raw text.
pub(crate) fn extract_message(body: &[u8]) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }

    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    }
}

/// One-line summary suitable for progress output.
pub fn short_error_message(err: &GitHubError) -> String {
    match err {
        GitHubError::Api {
            status, message, ..
        } => format!("{status}: {message}"),
        other => other.to_string(),
    }
}
