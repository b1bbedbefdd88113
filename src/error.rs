use reqwest::StatusCode;
use serde::Deserialize;

/// Failure reported by a [`crate::data::PostStore`] call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("not authorized: {}", .message.as_deref().unwrap_or("no credential available"))]
    Auth { message: Option<String> },
    #[error("rejected: {}", .message.as_deref().unwrap_or("invalid request"))]
    Validation { message: Option<String> },
    #[error("not found: {}", .message.as_deref().unwrap_or("resource no longer exists"))]
    NotFound { message: Option<String> },
    #[error("conflict: {}", .message.as_deref().unwrap_or("request conflicts with current state"))]
    Conflict { message: Option<String> },
    #[error("api error {status}: {}", .message.as_deref().unwrap_or("no details"))]
    Server { status: u16, message: Option<String> },
    #[error("decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn not_logged_in() -> Self {
        ApiError::Auth { message: None }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Auth {
            message: Some(message.into()),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: Some(message.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound {
            message: Some(message.into()),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict {
            message: Some(message.into()),
        }
    }

    /// Maps an HTTP status and the decoded error body to a variant.
    pub fn from_status(status: StatusCode, message: Option<String>) -> Self {
        match status.as_u16() {
            400 | 422 => ApiError::Validation { message },
            401 | 403 => ApiError::Auth { message },
            404 => ApiError::NotFound { message },
            409 => ApiError::Conflict { message },
            code => ApiError::Server {
                status: code,
                message,
            },
        }
    }

    /// The message the server sent with the failure, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::Auth { message }
            | ApiError::Validation { message }
            | ApiError::NotFound { message }
            | ApiError::Conflict { message }
            | ApiError::Server { message, .. } => message.as_deref(),
            ApiError::Network(_) | ApiError::Decode(_) => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth { .. })
    }

    /// Server message verbatim, otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        self.server_message()
            .filter(|message| !message.trim().is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub message: String,
}

impl ErrorBody {
    pub(crate) fn first_message(text: &str) -> Option<String> {
        serde_json::from_str::<ErrorBody>(text)
            .ok()?
            .errors
            .into_iter()
            .map(|detail| detail.message)
            .find(|message| !message.trim().is_empty())
    }
}
