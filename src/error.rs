use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::mailer::MailError;

/// Failures from the account store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0} already exists")]
    Conflict(&'static str),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The user row went away between lookup and write.
    #[error("user record missing")]
    Missing,

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Maps a unique-index violation onto the column that clashed.
    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, Some(msg)) = &err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains("UNIQUE") {
                if msg.contains("users.username") {
                    return StoreError::Conflict("username");
                }
                if msg.contains("users.email") {
                    return StoreError::Conflict("email");
                }
                if msg.contains("shared_links.share_id") {
                    return StoreError::Conflict("shareId");
                }
            }
        }
        StoreError::Sqlite(err)
    }
}

/// Error returned by every HTTP handler. Renders as `{"msg": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("User not found")]
    UserNotFound,

    #[error("{0}")]
    NotFound(String),

    #[error("OTP is required")]
    OtpRequired,

    #[error("Invalid OTP")]
    InvalidOtp,

    #[error("OTP has expired")]
    OtpExpired,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email not verified")]
    EmailNotVerified,

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("No token provided")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Unsupported language")]
    UnsupportedLanguage,

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("mail: {0}")]
    Mail(#[from] MailError),

    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::Conflict(_)
            | ApiError::UserNotFound
            | ApiError::OtpRequired
            | ApiError::InvalidOtp
            | ApiError::OtpExpired
            | ApiError::UnsupportedLanguage => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidCredentials | ApiError::EmailNotVerified | ApiError::IncorrectPassword => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::MissingToken | ApiError::InvalidToken => StatusCode::FORBIDDEN,
            ApiError::Store(StoreError::Conflict(_)) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::Missing) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Mail(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn client_message(&self) -> String {
        match self {
            ApiError::Store(StoreError::Conflict(field)) => conflict_message(field),
            ApiError::Store(StoreError::Missing) => "User not found".to_string(),
            ApiError::Store(_) | ApiError::Mail(_) | ApiError::Internal(_) => "Server error".to_string(),
            other => other.to_string(),
        }
    }
}

fn conflict_message(field: &str) -> String {
    match field {
        "username" => "Username already taken".to_string(),
        "email" => "Email already in use".to_string(),
        other => format!("{other} already exists"),
    }
}

/// Unreadable JSON bodies get the same `{"msg"}` shape as every other 400.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(reason = %rejection.body_text(), "request body rejected");
        let msg = match rejection {
            JsonRejection::MissingJsonContentType(_) => "Expected a JSON request body",
            _ => "Invalid request body",
        };
        ApiError::validation(msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "msg": self.client_message() }))).into_response()
    }
}
