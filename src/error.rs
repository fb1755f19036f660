use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

/// Every failure an account operation can report to a caller.
///
/// The `Display` text is what the client sees, so none of the messages carry
/// internal identifiers, and login never says which half of the credentials
/// was wrong.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Username or email already exists")]
    DuplicateIdentity,
    #[error("Registration failed")]
    RegistrationFailed,
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Email not found")]
    EmailNotFound,
    #[error("Invalid reset code")]
    InvalidResetCode,
    #[error("{0}")]
    Validation(String),
    #[error("Not logged in")]
    Unauthorized,
    #[error("Service temporarily unavailable")]
    Persistence(#[source] anyhow::Error),
}

impl AccountError {
    pub fn status(&self) -> StatusCode {
        match self {
            AccountError::DuplicateIdentity => StatusCode::CONFLICT,
            AccountError::RegistrationFailed | AccountError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AccountError::InvalidCredentials | AccountError::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            AccountError::EmailNotFound => StatusCode::NOT_FOUND,
            AccountError::InvalidResetCode | AccountError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<anyhow::Error> for AccountError {
    fn from(e: anyhow::Error) -> Self {
        AccountError::Persistence(e)
    }
}

/// Envelope shared by every account response that only carries a message.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub ok: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        if let AccountError::Persistence(ref e) = self {
            error!(error = ?e, "store failure");
        }
        let body = MessageResponse {
            ok: false,
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
