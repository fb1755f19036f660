use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::{
    error::AccountError,
    session::{SessionStore, SessionValues},
    state::AppState,
};

/// The caller's session context, resolved from `Authorization: Bearer <token>`.
pub struct CurrentSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub values: SessionValues,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = AccountError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AccountError::Unauthorized)?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or(AccountError::Unauthorized)?;

        let claims = JwtKeys::from_ref(state).verify(token).map_err(|_| {
            warn!("invalid or expired session token");
            AccountError::Unauthorized
        })?;

        // A valid signature is not enough: logout removes the session server-side.
        let values = state
            .sessions
            .load(claims.sid)
            .await?
            .ok_or(AccountError::Unauthorized)?;

        Ok(CurrentSession {
            id: claims.sid,
            user_id: claims.sub,
            values,
        })
    }
}
