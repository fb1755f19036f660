use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{
            LoginRequest, LoginResponse, PublicUser, RegisterRequest, ResetConfirmRequest,
            ResetRequest,
        },
        extractors::CurrentSession,
        jwt::JwtKeys,
        services,
    },
    error::{AccountError, MessageResponse},
    json::Json,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/password-reset/request", post(request_reset))
        .route("/auth/password-reset/confirm", post(confirm_reset))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn lookup_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn normalize_email(email: &str) -> Result<String, AccountError> {
    let email = lookup_email(email);
    if !services::is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AccountError::Validation("Invalid email".into()));
    }
    Ok(email)
}

fn normalize_username(username: &str) -> Result<String, AccountError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AccountError::Validation("Username is required".into()));
    }
    Ok(username.to_string())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AccountError> {
    let username = normalize_username(&payload.username)?;
    let email = normalize_email(&payload.email)?;

    let message = services::register(&state, &username, &email, &payload.password).await?;
    Ok((StatusCode::CREATED, Json(MessageResponse::ok(message))))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AccountError> {
    let username = payload.username.trim();
    let user = services::login(&state, username, &payload.password).await?;

    let keys = JwtKeys::from_ref(&state);
    let session_id = services::open_session(&state, &user, keys.session_ttl()).await?;
    let session_token = keys.sign(user.user_id, session_id)?;

    Ok(Json(LoginResponse {
        ok: true,
        message: "Login successful".into(),
        user: user.into(),
        session_token,
    }))
}

#[instrument(skip(state, session), fields(session_id = %session.id))]
pub async fn logout(
    State(state): State<AppState>,
    session: CurrentSession,
) -> Result<Json<MessageResponse>, AccountError> {
    services::logout(&state, session.id).await?;
    Ok(Json(MessageResponse::ok("Logged out")))
}

#[instrument(skip(state, payload))]
pub async fn request_reset(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> Result<Json<MessageResponse>, AccountError> {
    // no format check: an address that cannot exist is simply not found
    let email = lookup_email(&payload.email);
    let message = services::request_password_reset(&state, &email).await?;
    Ok(Json(MessageResponse::ok(message)))
}

#[instrument(skip(state, payload))]
pub async fn confirm_reset(
    State(state): State<AppState>,
    Json(payload): Json<ResetConfirmRequest>,
) -> Result<Json<MessageResponse>, AccountError> {
    let message =
        services::reset_password(&state, payload.reset_code.trim(), &payload.new_password).await?;
    Ok(Json(MessageResponse::ok(message)))
}

#[instrument(skip(session), fields(user_id = %session.user_id))]
pub async fn get_me(session: CurrentSession) -> Result<Json<PublicUser>, AccountError> {
    let field = |key: &str| {
        session
            .values
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(AccountError::Unauthorized)
    };
    Ok(Json(PublicUser {
        user_id: session.user_id,
        username: field("username")?,
        email: field("email")?,
    }))
}
