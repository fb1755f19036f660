use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        password::{hash_password, needs_rehash, verify_password},
        repo::UserStore,
        repo_types::User,
        reset::{display_code, generate_reset_token, is_well_formed_code},
    },
    error::AccountError,
    session::{SessionStore, SessionValues},
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub async fn register(
    st: &AppState,
    username: &str,
    email: &str,
    password: &str,
) -> Result<&'static str, AccountError> {
    if st.users.find_conflict(username, email).await?.is_some() {
        warn!(username, email, "username or email already taken");
        return Err(AccountError::DuplicateIdentity);
    }

    let hash = hash_password(password).map_err(|_| AccountError::RegistrationFailed)?;

    match st.users.create(username, email, &hash).await {
        Ok(Some(user_id)) => {
            info!(%user_id, username, "user registered");
            Ok("Registration successful")
        }
        Ok(None) => {
            // lost a race against a concurrent registration
            warn!(username, email, "insert rejected by uniqueness constraint");
            Err(AccountError::DuplicateIdentity)
        }
        Err(e) => {
            error!(error = ?e, username, "create user failed");
            Err(AccountError::RegistrationFailed)
        }
    }
}

pub async fn login(st: &AppState, username: &str, password: &str) -> Result<User, AccountError> {
    let Some(mut user) = st.users.find_by_username(username).await? else {
        warn!(username, "login unknown username");
        return Err(AccountError::InvalidCredentials);
    };

    let ok = verify_password(password, &user.password_hash).unwrap_or_else(|e| {
        error!(error = %e, user_id = %user.user_id, "stored password hash unreadable");
        false
    });
    if !ok {
        warn!(user_id = %user.user_id, "login invalid password");
        return Err(AccountError::InvalidCredentials);
    }

    if needs_rehash(&user.password_hash) {
        upgrade_hash(st, &mut user, password).await;
    }

    info!(user_id = %user.user_id, "user logged in");
    Ok(user)
}

async fn upgrade_hash(st: &AppState, user: &mut User, password: &str) {
    let hash = match hash_password(password) {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, user_id = %user.user_id, "rehash failed");
            return;
        }
    };
    match st.users.update_password(user.user_id, &hash).await {
        Ok(true) => {
            info!(user_id = %user.user_id, "legacy password hash upgraded");
            user.password_hash = hash;
        }
        Ok(false) => warn!(user_id = %user.user_id, "rehash updated no row"),
        Err(e) => warn!(error = ?e, user_id = %user.user_id, "storing upgraded hash failed"),
    }
}

/// Open a session for a logged-in user and return its id.
pub async fn open_session(st: &AppState, user: &User, ttl: Duration) -> Result<Uuid, AccountError> {
    let mut values = SessionValues::new();
    values.insert("user_id".into(), json!(user.user_id));
    values.insert("username".into(), json!(user.username));
    values.insert("email".into(), json!(user.email));
    values.insert(
        "logged_in_at".into(),
        json!(OffsetDateTime::now_utc().unix_timestamp()),
    );
    let session_id = st.sessions.create(values, ttl).await?;
    Ok(session_id)
}

pub async fn logout(st: &AppState, session_id: Uuid) -> Result<(), AccountError> {
    st.sessions.clear(session_id).await?;
    info!(%session_id, "session closed");
    Ok(())
}

pub async fn request_password_reset(st: &AppState, email: &str) -> Result<String, AccountError> {
    let Some(user) = st.users.find_by_email(email).await? else {
        warn!(email, "reset requested for unknown email");
        return Err(AccountError::EmailNotFound);
    };

    let token = generate_reset_token();
    let stored = st
        .users
        .set_reset_token(user.user_id, &token, OffsetDateTime::now_utc())
        .await?;
    if !stored {
        return Err(AccountError::Persistence(anyhow::anyhow!(
            "reset token update matched no row"
        )));
    }

    info!(user_id = %user.user_id, "password reset requested");
    Ok(format!("Reset code: {}", display_code(&token)))
}

pub async fn reset_password(
    st: &AppState,
    reset_code: &str,
    new_password: &str,
) -> Result<&'static str, AccountError> {
    if !is_well_formed_code(reset_code) {
        return Err(AccountError::InvalidResetCode);
    }

    // Two rows are enough to tell a unique match from an ambiguous one.
    let mut matches = st.users.find_by_reset_prefix(reset_code, 2).await?;
    if matches.len() != 1 {
        if !matches.is_empty() {
            warn!("reset code matches more than one user");
        }
        return Err(AccountError::InvalidResetCode);
    }
    let user = matches.remove(0);

    let ttl = Duration::minutes(st.config.reset_ttl_minutes);
    let fresh = user
        .reset_requested_at
        .is_some_and(|at| OffsetDateTime::now_utc() - at <= ttl);
    if !fresh {
        warn!(user_id = %user.user_id, "reset code expired");
        return Err(AccountError::InvalidResetCode);
    }

    let Some(token) = user.reset_token.as_deref() else {
        return Err(AccountError::InvalidResetCode);
    };
    let hash = hash_password(new_password)?;
    // The update only lands while the matched token is still the stored one,
    // so a code is spent exactly once even when confirms race.
    if !st.users.complete_reset(user.user_id, token, &hash).await? {
        warn!(user_id = %user.user_id, "reset code already used or replaced");
        return Err(AccountError::InvalidResetCode);
    }

    info!(user_id = %user.user_id, "password reset");
    Ok("Password reset successful")
}
