use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo_types::User;

const USER_COLUMNS: &str =
    "user_id, username, email, password_hash, reset_token, reset_requested_at, created_at";

/// Persistence seam for the `users` table.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Id of any user holding `username` or `email`.
    async fn find_conflict(&self, username: &str, email: &str) -> anyhow::Result<Option<Uuid>>;

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Insert a user. `None` means a uniqueness constraint kept the row out.
    async fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<Uuid>>;

    /// Overwrite the user's reset token. Returns whether a row was updated.
    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        requested_at: OffsetDateTime,
    ) -> anyhow::Result<bool>;

    /// Users whose reset token starts with `code`, at most `limit` of them.
    async fn find_by_reset_prefix(&self, code: &str, limit: i64) -> anyhow::Result<Vec<User>>;

    /// Replace the password hash without touching the reset token.
    async fn update_password(&self, user_id: Uuid, password_hash: &str) -> anyhow::Result<bool>;

    /// Replace the password hash and clear the reset token in one statement,
    /// provided the stored token is still `token`. Returns whether a row was updated.
    async fn complete_reset(
        &self,
        user_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_conflict(&self, username: &str, email: &str) -> anyhow::Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT user_id
            FROM users
            WHERE username = $1 OR email = $2
            LIMIT 1
            "#,
        )
        .bind(username)
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find conflicting user")?;
        Ok(id)
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .context("find user by username")?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            RETURNING user_id
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .fetch_optional(&self.db)
        .await
        .context("insert user")?;
        Ok(id)
    }

    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        requested_at: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET reset_token = $1, reset_requested_at = $2
             WHERE user_id = $3
            "#,
        )
        .bind(token)
        .bind(requested_at)
        .bind(user_id)
        .execute(&self.db)
        .await
        .context("store reset token")?;
        Ok(res.rows_affected() == 1)
    }

    async fn find_by_reset_prefix(&self, code: &str, limit: i64) -> anyhow::Result<Vec<User>> {
        // substr keeps `%` and `_` in the code literal, unlike LIKE.
        let rows = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE reset_token IS NOT NULL
              AND substr(reset_token, 1, char_length($1)) = $1
            LIMIT $2
            "#
        ))
        .bind(code)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .context("find user by reset code")?;
        Ok(rows)
    }

    async fn update_password(&self, user_id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE users SET password_hash = $1 WHERE user_id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.db)
            .await
            .context("update password hash")?;
        Ok(res.rows_affected() == 1)
    }

    async fn complete_reset(
        &self,
        user_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $1, reset_token = NULL, reset_requested_at = NULL
             WHERE user_id = $2 AND reset_token = $3
            "#,
        )
        .bind(password_hash)
        .bind(user_id)
        .bind(token)
        .execute(&self.db)
        .await
        .context("complete password reset")?;
        Ok(res.rows_affected() == 1)
    }
}

/// `UserStore` kept in process memory, with the same uniqueness rules as the table.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_conflict(&self, username: &str, email: &str) -> anyhow::Result<Option<Uuid>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.username == username || u.email == email)
            .map(|u| u.user_id))
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<Uuid>> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.username == username || u.email == email)
        {
            return Ok(None);
        }
        let user = User {
            user_id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            reset_token: None,
            reset_requested_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        let id = user.user_id;
        users.insert(id, user);
        Ok(Some(id))
    }

    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        requested_at: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.reset_token = Some(token.to_string());
        user.reset_requested_at = Some(requested_at);
        Ok(true)
    }

    async fn find_by_reset_prefix(&self, code: &str, limit: i64) -> anyhow::Result<Vec<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .filter(|u| {
                u.reset_token
                    .as_deref()
                    .is_some_and(|t| t.starts_with(code))
            })
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn update_password(&self, user_id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.password_hash = password_hash.to_string();
        Ok(true)
    }

    async fn complete_reset(
        &self,
        user_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> anyhow::Result<bool> {
        let mut users = self.users.write().await;
        let Some(user) = users
            .get_mut(&user_id)
            .filter(|u| u.reset_token.as_deref() == Some(token))
        else {
            return Ok(false);
        };
        user.password_hash = password_hash.to_string();
        user.reset_token = None;
        user.reset_requested_at = None;
        Ok(true)
    }
}
