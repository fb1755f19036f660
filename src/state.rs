use crate::auth::repo::{MemoryUserStore, PgUserStore, UserStore};
use crate::config::{AppConfig, JwtConfig};
use crate::session::{MemorySessionStore, SessionStore};
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Present only when the service runs against Postgres.
    pub db: Option<PgPool>,
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let (db, users) = match config.database_url.as_deref() {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                let users = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;
                (Some(db), users)
            }
            None => {
                tracing::warn!("DATABASE_URL not set; accounts are kept in memory");
                (None, Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>)
            }
        };

        let sessions = Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>;

        Ok(Self {
            db,
            config,
            users,
            sessions,
        })
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            db: None,
            config,
            users,
            sessions,
        }
    }

    /// In-memory state for tests.
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            reset_ttl_minutes: 60,
        });

        Self::from_parts(
            config,
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemorySessionStore::new()),
        )
    }
}
