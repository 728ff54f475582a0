use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
/// Persistence for one serialized credential blob per discord user.
/// `get` never fails on absence; `upsert` is last-write-wins on the
/// user id; `delete` is idempotent.
pub trait TokenStore: Send + Sync {
    async fn get(&self, user_id: u64) -> Result<Option<String>, StoreError>;
    async fn upsert(&self, user_id: u64, token_blob: &str) -> Result<(), StoreError>;
    async fn delete(&self, user_id: u64) -> Result<(), StoreError>;
}

/// Postgres-backed store, one row per user. Row-level atomicity is the
/// only synchronization; both the bot commands and the web callback go
/// through the same pool.
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Ensure the schema exists. Safe to run on every startup.
    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS google_tokens (
                user_id    BIGINT PRIMARY KEY,
                token_blob TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn get(&self, user_id: u64) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT token_blob FROM google_tokens WHERE user_id = $1")
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get(0)))
    }

    async fn upsert(&self, user_id: u64, token_blob: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO google_tokens (user_id, token_blob) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET token_blob = EXCLUDED.token_blob
            "#,
        )
        .bind(user_id as i64)
        .bind(token_blob)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, user_id: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM google_tokens WHERE user_id = $1")
            .bind(user_id as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// In-process store. Survives nothing, synchronizes with a plain mutex.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<u64, String>>,
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, user_id: u64) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().unwrap().get(&user_id).cloned())
    }

    async fn upsert(&self, user_id: u64, token_blob: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap()
            .insert(user_id, token_blob.to_string());
        Ok(())
    }

    async fn delete(&self, user_id: u64) -> Result<(), StoreError> {
        self.entries.lock().unwrap().remove(&user_id);
        Ok(())
    }
}
