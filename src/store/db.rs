//! SQLite-backed credential store.
//!
//! One table, `credentials`, holding the OAuth token pair for each user id.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

use crate::error::AppError;

/// Credential store backed by SQLite.
#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
}

impl CredentialStore {
    /// Connect (creating the database file if needed) and ensure the schema exists.
    pub async fn init(db_url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(|e| AppError::Database(format!("Invalid DATABASE_URL: {e}")))?
            .create_if_missing(true);

        // Every connection to `:memory:` opens its own database, so pin the pool to one.
        let in_memory = db_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to open SQLite database: {e}")))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the credentials table if it is missing. Safe to run repeatedly.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                user_id         TEXT PRIMARY KEY NOT NULL,
                access_token    TEXT NOT NULL,
                refresh_token   TEXT,
                expires_at      TEXT,
                updated_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up the credentials stored for `user_id`.
    pub async fn get(&self, user_id: &str) -> Result<Option<CredentialRecord>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, access_token, refresh_token, expires_at, updated_at
            FROM credentials
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(CredentialRecord::from_row))
    }

    /// All user ids with stored credentials.
    pub async fn list_user_ids(&self) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query("SELECT user_id FROM credentials")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    pub async fn count_users(&self) -> Result<usize, AppError> {
        let row = sqlx::query("SELECT COUNT(*) FROM credentials")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get(0);
        Ok(count as usize)
    }

    /// Insert or replace the credentials for `user_id` and return the stored record.
    pub async fn put(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CredentialRecord, AppError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (user_id, access_token, refresh_token, expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (user_id)
            DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.get(user_id).await?.ok_or_else(|| {
            AppError::Database(format!("credentials for {user_id} vanished after upsert"))
        })
    }
}

// ── Types ────────────────────────────────────────────────────────────────────

/// Stored OAuth token pair for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialRecord {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    fn from_row(row: &SqliteRow) -> Self {
        Self {
            user_id: row.get(0),
            access_token: row.get(1),
            refresh_token: row.try_get(2).ok().flatten(),
            expires_at: row.try_get(3).ok().flatten(),
            updated_at: row.get(4),
        }
    }

    /// True when the access token is expired or expires within `leeway_secs`.
    pub fn expires_within(&self, leeway_secs: i64) -> bool {
        self.expires_at
            .map(|e| e <= Utc::now() + chrono::Duration::seconds(leeway_secs))
            .unwrap_or(false)
    }
}
