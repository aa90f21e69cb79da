use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{fs, path::PathBuf, str::FromStr};

/// Durable copy of the session credentials.
///
/// Token and user profile are written together and cleared together; a row
/// with only one of them is never observable through this API.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredentials {
    pub token: String,
    pub user_json: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await?;
        let storage = Self { pool };
        storage.ensure_credentials_table().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_credentials_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                slot       INTEGER PRIMARY KEY CHECK (slot = 1),
                token      TEXT NOT NULL,
                user_json  TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure credentials table exists")?;
        Ok(())
    }

    /// Replaces the single credential row, creating it if missing.
    pub async fn save_credentials(&self, token: &str, user_json: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO credentials (slot, token, user_json, updated_at)
             VALUES (1, ?, ?, ?)
             ON CONFLICT(slot) DO UPDATE SET
                 token = excluded.token,
                 user_json = excluded.user_json,
                 updated_at = excluded.updated_at",
        )
        .bind(token)
        .bind(user_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to save credentials")?;
        Ok(())
    }

    pub async fn load_credentials(&self) -> Result<Option<StoredCredentials>> {
        let row = sqlx::query("SELECT token, user_json, updated_at FROM credentials WHERE slot = 1")
            .fetch_optional(&self.pool)
            .await
            .context("failed to load credentials")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let updated_at_raw: String = row.try_get("updated_at")?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(StoredCredentials {
            token: row.try_get("token")?,
            user_json: row.try_get("user_json")?,
            updated_at,
        }))
    }

    /// Idempotent: deleting an absent row is a no-op.
    pub async fn clear_credentials(&self) -> Result<()> {
        sqlx::query("DELETE FROM credentials WHERE slot = 1")
            .execute(&self.pool)
            .await
            .context("failed to clear credentials")?;
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    if path.is_empty() || path.starts_with(':') {
        return Ok(());
    }
    let path = PathBuf::from(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
