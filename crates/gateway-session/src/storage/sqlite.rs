//! SQLite datastore (feature-gated).

use std::str::FromStr;

use async_trait::async_trait;
use gateway_core::{Envelope, traits::TierError};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use super::{SessionDatastore, SessionRecord, now_millis};

/// SQLite-backed session datastore.
pub struct SqliteDatastore {
    pool: SqlitePool,
}

fn backend(e: sqlx::Error) -> TierError {
    TierError::Backend(e.to_string())
}

type RecordRow = (String, String, bool, i64);

impl SqliteDatastore {
    /// Open (or create) the database at `database_url` and migrate it.
    ///
    /// # Errors
    /// Returns error if the connection or migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, TierError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(backend)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(backend)?;
        Self::with_pool(pool).await
    }

    /// Open a private in-memory database (useful for tests).
    ///
    /// # Errors
    /// Returns error if the connection or migration fails.
    pub async fn in_memory() -> Result<Self, TierError> {
        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(backend)?;
        Self::with_pool(pool).await
    }

    /// Use an existing pool, creating the table if needed.
    ///
    /// # Errors
    /// Returns error if the migration fails.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, TierError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messaging_sessions (
                session_name   TEXT PRIMARY KEY,
                envelope       TEXT NOT NULL,
                is_active      INTEGER NOT NULL DEFAULT 1,
                last_connected INTEGER NOT NULL,
                created_at     INTEGER NOT NULL,
                updated_at     INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(backend)?;

        Ok(Self { pool })
    }

    /// Fetch a record regardless of its active flag.
    ///
    /// # Errors
    /// Returns error if the query fails or the stored envelope is corrupt.
    pub async fn find(&self, session_name: &str) -> Result<Option<SessionRecord>, TierError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT session_name, envelope, is_active, last_connected
             FROM messaging_sessions WHERE session_name = ?",
        )
        .bind(session_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(into_record).transpose()
    }
}

fn into_record(row: RecordRow) -> Result<SessionRecord, TierError> {
    let (session_name, envelope, is_active, last_connected) = row;
    Ok(SessionRecord {
        session_name,
        envelope: Envelope::from_json(&envelope)?,
        is_active,
        last_connected,
    })
}

#[async_trait]
impl SessionDatastore for SqliteDatastore {
    async fn upsert(&self, record: SessionRecord) -> Result<(), TierError> {
        let now = now_millis();
        sqlx::query(
            "INSERT INTO messaging_sessions
                (session_name, envelope, is_active, last_connected, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_name) DO UPDATE SET
                envelope = excluded.envelope,
                is_active = excluded.is_active,
                last_connected = excluded.last_connected,
                updated_at = excluded.updated_at",
        )
        .bind(&record.session_name)
        .bind(record.envelope.to_json()?)
        .bind(record.is_active)
        .bind(record.last_connected)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn find_active(&self, session_name: &str) -> Result<Option<SessionRecord>, TierError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT session_name, envelope, is_active, last_connected
             FROM messaging_sessions WHERE session_name = ? AND is_active = 1",
        )
        .bind(session_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(into_record).transpose()
    }

    async fn deactivate(&self, session_name: &str) -> Result<u64, TierError> {
        let result = sqlx::query(
            "UPDATE messaging_sessions SET is_active = 0, updated_at = ? WHERE session_name = ?",
        )
        .bind(now_millis())
        .bind(session_name)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected())
    }
}
