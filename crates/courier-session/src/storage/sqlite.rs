//! SQLite identity store (feature-gated).
//!
//! The database file is shared with the bridge sidecar, which keeps its
//! own key material next to the `courier_device` table. Wiping removes the
//! file together with its `-wal` and `-shm` companions.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use courier_core::{Identity, SessionStore, StoreError};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tokio::sync::Mutex;

const CREATE_DEVICE_TABLE: &str = "CREATE TABLE IF NOT EXISTS courier_device (
    jid TEXT PRIMARY KEY,
    push_name TEXT,
    paired_at INTEGER NOT NULL
)";

/// SQLite store implementation.
pub struct SqliteStore {
    path: PathBuf,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqliteStore {
    /// Create a store backed by the database at `path`.
    ///
    /// The file is opened lazily and recreated after a wipe.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: Mutex::new(None),
        }
    }

    /// Database file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The database file and its write-ahead companions.
    #[must_use]
    pub fn artifact_paths(&self) -> [PathBuf; 3] {
        [
            self.path.clone(),
            with_suffix(&self.path, "-wal"),
            with_suffix(&self.path, "-shm"),
        ]
    }

    async fn pool(&self) -> Result<SqlitePool, StoreError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Open(e.to_string()))?;
        sqlx::query(CREATE_DEVICE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Open(e.to_string()))?;

        tracing::debug!(path = %self.path.display(), "Opened session store");
        *guard = Some(pool.clone());
        Ok(pool)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

fn internal(e: &sqlx::Error) -> StoreError {
    StoreError::Internal(e.to_string())
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn first_identity(&self) -> Result<Option<Identity>, StoreError> {
        let pool = self.pool().await?;
        let row: Option<(String, Option<String>, i64)> = sqlx::query_as(
            "SELECT jid, push_name, paired_at FROM courier_device ORDER BY paired_at ASC LIMIT 1",
        )
        .fetch_optional(&pool)
        .await
        .map_err(|e| internal(&e))?;

        Ok(row.map(|(id, push_name, paired_at)| Identity {
            id,
            push_name,
            paired_at,
        }))
    }

    async fn save_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query(
            "INSERT INTO courier_device (jid, push_name, paired_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(jid) DO UPDATE SET push_name = excluded.push_name, paired_at = excluded.paired_at",
        )
        .bind(&identity.id)
        .bind(&identity.push_name)
        .bind(identity.paired_at)
        .execute(&pool)
        .await
        .map_err(|e| internal(&e))?;
        Ok(())
    }

    async fn wipe(&self) -> Result<(), StoreError> {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }

        for path in self.artifact_paths() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed store file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Ok(())
    }
}
