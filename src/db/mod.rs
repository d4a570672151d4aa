//! Database module for persistent storage.
//!
//! Provides async SQLite database access using SQLx for:
//! - The currency ledger (balances plus an append-only transaction log)
//! - Per-guild level records, badges and windowed counter resets
//! - Per-guild leveling settings, level roles and channel gating
//! - Bump counts

mod bumps;
mod guild_config;
mod ledger;
mod levels;

pub use bumps::BumpRepository;
pub use guild_config::{ChannelMode, GuildConfigRepository, GuildLevelConfig, GuildSetting};
pub use ledger::{LedgerRepository, TransactionKind, to_cents};
pub use levels::{Board, LevelRecord, LevelRepository, ResetScope, XpChange};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("migration error: {0}")]
    Migration(sqlx::migrate::MigrateError),
    #[error("amount not representable in cents: {0}")]
    AmountOverflow(String),
    #[error("corrupt value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },
    #[error("internal error: {0}")]
    Internal(String),
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// How long a writer waits for the SQLite write lock.
    const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            // Use a uniquely named shared-cache memory database per call.
            // `file::memory:` is global-ish and will collide across parallel tests.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:guildkeeper-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true)
                .busy_timeout(Self::BUSY_TIMEOUT);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            // Create parent directory if it doesn't exist
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .busy_timeout(Self::BUSY_TIMEOUT);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        Self::run_migrations(&pool).await?;

        // WAL lets readers proceed while a writer holds the lock
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&pool)
            .await?;

        let integrity_result: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&pool)
            .await?;

        if integrity_result != "ok" {
            tracing::error!(
                integrity_check = %integrity_result,
                "Database integrity check FAILED - corruption detected!"
            );
            return Err(DbError::Internal(format!(
                "integrity check failed: {}",
                integrity_result
            )));
        }

        info!("Database integrity check passed");

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run embedded migrations.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(DbError::Migration)?;

        info!("Database migrations checked/applied");
        Ok(())
    }

    /// Get ledger repository.
    pub fn ledger(&self) -> LedgerRepository<'_> {
        LedgerRepository::new(&self.pool)
    }

    /// Get level record repository.
    pub fn levels(&self) -> LevelRepository<'_> {
        LevelRepository::new(&self.pool)
    }

    /// Get guild leveling settings repository.
    pub fn guild_configs(&self) -> GuildConfigRepository<'_> {
        GuildConfigRepository::new(&self.pool)
    }

    /// Get bump repository.
    pub fn bumps(&self) -> BumpRepository<'_> {
        BumpRepository::new(&self.pool)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Sqlx(err)
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_databases_are_isolated() {
        let a = Database::new(":memory:").await.unwrap();
        let b = Database::new(":memory:").await.unwrap();

        a.bumps().record(1, 2, 100, 0).await.unwrap();
        assert_eq!(a.bumps().top(1, 10).await.unwrap().len(), 1);
        assert!(b.bumps().top(1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bot.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::new(path).await.unwrap();
            db.bumps().record(5, 6, 100, 0).await.unwrap();
            db.pool().close().await;
        }

        let db = Database::new(path).await.unwrap();
        let top = db.bumps().top(5, 10).await.unwrap();
        assert_eq!(top, vec![(6, 1)]);
    }
}
