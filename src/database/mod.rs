use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::Result;

pub mod migrations;
pub mod queries;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Applies every pending migration; returns the tags applied now.
    pub async fn migrate(&self) -> Result<Vec<&'static str>> {
        migrations::run_migrations(&self.pool).await
    }

    /// Opens a transaction that already holds the write lock, the way
    /// `BEGIN IMMEDIATE` would. A deferred transaction that reads first keeps
    /// a WAL snapshot, and its first write fails with SQLITE_BUSY_SNAPSHOT
    /// once another connection has committed in between. Taking the lock up
    /// front makes concurrent writers wait on the busy timeout instead.
    pub async fn begin_immediate(&self) -> Result<Transaction<'static, Sqlite>> {
        let mut tx = self.pool.begin().await?;
        // The statement matches no rows but still opens the write transaction.
        sqlx::query("DELETE FROM schema_migrations WHERE 0")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
