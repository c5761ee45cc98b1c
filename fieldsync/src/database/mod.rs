//! Database module
//!
//! This module provides all local persistence:
//! - Schema and migrations
//! - Row models and record family payloads
//! - The encryption-agnostic `LocalStore`
//! - `Database`, the shared handle that serializes writers

pub mod models;
pub mod payloads;
pub mod schema;
pub mod store;

pub use models::*;
pub use payloads::*;
pub use schema::initialize_database;
pub use store::LocalStore;

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Pool plus the single write lock every writer on it must hold.
///
/// `LocalStore` and `SyncQueue` built from clones of the same `Database`
/// share one serialization point, so a record row and its queue slot can be
/// written in one transaction without racing other writers.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open (and migrate) the database file at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        Ok(Self::new(create_pool(db_path).await?))
    }

    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::new(create_memory_pool().await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Held for the whole of any write, single statement or transaction
    pub async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Start a transaction that takes the SQLite write lock up front.
    /// Callers must already hold `write_lock()`.
    pub async fn begin_immediate(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }
}

/// Build connection options shared by migration and application connections.
fn connect_options(db_path: &Path) -> std::result::Result<SqliteConnectOptions, sqlx::Error> {
    SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display())).map(
        |opts| {
            opts.create_if_missing(true)
                .busy_timeout(Duration::from_secs(5))
                .journal_mode(SqliteJournalMode::Wal)
        },
    )
}

/// Create and initialize a database connection pool.
///
/// Migrations run on a dedicated single-connection pool that is closed
/// before the application pool is created, so every pooled connection
/// sees the final schema.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::info!("Creating database connection pool at: {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let migration_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(db_path)?)
        .await?;

    initialize_database(&migration_pool).await?;
    migration_pool.close().await;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options(db_path)?)
        .await?;

    tracing::info!("Database pool created successfully");

    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
///
/// The connection is never recycled; closing it would discard the data.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    initialize_database(&pool).await?;

    Ok(pool)
}
