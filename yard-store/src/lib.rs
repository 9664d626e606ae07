//! Record persistence for yard.
//!
//! A thin SQLite layer: repositories with their stored environment
//! configuration, workspaces, templates, and the operation history. All
//! lifecycle rules live in the services that call it.

pub mod db;
pub mod error;
pub mod operation;
pub mod repositories;
pub mod templates;
pub mod workspaces;

pub use error::{Result, StoreError};
pub use operation::{Operation, OperationStatus, OperationType};
pub use workspaces::{NewWorkspace, WorkspaceFilters};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a private in-memory database with migrations applied.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = db::in_memory_pool().await?;
        db::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}
