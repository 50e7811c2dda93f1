//! Database layer for the hive.
//!
//! The [`Database`] handle wraps a connection pool plus the SQL [`Dialect`]
//! selected from the connection URL. Operations are organized into adaptor
//! modules, each extending `Database` with an impl block over one concern:
//!
//! - `analysis`: analysis rows, suitability ordering, blocking control rules
//! - `stats`: the `analysis_stats` aggregate, sync lock, counters, hive load
//! - `worker`: worker rows, check-ins, death records, activity intervals
//! - `job`: claiming, releasing, semaphores, per-status counts
//!
//! All timestamps are stored as native datetime columns and read back as
//! epoch seconds through the dialect's conversion expressions, so the same
//! query text runs on SQLite and MySQL.

mod analysis;
mod dialect;
mod job;
pub mod schema;
mod stats;
mod worker;

use chrono::{DateTime, Utc};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use thiserror::Error;

pub use dialect::Dialect;

/// Value of `hive_sql_schema_version` this code was written against.
pub const SCHEMA_VERSION: &str = "1";

const SCHEMA_VERSION_KEY: &str = "hive_sql_schema_version";
const USE_TRIGGERS_KEY: &str = "hive_use_triggers";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("schema version mismatch: database has {found}, code expects {expected}")]
    SchemaVersion { found: String, expected: String },
}

pub type DbResult<T> = Result<T, DbError>;

/// Main database handle.
///
/// Cheap to clone; clones share the underlying pool. The trigger flag is read
/// once at connect time from `hive_meta` and cached for the lifetime of the
/// handle, matching how a deployed schema either has triggers or does not.
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
    dialect: Dialect,
    uses_triggers: bool,
}

impl Database {
    /// Connect to the database and verify the schema version if one is
    /// recorded. A fresh database (no `hive_meta` table yet) passes.
    pub async fn connect(database_url: &str) -> DbResult<Self> {
        Self::connect_with_pool_size(database_url, 10).await
    }

    /// Connect with a custom pool size.
    pub async fn connect_with_pool_size(
        database_url: &str,
        max_connections: u32,
    ) -> DbResult<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(database_url)?;
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let mut db = Self {
            pool,
            dialect,
            uses_triggers: false,
        };

        // hive_meta is absent until the schema is deployed; any failure here
        // is treated as "fresh database" rather than an error.
        if let Ok(Some(found)) = db.fetch_meta(SCHEMA_VERSION_KEY).await {
            if found != SCHEMA_VERSION {
                return Err(DbError::SchemaVersion {
                    found,
                    expected: SCHEMA_VERSION.to_string(),
                });
            }
        }
        if let Ok(Some(value)) = db.fetch_meta(USE_TRIGGERS_KEY).await {
            db.uses_triggers = value == "1";
        }

        Ok(db)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// The SQL dialect selected from the connection URL.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Whether the deployed schema maintains live job counts with triggers.
    pub fn hive_uses_triggers(&self) -> bool {
        self.uses_triggers
    }

    /// Read one `hive_meta` value.
    pub async fn fetch_meta(&self, key: &str) -> DbResult<Option<String>> {
        use sqlx::Row;

        let row = sqlx::query("SELECT meta_value FROM hive_meta WHERE meta_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<Option<String>, _>("meta_value")?),
            None => Ok(None),
        }
    }

    /// Insert or replace one `hive_meta` value.
    pub async fn store_meta(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM hive_meta WHERE meta_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        sqlx::query("INSERT INTO hive_meta (meta_key, meta_value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Convert epoch seconds read from the database into a `DateTime<Utc>`.
pub(crate) fn datetime_from_epoch(epoch: i64, what: &str) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp(epoch, 0)
        .ok_or_else(|| DbError::Corrupt(format!("{what}: timestamp {epoch} out of range")))
}
