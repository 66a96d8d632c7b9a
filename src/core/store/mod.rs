/*!
Portable relational persistence with embedded schema migrations.

The store runs on the sqlx `Any` driver so every query is written once and
served by either the embedded SQLite engine (default deployments) or a
server-hosted PostgreSQL (feature `postgres`). The two points where the
engines genuinely diverge (insert-id strategy and time-range cutoff SQL)
live behind [`dialect::Dialect`].

## Conventions

- **Timestamps**: RFC 3339 UTC text with millisecond precision at rest,
  `chrono::DateTime<Utc>` in memory. Lexicographic order equals time order.
- **JSON columns**: `serde_json` text (`mtr_data`, `disk_usage`,
  `temperatures`, snapshot `data`, schedule `options`).
- **Integrity**: foreign keys are on; parent deletes cascade. Multi-statement
  changes run in transactions and roll back on any error.
- **Errors**: `NotFound` / `InvalidInput` / `Conflict` sentinels; driver
  errors are wrapped with operation context, never surfaced raw.

The embedded engine keeps a single pooled connection so the bootstrap pragmas
(WAL, busy-timeout, foreign_keys=ON) hold for every statement.
*/

pub mod dialect;
pub mod migrate;
pub mod models;

mod agent;
pub mod notifications;
mod packetloss;
mod schedule;
mod speedtest;
mod users;

pub use dialect::{Dialect, TimeRange};

use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::any::{AnyPoolOptions, AnyQueryResult};
use sqlx::{AnyPool, Row};

/// Shared persistence handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: AnyPool,
    dialect: Dialect,
}

impl Store {
    /// Open the database, apply bootstrap pragmas and run pending migrations.
    pub async fn open(url: &str) -> Result<Store> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(url)?;

        let max_connections = match dialect {
            Dialect::Sqlite => 1,
            Dialect::Postgres => 5,
        };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| Error::db("open database", e))?;

        if dialect == Dialect::Sqlite {
            sqlx::raw_sql(
                "PRAGMA journal_mode = WAL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA foreign_keys = ON;",
            )
            .execute(&pool)
            .await
            .map_err(|e| Error::db("bootstrap pragmas", e))?;
        }

        migrate::run(&pool, dialect).await?;

        Ok(Store { pool, dialect })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub(crate) fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Rewrite placeholders for the active dialect.
    pub(crate) fn sql(&self, query: &str) -> String {
        self.dialect.sql(query)
    }

    /// Run an insert and resolve the new row id per dialect.
    pub(crate) async fn fetch_insert_id<'q>(
        &self,
        query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    ) -> sqlx::Result<i64> {
        match self.dialect {
            Dialect::Postgres => {
                let row = query.fetch_one(&self.pool).await?;
                row.try_get::<i64, _>(0)
            }
            Dialect::Sqlite => {
                let result: AnyQueryResult = query.execute(&self.pool).await?;
                Ok(result.last_insert_id().unwrap_or_default())
            }
        }
    }
}

/// Current time in the persisted representation.
pub(crate) fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serialize a timestamp into the persisted representation.
pub(crate) fn to_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a persisted timestamp.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("malformed stored timestamp {raw:?}: {e}")))
}

/// Parse an optional persisted timestamp.
pub(crate) fn parse_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

/// Column accessors that wrap decode failures with the column name.
pub(crate) trait RowExt {
    fn col<'r, T>(&'r self, name: &str) -> Result<T>
    where
        T: sqlx::Decode<'r, sqlx::Any> + sqlx::Type<sqlx::Any>;

    fn ts(&self, name: &str) -> Result<DateTime<Utc>>;

    fn ts_opt(&self, name: &str) -> Result<Option<DateTime<Utc>>>;
}

impl RowExt for sqlx::any::AnyRow {
    fn col<'r, T>(&'r self, name: &str) -> Result<T>
    where
        T: sqlx::Decode<'r, sqlx::Any> + sqlx::Type<sqlx::Any>,
    {
        self.try_get(name)
            .map_err(|e| Error::Internal(format!("column {name}: {e}")))
    }

    fn ts(&self, name: &str) -> Result<DateTime<Utc>> {
        parse_ts(&self.col::<String>(name)?)
    }

    fn ts_opt(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        parse_ts_opt(self.col::<Option<String>>(name)?)
    }
}
