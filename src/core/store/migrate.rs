//! Embedded, forward-only schema migrations.
//!
//! Migration files are numbered `NNN_name.sql` with a `NNN_name_postgres.sql`
//! sibling for the server engine. Each file is applied at most once, inside a
//! transaction, and its name is recorded in `schema_migrations`. There are no
//! down migrations.

use super::dialect::Dialect;
use crate::error::{Error, Result};
use sqlx::AnyPool;

struct Migration {
    name: &'static str,
    sqlite: &'static str,
    postgres: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_init",
        sqlite: include_str!("migrations/001_init.sql"),
        postgres: include_str!("migrations/001_init_postgres.sql"),
    },
    Migration {
        name: "002_monitor_agents",
        sqlite: include_str!("migrations/002_monitor_agents.sql"),
        postgres: include_str!("migrations/002_monitor_agents_postgres.sql"),
    },
    Migration {
        name: "003_notifications",
        sqlite: include_str!("migrations/003_notifications.sql"),
        postgres: include_str!("migrations/003_notifications_postgres.sql"),
    },
];

/// Apply all migrations newer than the recorded set. Returns how many ran.
pub async fn run(pool: &AnyPool, dialect: Dialect) -> Result<usize> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::db("create schema_migrations", e))?;

    let applied: Vec<String> = sqlx::query_scalar("SELECT name FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(|e| Error::db("read schema_migrations", e))?;

    let mut ran = 0usize;
    for migration in MIGRATIONS {
        if applied.iter().any(|name| name == migration.name) {
            continue;
        }

        let ddl = match dialect {
            Dialect::Sqlite => migration.sqlite,
            Dialect::Postgres => migration.postgres,
        };

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| Error::db("begin migration", e))?;

        sqlx::raw_sql(ddl)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::db(&format!("apply migration {}", migration.name), e))?;

        sqlx::query(&dialect.sql(
            "INSERT INTO schema_migrations (name, applied_at) VALUES (?, ?)",
        ))
        .bind(migration.name)
        .bind(super::now_ts())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::db(&format!("record migration {}", migration.name), e))?;

        tx.commit()
            .await
            .map_err(|e| Error::db(&format!("commit migration {}", migration.name), e))?;

        tracing::info!(migration = migration.name, "applied schema migration");
        ran += 1;
    }

    Ok(ran)
}
