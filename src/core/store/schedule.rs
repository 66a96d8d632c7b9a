//! Speed-test schedules.
//!
//! `server_ids` and the options snapshot are JSON text columns; the interval
//! expression is opaque to the store and interpreted by the scheduler.

use super::models::{NewSchedule, Schedule};
use super::{RowExt, Store};
use crate::core::probe::types::TestOptions;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;

fn map_schedule(row: &AnyRow) -> Result<Schedule> {
    let server_ids: Vec<String> = serde_json::from_str(&row.col::<String>("server_ids")?)?;
    let options: TestOptions = serde_json::from_str(&row.col::<String>("options")?)?;
    Ok(Schedule {
        id: row.col("id")?,
        server_ids,
        interval_expr: row.col("interval_expr")?,
        last_run: row.ts_opt("last_run")?,
        next_run: row.ts("next_run")?,
        enabled: row.col("enabled")?,
        options,
        created_at: row.ts("created_at")?,
    })
}

const SCHEDULE_COLUMNS: &str =
    "id, server_ids, interval_expr, last_run, next_run, enabled, options, created_at";

impl Store {
    pub async fn create_schedule(&self, schedule: &NewSchedule) -> Result<Schedule> {
        let now = super::now_ts();
        let server_ids = serde_json::to_string(&schedule.server_ids)?;
        let options = serde_json::to_string(&schedule.options)?;

        let sql = self.dialect().insert_sql(
            "INSERT INTO schedules (server_ids, interval_expr, next_run, enabled, options, \
             created_at) VALUES (?, ?, ?, ?, ?, ?)",
        );
        let query = sqlx::query(&sql)
            .bind(&server_ids)
            .bind(&schedule.interval_expr)
            .bind(super::to_ts(schedule.next_run))
            .bind(schedule.enabled)
            .bind(&options)
            .bind(&now);
        let id = self
            .fetch_insert_id(query)
            .await
            .map_err(|e| Error::db("create schedule", e))?;

        self.schedule(id).await
    }

    pub async fn schedule(&self, id: i64) -> Result<Schedule> {
        let row = sqlx::query(&self.sql(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?"
        )))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::db("load schedule", e))?
        .ok_or_else(|| Error::NotFound(format!("schedule {id}")))?;

        map_schedule(&row)
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list schedules", e))?;

        rows.iter().map(map_schedule).collect()
    }

    /// Enabled schedules whose `next_run` is at or before `now`.
    pub async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let rows = sqlx::query(&self.sql(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE enabled = ? AND next_run <= ? \
             ORDER BY next_run"
        )))
        .bind(true)
        .bind(super::to_ts(now))
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("due schedules", e))?;

        rows.iter().map(map_schedule).collect()
    }

    /// Record a completed dispatch: `last_run = now`, recomputed `next_run`.
    pub async fn mark_schedule_run(
        &self,
        id: i64,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(&self.sql(
            "UPDATE schedules SET last_run = ?, next_run = ? WHERE id = ?",
        ))
        .bind(super::to_ts(last_run))
        .bind(super::to_ts(next_run))
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("mark schedule run", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    /// Push `next_run` forward without touching `last_run` (startup
    /// no-catch-up normalization).
    pub async fn reset_schedule_next_run(&self, id: i64, next_run: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(&self.sql("UPDATE schedules SET next_run = ? WHERE id = ?"))
            .bind(super::to_ts(next_run))
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| Error::db("reset schedule next run", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    pub async fn set_schedule_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let result = sqlx::query(&self.sql("UPDATE schedules SET enabled = ? WHERE id = ?"))
            .bind(enabled)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| Error::db("toggle schedule", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<()> {
        let result = sqlx::query(&self.sql("DELETE FROM schedules WHERE id = ?"))
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| Error::db("delete schedule", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }
}
