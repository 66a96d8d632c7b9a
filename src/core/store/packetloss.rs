//! Packet-loss monitors and their results.

use super::models::{
    MonitorState, NewPacketLossMonitor, NewPacketLossResult, Page, Paged, PacketLossMonitor,
    PacketLossResult,
};
use super::{RowExt, Store, TimeRange};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;

fn map_monitor(row: &AnyRow) -> Result<PacketLossMonitor> {
    let packet_count: i64 = row.col("packet_count")?;
    Ok(PacketLossMonitor {
        id: row.col("id")?,
        host: row.col("host")?,
        name: row.col("name")?,
        interval_expr: row.col("interval_expr")?,
        packet_count: packet_count as u32,
        threshold: row.col("threshold")?,
        enabled: row.col("enabled")?,
        last_run: row.ts_opt("last_run")?,
        next_run: row.ts_opt("next_run")?,
        last_state: MonitorState::parse(&row.col::<String>("last_state")?),
        last_state_change: row.ts_opt("last_state_change")?,
        created_at: row.ts("created_at")?,
        updated_at: row.ts("updated_at")?,
    })
}

fn map_result(row: &AnyRow) -> Result<PacketLossResult> {
    let packets_sent: i64 = row.col("packets_sent")?;
    let packets_recv: i64 = row.col("packets_recv")?;
    let hop_count: i64 = row.col("hop_count")?;
    Ok(PacketLossResult {
        id: row.col("id")?,
        monitor_id: row.col("monitor_id")?,
        packet_loss: row.col("packet_loss")?,
        min_rtt: row.col("min_rtt")?,
        avg_rtt: row.col("avg_rtt")?,
        max_rtt: row.col("max_rtt")?,
        std_dev_rtt: row.col("std_dev_rtt")?,
        packets_sent: packets_sent as u32,
        packets_recv: packets_recv as u32,
        used_mtr: row.col("used_mtr")?,
        hop_count: hop_count as u32,
        mtr_data: row.col("mtr_data")?,
        privileged_mode: row.col("privileged_mode")?,
        created_at: row.ts("created_at")?,
    })
}

fn validate_monitor(monitor: &NewPacketLossMonitor) -> Result<()> {
    if monitor.host.trim().is_empty() {
        return Err(Error::InvalidInput("monitor host must not be empty".into()));
    }
    if !(1..=100).contains(&monitor.packet_count) {
        return Err(Error::InvalidInput(format!(
            "packet_count must be 1..=100, got {}",
            monitor.packet_count
        )));
    }
    if !(0.0..=100.0).contains(&monitor.threshold) {
        return Err(Error::InvalidInput(format!(
            "threshold must be 0..=100, got {}",
            monitor.threshold
        )));
    }
    Ok(())
}

const MONITOR_COLUMNS: &str = "id, host, name, interval_expr, packet_count, threshold, enabled, \
     last_run, next_run, last_state, last_state_change, created_at, updated_at";

const RESULT_COLUMNS: &str = "id, monitor_id, packet_loss, min_rtt, avg_rtt, max_rtt, \
     std_dev_rtt, packets_sent, packets_recv, used_mtr, hop_count, mtr_data, privileged_mode, \
     created_at";

impl Store {
    pub async fn create_packetloss_monitor(
        &self,
        monitor: &NewPacketLossMonitor,
    ) -> Result<PacketLossMonitor> {
        validate_monitor(monitor)?;

        let now = super::now_ts();
        let sql = self.dialect().insert_sql(
            "INSERT INTO packet_loss_monitors (host, name, interval_expr, packet_count, \
             threshold, enabled, last_state, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        );
        let query = sqlx::query(&sql)
            .bind(monitor.host.trim())
            .bind(&monitor.name)
            .bind(&monitor.interval_expr)
            .bind(i64::from(monitor.packet_count))
            .bind(monitor.threshold)
            .bind(monitor.enabled)
            .bind(MonitorState::Unknown.as_str())
            .bind(&now)
            .bind(&now);
        let id = self
            .fetch_insert_id(query)
            .await
            .map_err(|e| Error::db("create monitor", e))?;

        self.packetloss_monitor(id).await
    }

    pub async fn packetloss_monitor(&self, id: i64) -> Result<PacketLossMonitor> {
        let row = sqlx::query(&self.sql(&format!(
            "SELECT {MONITOR_COLUMNS} FROM packet_loss_monitors WHERE id = ?"
        )))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::db("load monitor", e))?
        .ok_or_else(|| Error::NotFound(format!("monitor {id}")))?;

        map_monitor(&row)
    }

    pub async fn list_packetloss_monitors(&self) -> Result<Vec<PacketLossMonitor>> {
        let rows = sqlx::query(&format!(
            "SELECT {MONITOR_COLUMNS} FROM packet_loss_monitors ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list monitors", e))?;

        rows.iter().map(map_monitor).collect()
    }

    pub async fn enabled_packetloss_monitors(&self) -> Result<Vec<PacketLossMonitor>> {
        let rows = sqlx::query(&self.sql(&format!(
            "SELECT {MONITOR_COLUMNS} FROM packet_loss_monitors WHERE enabled = ? ORDER BY id"
        )))
        .bind(true)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list enabled monitors", e))?;

        rows.iter().map(map_monitor).collect()
    }

    /// Enabled monitors whose `next_run` is at or before `now`.
    pub async fn due_packetloss_monitors(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PacketLossMonitor>> {
        let rows = sqlx::query(&self.sql(&format!(
            "SELECT {MONITOR_COLUMNS} FROM packet_loss_monitors \
             WHERE enabled = ? AND next_run IS NOT NULL AND next_run <= ? ORDER BY next_run"
        )))
        .bind(true)
        .bind(super::to_ts(now))
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("due monitors", e))?;

        rows.iter().map(map_monitor).collect()
    }

    pub async fn update_packetloss_monitor(
        &self,
        id: i64,
        monitor: &NewPacketLossMonitor,
    ) -> Result<PacketLossMonitor> {
        validate_monitor(monitor)?;

        let result = sqlx::query(&self.sql(
            "UPDATE packet_loss_monitors SET host = ?, name = ?, interval_expr = ?, \
             packet_count = ?, threshold = ?, enabled = ?, updated_at = ? WHERE id = ?",
        ))
        .bind(monitor.host.trim())
        .bind(&monitor.name)
        .bind(&monitor.interval_expr)
        .bind(i64::from(monitor.packet_count))
        .bind(monitor.threshold)
        .bind(monitor.enabled)
        .bind(super::now_ts())
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("update monitor", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("monitor {id}")));
        }
        self.packetloss_monitor(id).await
    }

    pub async fn mark_monitor_run(
        &self,
        id: i64,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(&self.sql(
            "UPDATE packet_loss_monitors SET last_run = ?, next_run = ?, updated_at = ? \
             WHERE id = ?",
        ))
        .bind(super::to_ts(last_run))
        .bind(next_run.map(super::to_ts))
        .bind(super::now_ts())
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("mark monitor run", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("monitor {id}")));
        }
        Ok(())
    }

    pub async fn reset_monitor_next_run(&self, id: i64, next_run: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(&self.sql(
            "UPDATE packet_loss_monitors SET next_run = ? WHERE id = ?",
        ))
        .bind(super::to_ts(next_run))
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("reset monitor next run", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("monitor {id}")));
        }
        Ok(())
    }

    /// Record a state transition; `last_state_change` moves only when the
    /// state actually changed.
    pub async fn update_monitor_state(
        &self,
        id: i64,
        state: MonitorState,
        changed_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(&self.sql(
            "UPDATE packet_loss_monitors SET last_state = ?, last_state_change = ?, \
             updated_at = ? WHERE id = ?",
        ))
        .bind(state.as_str())
        .bind(super::to_ts(changed_at))
        .bind(super::now_ts())
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("update monitor state", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("monitor {id}")));
        }
        Ok(())
    }

    /// Delete the monitor and, in the same transaction, its results.
    pub async fn delete_packetloss_monitor(&self, id: i64) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| Error::db("delete monitor", e))?;

        sqlx::query(&self.sql("DELETE FROM packet_loss_results WHERE monitor_id = ?"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::db("delete monitor results", e))?;

        let result = sqlx::query(&self.sql("DELETE FROM packet_loss_monitors WHERE id = ?"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::db("delete monitor", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("monitor {id}")));
        }

        tx.commit().await.map_err(|e| Error::db("delete monitor", e))
    }

    pub async fn insert_packetloss_result(
        &self,
        result: &NewPacketLossResult,
    ) -> Result<PacketLossResult> {
        if result.packets_recv > result.packets_sent {
            return Err(Error::InvalidInput(format!(
                "packets_recv {} > packets_sent {}",
                result.packets_recv, result.packets_sent
            )));
        }
        if !(0.0..=100.0).contains(&result.packet_loss) {
            return Err(Error::InvalidInput(format!(
                "packet_loss must be 0..=100, got {}",
                result.packet_loss
            )));
        }
        if result.used_mtr && result.hop_count == 0 {
            return Err(Error::InvalidInput(
                "an MTR result must carry at least one hop".into(),
            ));
        }

        let now = super::now_ts();
        let sql = self.dialect().insert_sql(
            "INSERT INTO packet_loss_results (monitor_id, packet_loss, min_rtt, avg_rtt, \
             max_rtt, std_dev_rtt, packets_sent, packets_recv, used_mtr, hop_count, mtr_data, \
             privileged_mode, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        );
        let query = sqlx::query(&sql)
            .bind(result.monitor_id)
            .bind(result.packet_loss)
            .bind(result.min_rtt)
            .bind(result.avg_rtt)
            .bind(result.max_rtt)
            .bind(result.std_dev_rtt)
            .bind(i64::from(result.packets_sent))
            .bind(i64::from(result.packets_recv))
            .bind(result.used_mtr)
            .bind(i64::from(result.hop_count))
            .bind(&result.mtr_data)
            .bind(result.privileged_mode)
            .bind(&now);
        let id = self
            .fetch_insert_id(query)
            .await
            .map_err(|e| Error::db("insert packetloss result", e))?;

        Ok(PacketLossResult {
            id,
            monitor_id: result.monitor_id,
            packet_loss: result.packet_loss,
            min_rtt: result.min_rtt,
            avg_rtt: result.avg_rtt,
            max_rtt: result.max_rtt,
            std_dev_rtt: result.std_dev_rtt,
            packets_sent: result.packets_sent,
            packets_recv: result.packets_recv,
            used_mtr: result.used_mtr,
            hop_count: result.hop_count,
            mtr_data: result.mtr_data.clone(),
            privileged_mode: result.privileged_mode,
            created_at: super::parse_ts(&now)?,
        })
    }

    pub async fn list_packetloss_results(
        &self,
        monitor_id: i64,
        page: Page,
        range: Option<TimeRange>,
    ) -> Result<Paged<PacketLossResult>> {
        let filter = match range {
            Some(range) => format!(
                "WHERE monitor_id = ? AND created_at >= {}",
                self.dialect().cutoff_expr(range)
            ),
            None => "WHERE monitor_id = ?".to_string(),
        };

        let total: i64 = sqlx::query_scalar(&self.sql(&format!(
            "SELECT COUNT(*) FROM packet_loss_results {filter}"
        )))
        .bind(monitor_id)
        .fetch_one(self.pool())
        .await
        .map_err(|e| Error::db("count packetloss results", e))?;

        let rows = sqlx::query(&self.sql(&format!(
            "SELECT {RESULT_COLUMNS} FROM packet_loss_results {filter} \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        )))
        .bind(monitor_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list packetloss results", e))?;

        let items = rows.iter().map(map_result).collect::<Result<Vec<_>>>()?;

        Ok(Paged {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    pub async fn latest_packetloss_result(
        &self,
        monitor_id: i64,
    ) -> Result<Option<PacketLossResult>> {
        let row = sqlx::query(&self.sql(&format!(
            "SELECT {RESULT_COLUMNS} FROM packet_loss_results WHERE monitor_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        )))
        .bind(monitor_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::db("latest packetloss result", e))?;

        row.as_ref().map(map_result).transpose()
    }
}
