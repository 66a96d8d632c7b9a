//! Remote bandwidth agents and everything the pool persists about them:
//! system info (1:1 upsert), interfaces (atomic rewrite), peaks (monotonic),
//! resource stats (2-hour retention), live bandwidth samples and historical
//! snapshots (latest per agent/interface/period).

use super::models::{
    MonitorAgent, MonitorBandwidthSample, MonitorHistoricalSnapshot, MonitorInterface,
    MonitorPeakStats, MonitorResourceStats, MonitorSystemInfo, NewMonitorAgent,
    NewMonitorResourceStats,
};
use super::{RowExt, Store};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;

fn map_agent(row: &AnyRow) -> Result<MonitorAgent> {
    Ok(MonitorAgent {
        id: row.col("id")?,
        name: row.col("name")?,
        base_url: row.col("base_url")?,
        api_key: row.col("api_key")?,
        enabled: row.col("enabled")?,
        interface: row.col("interface")?,
        created_at: row.ts("created_at")?,
        updated_at: row.ts("updated_at")?,
    })
}

const AGENT_COLUMNS: &str =
    "id, name, base_url, api_key, enabled, interface, created_at, updated_at";

/// The base URL is user-entered: require an absolute http(s) URL and strip
/// any trailing slashes so the pool's endpoint concatenation is uniform.
fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("agent base_url must not be empty".into()));
    }
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| Error::InvalidInput(format!("agent base_url {trimmed:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidInput(format!(
            "agent base_url must be http or https, got {}",
            parsed.scheme()
        )));
    }
    Ok(trimmed.to_string())
}

impl Store {
    pub async fn create_monitor_agent(&self, agent: &NewMonitorAgent) -> Result<MonitorAgent> {
        let base_url = normalize_base_url(&agent.base_url)?;

        let now = super::now_ts();
        let sql = self.dialect().insert_sql(
            "INSERT INTO monitor_agents (name, base_url, api_key, enabled, interface, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        );
        let query = sqlx::query(&sql)
            .bind(&agent.name)
            .bind(&base_url)
            .bind(&agent.api_key)
            .bind(agent.enabled)
            .bind(&agent.interface)
            .bind(&now)
            .bind(&now);
        let id = self
            .fetch_insert_id(query)
            .await
            .map_err(|e| Error::db("create agent", e))?;

        self.monitor_agent(id).await
    }

    pub async fn monitor_agent(&self, id: i64) -> Result<MonitorAgent> {
        let row = sqlx::query(&self.sql(&format!(
            "SELECT {AGENT_COLUMNS} FROM monitor_agents WHERE id = ?"
        )))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::db("load agent", e))?
        .ok_or_else(|| Error::NotFound(format!("agent {id}")))?;

        map_agent(&row)
    }

    pub async fn list_monitor_agents(&self) -> Result<Vec<MonitorAgent>> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM monitor_agents ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list agents", e))?;

        rows.iter().map(map_agent).collect()
    }

    pub async fn enabled_monitor_agents(&self) -> Result<Vec<MonitorAgent>> {
        let rows = sqlx::query(&self.sql(&format!(
            "SELECT {AGENT_COLUMNS} FROM monitor_agents WHERE enabled = ? ORDER BY id"
        )))
        .bind(true)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list enabled agents", e))?;

        rows.iter().map(map_agent).collect()
    }

    pub async fn update_monitor_agent(
        &self,
        id: i64,
        agent: &NewMonitorAgent,
    ) -> Result<MonitorAgent> {
        let base_url = normalize_base_url(&agent.base_url)?;
        let result = sqlx::query(&self.sql(
            "UPDATE monitor_agents SET name = ?, base_url = ?, api_key = ?, enabled = ?, \
             interface = ?, updated_at = ? WHERE id = ?",
        ))
        .bind(&agent.name)
        .bind(&base_url)
        .bind(&agent.api_key)
        .bind(agent.enabled)
        .bind(&agent.interface)
        .bind(super::now_ts())
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("update agent", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("agent {id}")));
        }
        self.monitor_agent(id).await
    }

    /// Delete the agent and, in one transaction, every dependent row.
    pub async fn delete_monitor_agent(&self, id: i64) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| Error::db("delete agent", e))?;

        for table in [
            "monitor_bandwidth",
            "monitor_resource_stats",
            "monitor_historical_snapshots",
            "monitor_interfaces",
            "monitor_peak_stats",
            "monitor_system_info",
        ] {
            sqlx::query(&self.sql(&format!("DELETE FROM {table} WHERE agent_id = ?")))
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::db(&format!("delete agent rows from {table}"), e))?;
        }

        let result = sqlx::query(&self.sql("DELETE FROM monitor_agents WHERE id = ?"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::db("delete agent", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("agent {id}")));
        }

        tx.commit().await.map_err(|e| Error::db("delete agent", e))
    }

    /// Idempotent 1:1 upsert; same inputs leave the row byte-identical.
    pub async fn upsert_monitor_system_info(&self, info: &MonitorSystemInfo) -> Result<()> {
        sqlx::query(&self.sql(
            "INSERT INTO monitor_system_info (agent_id, hostname, kernel, agent_version, \
             cpu_model, cpu_cores, cpu_threads, total_memory, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (agent_id) DO UPDATE SET hostname = excluded.hostname, \
             kernel = excluded.kernel, agent_version = excluded.agent_version, \
             cpu_model = excluded.cpu_model, cpu_cores = excluded.cpu_cores, \
             cpu_threads = excluded.cpu_threads, total_memory = excluded.total_memory, \
             updated_at = excluded.updated_at",
        ))
        .bind(info.agent_id)
        .bind(&info.hostname)
        .bind(&info.kernel)
        .bind(&info.agent_version)
        .bind(&info.cpu_model)
        .bind(i64::from(info.cpu_cores))
        .bind(i64::from(info.cpu_threads))
        .bind(info.total_memory as i64)
        .bind(super::now_ts())
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("upsert system info", e))?;

        Ok(())
    }

    pub async fn monitor_system_info(&self, agent_id: i64) -> Result<Option<MonitorSystemInfo>> {
        let row = sqlx::query(&self.sql(
            "SELECT agent_id, hostname, kernel, agent_version, cpu_model, cpu_cores, \
             cpu_threads, total_memory FROM monitor_system_info WHERE agent_id = ?",
        ))
        .bind(agent_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::db("load system info", e))?;

        row.map(|row| -> Result<MonitorSystemInfo> {
            let cpu_cores: i64 = row.col("cpu_cores")?;
            let cpu_threads: i64 = row.col("cpu_threads")?;
            let total_memory: i64 = row.col("total_memory")?;
            Ok(MonitorSystemInfo {
                agent_id: row.col("agent_id")?,
                hostname: row.col("hostname")?,
                kernel: row.col("kernel")?,
                agent_version: row.col("agent_version")?,
                cpu_model: row.col("cpu_model")?,
                cpu_cores: cpu_cores as u32,
                cpu_threads: cpu_threads as u32,
                total_memory: total_memory as u64,
            })
        })
        .transpose()
    }

    /// Replace the agent's interface set atomically.
    pub async fn replace_monitor_interfaces(
        &self,
        agent_id: i64,
        interfaces: &[MonitorInterface],
    ) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| Error::db("replace interfaces", e))?;

        sqlx::query(&self.sql("DELETE FROM monitor_interfaces WHERE agent_id = ?"))
            .bind(agent_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::db("clear interfaces", e))?;

        for iface in interfaces {
            sqlx::query(&self.sql(
                "INSERT INTO monitor_interfaces (agent_id, name, alias, ip_address, link_speed) \
                 VALUES (?, ?, ?, ?, ?)",
            ))
            .bind(agent_id)
            .bind(&iface.name)
            .bind(&iface.alias)
            .bind(&iface.ip_address)
            .bind(iface.link_speed)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::db("insert interface", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::db("replace interfaces", e))
    }

    pub async fn monitor_interfaces(&self, agent_id: i64) -> Result<Vec<MonitorInterface>> {
        let rows = sqlx::query(&self.sql(
            "SELECT agent_id, name, alias, ip_address, link_speed FROM monitor_interfaces \
             WHERE agent_id = ? ORDER BY name",
        ))
        .bind(agent_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list interfaces", e))?;

        rows.iter()
            .map(|row| {
                Ok(MonitorInterface {
                    agent_id: row.col("agent_id")?,
                    name: row.col("name")?,
                    alias: row.col("alias")?,
                    ip_address: row.col("ip_address")?,
                    link_speed: row.col("link_speed")?,
                })
            })
            .collect()
    }

    /// Raise the stored peaks if the observed sample exceeds them. Peaks only
    /// ever rise.
    pub async fn update_monitor_peaks(
        &self,
        agent_id: i64,
        rx_bytes: i64,
        tx_bytes: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let ts = super::to_ts(seen_at);
        sqlx::query(&self.sql(
            "INSERT INTO monitor_peak_stats (agent_id, peak_rx_bytes, peak_tx_bytes, \
             peak_rx_at, peak_tx_at) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (agent_id) DO UPDATE SET \
             peak_rx_at = CASE WHEN excluded.peak_rx_bytes > monitor_peak_stats.peak_rx_bytes \
                 THEN excluded.peak_rx_at ELSE monitor_peak_stats.peak_rx_at END, \
             peak_rx_bytes = CASE WHEN excluded.peak_rx_bytes > monitor_peak_stats.peak_rx_bytes \
                 THEN excluded.peak_rx_bytes ELSE monitor_peak_stats.peak_rx_bytes END, \
             peak_tx_at = CASE WHEN excluded.peak_tx_bytes > monitor_peak_stats.peak_tx_bytes \
                 THEN excluded.peak_tx_at ELSE monitor_peak_stats.peak_tx_at END, \
             peak_tx_bytes = CASE WHEN excluded.peak_tx_bytes > monitor_peak_stats.peak_tx_bytes \
                 THEN excluded.peak_tx_bytes ELSE monitor_peak_stats.peak_tx_bytes END",
        ))
        .bind(agent_id)
        .bind(rx_bytes)
        .bind(tx_bytes)
        .bind(&ts)
        .bind(&ts)
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("update peaks", e))?;

        Ok(())
    }

    pub async fn monitor_peaks(&self, agent_id: i64) -> Result<Option<MonitorPeakStats>> {
        let row = sqlx::query(&self.sql(
            "SELECT agent_id, peak_rx_bytes, peak_tx_bytes, peak_rx_at, peak_tx_at \
             FROM monitor_peak_stats WHERE agent_id = ?",
        ))
        .bind(agent_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::db("load peaks", e))?;

        row.map(|row| -> Result<MonitorPeakStats> {
            Ok(MonitorPeakStats {
                agent_id: row.col("agent_id")?,
                peak_rx_bytes: row.col("peak_rx_bytes")?,
                peak_tx_bytes: row.col("peak_tx_bytes")?,
                peak_rx_at: row.ts_opt("peak_rx_at")?,
                peak_tx_at: row.ts_opt("peak_tx_at")?,
            })
        })
        .transpose()
    }

    /// Insert a resource sample and sweep rows older than the retention
    /// window.
    pub async fn insert_monitor_resource_stats(
        &self,
        stats: &NewMonitorResourceStats,
    ) -> Result<()> {
        sqlx::query(&self.sql(
            "INSERT INTO monitor_resource_stats (agent_id, cpu_percent, memory_percent, \
             swap_percent, disk_usage, temperatures, uptime_seconds, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        ))
        .bind(stats.agent_id)
        .bind(stats.cpu_percent)
        .bind(stats.memory_percent)
        .bind(stats.swap_percent)
        .bind(&stats.disk_usage)
        .bind(&stats.temperatures)
        .bind(stats.uptime_seconds)
        .bind(super::now_ts())
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("insert resource stats", e))?;

        sqlx::query(&self.sql(&format!(
            "DELETE FROM monitor_resource_stats WHERE agent_id = ? AND created_at < {}",
            self.dialect().resource_retention_expr()
        )))
        .bind(stats.agent_id)
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("sweep resource stats", e))?;

        Ok(())
    }

    pub async fn list_monitor_resource_stats(
        &self,
        agent_id: i64,
        limit: i64,
    ) -> Result<Vec<MonitorResourceStats>> {
        let rows = sqlx::query(&self.sql(
            "SELECT id, agent_id, cpu_percent, memory_percent, swap_percent, disk_usage, \
             temperatures, uptime_seconds, created_at FROM monitor_resource_stats \
             WHERE agent_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        ))
        .bind(agent_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list resource stats", e))?;

        rows.iter()
            .map(|row| {
                Ok(MonitorResourceStats {
                    id: row.col("id")?,
                    agent_id: row.col("agent_id")?,
                    cpu_percent: row.col("cpu_percent")?,
                    memory_percent: row.col("memory_percent")?,
                    swap_percent: row.col("swap_percent")?,
                    disk_usage: row.col("disk_usage")?,
                    temperatures: row.col("temperatures")?,
                    uptime_seconds: row.col("uptime_seconds")?,
                    created_at: row.ts("created_at")?,
                })
            })
            .collect()
    }

    pub async fn insert_monitor_bandwidth(
        &self,
        agent_id: i64,
        rx_bytes_per_second: i64,
        tx_bytes_per_second: i64,
        rx_rate: &str,
        tx_rate: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(&self.sql(
            "INSERT INTO monitor_bandwidth (agent_id, rx_bytes_per_second, \
             tx_bytes_per_second, rx_rate, tx_rate, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        ))
        .bind(agent_id)
        .bind(rx_bytes_per_second)
        .bind(tx_bytes_per_second)
        .bind(rx_rate)
        .bind(tx_rate)
        .bind(super::to_ts(created_at))
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("insert bandwidth sample", e))?;

        Ok(())
    }

    /// Whether any bandwidth sample exists inside `[hour_start, hour_start+1h)`.
    /// The historical import keys idempotence off this.
    pub async fn has_bandwidth_sample_in_hour(
        &self,
        agent_id: i64,
        hour_start: DateTime<Utc>,
    ) -> Result<bool> {
        let hour_end = hour_start + chrono::Duration::hours(1);
        let count: i64 = sqlx::query_scalar(&self.sql(
            "SELECT COUNT(*) FROM monitor_bandwidth WHERE agent_id = ? \
             AND created_at >= ? AND created_at < ?",
        ))
        .bind(agent_id)
        .bind(super::to_ts(hour_start))
        .bind(super::to_ts(hour_end))
        .fetch_one(self.pool())
        .await
        .map_err(|e| Error::db("probe bandwidth hour", e))?;

        Ok(count > 0)
    }

    pub async fn list_monitor_bandwidth(
        &self,
        agent_id: i64,
        limit: i64,
    ) -> Result<Vec<MonitorBandwidthSample>> {
        let rows = sqlx::query(&self.sql(
            "SELECT id, agent_id, rx_bytes_per_second, tx_bytes_per_second, rx_rate, tx_rate, \
             created_at FROM monitor_bandwidth WHERE agent_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ?",
        ))
        .bind(agent_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list bandwidth samples", e))?;

        rows.iter()
            .map(|row| {
                Ok(MonitorBandwidthSample {
                    id: row.col("id")?,
                    agent_id: row.col("agent_id")?,
                    rx_bytes_per_second: row.col("rx_bytes_per_second")?,
                    tx_bytes_per_second: row.col("tx_bytes_per_second")?,
                    rx_rate: row.col("rx_rate")?,
                    tx_rate: row.col("tx_rate")?,
                    created_at: row.ts("created_at")?,
                })
            })
            .collect()
    }

    /// Keep only the latest snapshot per (agent, interface, period).
    pub async fn upsert_historical_snapshot(
        &self,
        agent_id: i64,
        interface: &str,
        period_type: &str,
        data: &str,
    ) -> Result<()> {
        if !matches!(period_type, "hour" | "day" | "month" | "year") {
            return Err(Error::InvalidInput(format!(
                "unknown period type {period_type:?}"
            )));
        }

        sqlx::query(&self.sql(
            "INSERT INTO monitor_historical_snapshots (agent_id, interface, period_type, data, \
             created_at) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (agent_id, interface, period_type) DO UPDATE SET \
             data = excluded.data, created_at = excluded.created_at",
        ))
        .bind(agent_id)
        .bind(interface)
        .bind(period_type)
        .bind(data)
        .bind(super::now_ts())
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("upsert historical snapshot", e))?;

        Ok(())
    }

    pub async fn historical_snapshots(
        &self,
        agent_id: i64,
    ) -> Result<Vec<MonitorHistoricalSnapshot>> {
        let rows = sqlx::query(&self.sql(
            "SELECT id, agent_id, interface, period_type, data, created_at \
             FROM monitor_historical_snapshots WHERE agent_id = ? ORDER BY interface, period_type",
        ))
        .bind(agent_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list historical snapshots", e))?;

        rows.iter()
            .map(|row| {
                Ok(MonitorHistoricalSnapshot {
                    id: row.col("id")?,
                    agent_id: row.col("agent_id")?,
                    interface: row.col("interface")?,
                    period_type: row.col("period_type")?,
                    data: row.col("data")?,
                    created_at: row.ts("created_at")?,
                })
            })
            .collect()
    }

    /// Count of rows in every table dependent on the agent. Used by tests to
    /// verify cascade completeness and by the API for delete confirmation.
    pub async fn agent_dependent_rows(&self, agent_id: i64) -> Result<i64> {
        let mut total = 0i64;
        for table in [
            "monitor_bandwidth",
            "monitor_resource_stats",
            "monitor_historical_snapshots",
            "monitor_interfaces",
            "monitor_peak_stats",
            "monitor_system_info",
        ] {
            let count: i64 = sqlx::query_scalar(&self.sql(&format!(
                "SELECT COUNT(*) FROM {table} WHERE agent_id = ?"
            )))
            .bind(agent_id)
            .fetch_one(self.pool())
            .await
            .map_err(|e| Error::db(&format!("count {table}"), e))?;
            total += count;
        }
        Ok(total)
    }
}
