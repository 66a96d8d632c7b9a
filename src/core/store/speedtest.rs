//! Speed-test results (append-only) and saved iperf servers.

use super::models::{NewSpeedTestResult, Page, Paged, SavedIperfServer, SpeedTestResult};
use super::{RowExt, Store, TimeRange};
use crate::error::{Error, Result};
use sqlx::any::AnyRow;

fn map_result(row: &AnyRow) -> Result<SpeedTestResult> {
    Ok(SpeedTestResult {
        id: row.col("id")?,
        server_name: row.col("server_name")?,
        server_id: row.col("server_id")?,
        server_host: row.col("server_host")?,
        test_type: row.col("test_type")?,
        download_mbps: row.col("download_mbps")?,
        upload_mbps: row.col("upload_mbps")?,
        latency: row.col("latency")?,
        packet_loss: row.col("packet_loss")?,
        jitter_ms: row.col("jitter_ms")?,
        is_scheduled: row.col("is_scheduled")?,
        created_at: row.ts("created_at")?,
    })
}

fn map_server(row: &AnyRow) -> Result<SavedIperfServer> {
    let port: i64 = row.col("port")?;
    Ok(SavedIperfServer {
        id: row.col("id")?,
        name: row.col("name")?,
        host: row.col("host")?,
        port: u16::try_from(port)
            .map_err(|_| Error::Internal(format!("stored port {port} out of range")))?,
        created_at: row.ts("created_at")?,
        updated_at: row.ts("updated_at")?,
    })
}

const RESULT_COLUMNS: &str = "id, server_name, server_id, server_host, test_type, download_mbps, \
     upload_mbps, latency, packet_loss, jitter_ms, is_scheduled, created_at";

impl Store {
    /// Persist a finished run. Results are append-only and never mutated.
    pub async fn insert_speedtest_result(
        &self,
        result: &NewSpeedTestResult,
    ) -> Result<SpeedTestResult> {
        let now = super::now_ts();
        let sql = self.dialect().insert_sql(
            "INSERT INTO speedtest_results (server_name, server_id, server_host, test_type, \
             download_mbps, upload_mbps, latency, packet_loss, jitter_ms, is_scheduled, \
             created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        );
        let query = sqlx::query(&sql)
            .bind(&result.server_name)
            .bind(&result.server_id)
            .bind(&result.server_host)
            .bind(&result.test_type)
            .bind(result.download_mbps)
            .bind(result.upload_mbps)
            .bind(&result.latency)
            .bind(result.packet_loss)
            .bind(result.jitter_ms)
            .bind(result.is_scheduled)
            .bind(&now);
        let id = self
            .fetch_insert_id(query)
            .await
            .map_err(|e| Error::db("insert speedtest result", e))?;

        Ok(SpeedTestResult {
            id,
            server_name: result.server_name.clone(),
            server_id: result.server_id.clone(),
            server_host: result.server_host.clone(),
            test_type: result.test_type.clone(),
            download_mbps: result.download_mbps,
            upload_mbps: result.upload_mbps,
            latency: result.latency.clone(),
            packet_loss: result.packet_loss,
            jitter_ms: result.jitter_ms,
            is_scheduled: result.is_scheduled,
            created_at: super::parse_ts(&now)?,
        })
    }

    /// Newest-first listing with optional time-range filter.
    pub async fn list_speedtest_results(
        &self,
        page: Page,
        range: Option<TimeRange>,
    ) -> Result<Paged<SpeedTestResult>> {
        let filter = match range {
            Some(range) => format!("WHERE created_at >= {}", self.dialect().cutoff_expr(range)),
            None => String::new(),
        };

        let total: i64 = sqlx::query_scalar(&self.sql(&format!(
            "SELECT COUNT(*) FROM speedtest_results {filter}"
        )))
        .fetch_one(self.pool())
        .await
        .map_err(|e| Error::db("count speedtest results", e))?;

        let rows = sqlx::query(&self.sql(&format!(
            "SELECT {RESULT_COLUMNS} FROM speedtest_results {filter} \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        )))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list speedtest results", e))?;

        let items = rows
            .iter()
            .map(map_result)
            .collect::<Result<Vec<_>>>()?;

        Ok(Paged {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    pub async fn latest_speedtest_result(&self) -> Result<Option<SpeedTestResult>> {
        let row = sqlx::query(&self.sql(&format!(
            "SELECT {RESULT_COLUMNS} FROM speedtest_results ORDER BY created_at DESC, id DESC LIMIT 1"
        )))
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::db("latest speedtest result", e))?;

        row.as_ref().map(map_result).transpose()
    }

    pub async fn save_iperf_server(
        &self,
        name: &str,
        host: &str,
        port: u16,
    ) -> Result<SavedIperfServer> {
        if port == 0 {
            return Err(Error::InvalidInput("port must be 1..=65535".into()));
        }
        let host = host.trim();
        if host.is_empty() {
            return Err(Error::InvalidInput("host must not be empty".into()));
        }

        let now = super::now_ts();
        let sql = self.dialect().insert_sql(
            "INSERT INTO saved_iperf_servers (name, host, port, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        );
        let query = sqlx::query(&sql)
            .bind(name)
            .bind(host)
            .bind(i64::from(port))
            .bind(&now)
            .bind(&now);
        let id = self
            .fetch_insert_id(query)
            .await
            .map_err(|e| Error::db("save iperf server", e))?;

        Ok(SavedIperfServer {
            id,
            name: name.to_string(),
            host: host.to_string(),
            port,
            created_at: super::parse_ts(&now)?,
            updated_at: super::parse_ts(&now)?,
        })
    }

    pub async fn list_iperf_servers(&self) -> Result<Vec<SavedIperfServer>> {
        let rows = sqlx::query(
            "SELECT id, name, host, port, created_at, updated_at FROM saved_iperf_servers \
             ORDER BY name, host",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list iperf servers", e))?;

        rows.iter().map(map_server).collect()
    }

    pub async fn iperf_server(&self, id: i64) -> Result<SavedIperfServer> {
        let row = sqlx::query(&self.sql(
            "SELECT id, name, host, port, created_at, updated_at FROM saved_iperf_servers \
             WHERE id = ?",
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::db("load iperf server", e))?
        .ok_or_else(|| Error::NotFound(format!("iperf server {id}")))?;

        map_server(&row)
    }

    pub async fn delete_iperf_server(&self, id: i64) -> Result<()> {
        let result = sqlx::query(&self.sql("DELETE FROM saved_iperf_servers WHERE id = ?"))
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| Error::db("delete iperf server", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("iperf server {id}")));
        }
        Ok(())
    }
}
