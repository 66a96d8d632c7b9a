//! Persisted row types.
//!
//! These map 1:1 onto the migration schema. Timestamps are `DateTime<Utc>`
//! in memory and RFC 3339 UTC text at rest.

use crate::core::probe::types::TestOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeedTestResult {
    pub id: i64,
    pub server_name: String,
    pub server_id: String,
    pub server_host: Option<String>,
    pub test_type: String,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency: String,
    pub packet_loss: f64,
    pub jitter_ms: Option<f64>,
    pub is_scheduled: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for a finished speed test; `id` and `created_at` are assigned
/// by the store.
#[derive(Debug, Clone)]
pub struct NewSpeedTestResult {
    pub server_name: String,
    pub server_id: String,
    pub server_host: Option<String>,
    pub test_type: String,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency: String,
    pub packet_loss: f64,
    pub jitter_ms: Option<f64>,
    pub is_scheduled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedIperfServer {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub id: i64,
    /// Ordered backend server identifiers the scheduled test cycles through.
    pub server_ids: Vec<String>,
    pub interval_expr: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub enabled: bool,
    /// Snapshot of the options the scheduled run is executed with.
    pub options: TestOptions,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub server_ids: Vec<String>,
    pub interval_expr: String,
    pub next_run: DateTime<Utc>,
    pub enabled: bool,
    pub options: TestOptions,
}

/// Tri-state health classification persisted per monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Down,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Unknown => "unknown",
            MonitorState::Healthy => "healthy",
            MonitorState::Degraded => "degraded",
            MonitorState::Down => "down",
        }
    }

    pub fn parse(value: &str) -> MonitorState {
        match value {
            "healthy" => MonitorState::Healthy,
            "degraded" => MonitorState::Degraded,
            "down" => MonitorState::Down,
            _ => MonitorState::Unknown,
        }
    }

    /// Classify a finished run. `threshold` is the monitor's loss threshold
    /// in percent.
    pub fn classify(packet_loss: f64, threshold: f64) -> MonitorState {
        if packet_loss >= 100.0 {
            MonitorState::Down
        } else if packet_loss > threshold {
            MonitorState::Degraded
        } else {
            MonitorState::Healthy
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketLossMonitor {
    pub id: i64,
    pub host: String,
    pub name: String,
    pub interval_expr: String,
    pub packet_count: u32,
    pub threshold: f64,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_state: MonitorState,
    pub last_state_change: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPacketLossMonitor {
    pub host: String,
    pub name: String,
    pub interval_expr: String,
    pub packet_count: u32,
    pub threshold: f64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketLossResult {
    pub id: i64,
    pub monitor_id: i64,
    pub packet_loss: f64,
    pub min_rtt: f64,
    pub avg_rtt: f64,
    pub max_rtt: f64,
    pub std_dev_rtt: f64,
    pub packets_sent: u32,
    pub packets_recv: u32,
    pub used_mtr: bool,
    pub hop_count: u32,
    pub mtr_data: Option<String>,
    pub privileged_mode: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPacketLossResult {
    pub monitor_id: i64,
    pub packet_loss: f64,
    pub min_rtt: f64,
    pub avg_rtt: f64,
    pub max_rtt: f64,
    pub std_dev_rtt: f64,
    pub packets_sent: u32,
    pub packets_recv: u32,
    pub used_mtr: bool,
    pub hop_count: u32,
    pub mtr_data: Option<String>,
    pub privileged_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorAgent {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub enabled: bool,
    pub interface: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMonitorAgent {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub enabled: bool,
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorSystemInfo {
    pub agent_id: i64,
    pub hostname: String,
    pub kernel: String,
    pub agent_version: String,
    pub cpu_model: String,
    pub cpu_cores: u32,
    pub cpu_threads: u32,
    pub total_memory: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorInterface {
    pub agent_id: i64,
    pub name: String,
    pub alias: Option<String>,
    pub ip_address: String,
    pub link_speed: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorPeakStats {
    pub agent_id: i64,
    pub peak_rx_bytes: i64,
    pub peak_tx_bytes: i64,
    pub peak_rx_at: Option<DateTime<Utc>>,
    pub peak_tx_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorResourceStats {
    pub id: i64,
    pub agent_id: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub swap_percent: f64,
    pub disk_usage: Option<String>,
    pub temperatures: Option<String>,
    pub uptime_seconds: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMonitorResourceStats {
    pub agent_id: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub swap_percent: f64,
    pub disk_usage: Option<String>,
    pub temperatures: Option<String>,
    pub uptime_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorBandwidthSample {
    pub id: i64,
    pub agent_id: i64,
    pub rx_bytes_per_second: i64,
    pub tx_bytes_per_second: i64,
    pub rx_rate: String,
    pub tx_rate: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorHistoricalSnapshot {
    pub id: i64,
    pub agent_id: i64,
    pub interface: String,
    pub period_type: String,
    pub data: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationChannel {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub id: i64,
    pub category: String,
    pub event_type: String,
    pub name: String,
    pub description: Option<String>,
    pub default_enabled: bool,
    pub supports_threshold: bool,
    pub threshold_unit: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationRule {
    pub id: i64,
    pub channel_id: i64,
    pub event_id: i64,
    pub enabled: bool,
    pub threshold_value: Option<f64>,
    pub threshold_operator: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A rule joined to its enabled channel, as consumed by the matcher.
#[derive(Debug, Clone)]
pub struct MatchedRule {
    pub rule: NotificationRule,
    pub channel_url: String,
    pub channel_id: i64,
    pub event_id: i64,
}

/// Clamped pagination window.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Page {
    pub fn new(page: u32, page_size: u32, max_page_size: u32) -> Page {
        Page {
            page: page.max(1),
            page_size: page_size.clamp(1, max_page_size),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

/// One page of results plus the unfiltered total.
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationHistoryEntry {
    pub id: i64,
    pub channel_id: i64,
    pub event_id: i64,
    pub success: bool,
    pub error: Option<String>,
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
}
