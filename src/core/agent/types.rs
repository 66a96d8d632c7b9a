//! Agent wire protocol types and in-memory pool status.
//!
//! The remote agent exposes a vnstat-style JSON surface: a live SSE stream
//! of per-second rx/tx rates plus point-in-time system/hardware/peaks
//! endpoints and a historical export. Field names follow the wire exactly;
//! consumers must not assume frame cadence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One direction of a live bandwidth frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveDirection {
    #[serde(default)]
    pub bytespersecond: i64,
    #[serde(default)]
    pub packetspersecond: i64,
    #[serde(default)]
    pub ratestring: String,
}

/// Live SSE frame: `{ rx: {...}, tx: {...} }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveData {
    #[serde(default)]
    pub rx: LiveDirection,
    #[serde(default)]
    pub tx: LiveDirection,
}

/// `GET {base}/system` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireSystemInfo {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default, alias = "version")]
    pub agent_version: String,
    #[serde(default)]
    pub cpu_model: String,
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub cpu_threads: u32,
    #[serde(default)]
    pub total_memory: u64,
    #[serde(default)]
    pub interfaces: Vec<WireInterface>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireInterface {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default, alias = "ip")]
    pub ip_address: String,
    #[serde(default, alias = "linkspeed")]
    pub link_speed: Option<i64>,
}

/// `GET {base}/hardware` resource sample.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireResourceStats {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default)]
    pub swap_percent: f64,
    #[serde(default)]
    pub disks: Option<serde_json::Value>,
    #[serde(default)]
    pub temperatures: Option<serde_json::Value>,
    #[serde(default)]
    pub uptime_seconds: i64,
}

/// `GET {base}/peaks` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WirePeakStats {
    #[serde(default)]
    pub peak_rx_bytes: i64,
    #[serde(default)]
    pub peak_tx_bytes: i64,
    #[serde(default)]
    pub peak_rx_time: Option<String>,
    #[serde(default)]
    pub peak_tx_time: Option<String>,
}

/// `GET {base}/export/historical` document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoricalExport {
    #[serde(default)]
    pub interfaces: Vec<HistoricalInterface>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoricalInterface {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub traffic: HistoricalTraffic,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoricalTraffic {
    #[serde(default)]
    pub hour: Vec<TrafficEntry>,
    #[serde(default)]
    pub day: Vec<TrafficEntry>,
    #[serde(default)]
    pub month: Vec<TrafficEntry>,
    #[serde(default)]
    pub year: Vec<TrafficEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrafficEntry {
    pub date: EntryDate,
    #[serde(default)]
    pub time: Option<EntryTime>,
    #[serde(default)]
    pub rx: i64,
    #[serde(default)]
    pub tx: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryDate {
    pub year: i32,
    #[serde(default = "default_month")]
    pub month: u32,
    #[serde(default)]
    pub day: Option<u32>,
}

fn default_month() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryTime {
    #[serde(default)]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

/// Per-agent connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Pool status snapshot for one agent, broadcast on every change and served
/// by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub agent_id: i64,
    pub name: String,
    pub state: ConnectionState,
    pub connected: bool,
    /// Most recent live frame, retained in memory only.
    pub live: Option<LiveData>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl AgentStatus {
    pub fn disconnected(agent_id: i64, name: &str) -> Self {
        Self {
            agent_id,
            name: name.to_string(),
            state: ConnectionState::Disconnected,
            connected: false,
            live: None,
            last_seen: None,
            last_error: None,
        }
    }
}

/// One-shot historical import progress, kept in memory per agent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportStatus {
    pub in_progress: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_imported: u64,
    pub total_records: u64,
    pub error: Option<String>,
}
