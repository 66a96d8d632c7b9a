//! Packet-loss monitor progress and status types.

use crate::core::store::models::MonitorState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live status of one monitor, as broadcast during a run and returned by
/// status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketLossUpdate {
    pub monitor_id: i64,
    pub host: String,
    /// True while a test task is in flight for this monitor.
    pub is_running: bool,
    /// True exactly once, on the terminal frame of a run.
    pub is_complete: bool,
    /// 0..=100, advanced per *sent* packet.
    pub progress: f64,
    pub packets_sent: u32,
    pub packets_recv: u32,
    pub packet_loss: f64,
    pub min_rtt: f64,
    pub avg_rtt: f64,
    pub max_rtt: f64,
    pub std_dev_rtt: f64,
    pub used_mtr: bool,
    pub hop_count: u32,
    pub state: MonitorState,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PacketLossUpdate {
    pub fn idle(monitor_id: i64, host: &str, state: MonitorState) -> Self {
        Self {
            monitor_id,
            host: host.to_string(),
            is_running: false,
            is_complete: false,
            progress: 0.0,
            packets_sent: 0,
            packets_recv: 0,
            packet_loss: 0.0,
            min_rtt: 0.0,
            avg_rtt: 0.0,
            max_rtt: 0.0,
            std_dev_rtt: 0.0,
            used_mtr: false,
            hop_count: 0,
            state,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// How a monitor status query resolves, deterministically, for UI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorActivity {
    /// In-memory run with progress > 0.
    ActivelyTesting,
    /// Last persisted result is at most 5 seconds old.
    RecentlyCompleted,
    /// Enabled but not currently running.
    Scheduled,
    /// `enabled = false`.
    Disabled,
}

/// Statistics extracted from one finished probe cycle, before persistence.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
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
    /// Set when the stats are a synthetic 100 %-loss record from a timeout.
    pub timed_out: bool,
}

impl CycleStats {
    /// Synthetic record for a cycle that produced no reply and no stats.
    pub fn synthetic_timeout(packets_sent: u32, privileged_mode: bool) -> Self {
        Self {
            packet_loss: 100.0,
            packets_sent,
            packets_recv: 0,
            privileged_mode,
            timed_out: true,
            ..Default::default()
        }
    }
}
