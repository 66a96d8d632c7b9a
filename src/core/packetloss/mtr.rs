//! MTR invocation and report mapping.
//!
//! MTR gives combined trace + per-hop loss in one run but needs raw-socket
//! privileges; the runner only selects it when the binary exists and the
//! privileged transport is actually available. The child runs in its own
//! process group (see `core::command`) so cancellation leaves no zombies.

use super::types::CycleStats;
use crate::core::command::ManagedCommand;
use crate::error::{Error, Result};
use std::path::Path;
use std::time::Duration;

/// Whether MTR's raw-socket transport can be used: explicitly configured
/// privileged mode, or an effective uid of root.
pub fn privileged_transport_available(configured: bool) -> bool {
    if configured {
        return true;
    }
    #[cfg(unix)]
    {
        // Safety: geteuid has no preconditions.
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Run `mtr --json` against `host` with `packet_count` probes per hop.
pub async fn run(
    binary: &Path,
    host: &str,
    packet_count: u32,
    budget: Duration,
) -> Result<CycleStats> {
    let output = ManagedCommand::new(binary)
        .arg("--json")
        .args(["-c", &packet_count.to_string()])
        .args(["-i", "1"])
        .arg("--no-dns")
        .arg(host)
        .output(budget)
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Internal(format!(
            "mtr exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    parse_report(&String::from_utf8_lossy(&output.stdout), packet_count)
}

/// Map an mtr JSON report onto cycle statistics. The destination hop (the
/// last hub) carries the end-to-end numbers; the hub list itself is kept as
/// the per-hop payload.
pub fn parse_report(stdout: &str, packet_count: u32) -> Result<CycleStats> {
    let report: serde_json::Value = serde_json::from_str(stdout.trim())
        .map_err(|e| Error::Internal(format!("mtr output not JSON: {e}")))?;

    let hubs = report["report"]["hubs"]
        .as_array()
        .ok_or_else(|| Error::Internal("mtr report has no hubs".into()))?;
    let last = hubs
        .last()
        .ok_or_else(|| Error::Internal("mtr report has an empty hub list".into()))?;

    let loss = last["Loss%"].as_f64().unwrap_or(100.0).clamp(0.0, 100.0);
    let sent = last["Snt"].as_u64().unwrap_or(u64::from(packet_count)) as u32;
    let received = (f64::from(sent) * (1.0 - loss / 100.0)).round() as u32;

    Ok(CycleStats {
        packet_loss: loss,
        min_rtt: last["Best"].as_f64().unwrap_or(0.0),
        avg_rtt: last["Avg"].as_f64().unwrap_or(0.0),
        max_rtt: last["Wrst"].as_f64().unwrap_or(0.0),
        std_dev_rtt: last["StDev"].as_f64().unwrap_or(0.0),
        packets_sent: sent,
        packets_recv: received.min(sent),
        used_mtr: true,
        hop_count: hubs.len() as u32,
        mtr_data: Some(report["report"]["hubs"].to_string()),
        privileged_mode: true,
        timed_out: false,
    })
}
