//! Probe engine types: test options, server descriptors and the live
//! progress frame contract.

use serde::{Deserialize, Serialize};

/// Measurement backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    /// Hosted-HTTP directory backend.
    #[default]
    Speedtest,
    /// External `iperf3` binary against a TCP server.
    Iperf3,
    /// External `librespeed-cli` binary with a local server catalog.
    Librespeed,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Speedtest => "speedtest",
            TestType::Iperf3 => "iperf3",
            TestType::Librespeed => "librespeed",
        }
    }

    pub fn parse(value: &str) -> Option<TestType> {
        match value {
            "speedtest" => Some(TestType::Speedtest),
            "iperf3" => Some(TestType::Iperf3),
            "librespeed" => Some(TestType::Librespeed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a single test run. Also snapshotted into schedules.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TestOptions {
    pub test_type: TestType,
    pub server_ids: Vec<String>,
    /// Explicit `host:port` target for the iperf backend.
    pub server_host: Option<String>,
    pub enable_download: bool,
    pub enable_upload: bool,
    pub enable_ping: bool,
    pub enable_jitter: bool,
    pub is_scheduled: bool,
}

impl TestOptions {
    /// Sensible interactive defaults: everything on, not scheduled.
    pub fn full(test_type: TestType) -> Self {
        Self {
            test_type,
            server_ids: Vec::new(),
            server_host: None,
            enable_download: true,
            enable_upload: true,
            enable_ping: true,
            enable_jitter: true,
            is_scheduled: false,
        }
    }
}

/// A server a backend can test against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub id: String,
    pub name: String,
    pub host: Option<String>,
    pub location: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub test_type: TestType,
}

/// Progress phases, in their strict emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePhase {
    Ping,
    Download,
    Upload,
    Complete,
}

/// One live progress frame.
///
/// Backends emit these through a [`ProgressSink`]; the broadcaster retains
/// only the most recent frame per run. Exactly one frame with
/// `is_complete = true` is emitted per successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedUpdate {
    #[serde(rename = "type")]
    pub phase: UpdatePhase,
    pub server_name: String,
    pub speed_mbps: f64,
    /// 0..=100 within the current phase.
    pub progress: f64,
    pub is_complete: bool,
    pub latency: Option<String>,
    pub is_scheduled: bool,
    pub test_type: TestType,
}

impl SpeedUpdate {
    pub fn phase_frame(
        phase: UpdatePhase,
        server_name: &str,
        speed_mbps: f64,
        progress: f64,
        options: &TestOptions,
    ) -> Self {
        Self {
            phase,
            server_name: server_name.to_string(),
            speed_mbps,
            progress: progress.clamp(0.0, 100.0),
            is_complete: false,
            latency: None,
            is_scheduled: options.is_scheduled,
            test_type: options.test_type,
        }
    }
}

/// Injected progress sink; one method, no back-pressure.
///
/// The broadcaster is the production implementation. Tests use a recording
/// fake.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, update: SpeedUpdate);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trips_names() {
        for t in [TestType::Speedtest, TestType::Iperf3, TestType::Librespeed] {
            assert_eq!(TestType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TestType::parse("ookla"), None);
    }

    #[test]
    fn progress_is_clamped() {
        let options = TestOptions::full(TestType::Speedtest);
        let frame = SpeedUpdate::phase_frame(UpdatePhase::Download, "s", 10.0, 140.0, &options);
        assert_eq!(frame.progress, 100.0);
        assert!(!frame.is_complete);
    }

    #[test]
    fn update_serializes_wire_field_names() {
        let options = TestOptions::full(TestType::Speedtest);
        let frame = SpeedUpdate::phase_frame(UpdatePhase::Ping, "srv", 0.0, 0.0, &options);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "ping");
        assert_eq!(json["test_type"], "speedtest");
    }
}
