/*!
LibreSpeed CLI backend.

A single `librespeed-cli --json` invocation with an optional local server
catalog file. The CLI prints a JSON array of results on exit; the first
entry is the measurement. There is no live byte stream, so phase frames are
emitted once each, in order, as the parsed numbers become known.
*/

use super::runner::Runner;
use super::types::{ProgressSink, ServerDescriptor, SpeedUpdate, TestOptions, TestType, UpdatePhase};
use crate::core::command::{find_tool, ManagedCommand};
use crate::core::store::models::NewSpeedTestResult;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

const CATALOG_FILE: &str = "librespeed-servers.json";

pub struct LibrespeedRunner {
    binary: Option<PathBuf>,
    catalog_path: PathBuf,
    phase_budget: Duration,
}

impl LibrespeedRunner {
    pub fn new(config_dir: PathBuf, phase_budget: Duration) -> Self {
        let binary = find_tool("librespeed-cli");
        if binary.is_none() {
            tracing::warn!("librespeed-cli not found on PATH, librespeed tests unavailable");
        }
        Self {
            binary,
            catalog_path: config_dir.join(CATALOG_FILE),
            phase_budget,
        }
    }

    async fn read_catalog(&self) -> Vec<ServerDescriptor> {
        let raw = match tokio::fs::read_to_string(&self.catalog_path).await {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };

        let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    path = %self.catalog_path.display(),
                    %err,
                    "malformed librespeed catalog, ignoring"
                );
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter_map(|entry| {
                let id = match &entry["id"] {
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::String(s) => s.clone(),
                    _ => return None,
                };
                Some(ServerDescriptor {
                    id,
                    name: entry["name"].as_str().unwrap_or("unknown").to_string(),
                    host: entry["server"].as_str().map(str::to_string),
                    location: None,
                    lat: None,
                    lon: None,
                    test_type: TestType::Librespeed,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Runner for LibrespeedRunner {
    fn kind(&self) -> TestType {
        TestType::Librespeed
    }

    async fn servers(&self) -> Result<Vec<ServerDescriptor>> {
        Ok(self.read_catalog().await)
    }

    async fn run(
        &self,
        options: &TestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<NewSpeedTestResult> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| Error::Unavailable("librespeed-cli".into()))?;

        let mut command = ManagedCommand::new(binary).arg("--json");
        if self.catalog_path.exists() {
            command = command
                .arg("--local-json")
                .arg(self.catalog_path.display().to_string());
        }
        if let Some(id) = options.server_ids.first() {
            command = command.args(["--server", id]);
        }
        if !options.enable_download {
            command = command.arg("--no-download");
        }
        if !options.enable_upload {
            command = command.arg("--no-upload");
        }

        // One process covers every phase; give it the full run budget.
        let budget = self.phase_budget * 3;
        let output = command.output(budget).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Internal(format!(
                "librespeed-cli exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result = parse_result(&stdout)?;

        // Post-hoc frames in phase order.
        if options.enable_ping {
            let mut frame = SpeedUpdate::phase_frame(
                UpdatePhase::Ping,
                &result.server_name,
                0.0,
                100.0,
                options,
            );
            frame.latency = Some(result.latency.clone());
            sink.publish(frame);
        }
        if options.enable_download {
            sink.publish(SpeedUpdate::phase_frame(
                UpdatePhase::Download,
                &result.server_name,
                result.download_mbps,
                100.0,
                options,
            ));
        }
        if options.enable_upload {
            sink.publish(SpeedUpdate::phase_frame(
                UpdatePhase::Upload,
                &result.server_name,
                result.upload_mbps,
                100.0,
                options,
            ));
        }

        Ok(NewSpeedTestResult {
            jitter_ms: options.enable_jitter.then_some(result.jitter_ms).flatten(),
            is_scheduled: options.is_scheduled,
            ..result.into_new_result()
        })
    }
}

struct ParsedRun {
    server_name: String,
    server_id: String,
    server_host: Option<String>,
    latency: String,
    jitter_ms: Option<f64>,
    download_mbps: f64,
    upload_mbps: f64,
}

impl ParsedRun {
    fn into_new_result(self) -> NewSpeedTestResult {
        NewSpeedTestResult {
            server_name: self.server_name,
            server_id: self.server_id,
            server_host: self.server_host,
            test_type: TestType::Librespeed.as_str().to_string(),
            download_mbps: self.download_mbps,
            upload_mbps: self.upload_mbps,
            latency: self.latency,
            packet_loss: 0.0,
            jitter_ms: self.jitter_ms,
            is_scheduled: false,
        }
    }
}

/// The CLI prints a JSON array; the first entry is the run.
fn parse_result(stdout: &str) -> Result<ParsedRun> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(stdout.trim())
        .map_err(|e| Error::Internal(format!("librespeed-cli output not JSON: {e}")))?;
    let entry = entries
        .first()
        .ok_or_else(|| Error::Internal("librespeed-cli returned no results".into()))?;

    let ping = entry["ping"].as_f64().unwrap_or(0.0);
    Ok(ParsedRun {
        server_name: entry["server"]["name"]
            .as_str()
            .unwrap_or("unknown")
            .to_string(),
        server_id: match &entry["server"]["id"] {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => s.clone(),
            _ => String::new(),
        },
        server_host: entry["server"]["url"].as_str().map(str::to_string),
        latency: format!("{ping:.2}ms"),
        jitter_ms: entry["jitter"].as_f64(),
        download_mbps: entry["download"].as_f64().unwrap_or(0.0),
        upload_mbps: entry["upload"].as_f64().unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[{
        "timestamp": "2024-05-01T10:00:00Z",
        "server": {"name": "Example POP", "url": "https://pop.example/backend", "id": 7},
        "ping": 12.5,
        "jitter": 1.25,
        "download": 93.95,
        "upload": 94.14,
        "bytes_sent": 117440512,
        "bytes_received": 117178368,
        "share": ""
    }]"#;

    #[test]
    fn parses_first_result_entry() {
        let run = parse_result(SAMPLE).unwrap();
        assert_eq!(run.server_name, "Example POP");
        assert_eq!(run.server_id, "7");
        assert_eq!(run.latency, "12.50ms");
        assert_eq!(run.download_mbps, 93.95);
        assert_eq!(run.upload_mbps, 94.14);
        assert_eq!(run.jitter_ms, Some(1.25));
    }

    #[test]
    fn empty_array_is_an_error() {
        assert!(parse_result("[]").is_err());
        assert!(parse_result("not json").is_err());
    }
}
