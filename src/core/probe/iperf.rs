/*!
TCP iperf3 backend.

Requires the external `iperf3` binary. Download and upload are separate
invocations (reverse mode for download), each streaming line-delimited JSON
interval events that map directly onto progress frames
(`progress = elapsed / duration`). A companion ICMP ping pass fills latency
and jitter since iperf itself measures only throughput.
*/

use super::runner::Runner;
use super::types::{ProgressSink, ServerDescriptor, SpeedUpdate, TestOptions, TestType, UpdatePhase};
use crate::config::IperfConfig;
use crate::core::command::{find_tool, ManagedCommand};
use crate::core::ping::{resolve_host, PingSession};
use crate::core::store::models::NewSpeedTestResult;
use crate::core::store::Store;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_IPERF_PORT: u16 = 5201;
/// Slack on top of the configured test duration before the run is killed.
const RUN_GRACE: Duration = Duration::from_secs(15);

pub struct IperfRunner {
    store: Store,
    config: IperfConfig,
    binary: Option<PathBuf>,
}

struct Target {
    host: String,
    port: u16,
    display_name: String,
    server_id: String,
}

impl IperfRunner {
    /// Discovers the binary once; a missing tool degrades `run` to
    /// `Unavailable` without failing construction.
    pub fn new(store: Store, config: IperfConfig) -> Self {
        let binary = find_tool("iperf3");
        if binary.is_none() {
            tracing::warn!("iperf3 not found on PATH, iperf tests unavailable");
        }
        Self {
            store,
            config,
            binary,
        }
    }

    async fn resolve_target(&self, options: &TestOptions) -> Result<Target> {
        if let Some(raw) = options.server_host.as_deref() {
            let (host, port) = split_host_port(raw)?;
            return Ok(Target {
                display_name: format!("{host}:{port}"),
                server_id: raw.to_string(),
                host,
                port,
            });
        }

        let id_raw = options
            .server_ids
            .first()
            .ok_or_else(|| Error::InvalidInput("iperf test needs a server".into()))?;
        let id: i64 = id_raw
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad iperf server id {id_raw:?}")))?;
        let server = self.store.iperf_server(id).await?;

        Ok(Target {
            host: server.host.clone(),
            port: server.port,
            display_name: server.name.clone(),
            server_id: id_raw.clone(),
        })
    }

    async fn ping_pass(
        &self,
        target: &Target,
        options: &TestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<(f64, Option<f64>)> {
        let ip = resolve_host(&target.host).await?;
        let session = PingSession::open(ip, false)?;
        let ping = &self.config.ping;

        let count = ping.count.max(1);
        let outcome = session
            .run(
                count,
                Duration::from_millis(ping.interval_ms),
                Duration::from_secs(ping.timeout_s.max(1)),
                |sent| {
                    sink.publish(SpeedUpdate::phase_frame(
                        UpdatePhase::Ping,
                        &target.display_name,
                        0.0,
                        f64::from(sent) / f64::from(count) * 100.0,
                        options,
                    ));
                },
            )
            .await;

        let jitter = options.enable_jitter.then(|| outcome.jitter_ms());
        Ok((outcome.avg_ms(), jitter))
    }

    /// One iperf3 invocation; `reverse` streams server→client (download).
    async fn throughput_pass(
        &self,
        target: &Target,
        reverse: bool,
        options: &TestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<f64> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| Error::Unavailable("iperf3".into()))?;

        let duration = self.config.test_duration_s.max(1);
        let mut command = ManagedCommand::new(binary)
            .args(["-c", &target.host])
            .args(["-p", &target.port.to_string()])
            .args(["-t", &duration.to_string()])
            .args(["-P", &self.config.parallel_conns.max(1).to_string()])
            .arg("--json-stream");
        if reverse {
            command = command.arg("-R");
        }

        let phase = if reverse {
            UpdatePhase::Download
        } else {
            UpdatePhase::Upload
        };
        let budget = Duration::from_secs(duration) + RUN_GRACE;

        let mut child = command.spawn()?;
        let stdout = child
            .take_stdout()
            .ok_or_else(|| Error::Internal("iperf3 stdout not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut last_rate = 0.0f64;
        let mut final_rate = None;

        let stream = async {
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| Error::Internal(format!("read iperf3 output: {e}")))?
            {
                let event: serde_json::Value = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(_) => continue,
                };

                match event["event"].as_str() {
                    Some("interval") => {
                        let sum = &event["data"]["sum"];
                        let bps = sum["bits_per_second"].as_f64().unwrap_or(0.0);
                        let elapsed = sum["end"].as_f64().unwrap_or(0.0);
                        last_rate = bps / 1_000_000.0;
                        sink.publish(SpeedUpdate::phase_frame(
                            phase,
                            &target.display_name,
                            last_rate,
                            elapsed / duration as f64 * 100.0,
                            options,
                        ));
                    }
                    Some("end") => {
                        let end = &event["data"]["end"];
                        let summary = if reverse {
                            &end["sum_received"]
                        } else {
                            &end["sum_sent"]
                        };
                        if let Some(bps) = summary["bits_per_second"].as_f64() {
                            final_rate = Some(bps / 1_000_000.0);
                        }
                    }
                    Some("error") => {
                        let message = event["data"]
                            .as_str()
                            .unwrap_or("iperf3 reported an error")
                            .to_string();
                        return Err(Error::Internal(format!("iperf3: {message}")));
                    }
                    _ => {}
                }
            }
            Ok(())
        };

        match tokio::time::timeout(budget, stream).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                child.kill_group().await;
                return Err(err);
            }
            Err(_) => {
                child.kill_group().await;
                return Err(Error::Timeout(budget));
            }
        }

        let status = child.wait().await?;
        if !status.success() && final_rate.is_none() {
            return Err(Error::Internal(format!(
                "iperf3 exited with {status} and no summary"
            )));
        }

        Ok(final_rate.unwrap_or(last_rate))
    }
}

#[async_trait]
impl Runner for IperfRunner {
    fn kind(&self) -> TestType {
        TestType::Iperf3
    }

    /// The saved iperf server list doubles as this backend's directory.
    async fn servers(&self) -> Result<Vec<ServerDescriptor>> {
        Ok(self
            .store
            .list_iperf_servers()
            .await?
            .into_iter()
            .map(|server| ServerDescriptor {
                id: server.id.to_string(),
                name: server.name,
                host: Some(format!("{}:{}", server.host, server.port)),
                location: None,
                lat: None,
                lon: None,
                test_type: TestType::Iperf3,
            })
            .collect())
    }

    async fn run(
        &self,
        options: &TestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<NewSpeedTestResult> {
        if self.binary.is_none() {
            return Err(Error::Unavailable("iperf3".into()));
        }
        let target = self.resolve_target(options).await?;

        let mut latency_ms = 0.0;
        let mut jitter_ms = None;
        if options.enable_ping {
            match self.ping_pass(&target, options, sink).await {
                Ok((avg, jitter)) => {
                    latency_ms = avg;
                    jitter_ms = jitter;
                }
                // Latency is companion data; an unreachable ICMP path must
                // not fail a throughput test.
                Err(err) => {
                    tracing::debug!(host = %target.host, %err, "iperf ping pass failed");
                }
            }
        }

        let mut download_mbps = 0.0;
        if options.enable_download {
            download_mbps = self.throughput_pass(&target, true, options, sink).await?;
        }

        let mut upload_mbps = 0.0;
        if options.enable_upload {
            upload_mbps = self.throughput_pass(&target, false, options, sink).await?;
        }

        Ok(NewSpeedTestResult {
            server_name: target.display_name.clone(),
            server_id: target.server_id.clone(),
            server_host: Some(format!("{}:{}", target.host, target.port)),
            test_type: TestType::Iperf3.as_str().to_string(),
            download_mbps,
            upload_mbps,
            latency: if latency_ms > 0.0 {
                format!("{latency_ms:.2}ms")
            } else {
                String::new()
            },
            packet_loss: 0.0,
            jitter_ms,
            is_scheduled: options.is_scheduled,
        })
    }
}

fn split_host_port(raw: &str) -> Result<(String, u16)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::InvalidInput("empty iperf host".into()));
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port: u16 = port
                .parse()
                .map_err(|_| Error::InvalidInput(format!("bad iperf port in {raw:?}")))?;
            if port == 0 {
                return Err(Error::InvalidInput("port must be 1..=65535".into()));
            }
            Ok((host.to_string(), port))
        }
        // Bare hostname, or an IPv6 literal without a port.
        _ => Ok((raw.to_string(), DEFAULT_IPERF_PORT)),
    }
}
