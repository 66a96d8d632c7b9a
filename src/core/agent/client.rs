/*!
One long-lived consumer of one remote agent.

Connection lifecycle: disconnected, connecting, connected, and back to
disconnected on any transport or stream error, with exponential back-off
from the configured floor (default 5 s) capped at 5 minutes and reset on a
successful open. The live SSE read has no deadline; frame cadence is the
liveness signal, not a timer.

Persistence cadence while connected: every live frame becomes a bandwidth
row (and the retained in-memory snapshot served by status reads); resource
stats every 30 s; system info, interfaces, peaks and historical snapshots on
connect and every 5 minutes.
*/

use super::sse::SseParser;
use super::types::{
    AgentStatus, ConnectionState, HistoricalExport, LiveData, WirePeakStats, WireResourceStats,
    WireSystemInfo,
};
use crate::core::broadcast::Broadcaster;
use crate::core::notifier::Notifier;
use crate::core::store::models::{MonitorAgent, MonitorInterface, NewMonitorResourceStats};
use crate::core::store::Store;
use crate::error::{Error, Result};
use chrono::Utc;
use futures::io::{AsyncBufReadExt, BufReader};
use isahc::config::Configurable;
use isahc::{HttpClient, Request};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const BACKOFF_CEILING: Duration = Duration::from_secs(5 * 60);
const RESOURCE_CADENCE: Duration = Duration::from_secs(30);
const REFRESH_CADENCE: Duration = Duration::from_secs(5 * 60);
/// Bounded frame channel: a slow consumer drops the stream, not the process.
const FRAME_BUFFER: usize = 16;

/// `<base>/events?stream=live-data`, optionally pinned to one interface.
pub fn live_url(base: &str, interface: Option<&str>) -> String {
    let mut url = format!("{}/events?stream=live-data", base.trim_end_matches('/'));
    if let Some(interface) = interface.filter(|i| !i.is_empty()) {
        url.push_str("&interface=");
        url.push_str(interface);
    }
    url
}

/// `<base>/export/historical`
pub fn export_url(base: &str) -> String {
    format!("{}/export/historical", base.trim_end_matches('/'))
}

pub fn system_url(base: &str) -> String {
    format!("{}/system", base.trim_end_matches('/'))
}

pub fn hardware_url(base: &str) -> String {
    format!("{}/hardware", base.trim_end_matches('/'))
}

pub fn peaks_url(base: &str) -> String {
    format!("{}/peaks", base.trim_end_matches('/'))
}

pub struct AgentClient {
    agent: MonitorAgent,
    store: Store,
    broadcaster: Arc<Broadcaster>,
    notifier: Arc<Notifier>,
    http: HttpClient,
    status: Arc<StdMutex<AgentStatus>>,
    backoff_floor: Duration,
    shutdown: watch::Receiver<bool>,
}

impl AgentClient {
    pub fn new(
        agent: MonitorAgent,
        store: Store,
        broadcaster: Arc<Broadcaster>,
        notifier: Arc<Notifier>,
        status: Arc<StdMutex<AgentStatus>>,
        backoff_floor: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("build agent client: {e}")))?;
        Ok(Self {
            agent,
            store,
            broadcaster,
            notifier,
            http,
            status,
            backoff_floor: backoff_floor.max(Duration::from_secs(1)),
            shutdown,
        })
    }

    /// Reconnect loop. Returns only on shutdown.
    pub async fn run(self) {
        let mut backoff = self.backoff_floor;
        let mut was_connected = false;
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting, None);

            match self.connect_and_stream().await {
                Ok(StreamEnd::Shutdown) => break,
                Ok(StreamEnd::Opened) => {
                    // The stream was healthy before it ended; start the
                    // back-off ladder over.
                    backoff = self.backoff_floor;
                    was_connected = true;
                }
                Err(err) => {
                    tracing::debug!(agent = self.agent.id, %err, "agent stream failed");
                    self.set_state(ConnectionState::Disconnected, Some(err.to_string()));
                }
            }

            if was_connected {
                was_connected = false;
                self.set_state(ConnectionState::Disconnected, None);
                self.notifier
                    .agent_connection_changed(self.agent.id, &self.agent.name, false)
                    .await;
            }

            tracing::debug!(
                agent = self.agent.id,
                backoff_s = backoff.as_secs(),
                "agent reconnecting after back-off"
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.wait_for(|stopped| *stopped) => break,
            }
            backoff = (backoff * 2).min(BACKOFF_CEILING);
        }

        self.set_state(ConnectionState::Disconnected, None);
    }

    /// One connection lifetime: open the stream, refresh metadata, consume
    /// frames and run the periodic persistence cadences.
    async fn connect_and_stream(&self) -> Result<StreamEnd> {
        let mut shutdown = self.shutdown.clone();
        let url = live_url(&self.agent.base_url, self.agent.interface.as_deref());
        let mut request = Request::get(url.as_str()).header("accept", "text/event-stream");
        if let Some(key) = self.agent.api_key.as_deref() {
            request = request.header("x-api-key", key);
        }
        // No total timeout: liveness is measured by frame cadence.
        let request = request
            .body(())
            .map_err(|e| Error::Internal(format!("build stream request: {e}")))?;

        let response = self
            .http
            .send_async(request)
            .await
            .map_err(|e| Error::http("open agent stream", e))?;

        match response.status().as_u16() {
            200 => {}
            401 | 403 => {
                return Err(Error::Unauthorized(format!(
                    "agent {} rejected the api key",
                    self.agent.id
                )))
            }
            other => {
                return Err(Error::Internal(format!(
                    "agent stream answered {other}"
                )))
            }
        }

        tracing::info!(agent = self.agent.id, name = %self.agent.name, "agent connected");
        self.set_state(ConnectionState::Connected, None);
        self.notifier
            .agent_connection_changed(self.agent.id, &self.agent.name, true)
            .await;

        self.refresh_metadata().await;

        // Reader task feeds a bounded channel; drops on overflow are
        // impossible because the consumer is this loop, but a wedged
        // consumer cannot grow memory either.
        let (frame_tx, mut frame_rx) = mpsc::channel::<String>(FRAME_BUFFER);
        let body = response.into_body();
        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(body);
            let mut parser = SseParser::new();
            let mut line = String::new();
            loop {
                line.clear();
                match lines.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim_end_matches('\n');
                        if let Some(payload) = parser.push_line(trimmed) {
                            if frame_tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        tracing::debug!(%err, "agent stream read error");
                        break;
                    }
                }
            }
        });

        let mut resources = tokio::time::interval(RESOURCE_CADENCE);
        resources.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut refresh = tokio::time::interval(REFRESH_CADENCE);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The connect-time refresh already ran; swallow the immediate tick.
        refresh.tick().await;
        resources.tick().await;

        let outcome = loop {
            tokio::select! {
                frame = frame_rx.recv() => match frame {
                    Some(payload) => self.handle_frame(&payload).await,
                    // Reader ended: EOF or transport error.
                    None => break StreamEnd::Opened,
                },
                _ = resources.tick() => self.sample_resources().await,
                _ = refresh.tick() => self.refresh_metadata().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break StreamEnd::Shutdown;
                    }
                }
            }
        };

        reader_handle.abort();
        Ok(outcome)
    }

    /// A live frame: retain in memory, rebroadcast, persist, raise peaks.
    async fn handle_frame(&self, payload: &str) {
        let live: LiveData = match serde_json::from_str(payload) {
            Ok(live) => live,
            Err(err) => {
                // Malformed frames are logged and skipped, never fatal.
                tracing::debug!(agent = self.agent.id, %err, "skipping malformed frame");
                return;
            }
        };

        let now = Utc::now();
        {
            let mut status = lock_status(&self.status);
            status.live = Some(live.clone());
            status.last_seen = Some(now);
            self.broadcaster.publish_agent(status.clone());
        }

        if let Err(err) = self
            .store
            .insert_monitor_bandwidth(
                self.agent.id,
                live.rx.bytespersecond,
                live.tx.bytespersecond,
                &live.rx.ratestring,
                &live.tx.ratestring,
                now,
            )
            .await
        {
            tracing::warn!(agent = self.agent.id, %err, "failed to persist bandwidth sample");
        }

        if let Err(err) = self
            .store
            .update_monitor_peaks(self.agent.id, live.rx.bytespersecond, live.tx.bytespersecond, now)
            .await
        {
            tracing::warn!(agent = self.agent.id, %err, "failed to raise peaks");
        }
    }

    /// 30-second cadence: resource stats (retention is the store's concern).
    async fn sample_resources(&self) {
        let stats: WireResourceStats = match self.fetch_json(&hardware_url(&self.agent.base_url)).await
        {
            Ok(stats) => stats,
            Err(err) => {
                tracing::debug!(agent = self.agent.id, %err, "resource sample failed");
                return;
            }
        };

        let row = NewMonitorResourceStats {
            agent_id: self.agent.id,
            cpu_percent: stats.cpu_percent,
            memory_percent: stats.memory_percent,
            swap_percent: stats.swap_percent,
            disk_usage: stats.disks.map(|v| v.to_string()),
            temperatures: stats.temperatures.map(|v| v.to_string()),
            uptime_seconds: stats.uptime_seconds,
        };
        if let Err(err) = self.store.insert_monitor_resource_stats(&row).await {
            tracing::warn!(agent = self.agent.id, %err, "failed to persist resource stats");
        }
    }

    /// Connect-time and 5-minute cadence: system info, interfaces, peaks
    /// endpoint, historical snapshots. All upserts are idempotent.
    async fn refresh_metadata(&self) {
        match self
            .fetch_json::<WireSystemInfo>(&system_url(&self.agent.base_url))
            .await
        {
            Ok(info) => {
                let row = crate::core::store::models::MonitorSystemInfo {
                    agent_id: self.agent.id,
                    hostname: info.hostname,
                    kernel: info.kernel,
                    agent_version: info.agent_version,
                    cpu_model: info.cpu_model,
                    cpu_cores: info.cpu_cores,
                    cpu_threads: info.cpu_threads,
                    total_memory: info.total_memory,
                };
                if let Err(err) = self.store.upsert_monitor_system_info(&row).await {
                    tracing::warn!(agent = self.agent.id, %err, "failed to upsert system info");
                }

                let interfaces: Vec<MonitorInterface> = info
                    .interfaces
                    .into_iter()
                    .map(|iface| MonitorInterface {
                        agent_id: self.agent.id,
                        name: iface.name,
                        alias: iface.alias,
                        ip_address: iface.ip_address,
                        link_speed: iface.link_speed,
                    })
                    .collect();
                if let Err(err) = self
                    .store
                    .replace_monitor_interfaces(self.agent.id, &interfaces)
                    .await
                {
                    tracing::warn!(agent = self.agent.id, %err, "failed to rewrite interfaces");
                }
            }
            Err(err) => {
                tracing::debug!(agent = self.agent.id, %err, "system info fetch failed");
            }
        }

        match self
            .fetch_json::<WirePeakStats>(&peaks_url(&self.agent.base_url))
            .await
        {
            Ok(peaks) => {
                if let Err(err) = self
                    .store
                    .update_monitor_peaks(
                        self.agent.id,
                        peaks.peak_rx_bytes,
                        peaks.peak_tx_bytes,
                        Utc::now(),
                    )
                    .await
                {
                    tracing::warn!(agent = self.agent.id, %err, "failed to merge agent peaks");
                }
            }
            Err(err) => {
                tracing::debug!(agent = self.agent.id, %err, "peaks fetch failed");
            }
        }

        match self
            .fetch_json::<HistoricalExport>(&export_url(&self.agent.base_url))
            .await
        {
            Ok(export) => {
                for interface in &export.interfaces {
                    for (period, entries) in [
                        ("hour", &interface.traffic.hour),
                        ("day", &interface.traffic.day),
                        ("month", &interface.traffic.month),
                        ("year", &interface.traffic.year),
                    ] {
                        if entries.is_empty() {
                            continue;
                        }
                        let data = match serde_json::to_string(
                            &entries
                                .iter()
                                .map(|e| {
                                    serde_json::json!({
                                        "date": {
                                            "year": e.date.year,
                                            "month": e.date.month,
                                            "day": e.date.day,
                                        },
                                        "time": e.time.as_ref().map(|t| {
                                            serde_json::json!({"hour": t.hour, "minute": t.minute})
                                        }),
                                        "rx": e.rx,
                                        "tx": e.tx,
                                    })
                                })
                                .collect::<Vec<_>>(),
                        ) {
                            Ok(data) => data,
                            Err(err) => {
                                tracing::warn!(agent = self.agent.id, %err, "snapshot encode failed");
                                continue;
                            }
                        };
                        if let Err(err) = self
                            .store
                            .upsert_historical_snapshot(self.agent.id, &interface.name, period, &data)
                            .await
                        {
                            tracing::warn!(agent = self.agent.id, period, %err, "snapshot upsert failed");
                        }
                    }
                }
            }
            Err(err) => {
                tracing::debug!(agent = self.agent.id, %err, "historical pull failed");
            }
        }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        fetch_json(&self.http, url, self.agent.api_key.as_deref()).await
    }

    fn set_state(&self, state: ConnectionState, error: Option<String>) {
        let mut status = lock_status(&self.status);
        let changed = status.state != state;
        status.state = state;
        status.connected = state == ConnectionState::Connected;
        if state != ConnectionState::Connected {
            status.live = None;
        }
        if let Some(error) = error {
            status.last_error = Some(error);
        } else if state == ConnectionState::Connected {
            status.last_error = None;
        }
        // Only transitions are broadcast; frames between state changes carry
        // the live data.
        if changed {
            self.broadcaster.publish_agent(status.clone());
        }
    }
}

enum StreamEnd {
    /// The stream opened successfully and later ended.
    Opened,
    Shutdown,
}

pub(super) async fn fetch_json<T: serde::de::DeserializeOwned>(
    http: &HttpClient,
    url: &str,
    api_key: Option<&str>,
) -> Result<T> {
    use futures::io::AsyncReadExt;

    let mut request = Request::get(url).timeout(Duration::from_secs(30));
    if let Some(key) = api_key {
        request = request.header("x-api-key", key);
    }
    let request = request
        .body(())
        .map_err(|e| Error::Internal(format!("build request {url}: {e}")))?;

    let mut response = http
        .send_async(request)
        .await
        .map_err(|e| Error::http("agent request", e))?;

    if !response.status().is_success() {
        return Err(Error::Internal(format!(
            "{url} answered {}",
            response.status()
        )));
    }

    let mut body = String::new();
    response
        .body_mut()
        .read_to_string(&mut body)
        .await
        .map_err(|e| Error::Internal(format!("read {url}: {e}")))?;

    serde_json::from_str(&body).map_err(Error::from)
}

pub(super) fn lock_status(
    status: &StdMutex<AgentStatus>,
) -> std::sync::MutexGuard<'_, AgentStatus> {
    match status.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_normalization_strips_trailing_slashes() {
        assert_eq!(
            live_url("http://agent.local:8200/", None),
            "http://agent.local:8200/events?stream=live-data"
        );
        assert_eq!(
            live_url("http://agent.local:8200", Some("eth1")),
            "http://agent.local:8200/events?stream=live-data&interface=eth1"
        );
        assert_eq!(
            export_url("http://agent.local:8200"),
            "http://agent.local:8200/export/historical"
        );
        assert_eq!(
            hardware_url("http://agent.local:8200///"),
            "http://agent.local:8200/hardware"
        );
    }

    #[test]
    fn backoff_ladder_doubles_to_the_ceiling() {
        let mut backoff = Duration::from_secs(5);
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(backoff.as_secs());
            backoff = (backoff * 2).min(BACKOFF_CEILING);
        }
        assert_eq!(seen, vec![5, 10, 20, 40, 80, 160, 300, 300]);
    }
}
