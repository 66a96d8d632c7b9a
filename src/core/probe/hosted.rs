/*!
Hosted-HTTP speed test backend.

Servers come from a remote directory (cached for 30 minutes); the nearest is
picked by great-circle distance against the client's geolocated coordinates
unless the caller names a server id. The run is three HTTP phases: latency
samples against the server's `latency.txt`, a streamed download window, and
a chunked upload window, each bounded by the configured per-phase budget and
reported through progressive byte-rate callbacks.
*/

use super::runner::Runner;
use super::types::{ProgressSink, ServerDescriptor, SpeedUpdate, TestOptions, TestType, UpdatePhase};
use crate::core::store::models::NewSpeedTestResult;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::io::AsyncReadExt;
use isahc::config::Configurable;
use isahc::{AsyncBody, HttpClient, Request};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DIRECTORY_URL: &str = "https://www.speedtest.net/api/js/servers?engine=js&limit=20";
const LOCATION_URL: &str = "https://ipinfo.io/json";
const DIRECTORY_TTL: Duration = Duration::from_secs(30 * 60);

/// Measured transfer window within each phase budget.
const TRANSFER_WINDOW: Duration = Duration::from_secs(10);
const PING_SAMPLES: u32 = 5;
const UPLOAD_CHUNK: usize = 256 * 1024;
const READ_BUF: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct DirectoryServer {
    descriptor: ServerDescriptor,
    upload_url: String,
    lat: f64,
    lon: f64,
    distance_km: f64,
}

struct CachedDirectory {
    fetched_at: Instant,
    servers: Vec<DirectoryServer>,
}

pub struct HostedRunner {
    client: HttpClient,
    directory_url: String,
    phase_budget: Duration,
    cache: Mutex<Option<CachedDirectory>>,
}

impl HostedRunner {
    pub fn new(phase_budget: Duration) -> Result<Self> {
        let client = HttpClient::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Internal(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            directory_url: DIRECTORY_URL.to_string(),
            phase_budget,
            cache: Mutex::new(None),
        })
    }

    /// Directory fetch with a 30-minute cache.
    async fn directory(&self) -> Result<Vec<DirectoryServer>> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < DIRECTORY_TTL {
                return Ok(cached.servers.clone());
            }
        }

        let (client_lat, client_lon) = self.client_location().await.unwrap_or((0.0, 0.0));

        let request = Request::get(self.directory_url.as_str())
            .timeout(Duration::from_secs(15))
            .body(())
            .map_err(|e| Error::Internal(format!("build directory request: {e}")))?;
        let mut response = self
            .client
            .send_async(request)
            .await
            .map_err(|e| Error::http("fetch server directory", e))?;

        let mut body = String::new();
        response
            .body_mut()
            .read_to_string(&mut body)
            .await
            .map_err(|e| Error::Internal(format!("read server directory: {e}")))?;

        let servers = parse_directory(&body, client_lat, client_lon)?;
        if servers.is_empty() {
            return Err(Error::Unavailable("no speed test servers listed".into()));
        }

        *cache = Some(CachedDirectory {
            fetched_at: Instant::now(),
            servers: servers.clone(),
        });
        Ok(servers)
    }

    /// Client coordinates from the IP geolocation endpoint.
    async fn client_location(&self) -> Result<(f64, f64)> {
        let request = Request::get(LOCATION_URL)
            .timeout(Duration::from_secs(10))
            .body(())
            .map_err(|e| Error::Internal(format!("build location request: {e}")))?;
        let mut response = self
            .client
            .send_async(request)
            .await
            .map_err(|e| Error::http("geolocate client", e))?;

        let mut body = String::new();
        response
            .body_mut()
            .read_to_string(&mut body)
            .await
            .map_err(|e| Error::Internal(format!("read location response: {e}")))?;

        let value: serde_json::Value = serde_json::from_str(&body)?;
        let loc = value["loc"]
            .as_str()
            .ok_or_else(|| Error::Internal("location response has no loc field".into()))?;
        let (lat, lon) = loc
            .split_once(',')
            .ok_or_else(|| Error::Internal(format!("malformed loc {loc:?}")))?;
        Ok((
            lat.trim().parse().unwrap_or(0.0),
            lon.trim().parse().unwrap_or(0.0),
        ))
    }

    async fn pick_server(&self, options: &TestOptions) -> Result<DirectoryServer> {
        let servers = self.directory().await?;

        if let Some(wanted) = options.server_ids.first() {
            return servers
                .iter()
                .find(|server| &server.descriptor.id == wanted)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("server {wanted}")));
        }

        servers
            .into_iter()
            .min_by(|a, b| {
                a.distance_km
                    .partial_cmp(&b.distance_km)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .ok_or_else(|| Error::Unavailable("no speed test servers listed".into()))
    }

    /// Latency samples against the server's `latency.txt`.
    async fn ping_phase(
        &self,
        server: &DirectoryServer,
        options: &TestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<f64>> {
        let url = sibling_url(&server.upload_url, "latency.txt");
        let mut samples = Vec::with_capacity(PING_SAMPLES as usize);

        for i in 0..PING_SAMPLES {
            let request = Request::get(url.as_str())
                .timeout(Duration::from_secs(5))
                .body(())
                .map_err(|e| Error::Internal(format!("build ping request: {e}")))?;

            let started = Instant::now();
            match self.client.send_async(request).await {
                Ok(mut response) => {
                    let mut drain = Vec::new();
                    let _ = response.body_mut().read_to_end(&mut drain).await;
                    samples.push(started.elapsed().as_secs_f64() * 1000.0);
                }
                Err(err) => {
                    tracing::debug!(server = %server.descriptor.name, %err, "latency sample failed");
                }
            }

            let best = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let mut frame = SpeedUpdate::phase_frame(
                UpdatePhase::Ping,
                &server.descriptor.name,
                0.0,
                f64::from(i + 1) / f64::from(PING_SAMPLES) * 100.0,
                options,
            );
            if best.is_finite() {
                frame.latency = Some(format_latency(best));
            }
            sink.publish(frame);
        }

        if samples.is_empty() {
            return Err(Error::Internal(format!(
                "no latency samples from {}",
                server.descriptor.name
            )));
        }
        Ok(samples)
    }

    /// Streamed download window; byte-rate frames per read.
    async fn download_phase(
        &self,
        server: &DirectoryServer,
        options: &TestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<f64> {
        let url = sibling_url(&server.upload_url, "random4000x4000.jpg");
        let window = TRANSFER_WINDOW.min(self.phase_budget);
        let started = Instant::now();
        let mut total_bytes = 0u64;
        let mut buf = vec![0u8; READ_BUF];

        while started.elapsed() < window {
            let request = Request::get(url.as_str())
                .timeout(self.phase_budget)
                .body(())
                .map_err(|e| Error::Internal(format!("build download request: {e}")))?;
            let mut response = self
                .client
                .send_async(request)
                .await
                .map_err(|e| Error::http("download", e))?;

            loop {
                let read = response
                    .body_mut()
                    .read(&mut buf)
                    .await
                    .map_err(|e| Error::Internal(format!("download read: {e}")))?;
                if read == 0 {
                    break;
                }
                total_bytes += read as u64;

                let elapsed = started.elapsed();
                sink.publish(SpeedUpdate::phase_frame(
                    UpdatePhase::Download,
                    &server.descriptor.name,
                    mbps(total_bytes, elapsed),
                    elapsed.as_secs_f64() / window.as_secs_f64() * 100.0,
                    options,
                ));

                if elapsed >= window {
                    break;
                }
            }
        }

        Ok(mbps(total_bytes, started.elapsed()))
    }

    /// Chunked upload window; byte-rate frames per completed chunk.
    async fn upload_phase(
        &self,
        server: &DirectoryServer,
        options: &TestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<f64> {
        let window = TRANSFER_WINDOW.min(self.phase_budget);
        let started = Instant::now();
        let mut total_bytes = 0u64;
        let chunk: Vec<u8> = vec![0x55; UPLOAD_CHUNK];

        while started.elapsed() < window {
            let request = Request::post(server.upload_url.as_str())
                .timeout(self.phase_budget)
                .header("content-type", "application/octet-stream")
                .body(AsyncBody::from(chunk.clone()))
                .map_err(|e| Error::Internal(format!("build upload request: {e}")))?;

            let mut response = self
                .client
                .send_async(request)
                .await
                .map_err(|e| Error::http("upload", e))?;
            let mut drain = Vec::new();
            let _ = response.body_mut().read_to_end(&mut drain).await;

            total_bytes += UPLOAD_CHUNK as u64;
            let elapsed = started.elapsed();
            sink.publish(SpeedUpdate::phase_frame(
                UpdatePhase::Upload,
                &server.descriptor.name,
                mbps(total_bytes, elapsed),
                elapsed.as_secs_f64() / window.as_secs_f64() * 100.0,
                options,
            ));
        }

        Ok(mbps(total_bytes, started.elapsed()))
    }
}

#[async_trait]
impl Runner for HostedRunner {
    fn kind(&self) -> TestType {
        TestType::Speedtest
    }

    async fn servers(&self) -> Result<Vec<ServerDescriptor>> {
        Ok(self
            .directory()
            .await?
            .into_iter()
            .map(|server| server.descriptor)
            .collect())
    }

    async fn run(
        &self,
        options: &TestOptions,
        sink: &dyn ProgressSink,
    ) -> Result<NewSpeedTestResult> {
        let server = self.pick_server(options).await?;
        let budget = self.phase_budget;

        let mut latency_ms = 0.0;
        let mut jitter_ms = None;
        if options.enable_ping {
            let samples = tokio::time::timeout(budget, self.ping_phase(&server, options, sink))
                .await
                .map_err(|_| Error::Timeout(budget))??;
            latency_ms = samples.iter().copied().fold(f64::INFINITY, f64::min);
            if options.enable_jitter && samples.len() > 1 {
                let diffs: f64 = samples.windows(2).map(|p| (p[1] - p[0]).abs()).sum();
                jitter_ms = Some(diffs / (samples.len() - 1) as f64);
            }
        }

        let mut download_mbps = 0.0;
        if options.enable_download {
            download_mbps =
                tokio::time::timeout(budget, self.download_phase(&server, options, sink))
                    .await
                    .map_err(|_| Error::Timeout(budget))??;
        }

        let mut upload_mbps = 0.0;
        if options.enable_upload {
            upload_mbps = tokio::time::timeout(budget, self.upload_phase(&server, options, sink))
                .await
                .map_err(|_| Error::Timeout(budget))??;
        }

        Ok(NewSpeedTestResult {
            server_name: server.descriptor.name.clone(),
            server_id: server.descriptor.id.clone(),
            server_host: server.descriptor.host.clone(),
            test_type: TestType::Speedtest.as_str().to_string(),
            download_mbps,
            upload_mbps,
            latency: if latency_ms.is_finite() && latency_ms > 0.0 {
                format_latency(latency_ms)
            } else {
                String::new()
            },
            packet_loss: 0.0,
            jitter_ms,
            is_scheduled: options.is_scheduled,
        })
    }
}

fn parse_directory(body: &str, client_lat: f64, client_lon: f64) -> Result<Vec<DirectoryServer>> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(body)?;
    let mut servers = Vec::with_capacity(entries.len());

    for entry in entries {
        // Ids and coordinates arrive as either strings or numbers.
        let id = match &entry["id"] {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => continue,
        };
        let upload_url = match entry["url"].as_str() {
            Some(url) => url.to_string(),
            None => continue,
        };
        let lat = json_f64(&entry["lat"]);
        let lon = json_f64(&entry["lon"]);
        let name = entry["name"].as_str().unwrap_or("unknown").to_string();
        let sponsor = entry["sponsor"].as_str().unwrap_or_default();
        let display_name = if sponsor.is_empty() {
            name.clone()
        } else {
            format!("{sponsor} ({name})")
        };

        servers.push(DirectoryServer {
            descriptor: ServerDescriptor {
                id,
                name: display_name,
                host: entry["host"].as_str().map(str::to_string),
                location: entry["country"].as_str().map(str::to_string),
                lat: Some(lat),
                lon: Some(lon),
                test_type: TestType::Speedtest,
            },
            upload_url,
            lat,
            lon,
            distance_km: haversine_km(client_lat, client_lon, lat, lon),
        });
    }

    Ok(servers)
}

fn json_f64(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Great-circle distance between two coordinates, in kilometers.
fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Replace the final path segment of the upload endpoint.
fn sibling_url(upload_url: &str, file: &str) -> String {
    match upload_url.rfind('/') {
        Some(idx) => format!("{}/{}", &upload_url[..idx], file),
        None => file.to_string(),
    }
}

fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / secs / 1_000_000.0
}

fn format_latency(ms: f64) -> String {
    format!("{ms:.2}ms")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distances() {
        // London to Paris is roughly 344 km.
        let d = haversine_km(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((330.0..360.0).contains(&d), "got {d}");
        // Zero distance to self.
        assert!(haversine_km(10.0, 20.0, 10.0, 20.0) < 1e-9);
    }

    #[test]
    fn sibling_url_swaps_the_last_segment() {
        assert_eq!(
            sibling_url("http://host:8080/speedtest/upload.php", "latency.txt"),
            "http://host:8080/speedtest/latency.txt"
        );
    }

    #[test]
    fn parses_directory_with_mixed_field_types() {
        let body = r#"[
            {"id": 101, "name": "Alpha", "sponsor": "ISP A", "host": "a.example:8080",
             "url": "http://a.example:8080/speedtest/upload.php",
             "lat": "52.0", "lon": "4.0", "country": "NL"},
            {"id": "102", "name": "Beta", "sponsor": "",
             "url": "http://b.example/upload.php", "lat": 40.0, "lon": -3.0},
            {"name": "no-id, skipped"}
        ]"#;
        let servers = parse_directory(body, 52.0, 4.0).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].descriptor.id, "101");
        assert_eq!(servers[0].descriptor.name, "ISP A (Alpha)");
        assert_eq!(servers[1].descriptor.id, "102");
        assert_eq!(servers[1].descriptor.name, "Beta");
        // The co-located server is nearest.
        assert!(servers[0].distance_km < servers[1].distance_km);
    }

    #[test]
    fn mbps_math() {
        // 10 MB in 8 seconds = 10 Mbps.
        let rate = mbps(10_000_000, Duration::from_secs(8));
        assert!((rate - 10.0).abs() < 1e-9);
        assert_eq!(mbps(1000, Duration::ZERO), 0.0);
    }
}
