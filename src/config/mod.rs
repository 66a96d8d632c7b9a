//! Resolved service configuration.
//!
//! Hierarchy: built-in defaults < TOML file < environment overrides
//! (`NETRONOME__SECTION_KEY`). The rest of the crate only ever sees the
//! fully-resolved [`Config`] value; components never read the environment
//! themselves.

pub mod defaults;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Database engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// Embedded single-file engine (SQLite). Default deployment.
    #[default]
    Embedded,
    /// Server-hosted engine (PostgreSQL) for multi-user deployments.
    Server,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: DatabaseType,
    /// Embedded engine: database file path. Empty = `<config_dir>/netronome.db`.
    pub path: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub sslmode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IperfPingConfig {
    pub count: u32,
    pub interval_ms: u64,
    pub timeout_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IperfConfig {
    pub test_duration_s: u64,
    pub parallel_conns: u32,
    pub ping: IperfPingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketLossConfig {
    /// Concurrently-active monitor cap enforced by the supervisor.
    pub max_concurrent: usize,
    /// Prefer privileged (raw-socket) ICMP; falls back to unprivileged UDP.
    pub privileged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedTestConfig {
    /// Per-phase budget in seconds (ping/download/upload each).
    pub timeout_s: u64,
    pub iperf: IperfConfig,
    pub packetloss: PacketLossConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIpConfig {
    pub country_db_path: Option<PathBuf>,
    pub asn_db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub host: String,
    pub port: u16,
    pub interface: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Master switch for the agent client pool.
    pub enabled: bool,
    /// Initial reconnect back-off in seconds (doubles up to 5 minutes).
    pub reconnect_interval: u64,
}

/// Default time window for paginated listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultTimeRange {
    #[serde(rename = "24h")]
    #[default]
    Day,
    Week,
    Month,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_page: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub default_time_range: DefaultTimeRange,
    pub default_limit: u32,
}

/// Fully-resolved service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub speedtest: SpeedTestConfig,
    pub geoip: GeoIpConfig,
    pub agent: AgentConfig,
    pub monitor: MonitorConfig,
    pub pagination: PaginationConfig,
}

impl Config {
    /// Load configuration: defaults, then the TOML file (if present), then
    /// `NETRONOME__*` environment overrides, then container detection.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| Error::InvalidInput(format!("config read {}: {e}", p.display())))?;
                toml::from_str(&raw)
                    .map_err(|e| Error::InvalidInput(format!("config parse {}: {e}", p.display())))?
            }
            Some(p) => {
                return Err(Error::InvalidInput(format!(
                    "config file not found: {}",
                    p.display()
                )))
            }
            None => {
                let default_path = Self::default_config_path();
                if default_path.exists() {
                    let raw = std::fs::read_to_string(&default_path)
                        .map_err(|e| Error::InvalidInput(format!("config read: {e}")))?;
                    toml::from_str(&raw)
                        .map_err(|e| Error::InvalidInput(format!("config parse: {e}")))?
                } else {
                    Config::default()
                }
            }
        };

        config.apply_env_overrides();

        // Inside a container the loopback default is useless; bind wide.
        if Self::running_in_container() && config.server.host == defaults::SERVER_HOST {
            config.server.host = "0.0.0.0".to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// `<config_dir>/netronome/config.toml`
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// `<config_dir>/netronome`
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("netronome")
    }

    /// Database file path for the embedded engine.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("netronome.db"))
    }

    /// Connection URL handed to the store.
    pub fn database_url(&self) -> String {
        match self.database.db_type {
            DatabaseType::Embedded => {
                format!("sqlite://{}?mode=rwc", self.database_path().display())
            }
            DatabaseType::Server => format!(
                "postgres://{}:{}@{}:{}/{}?sslmode={}",
                self.database.user,
                self.database.password,
                self.database.host,
                self.database.port,
                self.database.dbname,
                self.database.sslmode,
            ),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::InvalidInput("server.port must be non-zero".into()));
        }
        if self.speedtest.packetloss.max_concurrent == 0 {
            return Err(Error::InvalidInput(
                "speedtest.packetloss.max_concurrent must be at least 1".into(),
            ));
        }
        if self.pagination.max_page_size < self.pagination.default_page_size {
            return Err(Error::InvalidInput(
                "pagination.max_page_size must be >= default_page_size".into(),
            ));
        }
        if self.database.db_type == DatabaseType::Server && self.database.host.is_empty() {
            return Err(Error::InvalidInput(
                "database.host is required for the server engine".into(),
            ));
        }
        Ok(())
    }

    /// Apply `NETRONOME__SECTION_KEY` environment overrides.
    ///
    /// The recognized keys are enumerated explicitly; unknown `NETRONOME__`
    /// variables are ignored rather than rejected so that unrelated tooling
    /// can share the prefix.
    fn apply_env_overrides(&mut self) {
        fn var(key: &str) -> Option<String> {
            std::env::var(key).ok().filter(|v| !v.trim().is_empty())
        }
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            var(key).and_then(|v| v.trim().parse().ok())
        }
        fn flag(key: &str) -> Option<bool> {
            var(key).map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        }

        if let Some(v) = var("NETRONOME__DATABASE_TYPE") {
            self.database.db_type = match v.trim().to_lowercase().as_str() {
                "server" | "postgres" => DatabaseType::Server,
                _ => DatabaseType::Embedded,
            };
        }
        if let Some(v) = var("NETRONOME__DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("NETRONOME__DATABASE_HOST") {
            self.database.host = v;
        }
        if let Some(v) = parsed("NETRONOME__DATABASE_PORT") {
            self.database.port = v;
        }
        if let Some(v) = var("NETRONOME__DATABASE_USER") {
            self.database.user = v;
        }
        if let Some(v) = var("NETRONOME__DATABASE_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = var("NETRONOME__DATABASE_DBNAME") {
            self.database.dbname = v;
        }
        if let Some(v) = var("NETRONOME__DATABASE_SSLMODE") {
            self.database.sslmode = v;
        }

        if let Some(v) = var("NETRONOME__SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = parsed("NETRONOME__SERVER_PORT") {
            self.server.port = v;
        }
        if let Some(v) = var("NETRONOME__SERVER_BASE_URL") {
            self.server.base_url = v;
        }

        if let Some(v) = parsed("NETRONOME__SPEEDTEST_TIMEOUT_S") {
            self.speedtest.timeout_s = v;
        }
        if let Some(v) = parsed("NETRONOME__SPEEDTEST_IPERF_TEST_DURATION_S") {
            self.speedtest.iperf.test_duration_s = v;
        }
        if let Some(v) = parsed("NETRONOME__SPEEDTEST_IPERF_PARALLEL_CONNS") {
            self.speedtest.iperf.parallel_conns = v;
        }
        if let Some(v) = parsed("NETRONOME__SPEEDTEST_IPERF_PING_COUNT") {
            self.speedtest.iperf.ping.count = v;
        }
        if let Some(v) = parsed("NETRONOME__SPEEDTEST_IPERF_PING_INTERVAL_MS") {
            self.speedtest.iperf.ping.interval_ms = v;
        }
        if let Some(v) = parsed("NETRONOME__SPEEDTEST_IPERF_PING_TIMEOUT_S") {
            self.speedtest.iperf.ping.timeout_s = v;
        }
        if let Some(v) = parsed("NETRONOME__SPEEDTEST_PACKETLOSS_MAX_CONCURRENT") {
            self.speedtest.packetloss.max_concurrent = v;
        }
        if let Some(v) = flag("NETRONOME__SPEEDTEST_PACKETLOSS_PRIVILEGED") {
            self.speedtest.packetloss.privileged = v;
        }

        if let Some(v) = var("NETRONOME__GEOIP_COUNTRY_DB_PATH") {
            self.geoip.country_db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("NETRONOME__GEOIP_ASN_DB_PATH") {
            self.geoip.asn_db_path = Some(PathBuf::from(v));
        }

        if let Some(v) = var("NETRONOME__AGENT_HOST") {
            self.agent.host = v;
        }
        if let Some(v) = parsed("NETRONOME__AGENT_PORT") {
            self.agent.port = v;
        }
        if let Some(v) = var("NETRONOME__AGENT_INTERFACE") {
            self.agent.interface = Some(v);
        }
        if let Some(v) = var("NETRONOME__AGENT_API_KEY") {
            self.agent.api_key = Some(v);
        }

        if let Some(v) = flag("NETRONOME__MONITOR_ENABLED") {
            self.monitor.enabled = v;
        }
        if let Some(v) = parsed("NETRONOME__MONITOR_RECONNECT_INTERVAL") {
            self.monitor.reconnect_interval = v;
        }

        if let Some(v) = parsed("NETRONOME__PAGINATION_DEFAULT_PAGE") {
            self.pagination.default_page = v;
        }
        if let Some(v) = parsed("NETRONOME__PAGINATION_DEFAULT_PAGE_SIZE") {
            self.pagination.default_page_size = v;
        }
        if let Some(v) = parsed("NETRONOME__PAGINATION_MAX_PAGE_SIZE") {
            self.pagination.max_page_size = v;
        }
        if let Some(v) = var("NETRONOME__PAGINATION_DEFAULT_TIME_RANGE") {
            self.pagination.default_time_range = match v.trim().to_lowercase().as_str() {
                "week" => DefaultTimeRange::Week,
                "month" => DefaultTimeRange::Month,
                "all" => DefaultTimeRange::All,
                _ => DefaultTimeRange::Day,
            };
        }
        if let Some(v) = parsed("NETRONOME__PAGINATION_DEFAULT_LIMIT") {
            self.pagination.default_limit = v;
        }
    }

    /// Container detection: docker/podman sentinel file or the `container`
    /// environment variable systemd-nspawn and podman set.
    fn running_in_container() -> bool {
        Path::new("/.dockerenv").exists() || std::env::var("container").is_ok()
    }
}
