//! Built-in defaults and the `generate-config` template.

use super::*;

pub(crate) const SERVER_HOST: &str = "127.0.0.1";

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DatabaseType::Embedded,
            path: None,
            host: String::new(),
            port: 5432,
            user: "netronome".to_string(),
            password: String::new(),
            dbname: "netronome".to_string(),
            sslmode: "disable".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: SERVER_HOST.to_string(),
            port: 7575,
            base_url: "/".to_string(),
        }
    }
}

impl Default for IperfPingConfig {
    fn default() -> Self {
        Self {
            count: 5,
            interval_ms: 200,
            timeout_s: 5,
        }
    }
}

impl Default for IperfConfig {
    fn default() -> Self {
        Self {
            test_duration_s: 10,
            parallel_conns: 4,
            ping: IperfPingConfig::default(),
        }
    }
}

impl Default for PacketLossConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            privileged: false,
        }
    }
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            timeout_s: 30,
            iperf: IperfConfig::default(),
            packetloss: PacketLossConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: SERVER_HOST.to_string(),
            port: 8200,
            interface: None,
            api_key: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect_interval: 5,
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page: 1,
            default_page_size: 20,
            max_page_size: 100,
            default_time_range: DefaultTimeRange::Day,
            default_limit: 100,
        }
    }
}

/// Commented TOML written by `generate-config`.
pub const CONFIG_TEMPLATE: &str = r#"# Netronome configuration.
# Every value shown is the built-in default; uncomment to change it.
# Environment variables of the form NETRONOME__SECTION_KEY override the file.

[database]
# type = "embedded"            # "embedded" (SQLite) or "server" (PostgreSQL)
# path = ""                    # embedded engine file; default <config_dir>/netronome.db
# host = ""                    # server engine only
# port = 5432
# user = "netronome"
# password = ""
# dbname = "netronome"
# sslmode = "disable"

[server]
# host = "127.0.0.1"           # bound to 0.0.0.0 automatically inside containers
# port = 7575
# base_url = "/"

[speedtest]
# timeout_s = 30               # per-phase budget (ping/download/upload)

[speedtest.iperf]
# test_duration_s = 10
# parallel_conns = 4

[speedtest.iperf.ping]
# count = 5
# interval_ms = 200
# timeout_s = 5

[speedtest.packetloss]
# max_concurrent = 10
# privileged = false           # raw-socket ICMP; needs CAP_NET_RAW or root

[geoip]
# country_db_path = ""
# asn_db_path = ""

[agent]
# host = "127.0.0.1"
# port = 8200
# interface = ""
# api_key = ""

[monitor]
# enabled = true
# reconnect_interval = 5       # seconds; doubles up to 5 minutes

[pagination]
# default_page = 1
# default_page_size = 20
# max_page_size = 100
# default_time_range = "24h"   # 24h | week | month | all
# default_limit = 100
"#;
