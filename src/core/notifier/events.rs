//! The seeded notification event catalog.
//!
//! Rows are inserted idempotently at startup; user edits to existing rows
//! survive restarts and events are never user-deletable.

use crate::core::store::notifications::EventSeed;

pub const CATEGORY_SPEEDTEST: &str = "speedtest";
pub const CATEGORY_PACKETLOSS: &str = "packetloss";
pub const CATEGORY_AGENT: &str = "agent";

pub const EVENT_SPEEDTEST_COMPLETE: &str = "complete";
pub const EVENT_SPEEDTEST_FAILURE: &str = "failure";
pub const EVENT_SPEEDTEST_DOWNLOAD: &str = "download_speed";
pub const EVENT_SPEEDTEST_UPLOAD: &str = "upload_speed";
pub const EVENT_SPEEDTEST_LATENCY: &str = "latency";

pub const EVENT_PACKETLOSS_DOWN: &str = "host_down";
pub const EVENT_PACKETLOSS_RECOVERED: &str = "host_recovered";
pub const EVENT_PACKETLOSS_THRESHOLD: &str = "threshold_exceeded";

pub const EVENT_AGENT_OFFLINE: &str = "offline";
pub const EVENT_AGENT_RECOVERED: &str = "recovered";

/// Full catalog, one row per `(category, event_type)`.
pub fn catalog() -> Vec<EventSeed> {
    vec![
        EventSeed {
            category: CATEGORY_SPEEDTEST,
            event_type: EVENT_SPEEDTEST_COMPLETE,
            name: "Speed test complete",
            description: "A speed test finished and its result was saved",
            default_enabled: true,
            supports_threshold: false,
            threshold_unit: None,
        },
        EventSeed {
            category: CATEGORY_SPEEDTEST,
            event_type: EVENT_SPEEDTEST_FAILURE,
            name: "Speed test failed",
            description: "A speed test aborted before producing a result",
            default_enabled: false,
            supports_threshold: false,
            threshold_unit: None,
        },
        EventSeed {
            category: CATEGORY_SPEEDTEST,
            event_type: EVENT_SPEEDTEST_DOWNLOAD,
            name: "Download speed",
            description: "Download throughput crossed the configured threshold",
            default_enabled: false,
            supports_threshold: true,
            threshold_unit: Some("Mbps"),
        },
        EventSeed {
            category: CATEGORY_SPEEDTEST,
            event_type: EVENT_SPEEDTEST_UPLOAD,
            name: "Upload speed",
            description: "Upload throughput crossed the configured threshold",
            default_enabled: false,
            supports_threshold: true,
            threshold_unit: Some("Mbps"),
        },
        EventSeed {
            category: CATEGORY_SPEEDTEST,
            event_type: EVENT_SPEEDTEST_LATENCY,
            name: "Latency",
            description: "Measured latency crossed the configured threshold",
            default_enabled: false,
            supports_threshold: true,
            threshold_unit: Some("ms"),
        },
        EventSeed {
            category: CATEGORY_PACKETLOSS,
            event_type: EVENT_PACKETLOSS_DOWN,
            name: "Host down",
            description: "A monitored host stopped answering entirely",
            default_enabled: true,
            supports_threshold: false,
            threshold_unit: None,
        },
        EventSeed {
            category: CATEGORY_PACKETLOSS,
            event_type: EVENT_PACKETLOSS_RECOVERED,
            name: "Host recovered",
            description: "A monitored host returned to healthy",
            default_enabled: true,
            supports_threshold: false,
            threshold_unit: None,
        },
        EventSeed {
            category: CATEGORY_PACKETLOSS,
            event_type: EVENT_PACKETLOSS_THRESHOLD,
            name: "Packet loss threshold",
            description: "Measured loss exceeded the monitor's threshold",
            default_enabled: true,
            supports_threshold: true,
            threshold_unit: Some("%"),
        },
        EventSeed {
            category: CATEGORY_AGENT,
            event_type: EVENT_AGENT_OFFLINE,
            name: "Agent offline",
            description: "A bandwidth agent's live stream disconnected",
            default_enabled: true,
            supports_threshold: false,
            threshold_unit: None,
        },
        EventSeed {
            category: CATEGORY_AGENT,
            event_type: EVENT_AGENT_RECOVERED,
            name: "Agent reconnected",
            description: "A bandwidth agent's live stream came back",
            default_enabled: true,
            supports_threshold: false,
            threshold_unit: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_unique_keys() {
        let seeds = catalog();
        let mut keys: Vec<(&str, &str)> =
            seeds.iter().map(|s| (s.category, s.event_type)).collect();
        keys.sort_unstable();
        let before = keys.len();
        keys.dedup();
        assert_eq!(keys.len(), before);
    }

    #[test]
    fn threshold_events_carry_a_unit() {
        for seed in catalog() {
            assert_eq!(
                seed.supports_threshold,
                seed.threshold_unit.is_some(),
                "{}/{}",
                seed.category,
                seed.event_type
            );
        }
    }
}
