/*!
Notification matcher: resolves produced events to channels, evaluates
thresholds, delivers, and logs.

For each `(category, event_type)` the matcher loads enabled rules joined to
enabled channels, evaluates any rule threshold against the event's value
(an unknown operator fails open and is alerted once in the logs), POSTs the
payload to matching channels, and records exactly one history row per
attempt. The row is written after the attempt, so history rows mean
"attempted deliveries".
*/

pub mod events;
pub mod webhook;

use crate::core::store::models::{MonitorState, PacketLossMonitor, PacketLossResult, SpeedTestResult};
use crate::core::store::Store;
use crate::error::Result;
use chrono::Utc;
use std::sync::Once;
use webhook::WebhookSender;

static UNKNOWN_OPERATOR_ALERT: Once = Once::new();

/// Threshold comparison. An unknown operator evaluates to true (fail-open on
/// a configuration error) and is alerted once in the logs.
pub fn evaluate_threshold(value: f64, operator: &str, threshold: f64) -> bool {
    match operator {
        "gt" => value > threshold,
        "lt" => value < threshold,
        "eq" => (value - threshold).abs() < f64::EPSILON,
        "gte" => value >= threshold,
        "lte" => value <= threshold,
        other => {
            let operator = other.to_string();
            UNKNOWN_OPERATOR_ALERT.call_once(|| {
                tracing::error!(operator, "unknown threshold operator, failing open");
            });
            true
        }
    }
}

pub struct Notifier {
    store: Store,
    sender: WebhookSender,
}

impl Notifier {
    pub fn new(store: Store) -> Result<Self> {
        Ok(Self {
            store,
            sender: WebhookSender::new()?,
        })
    }

    /// Seed the event catalog. Idempotent.
    pub async fn seed_events(&self) -> Result<usize> {
        self.store.seed_notification_events(&events::catalog()).await
    }

    /// Resolve, evaluate, deliver, log. Returns how many deliveries
    /// succeeded; delivery failures are recovered locally (history row and
    /// a log line).
    pub async fn dispatch(
        &self,
        category: &str,
        event_type: &str,
        value: Option<f64>,
        payload: serde_json::Value,
    ) -> Result<usize> {
        let rules = self
            .store
            .matching_notification_rules(category, event_type)
            .await?;
        if rules.is_empty() {
            return Ok(0);
        }

        let payload = serde_json::json!({
            "category": category,
            "event_type": event_type,
            "value": value,
            "timestamp": Utc::now().to_rfc3339(),
            "data": payload,
        });
        let payload_text = payload.to_string();

        let mut delivered = 0usize;
        for matched in rules {
            if let (Some(threshold), Some(event_value)) = (matched.rule.threshold_value, value) {
                let operator = matched.rule.threshold_operator.as_deref().unwrap_or("gt");
                if !evaluate_threshold(event_value, operator, threshold) {
                    continue;
                }
            }

            let outcome = self.sender.deliver(&matched.channel_url, &payload).await;
            let (success, error) = match &outcome {
                Ok(()) => (true, None),
                Err(err) => (false, Some(err.to_string())),
            };

            if let Err(err) = self
                .store
                .insert_notification_history(
                    matched.channel_id,
                    matched.event_id,
                    success,
                    error.as_deref(),
                    Some(&payload_text),
                )
                .await
            {
                tracing::error!(channel = matched.channel_id, %err, "failed to record delivery");
            }

            match outcome {
                Ok(()) => {
                    delivered += 1;
                    tracing::debug!(
                        channel = matched.channel_id,
                        category,
                        event_type,
                        "notification delivered"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        channel = matched.channel_id,
                        category,
                        event_type,
                        %err,
                        "notification delivery failed"
                    );
                }
            }
        }

        Ok(delivered)
    }

    /// Offer a finished speed test: the completion event plus the threshold
    /// events with their measured values.
    pub async fn speedtest_finished(&self, result: &SpeedTestResult) {
        let payload = match serde_json::to_value(result) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(%err, "failed to serialize speed test payload");
                return;
            }
        };

        let latency_ms = result
            .latency
            .trim_end_matches("ms")
            .trim()
            .parse::<f64>()
            .ok();

        let dispatches: [(&str, Option<f64>); 4] = [
            (events::EVENT_SPEEDTEST_COMPLETE, None),
            (events::EVENT_SPEEDTEST_DOWNLOAD, Some(result.download_mbps)),
            (events::EVENT_SPEEDTEST_UPLOAD, Some(result.upload_mbps)),
            (events::EVENT_SPEEDTEST_LATENCY, latency_ms),
        ];

        for (event_type, value) in dispatches {
            if let Err(err) = self
                .dispatch(events::CATEGORY_SPEEDTEST, event_type, value, payload.clone())
                .await
            {
                tracing::warn!(event_type, %err, "speed test notification failed");
            }
        }
    }

    /// Offer a failed speed test run.
    pub async fn speedtest_failed(&self, test_type: &str, error: &str) {
        let payload = serde_json::json!({ "test_type": test_type, "error": error });
        if let Err(err) = self
            .dispatch(
                events::CATEGORY_SPEEDTEST,
                events::EVENT_SPEEDTEST_FAILURE,
                None,
                payload,
            )
            .await
        {
            tracing::warn!(%err, "speed test failure notification failed");
        }
    }

    /// Offer a finished packet-loss cycle: the threshold event when loss
    /// exceeded the monitor's threshold, plus down/recovered transitions.
    pub async fn packetloss_finished(
        &self,
        monitor: &PacketLossMonitor,
        result: &PacketLossResult,
        transition: Option<(MonitorState, MonitorState)>,
    ) {
        let payload = serde_json::json!({
            "monitor_id": monitor.id,
            "monitor_name": monitor.name,
            "host": monitor.host,
            "packet_loss": result.packet_loss,
            "packets_sent": result.packets_sent,
            "packets_recv": result.packets_recv,
            "avg_rtt": result.avg_rtt,
            "used_mtr": result.used_mtr,
        });

        if result.packet_loss > monitor.threshold {
            if let Err(err) = self
                .dispatch(
                    events::CATEGORY_PACKETLOSS,
                    events::EVENT_PACKETLOSS_THRESHOLD,
                    Some(result.packet_loss),
                    payload.clone(),
                )
                .await
            {
                tracing::warn!(monitor = monitor.id, %err, "threshold notification failed");
            }
        }

        let event_type = match transition {
            Some((_, MonitorState::Down)) => Some(events::EVENT_PACKETLOSS_DOWN),
            Some((MonitorState::Down | MonitorState::Degraded, MonitorState::Healthy)) => {
                Some(events::EVENT_PACKETLOSS_RECOVERED)
            }
            _ => None,
        };

        if let Some(event_type) = event_type {
            if let Err(err) = self
                .dispatch(
                    events::CATEGORY_PACKETLOSS,
                    event_type,
                    Some(result.packet_loss),
                    payload,
                )
                .await
            {
                tracing::warn!(monitor = monitor.id, %err, "state notification failed");
            }
        }
    }

    /// Offer an agent connectivity transition.
    pub async fn agent_connection_changed(&self, agent_id: i64, name: &str, connected: bool) {
        let event_type = if connected {
            events::EVENT_AGENT_RECOVERED
        } else {
            events::EVENT_AGENT_OFFLINE
        };
        let payload = serde_json::json!({ "agent_id": agent_id, "name": name });

        if let Err(err) = self
            .dispatch(events::CATEGORY_AGENT, event_type, None, payload)
            .await
        {
            tracing::warn!(agent = agent_id, %err, "agent notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_compare_as_named() {
        assert!(evaluate_threshold(10.0, "gt", 5.0));
        assert!(!evaluate_threshold(5.0, "gt", 5.0));
        assert!(evaluate_threshold(4.0, "lt", 5.0));
        assert!(evaluate_threshold(5.0, "eq", 5.0));
        assert!(evaluate_threshold(5.0, "gte", 5.0));
        assert!(evaluate_threshold(5.0, "lte", 5.0));
        assert!(!evaluate_threshold(5.1, "lte", 5.0));
    }

    #[test]
    fn unknown_operator_fails_open() {
        assert!(evaluate_threshold(0.0, "between", 5.0));
        assert!(evaluate_threshold(123.0, "", -4.0));
    }
}
