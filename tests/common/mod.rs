//! Shared test fixtures.

use netronome::core::store::models::{NewPacketLossMonitor, NewPacketLossResult, NewSpeedTestResult};
use netronome::core::store::Store;

/// Open a fresh in-memory store with all migrations applied.
pub async fn memory_store() -> Store {
    Store::open("sqlite::memory:")
        .await
        .expect("in-memory store must open")
}

pub fn sample_speedtest_result() -> NewSpeedTestResult {
    NewSpeedTestResult {
        server_name: "Test ISP (Testville)".into(),
        server_id: "101".into(),
        server_host: Some("speed.test:8080".into()),
        test_type: "speedtest".into(),
        download_mbps: 940.2,
        upload_mbps: 880.7,
        latency: "3.20ms".into(),
        packet_loss: 0.0,
        jitter_ms: Some(0.4),
        is_scheduled: false,
    }
}

pub fn sample_monitor(host: &str) -> NewPacketLossMonitor {
    NewPacketLossMonitor {
        host: host.into(),
        name: "test monitor".into(),
        interval_expr: "1m".into(),
        packet_count: 5,
        threshold: 5.0,
        enabled: true,
    }
}

pub fn sample_packetloss_result(monitor_id: i64) -> NewPacketLossResult {
    NewPacketLossResult {
        monitor_id,
        packet_loss: 0.0,
        min_rtt: 1.0,
        avg_rtt: 2.0,
        max_rtt: 3.5,
        std_dev_rtt: 0.5,
        packets_sent: 5,
        packets_recv: 5,
        used_mtr: false,
        hop_count: 0,
        mtr_data: None,
        privileged_mode: false,
    }
}

/// The full in-process service stack over one store, with no probe
/// backends registered (runs fail fast with `Unavailable`, never touching
/// the network).
pub struct TestStack {
    pub store: Store,
    pub broadcaster: std::sync::Arc<netronome::core::Broadcaster>,
    pub notifier: std::sync::Arc<netronome::core::Notifier>,
    pub engine: std::sync::Arc<netronome::core::ProbeEngine>,
    pub supervisor: std::sync::Arc<netronome::core::Supervisor>,
}

pub async fn test_stack() -> TestStack {
    use std::sync::Arc;
    let store = memory_store().await;
    let broadcaster = Arc::new(netronome::core::Broadcaster::new());
    let notifier = Arc::new(netronome::core::Notifier::new(store.clone()).unwrap());
    notifier.seed_events().await.unwrap();
    let engine = Arc::new(netronome::core::ProbeEngine::new(
        store.clone(),
        broadcaster.clone(),
        notifier.clone(),
        Vec::new(),
    ));
    let supervisor = Arc::new(netronome::core::Supervisor::new(
        store.clone(),
        broadcaster.clone(),
        notifier.clone(),
        10,
        false,
    ));
    TestStack {
        store,
        broadcaster,
        notifier,
        engine,
        supervisor,
    }
}

/// Poll until `probe` returns `Some`, or panic after `timeout`.
pub async fn wait_for<T, F, Fut>(timeout: std::time::Duration, mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return value;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}
