use chrono::{Duration, Utc};
use netronome::core::store::models::{
    MonitorInterface, MonitorSystemInfo, NewMonitorAgent, NewMonitorResourceStats,
};
use netronome::Error;

fn sample_agent(base_url: &str) -> NewMonitorAgent {
    NewMonitorAgent {
        name: "rack-1".into(),
        base_url: base_url.into(),
        api_key: Some("secret".into()),
        enabled: true,
        interface: Some("eth0".into()),
    }
}

fn sample_system_info(agent_id: i64) -> MonitorSystemInfo {
    MonitorSystemInfo {
        agent_id,
        hostname: "rack-1.local".into(),
        kernel: "6.8.0".into(),
        agent_version: "1.4.2".into(),
        cpu_model: "Ryzen 7 5800X".into(),
        cpu_cores: 8,
        cpu_threads: 16,
        total_memory: 32 * 1024 * 1024 * 1024,
    }
}

#[tokio::test]
async fn base_url_is_normalized_and_unique() {
    let store = crate::common::memory_store().await;
    let agent = store
        .create_monitor_agent(&sample_agent("http://rack-1:8200/"))
        .await
        .unwrap();
    assert_eq!(agent.base_url, "http://rack-1:8200");

    let dup = store
        .create_monitor_agent(&sample_agent("http://rack-1:8200"))
        .await;
    assert!(matches!(dup, Err(Error::Conflict(_))), "{dup:?}");
}

#[tokio::test]
async fn system_info_upsert_is_idempotent() {
    let store = crate::common::memory_store().await;
    let agent = store
        .create_monitor_agent(&sample_agent("http://a:8200"))
        .await
        .unwrap();

    let info = sample_system_info(agent.id);
    store.upsert_monitor_system_info(&info).await.unwrap();
    store.upsert_monitor_system_info(&info).await.unwrap();

    let loaded = store
        .monitor_system_info(agent.id)
        .await
        .unwrap()
        .expect("row exists");
    assert_eq!(loaded.hostname, info.hostname);
    assert_eq!(loaded.cpu_threads, 16);
    assert_eq!(loaded.total_memory, info.total_memory);
}

#[tokio::test]
async fn interfaces_are_rewritten_atomically() {
    let store = crate::common::memory_store().await;
    let agent = store
        .create_monitor_agent(&sample_agent("http://a:8200"))
        .await
        .unwrap();

    let two = vec![
        MonitorInterface {
            agent_id: agent.id,
            name: "eth0".into(),
            alias: None,
            ip_address: "10.0.0.2".into(),
            link_speed: Some(1000),
        },
        MonitorInterface {
            agent_id: agent.id,
            name: "eth1".into(),
            alias: Some("uplink".into()),
            ip_address: "10.0.1.2".into(),
            link_speed: Some(10_000),
        },
    ];
    store
        .replace_monitor_interfaces(agent.id, &two)
        .await
        .unwrap();
    assert_eq!(store.monitor_interfaces(agent.id).await.unwrap().len(), 2);

    // A refresh that dropped eth1 leaves exactly the new set.
    store
        .replace_monitor_interfaces(agent.id, &two[..1])
        .await
        .unwrap();
    let left = store.monitor_interfaces(agent.id).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].name, "eth0");
}

#[tokio::test]
async fn peaks_are_monotone_non_decreasing() {
    let store = crate::common::memory_store().await;
    let agent = store
        .create_monitor_agent(&sample_agent("http://a:8200"))
        .await
        .unwrap();

    let early = Utc::now() - Duration::minutes(10);
    store
        .update_monitor_peaks(agent.id, 5_000, 9_000, early)
        .await
        .unwrap();
    // A smaller sample later must not lower the peaks or move their times.
    store
        .update_monitor_peaks(agent.id, 1_000, 500, Utc::now())
        .await
        .unwrap();

    let peaks = store
        .monitor_peaks(agent.id)
        .await
        .unwrap()
        .expect("row exists");
    assert_eq!(peaks.peak_rx_bytes, 5_000);
    assert_eq!(peaks.peak_tx_bytes, 9_000);
    let rx_at = peaks.peak_rx_at.expect("rx time recorded");
    assert!((rx_at - early).num_milliseconds().abs() <= 1);

    // A genuinely larger rx raises only rx.
    store
        .update_monitor_peaks(agent.id, 50_000, 100, Utc::now())
        .await
        .unwrap();
    let peaks = store.monitor_peaks(agent.id).await.unwrap().unwrap();
    assert_eq!(peaks.peak_rx_bytes, 50_000);
    assert_eq!(peaks.peak_tx_bytes, 9_000);
}

#[tokio::test]
async fn deleting_an_agent_removes_every_dependent_row() {
    let store = crate::common::memory_store().await;
    let agent = store
        .create_monitor_agent(&sample_agent("http://a:8200"))
        .await
        .unwrap();

    for _ in 0..100 {
        store
            .insert_monitor_resource_stats(&NewMonitorResourceStats {
                agent_id: agent.id,
                cpu_percent: 12.5,
                memory_percent: 40.0,
                swap_percent: 0.0,
                disk_usage: Some("[]".into()),
                temperatures: None,
                uptime_seconds: 86_400,
            })
            .await
            .unwrap();
    }
    store
        .update_monitor_peaks(agent.id, 1000, 1000, Utc::now())
        .await
        .unwrap();
    store
        .upsert_historical_snapshot(agent.id, "eth0", "day", "[]")
        .await
        .unwrap();

    assert_eq!(store.agent_dependent_rows(agent.id).await.unwrap(), 102);

    store.delete_monitor_agent(agent.id).await.unwrap();

    assert!(matches!(
        store.monitor_agent(agent.id).await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(store.agent_dependent_rows(agent.id).await.unwrap(), 0);
}

#[tokio::test]
async fn historical_snapshots_keep_only_the_latest_per_period() {
    let store = crate::common::memory_store().await;
    let agent = store
        .create_monitor_agent(&sample_agent("http://a:8200"))
        .await
        .unwrap();

    store
        .upsert_historical_snapshot(agent.id, "eth0", "day", "[1]")
        .await
        .unwrap();
    store
        .upsert_historical_snapshot(agent.id, "eth0", "day", "[2]")
        .await
        .unwrap();
    store
        .upsert_historical_snapshot(agent.id, "eth0", "month", "[3]")
        .await
        .unwrap();

    let snapshots = store.historical_snapshots(agent.id).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    let day = snapshots.iter().find(|s| s.period_type == "day").unwrap();
    assert_eq!(day.data, "[2]");

    let bad = store
        .upsert_historical_snapshot(agent.id, "eth0", "decade", "[]")
        .await;
    assert!(matches!(bad, Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn bandwidth_hour_probe_supports_import_idempotence() {
    let store = crate::common::memory_store().await;
    let agent = store
        .create_monitor_agent(&sample_agent("http://a:8200"))
        .await
        .unwrap();

    let hour_start = "2024-06-10T09:00:00Z".parse().unwrap();
    assert!(!store
        .has_bandwidth_sample_in_hour(agent.id, hour_start)
        .await
        .unwrap());

    store
        .insert_monitor_bandwidth(agent.id, 1000, 500, "8 kbit/s", "4 kbit/s", hour_start)
        .await
        .unwrap();

    assert!(store
        .has_bandwidth_sample_in_hour(agent.id, hour_start)
        .await
        .unwrap());
    // The neighboring hour is untouched.
    assert!(!store
        .has_bandwidth_sample_in_hour(agent.id, hour_start + Duration::hours(1))
        .await
        .unwrap());
}
