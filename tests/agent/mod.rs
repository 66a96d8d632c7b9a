use crate::common::{test_stack, wait_for};
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream;
use netronome::core::agent::types::ConnectionState;
use netronome::core::agent::AgentPool;
use netronome::core::store::models::NewMonitorAgent;
use netronome::Error;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct FakeAgent {
    connections: Arc<AtomicUsize>,
    frames_per_connection: usize,
}

/// A minimal vnstat-style agent: SSE live stream plus JSON endpoints.
async fn spawn_fake_agent(fake: FakeAgent) -> String {
    let app = Router::new()
        .route(
            "/events",
            get(|State(fake): State<FakeAgent>| async move {
                fake.connections.fetch_add(1, Ordering::SeqCst);
                let frames = (0..fake.frames_per_connection).map(|i| {
                    let payload = serde_json::json!({
                        "rx": {
                            "bytespersecond": 1000 + i as i64,
                            "packetspersecond": 10,
                            "ratestring": "8 kbit/s",
                        },
                        "tx": {
                            "bytespersecond": 500,
                            "packetspersecond": 5,
                            "ratestring": "4 kbit/s",
                        },
                    });
                    Ok::<_, Infallible>(Event::default().data(payload.to_string()))
                });
                // A finite stream: the connection closes after the frames,
                // which is exactly the disconnect the client must survive.
                Sse::new(stream::iter(frames))
            }),
        )
        .route(
            "/system",
            get(|| async {
                Json(serde_json::json!({
                    "hostname": "fake-agent",
                    "kernel": "6.8.0",
                    "agent_version": "1.0.0",
                    "cpu_model": "Test CPU",
                    "cpu_cores": 4,
                    "cpu_threads": 8,
                    "total_memory": 8_589_934_592u64,
                    "interfaces": [
                        {"name": "eth0", "ip": "10.0.0.9", "linkspeed": 1000}
                    ],
                }))
            }),
        )
        .route(
            "/hardware",
            get(|| async {
                Json(serde_json::json!({
                    "cpu_percent": 7.5,
                    "memory_percent": 41.0,
                    "swap_percent": 0.0,
                    "uptime_seconds": 3600,
                }))
            }),
        )
        .route(
            "/peaks",
            get(|| async {
                Json(serde_json::json!({
                    "peak_rx_bytes": 123_456,
                    "peak_tx_bytes": 65_432,
                }))
            }),
        )
        .route(
            "/export/historical",
            get(|| async {
                Json(serde_json::json!({
                    "interfaces": [{
                        "name": "eth0",
                        "traffic": {
                            "hour": [],
                            "day": [
                                {"date": {"year": 2020, "month": 1, "day": 10},
                                 "rx": 86_400_000, "tx": 43_200_000}
                            ],
                            "month": [],
                            "year": [],
                        },
                    }],
                }))
            }),
        )
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn pool_streams_frames_persists_and_reconnects() {
    let stack = test_stack().await;
    let fake = FakeAgent {
        connections: Arc::new(AtomicUsize::new(0)),
        frames_per_connection: 3,
    };
    let base = spawn_fake_agent(fake.clone()).await;

    let agent = stack
        .store
        .create_monitor_agent(&NewMonitorAgent {
            name: "fake".into(),
            base_url: base,
            api_key: None,
            enabled: true,
            interface: None,
        })
        .await
        .unwrap();

    // 1-second back-off floor keeps the reconnect observable quickly.
    let pool = Arc::new(
        AgentPool::new(
            stack.store.clone(),
            stack.broadcaster.clone(),
            stack.notifier.clone(),
            1,
        )
        .unwrap(),
    );
    assert_eq!(pool.start().await.unwrap(), 1);

    // Live frames land as bandwidth rows.
    wait_for(Duration::from_secs(10), || async {
        let rows = stack
            .store
            .list_monitor_bandwidth(agent.id, 50)
            .await
            .unwrap();
        (!rows.is_empty()).then_some(())
    })
    .await;

    // The finite stream closes; the client must reconnect on its back-off.
    wait_for(Duration::from_secs(10), || async {
        (fake.connections.load(Ordering::SeqCst) >= 2).then_some(())
    })
    .await;

    // Metadata cadence ran on connect: system info and interfaces exist.
    let info = wait_for(Duration::from_secs(5), || async {
        stack.store.monitor_system_info(agent.id).await.unwrap()
    })
    .await;
    assert_eq!(info.hostname, "fake-agent");
    assert_eq!(info.cpu_threads, 8);

    let interfaces = stack.store.monitor_interfaces(agent.id).await.unwrap();
    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].ip_address, "10.0.0.9");

    // Peaks merged from the peaks endpoint are monotone floor values.
    let peaks = wait_for(Duration::from_secs(5), || async {
        stack.store.monitor_peaks(agent.id).await.unwrap()
    })
    .await;
    assert!(peaks.peak_rx_bytes >= 123_456);

    pool.stop_all().await;
}

#[tokio::test]
async fn unreachable_agent_reports_disconnected_and_keeps_retrying() {
    let stack = test_stack().await;
    let agent = stack
        .store
        .create_monitor_agent(&NewMonitorAgent {
            name: "ghost".into(),
            // Connection refused immediately.
            base_url: "http://127.0.0.1:1".into(),
            api_key: None,
            enabled: true,
            interface: None,
        })
        .await
        .unwrap();

    let pool = Arc::new(
        AgentPool::new(
            stack.store.clone(),
            stack.broadcaster.clone(),
            stack.notifier.clone(),
            1,
        )
        .unwrap(),
    );
    pool.start().await.unwrap();

    let status = wait_for(Duration::from_secs(5), || async {
        let status = pool.status(agent.id).await?;
        status.last_error.is_some().then_some(status)
    })
    .await;
    assert!(!status.connected);
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.live.is_none());

    pool.stop_all().await;
}

#[tokio::test]
async fn historical_import_expands_days_and_is_idempotent() {
    let stack = test_stack().await;
    let fake = FakeAgent {
        connections: Arc::new(AtomicUsize::new(0)),
        frames_per_connection: 0,
    };
    let base = spawn_fake_agent(fake).await;

    let agent = stack
        .store
        .create_monitor_agent(&NewMonitorAgent {
            name: "fake".into(),
            base_url: base,
            api_key: None,
            enabled: false,
            interface: None,
        })
        .await
        .unwrap();

    let pool = Arc::new(
        AgentPool::new(
            stack.store.clone(),
            stack.broadcaster.clone(),
            stack.notifier.clone(),
            1,
        )
        .unwrap(),
    );

    pool.start_import(agent.id).await.unwrap();
    let finished = wait_for(Duration::from_secs(10), || async {
        let status = pool.import_status(agent.id).await?;
        (!status.in_progress && status.completed_at.is_some()).then_some(status)
    })
    .await;

    // One day expands into 24 uniform hourly samples.
    assert_eq!(finished.records_imported, 24);
    assert!(finished.error.is_none());
    let rows = stack
        .store
        .list_monitor_bandwidth(agent.id, 100)
        .await
        .unwrap();
    assert_eq!(rows.len(), 24);
    // 86_400_000 bytes over the day = 1000 B/s each hour.
    assert!(rows.iter().all(|r| r.rx_bytes_per_second == 1000));

    // A second import finds every hour already populated.
    pool.start_import(agent.id).await.unwrap();
    let second = wait_for(Duration::from_secs(10), || async {
        let status = pool.import_status(agent.id).await?;
        (!status.in_progress && status.completed_at.is_some()).then_some(status)
    })
    .await;
    assert_eq!(second.records_imported, 0, "import is idempotent");
    assert_eq!(
        stack
            .store
            .list_monitor_bandwidth(agent.id, 100)
            .await
            .unwrap()
            .len(),
        24
    );

    let missing = pool.start_import(9999).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}
