use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use netronome::core::notifier::{events, Notifier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Inbox {
    hits: Arc<AtomicUsize>,
    payloads: Arc<Mutex<Vec<serde_json::Value>>>,
}

/// Local webhook receiver; returns its base URL.
async fn spawn_inbox(inbox: Inbox) -> String {
    let app = Router::new()
        .route(
            "/hook",
            post(
                |State(inbox): State<Inbox>, Json(payload): Json<serde_json::Value>| async move {
                    inbox.hits.fetch_add(1, Ordering::SeqCst);
                    inbox.payloads.lock().unwrap().push(payload);
                    axum::http::StatusCode::OK
                },
            ),
        )
        .with_state(inbox);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn matching_rule_delivers_once_and_logs_success() {
    let store = crate::common::memory_store().await;
    let notifier = Notifier::new(store.clone()).unwrap();
    notifier.seed_events().await.unwrap();

    let inbox = Inbox::default();
    let base = spawn_inbox(inbox.clone()).await;

    let event = store
        .notification_event(events::CATEGORY_SPEEDTEST, events::EVENT_SPEEDTEST_COMPLETE)
        .await
        .unwrap();
    let channel = store
        .create_notification_channel("hooks", &format!("{base}/hook"), true)
        .await
        .unwrap();
    // Enabled rule, no threshold: always matches.
    store
        .create_notification_rule(channel.id, event.id, true, None, None)
        .await
        .unwrap();

    let delivered = notifier
        .dispatch(
            events::CATEGORY_SPEEDTEST,
            events::EVENT_SPEEDTEST_COMPLETE,
            None,
            serde_json::json!({ "download_mbps": 940.2 }),
        )
        .await
        .unwrap();

    assert_eq!(delivered, 1);
    assert_eq!(inbox.hits.load(Ordering::SeqCst), 1, "exactly one POST");

    let history = store
        .list_notification_history(channel.id, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1, "exactly one history row per attempt");
    assert!(history[0].success);
    assert!(history[0].error.is_none());
    assert!(history[0]
        .payload
        .as_deref()
        .unwrap()
        .contains("download_mbps"));

    let received = inbox.payloads.lock().unwrap();
    assert_eq!(received[0]["category"], "speedtest");
    assert_eq!(received[0]["data"]["download_mbps"], 940.2);
}

#[tokio::test]
async fn threshold_filters_deliveries_by_value() {
    let store = crate::common::memory_store().await;
    let notifier = Notifier::new(store.clone()).unwrap();
    notifier.seed_events().await.unwrap();

    let inbox = Inbox::default();
    let base = spawn_inbox(inbox.clone()).await;

    let event = store
        .notification_event(events::CATEGORY_SPEEDTEST, events::EVENT_SPEEDTEST_DOWNLOAD)
        .await
        .unwrap();
    let channel = store
        .create_notification_channel("hooks", &format!("{base}/hook"), true)
        .await
        .unwrap();
    // Alert when the download rate drops under 100 Mbps.
    store
        .create_notification_rule(channel.id, event.id, true, Some(100.0), Some("lt"))
        .await
        .unwrap();

    let above = notifier
        .dispatch(
            events::CATEGORY_SPEEDTEST,
            events::EVENT_SPEEDTEST_DOWNLOAD,
            Some(500.0),
            serde_json::json!({}),
        )
        .await
        .unwrap();
    assert_eq!(above, 0, "500 Mbps is not below the threshold");

    let below = notifier
        .dispatch(
            events::CATEGORY_SPEEDTEST,
            events::EVENT_SPEEDTEST_DOWNLOAD,
            Some(42.0),
            serde_json::json!({}),
        )
        .await
        .unwrap();
    assert_eq!(below, 1);
    assert_eq!(inbox.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_delivery_is_recorded_with_its_error() {
    let store = crate::common::memory_store().await;
    let notifier = Notifier::new(store.clone()).unwrap();
    notifier.seed_events().await.unwrap();

    let event = store
        .notification_event(events::CATEGORY_AGENT, events::EVENT_AGENT_OFFLINE)
        .await
        .unwrap();
    // Nothing listens on this port.
    let channel = store
        .create_notification_channel("dead", "http://127.0.0.1:1/hook", true)
        .await
        .unwrap();
    store
        .create_notification_rule(channel.id, event.id, true, None, None)
        .await
        .unwrap();

    let delivered = notifier
        .dispatch(
            events::CATEGORY_AGENT,
            events::EVENT_AGENT_OFFLINE,
            None,
            serde_json::json!({ "agent_id": 7 }),
        )
        .await
        .unwrap();
    assert_eq!(delivered, 0);

    // The attempt is still logged, as a failure with its error.
    let history = store
        .list_notification_history(channel.id, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert!(history[0].error.is_some());
}

#[tokio::test]
async fn events_without_rules_deliver_nothing() {
    let store = crate::common::memory_store().await;
    let notifier = Notifier::new(store.clone()).unwrap();
    notifier.seed_events().await.unwrap();

    let delivered = notifier
        .dispatch(
            events::CATEGORY_PACKETLOSS,
            events::EVENT_PACKETLOSS_DOWN,
            Some(100.0),
            serde_json::json!({}),
        )
        .await
        .unwrap();
    assert_eq!(delivered, 0);
}
