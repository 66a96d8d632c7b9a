use netronome::core::notifier::events;
use netronome::core::store::Store;
use netronome::Error;

async fn seed(store: &Store) -> usize {
    store
        .seed_notification_events(&events::catalog())
        .await
        .unwrap()
}

#[tokio::test]
async fn seeding_is_idempotent() {
    let store = crate::common::memory_store().await;

    let first = seed(&store).await;
    assert_eq!(first, events::catalog().len());

    let second = seed(&store).await;
    assert_eq!(second, 0, "reseeding must insert nothing");

    assert_eq!(
        store.list_notification_events().await.unwrap().len(),
        events::catalog().len()
    );
}

#[tokio::test]
async fn matching_joins_enabled_rules_to_enabled_channels() {
    let store = crate::common::memory_store().await;
    seed(&store).await;

    let event = store
        .notification_event(events::CATEGORY_SPEEDTEST, events::EVENT_SPEEDTEST_COMPLETE)
        .await
        .unwrap();

    let on = store
        .create_notification_channel("alerts", "http://hooks.example/a", true)
        .await
        .unwrap();
    let off = store
        .create_notification_channel("muted", "http://hooks.example/b", false)
        .await
        .unwrap();

    store
        .create_notification_rule(on.id, event.id, true, None, None)
        .await
        .unwrap();
    store
        .create_notification_rule(off.id, event.id, true, None, None)
        .await
        .unwrap();

    let matched = store
        .matching_notification_rules(events::CATEGORY_SPEEDTEST, events::EVENT_SPEEDTEST_COMPLETE)
        .await
        .unwrap();
    assert_eq!(matched.len(), 1, "disabled channels must not match");
    assert_eq!(matched[0].channel_id, on.id);

    // A different event type matches nothing.
    let none = store
        .matching_notification_rules(events::CATEGORY_SPEEDTEST, events::EVENT_SPEEDTEST_FAILURE)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn deleting_a_channel_removes_rules_and_history() {
    let store = crate::common::memory_store().await;
    seed(&store).await;

    let event = store
        .notification_event(events::CATEGORY_PACKETLOSS, events::EVENT_PACKETLOSS_DOWN)
        .await
        .unwrap();
    let channel = store
        .create_notification_channel("alerts", "http://hooks.example", true)
        .await
        .unwrap();
    store
        .create_notification_rule(channel.id, event.id, true, Some(5.0), Some("gt"))
        .await
        .unwrap();
    store
        .insert_notification_history(channel.id, event.id, true, None, Some("{}"))
        .await
        .unwrap();

    store.delete_notification_channel(channel.id).await.unwrap();

    assert!(matches!(
        store.notification_channel(channel.id).await,
        Err(Error::NotFound(_))
    ));
    assert!(store
        .list_notification_rules(channel.id)
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .list_notification_history(channel.id, 100)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn duplicate_rules_per_channel_event_conflict() {
    let store = crate::common::memory_store().await;
    seed(&store).await;

    let event = store
        .notification_event(events::CATEGORY_AGENT, events::EVENT_AGENT_OFFLINE)
        .await
        .unwrap();
    let channel = store
        .create_notification_channel("alerts", "http://hooks.example", true)
        .await
        .unwrap();

    store
        .create_notification_rule(channel.id, event.id, true, None, None)
        .await
        .unwrap();
    let dup = store
        .create_notification_rule(channel.id, event.id, true, None, None)
        .await;
    assert!(matches!(dup, Err(Error::Conflict(_))), "{dup:?}");
}
