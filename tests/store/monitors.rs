use crate::common::{sample_monitor, sample_packetloss_result};
use chrono::Utc;
use netronome::core::store::models::{MonitorState, Page};
use netronome::Error;

#[tokio::test]
async fn monitor_validation_bounds() {
    let store = crate::common::memory_store().await;

    let mut zero_packets = sample_monitor("host.example");
    zero_packets.packet_count = 0;
    assert!(matches!(
        store.create_packetloss_monitor(&zero_packets).await,
        Err(Error::InvalidInput(_))
    ));

    let mut too_many = sample_monitor("host.example");
    too_many.packet_count = 101;
    assert!(matches!(
        store.create_packetloss_monitor(&too_many).await,
        Err(Error::InvalidInput(_))
    ));

    // The documented boundaries are valid.
    let mut one = sample_monitor("host.example");
    one.packet_count = 1;
    store.create_packetloss_monitor(&one).await.unwrap();
    let mut hundred = sample_monitor("host2.example");
    hundred.packet_count = 100;
    store.create_packetloss_monitor(&hundred).await.unwrap();
}

#[tokio::test]
async fn host_whitespace_is_trimmed_on_create() {
    let store = crate::common::memory_store().await;
    let monitor = store
        .create_packetloss_monitor(&sample_monitor("  10.0.0.1  "))
        .await
        .unwrap();
    assert_eq!(monitor.host, "10.0.0.1");
    assert_eq!(monitor.last_state, MonitorState::Unknown);
}

#[tokio::test]
async fn result_invariants_are_enforced() {
    let store = crate::common::memory_store().await;
    let monitor = store
        .create_packetloss_monitor(&sample_monitor("h"))
        .await
        .unwrap();

    let mut recv_exceeds_sent = sample_packetloss_result(monitor.id);
    recv_exceeds_sent.packets_recv = 6;
    recv_exceeds_sent.packets_sent = 5;
    assert!(matches!(
        store.insert_packetloss_result(&recv_exceeds_sent).await,
        Err(Error::InvalidInput(_))
    ));

    let mut loss_out_of_range = sample_packetloss_result(monitor.id);
    loss_out_of_range.packet_loss = 120.0;
    assert!(matches!(
        store.insert_packetloss_result(&loss_out_of_range).await,
        Err(Error::InvalidInput(_))
    ));

    let mut mtr_without_hops = sample_packetloss_result(monitor.id);
    mtr_without_hops.used_mtr = true;
    mtr_without_hops.hop_count = 0;
    assert!(matches!(
        store.insert_packetloss_result(&mtr_without_hops).await,
        Err(Error::InvalidInput(_))
    ));

    let mut valid_mtr = sample_packetloss_result(monitor.id);
    valid_mtr.used_mtr = true;
    valid_mtr.hop_count = 4;
    store.insert_packetloss_result(&valid_mtr).await.unwrap();
}

#[tokio::test]
async fn deleting_a_monitor_removes_every_result() {
    let store = crate::common::memory_store().await;
    let monitor = store
        .create_packetloss_monitor(&sample_monitor("h"))
        .await
        .unwrap();

    for _ in 0..10 {
        store
            .insert_packetloss_result(&sample_packetloss_result(monitor.id))
            .await
            .unwrap();
    }
    let before = store
        .list_packetloss_results(monitor.id, Page::new(1, 50, 100), None)
        .await
        .unwrap();
    assert_eq!(before.total, 10);

    store.delete_packetloss_monitor(monitor.id).await.unwrap();

    assert!(matches!(
        store.packetloss_monitor(monitor.id).await,
        Err(Error::NotFound(_))
    ));
    let after = store
        .list_packetloss_results(monitor.id, Page::new(1, 50, 100), None)
        .await
        .unwrap();
    assert_eq!(after.total, 0, "no result row may survive its monitor");
}

#[tokio::test]
async fn state_transitions_update_the_change_timestamp() {
    let store = crate::common::memory_store().await;
    let monitor = store
        .create_packetloss_monitor(&sample_monitor("h"))
        .await
        .unwrap();
    assert!(monitor.last_state_change.is_none());

    let changed_at = Utc::now();
    store
        .update_monitor_state(monitor.id, MonitorState::Down, changed_at)
        .await
        .unwrap();

    let loaded = store.packetloss_monitor(monitor.id).await.unwrap();
    assert_eq!(loaded.last_state, MonitorState::Down);
    let recorded = loaded.last_state_change.expect("change timestamp set");
    assert!((recorded - changed_at).num_milliseconds().abs() <= 1);
}
