use chrono::{Duration, Utc};
use netronome::core::probe::types::{TestOptions, TestType};
use netronome::core::store::models::NewSchedule;

fn schedule_at(next_run: chrono::DateTime<Utc>, enabled: bool) -> NewSchedule {
    NewSchedule {
        server_ids: vec!["101".into(), "102".into()],
        interval_expr: "6h".into(),
        next_run,
        enabled,
        options: TestOptions::full(TestType::Speedtest),
    }
}

#[tokio::test]
async fn schedule_roundtrips_server_ids_and_options() {
    let store = crate::common::memory_store().await;
    let created = store
        .create_schedule(&schedule_at(Utc::now() + Duration::hours(6), true))
        .await
        .unwrap();

    let loaded = store.schedule(created.id).await.unwrap();
    assert_eq!(loaded.server_ids, vec!["101", "102"]);
    assert_eq!(loaded.interval_expr, "6h");
    assert!(loaded.options.enable_download);
    assert!(loaded.last_run.is_none());
}

#[tokio::test]
async fn due_query_honors_enabled_and_next_run() {
    let store = crate::common::memory_store().await;
    let now = Utc::now();

    let due = store
        .create_schedule(&schedule_at(now - Duration::minutes(1), true))
        .await
        .unwrap();
    // Future and disabled schedules must not fire.
    store
        .create_schedule(&schedule_at(now + Duration::hours(1), true))
        .await
        .unwrap();
    store
        .create_schedule(&schedule_at(now - Duration::minutes(1), false))
        .await
        .unwrap();

    let due_now = store.due_schedules(now).await.unwrap();
    assert_eq!(due_now.len(), 1);
    assert_eq!(due_now[0].id, due.id);
}

#[tokio::test]
async fn marking_a_run_keeps_next_after_last() {
    let store = crate::common::memory_store().await;
    let schedule = store
        .create_schedule(&schedule_at(Utc::now(), true))
        .await
        .unwrap();

    let completed = Utc::now();
    let next = completed + Duration::hours(6) + Duration::seconds(42);
    store
        .mark_schedule_run(schedule.id, completed, next)
        .await
        .unwrap();

    let loaded = store.schedule(schedule.id).await.unwrap();
    let last_run = loaded.last_run.expect("last_run set after a run");
    assert!(loaded.next_run > last_run);
    // Within one interval plus the jitter ceiling.
    assert!(loaded.next_run - last_run <= Duration::hours(6) + Duration::seconds(300));
}

#[tokio::test]
async fn delete_and_toggle() {
    let store = crate::common::memory_store().await;
    let schedule = store
        .create_schedule(&schedule_at(Utc::now(), true))
        .await
        .unwrap();

    store.set_schedule_enabled(schedule.id, false).await.unwrap();
    assert!(!store.schedule(schedule.id).await.unwrap().enabled);

    store.delete_schedule(schedule.id).await.unwrap();
    assert!(store.schedule(schedule.id).await.is_err());
}
