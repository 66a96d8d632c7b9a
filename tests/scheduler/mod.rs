use crate::common::{test_stack, wait_for};
use chrono::{Duration as ChronoDuration, Timelike, Utc};
use netronome::core::probe::types::{TestOptions, TestType};
use netronome::core::scheduler::Scheduler;
use netronome::core::store::models::NewSchedule;
use std::time::Duration;
use tokio::sync::watch;

fn scheduler_over(stack: &crate::common::TestStack) -> Scheduler {
    let (_tx, rx) = watch::channel(false);
    Scheduler::new(
        stack.store.clone(),
        stack.engine.clone(),
        stack.supervisor.clone(),
        rx,
    )
}

#[tokio::test]
async fn startup_never_fires_missed_runs() {
    let stack = test_stack().await;
    let scheduler = scheduler_over(&stack);

    let stale = stack
        .store
        .create_schedule(&NewSchedule {
            server_ids: vec![],
            interval_expr: "6h".into(),
            next_run: Utc::now() - ChronoDuration::days(2),
            enabled: true,
            options: TestOptions::full(TestType::Speedtest),
        })
        .await
        .unwrap();

    scheduler.normalize_startup().await.unwrap();

    let normalized = stack.store.schedule(stale.id).await.unwrap();
    // Recomputed forward from now, not replayed.
    assert!(normalized.next_run > Utc::now());
    assert!(normalized.last_run.is_none(), "missed runs are never executed");
}

#[tokio::test]
async fn due_exact_schedule_fires_once_and_advances_with_jitter() {
    let stack = test_stack().await;
    let scheduler = scheduler_over(&stack);

    // exact:02:00 with a stale next_run: the tick must dispatch once and
    // compute the next occurrence of 02:00 UTC plus 1..=60 s jitter.
    let schedule = stack
        .store
        .create_schedule(&NewSchedule {
            server_ids: vec![],
            interval_expr: "exact:02:00".into(),
            next_run: Utc::now() - ChronoDuration::seconds(30),
            enabled: true,
            options: TestOptions::full(TestType::Speedtest),
        })
        .await
        .unwrap();

    scheduler.tick().await.unwrap();

    // Dispatch is async; the engine has no backends so the run fails fast
    // and the schedule advances.
    let advanced = wait_for(Duration::from_secs(5), || async {
        let loaded = stack.store.schedule(schedule.id).await.unwrap();
        (loaded.next_run > Utc::now()).then_some(loaded)
    })
    .await;

    assert!(advanced.last_run.is_some());
    assert_eq!(advanced.next_run.hour(), 2);
    let minute_second = advanced.next_run.minute() * 60 + advanced.next_run.second();
    assert!(
        (1..=60).contains(&minute_second),
        "jitter out of range: {}",
        advanced.next_run
    );
}

#[tokio::test]
async fn one_minute_interval_fires_at_most_once_per_tick() {
    let stack = test_stack().await;
    let scheduler = scheduler_over(&stack);

    let schedule = stack
        .store
        .create_schedule(&NewSchedule {
            server_ids: vec![],
            interval_expr: "1m".into(),
            next_run: Utc::now() - ChronoDuration::seconds(5),
            enabled: true,
            options: TestOptions::full(TestType::Speedtest),
        })
        .await
        .unwrap();

    scheduler.tick().await.unwrap();
    let first = wait_for(Duration::from_secs(5), || async {
        let loaded = stack.store.schedule(schedule.id).await.unwrap();
        loaded.last_run.map(|_| loaded)
    })
    .await;

    // The very next tick sees next_run in the future and dispatches nothing.
    scheduler.tick().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = stack.store.schedule(schedule.id).await.unwrap();
    assert_eq!(second.last_run, first.last_run);
    assert_eq!(second.next_run, first.next_run);
}

#[tokio::test]
async fn due_monitors_are_dispatched_by_the_tick() {
    let stack = test_stack().await;
    let scheduler = scheduler_over(&stack);

    let monitor = stack
        .store
        .create_packetloss_monitor(&crate::common::sample_monitor("198.51.100.1"))
        .await
        .unwrap();
    // Force it due.
    stack
        .store
        .reset_monitor_next_run(monitor.id, Utc::now() - ChronoDuration::seconds(1))
        .await
        .unwrap();

    scheduler.tick().await.unwrap();

    // The supervisor registers the run shortly after dispatch; in
    // environments without ICMP the cycle may already have finished, in
    // which case a result row proves the dispatch happened.
    wait_for(Duration::from_secs(5), || async {
        let active = stack.supervisor.active_monitors().await;
        if active.contains(&monitor.id) {
            return Some(());
        }
        stack
            .store
            .latest_packetloss_result(monitor.id)
            .await
            .unwrap()
            .map(|_| ())
    })
    .await;

    stack.supervisor.stop_all().await;
}
