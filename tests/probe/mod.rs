use crate::common::{test_stack, wait_for};
use async_trait::async_trait;
use netronome::core::probe::runner::Runner;
use netronome::core::probe::types::{
    ProgressSink, ServerDescriptor, SpeedUpdate, TestOptions, TestType, UpdatePhase,
};
use netronome::core::store::models::{NewSpeedTestResult, Page};
use netronome::core::{Notifier, ProbeEngine};
use netronome::Error;
use std::sync::Arc;
use std::time::Duration;

/// Backend fake: emits one frame per enabled phase, then sleeps `delay`.
struct FakeRunner {
    delay: Duration,
}

#[async_trait]
impl Runner for FakeRunner {
    fn kind(&self) -> TestType {
        TestType::Speedtest
    }

    async fn servers(&self) -> netronome::Result<Vec<ServerDescriptor>> {
        Ok(vec![ServerDescriptor {
            id: "1".into(),
            name: "fake".into(),
            host: None,
            location: None,
            lat: None,
            lon: None,
            test_type: TestType::Speedtest,
        }])
    }

    async fn run(
        &self,
        options: &TestOptions,
        sink: &dyn ProgressSink,
    ) -> netronome::Result<NewSpeedTestResult> {
        for phase in [UpdatePhase::Ping, UpdatePhase::Download, UpdatePhase::Upload] {
            sink.publish(SpeedUpdate::phase_frame(phase, "fake", 100.0, 100.0, options));
        }
        tokio::time::sleep(self.delay).await;
        Ok(NewSpeedTestResult {
            server_name: "fake".into(),
            server_id: "1".into(),
            server_host: None,
            test_type: "speedtest".into(),
            download_mbps: 123.0,
            upload_mbps: 45.0,
            latency: "1.00ms".into(),
            packet_loss: 0.0,
            jitter_ms: None,
            is_scheduled: options.is_scheduled,
        })
    }
}

async fn engine_with_runner(delay: Duration) -> (Arc<ProbeEngine>, crate::common::TestStack) {
    let stack = test_stack().await;
    let notifier = Arc::new(Notifier::new(stack.store.clone()).unwrap());
    let engine = Arc::new(ProbeEngine::new(
        stack.store.clone(),
        stack.broadcaster.clone(),
        notifier,
        vec![Arc::new(FakeRunner { delay })],
    ));
    (engine, stack)
}

#[tokio::test]
async fn missing_backend_is_unavailable_and_persists_nothing() {
    // The shared stack registers no backends at all.
    let stack = test_stack().await;

    let result = stack
        .engine
        .run_test(TestOptions::full(TestType::Iperf3))
        .await;
    assert!(matches!(result, Err(Error::Unavailable(_))), "{result:?}");

    let rows = stack
        .store
        .list_speedtest_results(Page::new(1, 10, 100), None)
        .await
        .unwrap();
    assert_eq!(rows.total, 0, "a failed run must not persist a row");
    // The snapshot was reset for the new run and nothing was emitted after.
    assert!(stack.broadcaster.speedtest_snapshot().is_none());
}

#[tokio::test]
async fn concurrent_runs_fail_fast_with_busy() {
    let (engine, stack) = engine_with_runner(Duration::from_millis(300)).await;

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_test(TestOptions::full(TestType::Speedtest)).await })
    };
    // Give the first run time to take the gate.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = engine.run_test(TestOptions::full(TestType::Speedtest)).await;
    assert!(matches!(second, Err(Error::Busy)), "{second:?}");
    assert!(engine.is_busy());

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.download_mbps, 123.0);
    assert!(!engine.is_busy(), "the gate must release after completion");

    // Exactly one persisted row for the one successful run.
    let rows = stack
        .store
        .list_speedtest_results(Page::new(1, 10, 100), None)
        .await
        .unwrap();
    assert_eq!(rows.total, 1);
}

#[tokio::test]
async fn successful_run_emits_exactly_one_terminal_frame() {
    let (engine, stack) = engine_with_runner(Duration::ZERO).await;
    let rx = stack.broadcaster.subscribe_speedtest();

    engine
        .run_test(TestOptions::full(TestType::Speedtest))
        .await
        .unwrap();

    // The last-value snapshot after a successful run is the terminal frame.
    let terminal = rx.borrow().clone().expect("terminal frame present");
    assert!(terminal.is_complete);
    assert_eq!(terminal.phase, UpdatePhase::Complete);
    assert_eq!(terminal.progress, 100.0);
    assert_eq!(terminal.latency.as_deref(), Some("1.00ms"));
}

#[tokio::test]
async fn gate_releases_after_a_failed_run() {
    let stack = test_stack().await;

    for _ in 0..3 {
        let result = stack
            .engine
            .run_test(TestOptions::full(TestType::Speedtest))
            .await;
        assert!(matches!(result, Err(Error::Unavailable(_))));
    }
    assert!(!stack.engine.is_busy());
}

#[tokio::test]
async fn servers_come_from_the_matching_backend() {
    let (engine, _stack) = engine_with_runner(Duration::ZERO).await;

    let servers = engine.servers(TestType::Speedtest).await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].name, "fake");

    let missing = engine.servers(TestType::Librespeed).await;
    assert!(matches!(missing, Err(Error::Unavailable(_))));
}

#[tokio::test]
async fn scheduled_flag_flows_through_to_the_persisted_row() {
    let (engine, stack) = engine_with_runner(Duration::ZERO).await;

    let mut options = TestOptions::full(TestType::Speedtest);
    options.is_scheduled = true;
    let result = engine.run_test(options).await.unwrap();
    assert!(result.is_scheduled);

    let wait = wait_for(Duration::from_secs(2), || async {
        stack.store.latest_speedtest_result().await.unwrap()
    })
    .await;
    assert!(wait.is_scheduled);
}
