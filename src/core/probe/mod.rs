/*!
Probe engine: executes exactly one network measurement end-to-end.

The engine owns the process-wide single-flight gate (overlapping probes
saturate the link and measure each other), fans live progress out through the
broadcaster at no more than 1 Hz per phase, persists exactly one result row
per successful run, emits exactly one terminal `complete` frame, and offers
the finished result to the notification matcher.

Backends are [`runner::Runner`] implementations selected by `test_type`:
hosted-HTTP directory, TCP iperf3, and LibreSpeed CLI.
*/

pub mod hosted;
pub mod iperf;
pub mod librespeed;
pub mod runner;
pub mod types;

use crate::core::broadcast::Broadcaster;
use crate::core::notifier::Notifier;
use crate::core::store::models::SpeedTestResult;
use crate::core::store::Store;
use crate::error::{Error, Result};
use runner::Runner;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use types::{ProgressSink, ServerDescriptor, SpeedUpdate, TestOptions, TestType, UpdatePhase};

/// Minimum spacing between forwarded frames of the same phase.
const FRAME_SPACING: Duration = Duration::from_secs(1);

/// Orchestrates runs across the registered backends.
pub struct ProbeEngine {
    store: Store,
    broadcaster: Arc<Broadcaster>,
    notifier: Arc<Notifier>,
    runners: Vec<Arc<dyn Runner>>,
    in_flight: AtomicBool,
}

impl ProbeEngine {
    pub fn new(
        store: Store,
        broadcaster: Arc<Broadcaster>,
        notifier: Arc<Notifier>,
        runners: Vec<Arc<dyn Runner>>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            notifier,
            runners,
            in_flight: AtomicBool::new(false),
        }
    }

    /// True while a run is in flight.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Servers known to the backend serving `test_type`.
    pub async fn servers(&self, test_type: TestType) -> Result<Vec<ServerDescriptor>> {
        self.runner_for(test_type)?.servers().await
    }

    /// Execute one measurement.
    ///
    /// Fails fast with [`Error::Busy`] when another run is in flight. On
    /// success exactly one row is persisted and exactly one `complete` frame
    /// is broadcast; on failure nothing is persisted and the progress stream
    /// ends without a terminal frame.
    pub async fn run_test(&self, options: TestOptions) -> Result<SpeedTestResult> {
        let _guard = FlightGuard::acquire(&self.in_flight)?;

        let runner = self.runner_for(options.test_type)?;
        tracing::info!(
            test_type = %options.test_type,
            is_scheduled = options.is_scheduled,
            "speed test starting"
        );

        self.broadcaster.reset_speedtest();
        let throttled = ThrottledSink::new(self.broadcaster.as_ref());

        let raw = match runner.run(&options, &throttled).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(test_type = %options.test_type, error = %err, "speed test failed");
                self.notifier
                    .speedtest_failed(options.test_type.as_str(), &err.to_string())
                    .await;
                return Err(err);
            }
        };

        // Persist first: a result that never made it to the store must not
        // announce itself as complete.
        let result = self.store.insert_speedtest_result(&raw).await?;

        self.broadcaster.publish_speedtest(SpeedUpdate {
            phase: UpdatePhase::Complete,
            server_name: result.server_name.clone(),
            speed_mbps: result.download_mbps.max(result.upload_mbps),
            progress: 100.0,
            is_complete: true,
            latency: Some(result.latency.clone()),
            is_scheduled: result.is_scheduled,
            test_type: options.test_type,
        });

        tracing::info!(
            id = result.id,
            server = %result.server_name,
            download_mbps = result.download_mbps,
            upload_mbps = result.upload_mbps,
            "speed test complete"
        );

        self.notifier.speedtest_finished(&result).await;

        Ok(result)
    }

    fn runner_for(&self, test_type: TestType) -> Result<Arc<dyn Runner>> {
        self.runners
            .iter()
            .find(|runner| runner.kind() == test_type)
            .cloned()
            .ok_or_else(|| Error::Unavailable(format!("{test_type} backend")))
    }
}

/// RAII single-flight gate.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }
        Ok(FlightGuard(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-phase 1 Hz throttle in front of the real sink.
///
/// The first frame of a phase always passes so phase entry is visible;
/// subsequent frames pass once per [`FRAME_SPACING`]. Terminal frames are
/// emitted by the engine directly and never pass through here.
pub struct ThrottledSink<'a> {
    inner: &'a dyn ProgressSink,
    last: Mutex<Option<(UpdatePhase, Instant)>>,
}

impl<'a> ThrottledSink<'a> {
    pub fn new(inner: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            last: Mutex::new(None),
        }
    }
}

impl ProgressSink for ThrottledSink<'_> {
    fn publish(&self, update: SpeedUpdate) {
        let now = Instant::now();
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let forward = match *last {
            Some((phase, at)) if phase == update.phase => now.duration_since(at) >= FRAME_SPACING,
            _ => true,
        };

        if forward {
            *last = Some((update.phase, now));
            self.inner.publish(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: StdMutex<Vec<SpeedUpdate>>,
    }

    impl ProgressSink for RecordingSink {
        fn publish(&self, update: SpeedUpdate) {
            self.frames.lock().unwrap().push(update);
        }
    }

    fn frame(phase: UpdatePhase, progress: f64) -> SpeedUpdate {
        SpeedUpdate::phase_frame(
            phase,
            "srv",
            1.0,
            progress,
            &TestOptions::full(TestType::Speedtest),
        )
    }

    #[test]
    fn throttle_drops_rapid_same_phase_frames() {
        let sink = RecordingSink::default();
        let throttled = ThrottledSink::new(&sink);

        for i in 0..50 {
            throttled.publish(frame(UpdatePhase::Download, f64::from(i)));
        }

        // Only the phase-entry frame makes it through inside one second.
        assert_eq!(sink.frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn throttle_always_passes_phase_transitions() {
        let sink = RecordingSink::default();
        let throttled = ThrottledSink::new(&sink);

        throttled.publish(frame(UpdatePhase::Ping, 100.0));
        throttled.publish(frame(UpdatePhase::Download, 0.0));
        throttled.publish(frame(UpdatePhase::Upload, 0.0));

        let frames = sink.frames.lock().unwrap();
        let phases: Vec<UpdatePhase> = frames.iter().map(|f| f.phase).collect();
        assert_eq!(
            phases,
            vec![UpdatePhase::Ping, UpdatePhase::Download, UpdatePhase::Upload]
        );
    }

    #[test]
    fn flight_guard_is_exclusive_and_releases_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = FlightGuard::acquire(&flag).unwrap();
        assert!(matches!(FlightGuard::acquire(&flag), Err(Error::Busy)));
        drop(guard);
        assert!(FlightGuard::acquire(&flag).is_ok());
    }
}
