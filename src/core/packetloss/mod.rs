/*!
Packet-loss monitor supervisor.

Each enabled monitor is probed on its schedule; the supervisor owns the
in-memory map of active runs, the single source of truth for "is this
monitor testing right now". Start on an active monitor returns
`AlreadyRunning`; exceeding the concurrent cap returns `Capacity`.

Every run resolves through exactly one completion path (real statistics,
hard timeout with a synthetic 100 %-loss record, or cancellation). A
finished run persists exactly one result row, advances the monitor's
tri-state health, and offers threshold/state events to the notification
matcher.
*/

pub mod mtr;
pub mod runner;
pub mod types;

use crate::core::broadcast::Broadcaster;
use crate::core::notifier::Notifier;
use crate::core::scheduler::interval::IntervalExpr;
use crate::core::store::models::{
    MonitorState, NewPacketLossResult, PacketLossMonitor, PacketLossResult,
};
use crate::core::store::Store;
use crate::error::{Error, Result};
use chrono::Utc;
use runner::ProbeCycle;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use types::{CycleStats, MonitorActivity, PacketLossUpdate};

/// A persisted result counts as "recently completed" for this long.
const RECENT_WINDOW: Duration = Duration::from_secs(5);
/// Grace after the hard timeout for a lagging finish before the run is
/// declared lost and a synthetic record is produced.
const FINISH_GRACE: Duration = Duration::from_secs(1);

struct ActiveRun {
    update: Arc<StdMutex<PacketLossUpdate>>,
    cancel: Arc<Notify>,
}

/// Supervises all packet-loss monitors.
pub struct Supervisor {
    store: Store,
    broadcaster: Arc<Broadcaster>,
    notifier: Arc<Notifier>,
    max_concurrent: usize,
    privileged: bool,
    mtr_binary: Option<PathBuf>,
    active: Arc<RwLock<HashMap<i64, ActiveRun>>>,
}

impl Supervisor {
    pub fn new(
        store: Store,
        broadcaster: Arc<Broadcaster>,
        notifier: Arc<Notifier>,
        max_concurrent: usize,
        privileged: bool,
    ) -> Self {
        let mtr_binary = crate::core::command::find_tool("mtr");
        if mtr_binary.is_none() {
            tracing::info!("mtr not found on PATH, monitors will use ICMP echo");
        }
        Self {
            store,
            broadcaster,
            notifier,
            max_concurrent: max_concurrent.max(1),
            privileged,
            mtr_binary,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Launch one test cycle for the monitor.
    pub async fn start_monitor(&self, id: i64) -> Result<()> {
        let monitor = self.store.packetloss_monitor(id).await?;
        if !monitor.enabled {
            return Err(Error::InvalidInput(format!("monitor {id} is disabled")));
        }

        let mut active = self.active.write().await;
        if active.contains_key(&id) {
            return Err(Error::AlreadyRunning(id));
        }
        if active.len() >= self.max_concurrent {
            return Err(Error::Capacity(active.len()));
        }

        let update = Arc::new(StdMutex::new(PacketLossUpdate {
            is_running: true,
            ..PacketLossUpdate::idle(id, &monitor.host, monitor.last_state)
        }));
        let cancel = Arc::new(Notify::new());

        active.insert(
            id,
            ActiveRun {
                update: update.clone(),
                cancel: cancel.clone(),
            },
        );
        drop(active);

        tracing::info!(monitor = id, host = %monitor.host, "packet loss test starting");

        let task = RunTask {
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
            notifier: self.notifier.clone(),
            active: self.active.clone(),
            privileged: self.privileged,
            mtr_binary: self.mtr_binary.clone(),
        };
        tokio::spawn(async move {
            task.run(monitor, update, cancel).await;
        });

        Ok(())
    }

    /// Cancel the monitor's in-flight run, if any.
    pub async fn stop_monitor(&self, id: i64) -> bool {
        let active = self.active.read().await;
        match active.get(&id) {
            Some(run) => {
                run.cancel.notify_waiters();
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let active = self.active.read().await;
        for run in active.values() {
            run.cancel.notify_waiters();
        }
    }

    /// Ensure every enabled monitor has a future `next_run` so the
    /// scheduler will fire it. Missed runs are never executed.
    pub async fn start_all_enabled(&self) -> Result<usize> {
        let monitors = self.store.enabled_packetloss_monitors().await?;
        let now = Utc::now();
        let mut scheduled = 0usize;

        for monitor in monitors {
            let needs_reset = monitor.next_run.map(|at| at <= now).unwrap_or(true);
            if !needs_reset {
                continue;
            }
            let expr = IntervalExpr::parse(&monitor.interval_expr)?;
            let next = expr.next_run(now);
            self.store.reset_monitor_next_run(monitor.id, next).await?;
            scheduled += 1;
        }

        Ok(scheduled)
    }

    pub async fn active_monitors(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.active.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Deterministic status resolution: actively-testing, then
    /// recently-completed, then scheduled/disabled.
    pub async fn status(&self, id: i64) -> Result<PacketLossUpdate> {
        let monitor = self.store.packetloss_monitor(id).await?;

        if let Some(run) = self.active.read().await.get(&id) {
            let update = lock_update(&run.update).clone();
            if update.progress > 0.0 {
                return Ok(update);
            }
        }

        if let Some(result) = self.store.latest_packetloss_result(id).await? {
            let age = Utc::now().signed_duration_since(result.created_at);
            if age.num_seconds() >= 0 && age.to_std().unwrap_or_default() <= RECENT_WINDOW {
                return Ok(update_from_result(&monitor, &result));
            }
        }

        Ok(PacketLossUpdate::idle(id, &monitor.host, monitor.last_state))
    }

    /// Four-way activity classification for UI listings.
    pub async fn activity(&self, id: i64) -> Result<MonitorActivity> {
        let monitor = self.store.packetloss_monitor(id).await?;

        if let Some(run) = self.active.read().await.get(&id) {
            if lock_update(&run.update).progress > 0.0 {
                return Ok(MonitorActivity::ActivelyTesting);
            }
        }

        if let Some(result) = self.store.latest_packetloss_result(id).await? {
            let age = Utc::now().signed_duration_since(result.created_at);
            if age.num_seconds() >= 0 && age.to_std().unwrap_or_default() <= RECENT_WINDOW {
                return Ok(MonitorActivity::RecentlyCompleted);
            }
        }

        if monitor.enabled {
            Ok(MonitorActivity::Scheduled)
        } else {
            Ok(MonitorActivity::Disabled)
        }
    }
}

/// Everything a spawned run needs, detached from the supervisor's lifetime.
struct RunTask {
    store: Store,
    broadcaster: Arc<Broadcaster>,
    notifier: Arc<Notifier>,
    active: Arc<RwLock<HashMap<i64, ActiveRun>>>,
    privileged: bool,
    mtr_binary: Option<PathBuf>,
}

impl RunTask {
    async fn run(
        self,
        monitor: PacketLossMonitor,
        update: Arc<StdMutex<PacketLossUpdate>>,
        cancel: Arc<Notify>,
    ) {
        let cycle = ProbeCycle {
            host: monitor.host.clone(),
            packet_count: monitor.packet_count,
            privileged: self.privileged,
            mtr_binary: self.mtr_binary.clone(),
        };
        let hard_timeout = cycle.hard_timeout() + FINISH_GRACE;

        let progress_update = update.clone();
        let progress_broadcaster = self.broadcaster.clone();
        let packet_count = monitor.packet_count.max(1);
        let on_sent = move |sent: u32| {
            let mut guard = lock_update(&progress_update);
            guard.packets_sent = sent;
            guard.progress = f64::from(sent) / f64::from(packet_count) * 100.0;
            guard.updated_at = Utc::now();
            progress_broadcaster.publish_packetloss(guard.clone());
        };

        // Exactly one of these paths resolves the run.
        let stats = tokio::select! {
            result = cycle.execute(on_sent) => match result {
                Ok(stats) => stats,
                Err(err) => {
                    tracing::warn!(monitor = monitor.id, host = %monitor.host, %err,
                        "probe cycle failed, recording full loss");
                    lock_update(&update).error = Some(err.to_string());
                    CycleStats::synthetic_timeout(monitor.packet_count, self.privileged)
                }
            },
            _ = tokio::time::sleep(hard_timeout) => {
                tracing::warn!(monitor = monitor.id, host = %monitor.host,
                    timeout_s = hard_timeout.as_secs(), "probe cycle hit the hard timeout");
                CycleStats::synthetic_timeout(monitor.packet_count, self.privileged)
            }
            _ = cancel.notified() => {
                // Cancelled runs persist nothing.
                tracing::info!(monitor = monitor.id, "packet loss test cancelled");
                {
                    let mut guard = lock_update(&update);
                    guard.is_running = false;
                    self.broadcaster.publish_packetloss(guard.clone());
                }
                self.active.write().await.remove(&monitor.id);
                return;
            }
        };

        self.finish(&monitor, stats, &update).await;
        self.active.write().await.remove(&monitor.id);
    }

    async fn finish(
        &self,
        monitor: &PacketLossMonitor,
        stats: CycleStats,
        update: &Arc<StdMutex<PacketLossUpdate>>,
    ) {
        let new_row = NewPacketLossResult {
            monitor_id: monitor.id,
            packet_loss: stats.packet_loss,
            min_rtt: stats.min_rtt,
            avg_rtt: stats.avg_rtt,
            max_rtt: stats.max_rtt,
            std_dev_rtt: stats.std_dev_rtt,
            packets_sent: stats.packets_sent,
            packets_recv: stats.packets_recv,
            used_mtr: stats.used_mtr,
            hop_count: stats.hop_count,
            mtr_data: stats.mtr_data.clone(),
            privileged_mode: stats.privileged_mode,
        };

        let result = match self.store.insert_packetloss_result(&new_row).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(monitor = monitor.id, %err, "failed to persist result");
                let mut guard = lock_update(update);
                guard.is_running = false;
                guard.error = Some(err.to_string());
                self.broadcaster.publish_packetloss(guard.clone());
                return;
            }
        };

        let now = Utc::now();

        // Advance the schedule from completion time.
        let next_run = IntervalExpr::parse(&monitor.interval_expr)
            .map(|expr| expr.next_run(now))
            .ok();
        if let Err(err) = self.store.mark_monitor_run(monitor.id, now, next_run).await {
            tracing::error!(monitor = monitor.id, %err, "failed to advance monitor schedule");
        }

        // Tri-state transition.
        let new_state = MonitorState::classify(stats.packet_loss, monitor.threshold);
        let transition = if new_state != monitor.last_state {
            if let Err(err) = self
                .store
                .update_monitor_state(monitor.id, new_state, now)
                .await
            {
                tracing::error!(monitor = monitor.id, %err, "failed to record state change");
            }
            tracing::info!(
                monitor = monitor.id,
                host = %monitor.host,
                from = monitor.last_state.as_str(),
                to = new_state.as_str(),
                loss = stats.packet_loss,
                "monitor state changed"
            );
            Some((monitor.last_state, new_state))
        } else {
            None
        };

        // Terminal frame, exactly once.
        {
            let mut guard = lock_update(update);
            *guard = update_from_result(monitor, &result);
            guard.state = new_state;
            if stats.timed_out {
                guard.error = Some("timed out waiting for replies".into());
            }
            self.broadcaster.publish_packetloss(guard.clone());
        }

        self.notifier
            .packetloss_finished(monitor, &result, transition)
            .await;
    }
}

fn update_from_result(monitor: &PacketLossMonitor, result: &PacketLossResult) -> PacketLossUpdate {
    PacketLossUpdate {
        monitor_id: monitor.id,
        host: monitor.host.clone(),
        is_running: false,
        is_complete: true,
        progress: 100.0,
        packets_sent: result.packets_sent,
        packets_recv: result.packets_recv,
        packet_loss: result.packet_loss,
        min_rtt: result.min_rtt,
        avg_rtt: result.avg_rtt,
        max_rtt: result.max_rtt,
        std_dev_rtt: result.std_dev_rtt,
        used_mtr: result.used_mtr,
        hop_count: result.hop_count,
        state: MonitorState::classify(result.packet_loss, monitor.threshold),
        error: None,
        updated_at: result.created_at,
    }
}

fn lock_update(update: &StdMutex<PacketLossUpdate>) -> std::sync::MutexGuard<'_, PacketLossUpdate> {
    match update.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
