/*!
Time-based dispatch of schedules and monitors.

One tick per minute. A due item (`enabled && next_run <= now`) is dispatched
on its own task under a deadline (5 minutes for speed tests, 2 minutes for
packet-loss dispatch) and its `last_run`/`next_run` are advanced afterward.

Startup performs no catch-up: any `next_run` already in the past is
recomputed forward from now; missed runs are never executed. Overlapping
firings of the same schedule are naturally serialized by the probe engine's
BUSY gate.
*/

pub mod interval;

use crate::core::packetloss::Supervisor;
use crate::core::probe::types::TestOptions;
use crate::core::probe::ProbeEngine;
use crate::core::store::models::Schedule;
use crate::core::store::Store;
use crate::error::{Error, Result};
use chrono::Utc;
use interval::IntervalExpr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const TICK: Duration = Duration::from_secs(60);
const SPEEDTEST_BUDGET: Duration = Duration::from_secs(5 * 60);
const MONITOR_DISPATCH_BUDGET: Duration = Duration::from_secs(2 * 60);

pub struct Scheduler {
    store: Store,
    engine: Arc<ProbeEngine>,
    supervisor: Arc<Supervisor>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        engine: Arc<ProbeEngine>,
        supervisor: Arc<Supervisor>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            engine,
            supervisor,
            shutdown,
        }
    }

    /// Startup normalization: push every stale `next_run` forward from now.
    pub async fn normalize_startup(&self) -> Result<()> {
        let now = Utc::now();

        for schedule in self.store.list_schedules().await? {
            if !schedule.enabled || schedule.next_run > now {
                continue;
            }
            let expr = IntervalExpr::parse(&schedule.interval_expr)?;
            let next = expr.next_run(now);
            self.store.reset_schedule_next_run(schedule.id, next).await?;
            tracing::info!(
                schedule = schedule.id,
                next_run = %next,
                "stale schedule recomputed forward, missed runs skipped"
            );
        }

        let monitors = self.supervisor.start_all_enabled().await?;
        if monitors > 0 {
            tracing::info!(monitors, "monitor schedules normalized");
        }

        Ok(())
    }

    /// Run the tick loop until shutdown.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(%err, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("scheduler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over the due set. The scan itself is single-threaded;
    /// dispatch is parallel.
    pub async fn tick(&self) -> Result<()> {
        let now = Utc::now();

        for schedule in self.store.due_schedules(now).await? {
            self.dispatch_schedule(schedule);
        }

        for monitor in self.store.due_packetloss_monitors(now).await? {
            let supervisor = self.supervisor.clone();
            let id = monitor.id;
            tokio::spawn(async move {
                let start =
                    tokio::time::timeout(MONITOR_DISPATCH_BUDGET, supervisor.start_monitor(id))
                        .await;
                match start {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) if err.is_rejection() => {
                        tracing::debug!(monitor = id, %err, "monitor dispatch skipped");
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(monitor = id, %err, "monitor dispatch failed");
                    }
                    Err(_) => {
                        tracing::warn!(monitor = id, "monitor dispatch timed out");
                    }
                }
            });
        }

        Ok(())
    }

    fn dispatch_schedule(&self, schedule: Schedule) {
        let store = self.store.clone();
        let engine = self.engine.clone();

        tokio::spawn(async move {
            let id = schedule.id;

            // One run per listed server, in order. The BUSY gate would
            // reject overlap anyway; awaiting serializes them here.
            let mut targets: Vec<Option<String>> =
                schedule.server_ids.iter().cloned().map(Some).collect();
            if targets.is_empty() {
                targets.push(None);
            }

            for target in targets {
                let mut options = schedule.options.clone();
                options.is_scheduled = true;
                options.server_ids = target.clone().into_iter().collect();

                let run = tokio::time::timeout(SPEEDTEST_BUDGET, engine.run_test(options)).await;
                match run {
                    Ok(Ok(result)) => {
                        tracing::info!(
                            schedule = id,
                            result = result.id,
                            "scheduled speed test complete"
                        );
                    }
                    Ok(Err(Error::Busy)) => {
                        tracing::debug!(schedule = id, "scheduled run rejected by BUSY gate");
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(schedule = id, %err, "scheduled speed test failed");
                    }
                    Err(_) => {
                        tracing::warn!(
                            schedule = id,
                            budget_s = SPEEDTEST_BUDGET.as_secs(),
                            "scheduled speed test hit its deadline"
                        );
                    }
                }
            }

            // Advance the cadence whatever the outcome; a failing schedule
            // must not re-fire every tick.
            let completed_at = Utc::now();
            let next = match IntervalExpr::parse(&schedule.interval_expr) {
                Ok(expr) => expr.next_run(completed_at),
                Err(err) => {
                    tracing::error!(schedule = id, %err, "unparseable interval, disabling");
                    if let Err(err) = store.set_schedule_enabled(id, false).await {
                        tracing::error!(schedule = id, %err, "failed to disable schedule");
                    }
                    return;
                }
            };
            if let Err(err) = store.mark_schedule_run(id, completed_at, next).await {
                tracing::error!(schedule = id, %err, "failed to advance schedule");
            }
        });
    }
}
