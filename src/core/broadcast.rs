//! In-process progress fan-out.
//!
//! A last-value sink per update kind: producers store the newest snapshot,
//! any number of readers sample it. Slow readers lose frames; producers
//! never wait. A new test resets the snapshot to empty so late subscribers
//! do not see a stale terminal frame as current progress.

use crate::core::agent::types::AgentStatus;
use crate::core::packetloss::types::PacketLossUpdate;
use crate::core::probe::types::{ProgressSink, SpeedUpdate};
use tokio::sync::watch;

/// Single-writer/many-reader progress broadcaster.
#[derive(Debug)]
pub struct Broadcaster {
    speedtest: watch::Sender<Option<SpeedUpdate>>,
    packetloss: watch::Sender<Option<PacketLossUpdate>>,
    agents: watch::Sender<Option<AgentStatus>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (speedtest, _) = watch::channel(None);
        let (packetloss, _) = watch::channel(None);
        let (agents, _) = watch::channel(None);
        Self {
            speedtest,
            packetloss,
            agents,
        }
    }

    /// Clear the speed-test snapshot at the start of a new run.
    pub fn reset_speedtest(&self) {
        self.speedtest.send_replace(None);
    }

    pub fn publish_speedtest(&self, update: SpeedUpdate) {
        self.speedtest.send_replace(Some(update));
    }

    pub fn publish_packetloss(&self, update: PacketLossUpdate) {
        self.packetloss.send_replace(Some(update));
    }

    pub fn publish_agent(&self, status: AgentStatus) {
        self.agents.send_replace(Some(status));
    }

    /// Subscribe to speed-test progress. Readers see the latest value only;
    /// there is no replay.
    pub fn subscribe_speedtest(&self) -> watch::Receiver<Option<SpeedUpdate>> {
        self.speedtest.subscribe()
    }

    pub fn subscribe_packetloss(&self) -> watch::Receiver<Option<PacketLossUpdate>> {
        self.packetloss.subscribe()
    }

    pub fn subscribe_agents(&self) -> watch::Receiver<Option<AgentStatus>> {
        self.agents.subscribe()
    }

    /// Current speed-test snapshot, if a run is (or just was) in flight.
    pub fn speedtest_snapshot(&self) -> Option<SpeedUpdate> {
        self.speedtest.borrow().clone()
    }

    pub fn packetloss_snapshot(&self) -> Option<PacketLossUpdate> {
        self.packetloss.borrow().clone()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for Broadcaster {
    fn publish(&self, update: SpeedUpdate) {
        self.publish_speedtest(update);
    }
}
