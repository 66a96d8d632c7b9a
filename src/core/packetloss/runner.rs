//! One probe cycle against one target.
//!
//! Tool selection: MTR when the binary is present and the privileged
//! transport is available, otherwise ICMP echo (raw socket with fallback to
//! the unprivileged datagram mode). N packets at 1-second spacing under a
//! hard timeout of 2×N seconds. Progress advances per *sent* packet: some
//! hosts drop echo replies while the test still converges.

use super::mtr;
use super::types::CycleStats;
use crate::core::ping::{resolve_host, PingSession};
use crate::error::Result;
use std::path::PathBuf;
use std::time::Duration;

const PACKET_SPACING: Duration = Duration::from_secs(1);
/// Grace on top of the hard timeout for a lagging MTR report.
const FINISH_GRACE: Duration = Duration::from_secs(1);

/// Immutable description of one cycle.
#[derive(Debug, Clone)]
pub struct ProbeCycle {
    pub host: String,
    pub packet_count: u32,
    pub privileged: bool,
    pub mtr_binary: Option<PathBuf>,
}

impl ProbeCycle {
    /// Hard ceiling for the whole cycle.
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.packet_count.max(1)) * 2)
    }

    /// Execute the cycle. `on_sent` fires once per transmitted packet with
    /// the running sent count.
    ///
    /// Every return path yields statistics: real numbers from MTR or the
    /// echo session, or a synthetic 100 %-loss record when the target never
    /// answers within the budget. The caller owns the hard-timeout and
    /// cancellation race.
    pub async fn execute<F>(&self, mut on_sent: F) -> Result<CycleStats>
    where
        F: FnMut(u32) + Send,
    {
        let host = self.host.trim();
        let use_mtr =
            self.mtr_binary.is_some() && mtr::privileged_transport_available(self.privileged);

        if use_mtr {
            let binary = self
                .mtr_binary
                .clone()
                .unwrap_or_default();
            let budget = self.hard_timeout() + FINISH_GRACE;

            // MTR has no per-packet callback; tick progress on the packet
            // cadence while the report is produced.
            let mtr_run = mtr::run(&binary, host, self.packet_count, budget);
            tokio::pin!(mtr_run);

            let mut ticker = tokio::time::interval(PACKET_SPACING);
            let mut sent = 0u32;

            loop {
                tokio::select! {
                    result = &mut mtr_run => {
                        match result {
                            Ok(stats) => return Ok(stats),
                            Err(err) => {
                                tracing::warn!(host, %err, "mtr failed, falling back to ping");
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if sent < self.packet_count {
                            sent += 1;
                            on_sent(sent);
                        }
                    }
                }
            }
        }

        self.ping_cycle(host, &mut on_sent).await
    }

    async fn ping_cycle<F>(&self, host: &str, on_sent: &mut F) -> Result<CycleStats>
    where
        F: FnMut(u32) + Send,
    {
        let ip = resolve_host(host).await?;
        let session = PingSession::open(ip, self.privileged)?;
        let privileged = session.privileged();

        let outcome = session
            .run(
                self.packet_count.max(1),
                PACKET_SPACING,
                PACKET_SPACING,
                |sent| on_sent(sent),
            )
            .await;

        Ok(CycleStats {
            packet_loss: outcome.loss_percent(),
            min_rtt: outcome.min_ms(),
            avg_rtt: outcome.avg_ms(),
            max_rtt: outcome.max_ms(),
            std_dev_rtt: outcome.std_dev_ms(),
            packets_sent: outcome.sent,
            packets_recv: outcome.received,
            used_mtr: false,
            hop_count: 0,
            mtr_data: None,
            privileged_mode: privileged,
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_timeout_is_twice_the_packet_count() {
        let cycle = ProbeCycle {
            host: "198.51.100.1".into(),
            packet_count: 5,
            privileged: false,
            mtr_binary: None,
        };
        assert_eq!(cycle.hard_timeout(), Duration::from_secs(10));

        let single = ProbeCycle {
            packet_count: 1,
            ..cycle.clone()
        };
        assert_eq!(single.hard_timeout(), Duration::from_secs(2));

        let max = ProbeCycle {
            packet_count: 100,
            ..cycle
        };
        assert_eq!(max.hard_timeout(), Duration::from_secs(200));
    }

    #[test]
    fn host_whitespace_is_trimmed_before_use() {
        let cycle = ProbeCycle {
            host: "  198.51.100.1  ".into(),
            packet_count: 1,
            privileged: false,
            mtr_binary: None,
        };
        assert_eq!(cycle.host.trim(), "198.51.100.1");
    }
}
