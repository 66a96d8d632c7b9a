//! ICMP echo measurement shared by the iperf latency pass and the
//! packet-loss runner.
//!
//! Privileged mode opens a raw socket (CAP_NET_RAW or root); when that is
//! denied the session falls back to an unprivileged ICMP datagram socket.

use crate::error::{Error, Result};
use rand::Rng;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};

/// Aggregate of one echo session.
#[derive(Debug, Clone, Default)]
pub struct PingOutcome {
    pub sent: u32,
    pub received: u32,
    /// Round-trip times of the received replies, in milliseconds.
    pub rtts_ms: Vec<f64>,
    pub privileged: bool,
}

impl PingOutcome {
    pub fn loss_percent(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        f64::from(self.sent - self.received) / f64::from(self.sent) * 100.0
    }

    pub fn min_ms(&self) -> f64 {
        self.rtts_ms
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
            .is_finite()
            .then(|| self.rtts_ms.iter().copied().fold(f64::INFINITY, f64::min))
            .unwrap_or(0.0)
    }

    pub fn max_ms(&self) -> f64 {
        self.rtts_ms.iter().copied().fold(0.0, f64::max)
    }

    pub fn avg_ms(&self) -> f64 {
        if self.rtts_ms.is_empty() {
            return 0.0;
        }
        self.rtts_ms.iter().sum::<f64>() / self.rtts_ms.len() as f64
    }

    pub fn std_dev_ms(&self) -> f64 {
        if self.rtts_ms.len() < 2 {
            return 0.0;
        }
        let avg = self.avg_ms();
        let variance = self
            .rtts_ms
            .iter()
            .map(|rtt| (rtt - avg).powi(2))
            .sum::<f64>()
            / self.rtts_ms.len() as f64;
        variance.sqrt()
    }

    /// Mean absolute difference between consecutive replies; the usual
    /// jitter estimate for a ping train.
    pub fn jitter_ms(&self) -> f64 {
        if self.rtts_ms.len() < 2 {
            return 0.0;
        }
        let diffs: f64 = self
            .rtts_ms
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .sum();
        diffs / (self.rtts_ms.len() - 1) as f64
    }
}

/// Resolve a hostname or literal to its first address.
pub async fn resolve_host(host: &str) -> Result<IpAddr> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0u16))
        .await
        .map_err(|e| Error::InvalidInput(format!("resolve {host}: {e}")))?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::InvalidInput(format!("{host} resolves to no addresses")))
}

/// One ICMP echo session against a single target.
pub struct PingSession {
    client: Client,
    target: IpAddr,
    privileged: bool,
}

impl PingSession {
    /// Open a session, preferring a raw socket when `privileged` is
    /// requested and falling back to an unprivileged datagram socket.
    pub fn open(target: IpAddr, privileged: bool) -> Result<PingSession> {
        let kind = match target {
            IpAddr::V4(_) => ICMP::V4,
            IpAddr::V6(_) => ICMP::V6,
        };

        if privileged {
            if let Ok(client) = Client::new(&Config::builder().kind(kind).build()) {
                return Ok(PingSession {
                    client,
                    target,
                    privileged: true,
                });
            }
            tracing::debug!(%target, "raw ICMP socket denied, using unprivileged fallback");
        }

        let config = Config::builder()
            .kind(kind)
            .sock_type_hint(socket2::Type::DGRAM)
            .build();
        let client = Client::new(&config)
            .map_err(|e| Error::Internal(format!("open ping socket: {e}")))?;
        Ok(PingSession {
            client,
            target,
            privileged: false,
        })
    }

    pub fn privileged(&self) -> bool {
        self.privileged
    }

    /// Send `count` echoes at `interval` spacing, each with `per_packet`
    /// reply timeout. `on_sent` fires after every transmission, before the
    /// reply arrives; progress reporting keys off sends because some hosts
    /// drop echo replies while the session still converges.
    pub async fn run<F>(
        &self,
        count: u32,
        interval: Duration,
        per_packet: Duration,
        mut on_sent: F,
    ) -> PingOutcome
    where
        F: FnMut(u32),
    {
        let payload = [0u8; 56];
        let ident = PingIdentifier(rand::thread_rng().gen());
        let mut pinger = self.client.pinger(self.target, ident).await;
        pinger.timeout(per_packet);

        let mut outcome = PingOutcome {
            privileged: self.privileged,
            ..Default::default()
        };

        for seq in 0..count {
            outcome.sent += 1;
            on_sent(outcome.sent);

            match pinger.ping(PingSequence(seq as u16), &payload).await {
                Ok((_packet, rtt)) => {
                    outcome.received += 1;
                    outcome.rtts_ms.push(rtt.as_secs_f64() * 1000.0);
                }
                Err(err) => {
                    tracing::trace!(target = %self.target, seq, %err, "echo lost");
                }
            }

            if seq + 1 < count {
                tokio::time::sleep(interval).await;
            }
        }

        outcome
    }
}
