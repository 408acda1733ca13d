//! Bounded-time reachability probes.

use std::sync::Arc;

use serde::Serialize;

use crate::command::{self, Executor};

/// Result of one reachability test. An unreachable host is a normal result,
/// never an error.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub host: String,
    pub reachable: bool,
    pub packet_loss_percent: f64,
    pub avg_latency_ms: f64,
}

impl ProbeReport {
    fn unreachable(host: &str) -> Self {
        Self {
            host: host.to_string(),
            reachable: false,
            packet_loss_percent: 100.0,
            avg_latency_ms: 0.0,
        }
    }
}

/// Runs ICMP reachability tests through the [`Executor`], whose per-command
/// deadline caps total probe time regardless of the packet count.
#[derive(Clone)]
pub struct Prober {
    executor: Arc<dyn Executor>,
}

impl Prober {
    /// Upper bound on packets per probe.
    pub const MAX_COUNT: u32 = 10;

    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Pings `host` with up to `count` packets and reports loss and average
    /// round-trip time.
    pub async fn probe(&self, host: &str, count: u32) -> ProbeReport {
        let count = count.clamp(1, Self::MAX_COUNT);
        let cmd = format!("ping -c {count} -W 1 {host}");

        match self.executor.run(&cmd).await {
            Ok(output) => report(host, &output.stdout, true),
            // ping exits non-zero when replies are missing; the transcript
            // still carries the loss statistics.
            Err(command::Error::NonZero(output)) => report(host, &output.stdout, false),
            Err(err) => {
                tracing::debug!(%host, %err, "probe did not complete");
                ProbeReport::unreachable(host)
            }
        }
    }

    /// Single-packet presence check used by the lease monitor.
    pub async fn is_reachable(&self, host: &str) -> bool {
        self.executor.run(&format!("ping -c 1 -W 1 {host}")).await.is_ok()
    }
}

fn report(host: &str, stdout: &str, exit_ok: bool) -> ProbeReport {
    let (loss, avg) = parse_ping_stats(stdout);
    let packet_loss_percent = loss.unwrap_or(if exit_ok { 0.0 } else { 100.0 });

    ProbeReport {
        host: host.to_string(),
        reachable: packet_loss_percent < 100.0,
        packet_loss_percent,
        avg_latency_ms: avg.unwrap_or(0.0),
    }
}

/// Extracts packet loss and average round-trip time from a `ping` transcript.
///
/// Loss comes from the `... X% packet loss ...` summary segment, the average
/// from the `rtt min/avg/max/mdev = a/b/c/d ms` line (`round-trip` on some
/// platforms).
fn parse_ping_stats(stdout: &str) -> (Option<f64>, Option<f64>) {
    let mut loss = None;
    let mut avg = None;

    for line in stdout.lines() {
        if line.contains("packet loss") {
            loss = line
                .split(',')
                .find(|segment| segment.contains("packet loss"))
                .and_then(|segment| segment.trim().split('%').next())
                .and_then(|value| value.trim().parse().ok());
        } else if line.starts_with("rtt ") || line.starts_with("round-trip") {
            avg = line
                .split('=')
                .nth(1)
                .and_then(|values| values.trim().split('/').nth(1))
                .and_then(|value| value.parse().ok());
        }
    }

    (loss, avg)
}
