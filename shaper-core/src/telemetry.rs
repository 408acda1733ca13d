//! Interface counter sampling, rate derivation and the bounded rate history.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;

/// Number of entries retained in the rolling rate history.
pub const HISTORY_CAPACITY: usize = 30;

/// The kernel's per-interface cumulative counter table.
const PROC_NET_DEV: &str = "/proc/net/dev";

/// Raw cumulative counters for one interface at one instant.
#[derive(Debug, Clone)]
pub struct InterfaceSample {
    pub interface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub timestamp: Instant,
}

/// Derived rates for one interface over the last tick.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceRate {
    pub interface: String,
    pub rx_mbps: f64,
    pub tx_mbps: f64,
    pub rx_bytes_total: u64,
    pub tx_bytes_total: u64,
}

/// One aggregated point in the rate history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

/// Aggregate view produced by one sampler tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrafficSnapshot {
    pub interfaces: Vec<InterfaceRate>,
    /// Sum of receive rates across all non-loopback interfaces.
    pub total_download_mbps: f64,
    /// Sum of transmit rates across all non-loopback interfaces.
    pub total_upload_mbps: f64,
    pub timestamp: u64,
}

#[derive(Default)]
struct MonitorState {
    /// Last sample per interface, kept only for delta computation.
    previous: FxHashMap<String, InterfaceSample>,
    history: VecDeque<HistoryEntry>,
    latest: Option<TrafficSnapshot>,
}

/// Samples interface counters and maintains the bounded rate history.
///
/// Writes (the sampler tick) and reads (status queries) go through a single
/// lock over the whole state, so a reader can never observe a torn window:
/// eviction and insertion happen under one write guard.
#[derive(Default)]
pub struct TrafficMonitor {
    state: RwLock<MonitorState>,
}

impl TrafficMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// One sampler tick against the live kernel counters. Never fails: an
    /// unreadable counter table only skips this tick.
    pub fn tick(&self) {
        let raw = match std::fs::read_to_string(PROC_NET_DEV) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(%err, "failed to read {PROC_NET_DEV}, skipping tick");
                return;
            }
        };

        let now = Instant::now();
        let samples = parse_counters(&raw)
            .into_iter()
            .map(|(interface, rx_bytes, tx_bytes)| InterfaceSample {
                interface,
                rx_bytes,
                tx_bytes,
                timestamp: now,
            })
            .collect();

        self.record(samples);
    }

    /// Folds a set of samples into per-interface rates, aggregates them, and
    /// appends one history entry. Interfaces seen for the first time
    /// contribute no rate this tick; interfaces that disappeared are simply
    /// absent from the aggregate.
    pub fn record(&self, samples: Vec<InterfaceSample>) -> TrafficSnapshot {
        let mut state = self.state.write();

        let mut interfaces = Vec::new();
        let mut total_download_mbps = 0.0;
        let mut total_upload_mbps = 0.0;

        for sample in samples {
            if let Some(previous) = state.previous.get(&sample.interface) {
                let elapsed = sample.timestamp.saturating_duration_since(previous.timestamp);
                let rx_mbps =
                    rate_mbps(counter_delta(sample.rx_bytes, previous.rx_bytes), elapsed);
                let tx_mbps =
                    rate_mbps(counter_delta(sample.tx_bytes, previous.tx_bytes), elapsed);

                if sample.interface != "lo" {
                    total_download_mbps += rx_mbps;
                    total_upload_mbps += tx_mbps;
                }

                interfaces.push(InterfaceRate {
                    interface: sample.interface.clone(),
                    rx_mbps,
                    tx_mbps,
                    rx_bytes_total: sample.rx_bytes,
                    tx_bytes_total: sample.tx_bytes,
                });
            }
            state.previous.insert(sample.interface.clone(), sample);
        }

        let snapshot = TrafficSnapshot {
            interfaces,
            total_download_mbps,
            total_upload_mbps,
            timestamp: unix_millis(),
        };

        state.history.push_back(HistoryEntry {
            timestamp: snapshot.timestamp,
            download_mbps: total_download_mbps,
            upload_mbps: total_upload_mbps,
        });
        while state.history.len() > HISTORY_CAPACITY {
            state.history.pop_front();
        }
        state.latest = Some(snapshot.clone());

        snapshot
    }

    /// Consistent copy of the rolling history, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().history.iter().copied().collect()
    }

    /// The most recent snapshot, if a tick has run.
    pub fn latest(&self) -> Option<TrafficSnapshot> {
        self.state.read().latest.clone()
    }

    /// Spawns the periodic sampler task.
    pub fn spawn(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                monitor.tick();
            }
        })
    }
}

/// Parses the rx/tx byte counters out of a `/proc/net/dev` dump.
fn parse_counters(raw: &str) -> Vec<(String, u64, u64)> {
    let mut out = Vec::new();
    // The first two lines are the header.
    for line in raw.lines().skip(2) {
        let Some((name, stats)) = line.split_once(':') else { continue };
        let fields: Vec<&str> = stats.split_whitespace().collect();
        if fields.len() < 16 {
            continue;
        }
        let (Ok(rx_bytes), Ok(tx_bytes)) = (fields[0].parse(), fields[8].parse()) else {
            continue;
        };
        out.push((name.trim().to_string(), rx_bytes, tx_bytes));
    }
    out
}

/// Delta between cumulative counter readings. A reset (`current < previous`,
/// e.g. after a driver reload) yields the current value itself, never a
/// negative or wrapped delta.
fn counter_delta(current: u64, previous: u64) -> u64 {
    if current < previous {
        current
    } else {
        current - previous
    }
}

/// Converts a byte delta over an elapsed window to megabits per second.
fn rate_mbps(delta_bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (delta_bytes as f64 * 8.0) / (secs * 1_000_000.0)
}

/// Current UNIX timestamp in milliseconds.
fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
