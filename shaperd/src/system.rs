//! Host environment inspection for the control surface.
//!
//! All gauges come from procfs; missing or malformed files yield zeroed
//! values rather than errors.

use std::sync::Arc;

use serde::Serialize;
use shaper_core::{command::Executor, net};

/// Aggregate resource gauges for the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemResources {
    pub load_average: [f64; 3],
    pub memory_total_mb: u64,
    pub memory_available_mb: u64,
    pub memory_percent: f64,
    pub uptime_secs: u64,
}

pub fn resources() -> SystemResources {
    let load_average = read_proc("/proc/loadavg")
        .and_then(|raw| parse_loadavg(&raw))
        .unwrap_or_default();
    let (memory_total_mb, memory_available_mb) = read_proc("/proc/meminfo")
        .and_then(|raw| parse_meminfo(&raw))
        .unwrap_or_default();
    let memory_percent = if memory_total_mb > 0 {
        100.0 * (1.0 - memory_available_mb as f64 / memory_total_mb as f64)
    } else {
        0.0
    };

    SystemResources {
        load_average,
        memory_total_mb,
        memory_available_mb,
        memory_percent,
        uptime_secs: read_proc("/proc/uptime")
            .and_then(|raw| parse_uptime(&raw))
            .unwrap_or_default(),
    }
}

/// Environment report for the `system-info` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub kernel_version: String,
    pub has_root: bool,
    pub has_tc: bool,
    pub available_interfaces: Vec<String>,
    pub cpu_count: usize,
    pub memory_total_gb: f64,
}

pub async fn info(executor: &Arc<dyn Executor>) -> SystemInfo {
    let (memory_total_mb, _) = read_proc("/proc/meminfo")
        .and_then(|raw| parse_meminfo(&raw))
        .unwrap_or_default();

    SystemInfo {
        kernel_version: read_proc("/proc/sys/kernel/osrelease")
            .map(|raw| raw.trim().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        has_root: has_root(),
        has_tc: executor.run("tc -V").await.is_ok(),
        available_interfaces: net::interface_names(),
        cpu_count: std::thread::available_parallelism().map(usize::from).unwrap_or(1),
        memory_total_gb: memory_total_mb as f64 / 1024.0,
    }
}

/// Whether the process can mutate kernel networking state.
pub fn has_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn read_proc(path: &str) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

fn parse_loadavg(raw: &str) -> Option<[f64; 3]> {
    let mut iter = raw.split_whitespace();
    let one = iter.next()?.parse().ok()?;
    let five = iter.next()?.parse().ok()?;
    let fifteen = iter.next()?.parse().ok()?;
    Some([one, five, fifteen])
}

/// Returns `(MemTotal, MemAvailable)` in MiB.
fn parse_meminfo(raw: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut available = None;
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = first_kb(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = first_kb(rest);
        }
    }
    Some((total? / 1024, available? / 1024))
}

fn first_kb(rest: &str) -> Option<u64> {
    rest.split_whitespace().next()?.parse().ok()
}

fn parse_uptime(raw: &str) -> Option<u64> {
    raw.split_whitespace().next()?.parse::<f64>().ok().map(|secs| secs as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_loadavg_line() {
        assert_eq!(
            parse_loadavg("0.52 0.58 0.59 1/467 12345\n"),
            Some([0.52, 0.58, 0.59])
        );
        assert_eq!(parse_loadavg("garbage"), None);
    }

    #[test]
    fn parses_meminfo_to_mebibytes() {
        let raw = "MemTotal:       16266428 kB\n\
                   MemFree:         8231024 kB\n\
                   MemAvailable:   12182212 kB\n";
        assert_eq!(parse_meminfo(raw), Some((15884, 11896)));
    }

    #[test]
    fn parses_uptime_whole_seconds() {
        assert_eq!(parse_uptime("86400.50 170000.00\n"), Some(86400));
    }

    #[test]
    fn resources_never_panic_on_this_host() {
        let _ = resources();
    }
}
