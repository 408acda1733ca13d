//! DHCP lease inspection and client presence.
//!
//! Reads the leasing daemon's on-disk store (dnsmasq or ISC dhcpd),
//! classifies each lease as active or expired, and augments it with a
//! bounded reachability probe. The store is strictly read-only to this
//! crate; daemon lifecycle operations are delegated through the
//! [`Executor`].

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::future;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::{
    command::{self, Executor},
    probe::Prober,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no leasing daemon detected")]
    DaemonNotRunning,
    #[error("lease store unavailable: {0}")]
    LeaseStoreUnavailable(String),
    #[error("command error: {0}")]
    Command(#[from] command::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The address-leasing daemons this monitor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaseDaemon {
    Dnsmasq,
    IscDhcpServer,
}

impl LeaseDaemon {
    /// The systemd unit name.
    pub fn unit(self) -> &'static str {
        match self {
            Self::Dnsmasq => "dnsmasq",
            Self::IscDhcpServer => "isc-dhcp-server",
        }
    }

    pub fn default_lease_file(self) -> &'static str {
        match self {
            Self::Dnsmasq => "/var/lib/misc/dnsmasq.leases",
            Self::IscDhcpServer => "/var/lib/dhcp/dhcpd.leases",
        }
    }

    pub fn config_file(self) -> &'static str {
        match self {
            Self::Dnsmasq => "/etc/dnsmasq.conf",
            Self::IscDhcpServer => "/etc/dhcp/dhcpd.conf",
        }
    }
}

/// One address lease from the daemon's store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DhcpLease {
    pub ip: String,
    pub mac: String,
    pub hostname: String,
    /// Unix timestamp at which the lease expires.
    pub expiry: u64,
}

impl DhcpLease {
    /// Active/expired classification against `now` (unix seconds).
    pub fn status(&self, now: u64) -> LeaseStatus {
        if self.expiry > now {
            LeaseStatus::Active
        } else {
            LeaseStatus::Expired
        }
    }

    /// Seconds until expiry, zero once past.
    pub fn remaining(&self, now: u64) -> u64 {
        self.expiry.saturating_sub(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    Active,
    Expired,
}

/// A lease merged with its most recent reachability probe.
#[derive(Debug, Clone, Serialize)]
pub struct ClientView {
    #[serde(flatten)]
    pub lease: DhcpLease,
    pub status: LeaseStatus,
    pub online: bool,
    pub lease_remaining_secs: u64,
    pub lease_remaining_human: String,
}

impl ClientView {
    pub fn new(lease: DhcpLease, online: bool, now: u64) -> Self {
        let status = lease.status(now);
        let remaining = lease.remaining(now);
        Self {
            lease,
            status,
            online,
            lease_remaining_secs: remaining,
            lease_remaining_human: format_remaining(remaining),
        }
    }
}

/// Aggregated client view over one refresh.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientReport {
    pub clients: FxHashMap<String, ClientView>,
    pub total_clients: usize,
    pub active_clients: usize,
    pub online_clients: usize,
}

/// Leasing daemon status. Degraded (`running = false`) when no daemon is
/// detected or its store cannot be read, never an error.
#[derive(Debug, Clone, Serialize)]
pub struct DhcpStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_type: Option<LeaseDaemon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DhcpStatus {
    fn down(error: Option<String>) -> Self {
        Self {
            running: false,
            server_type: None,
            config_file: None,
            lease_file: None,
            subnet: None,
            range: None,
            uptime: None,
            error,
        }
    }
}

/// Address-pool bounds advertised in the daemon status, loaded once at
/// startup.
#[derive(Debug, Clone, Default)]
pub struct PoolInfo {
    pub subnet: Option<String>,
    pub range: Option<String>,
}

/// Watches the leasing daemon's store and keeps a presence-annotated client
/// view.
pub struct LeaseMonitor {
    executor: Arc<dyn Executor>,
    prober: Prober,
    dnsmasq_lease_file: PathBuf,
    isc_lease_file: PathBuf,
    pool: PoolInfo,
    cached: RwLock<ClientReport>,
}

impl LeaseMonitor {
    pub fn new(executor: Arc<dyn Executor>, prober: Prober) -> Self {
        Self {
            executor,
            prober,
            dnsmasq_lease_file: LeaseDaemon::Dnsmasq.default_lease_file().into(),
            isc_lease_file: LeaseDaemon::IscDhcpServer.default_lease_file().into(),
            pool: PoolInfo::default(),
            cached: RwLock::new(ClientReport::default()),
        }
    }

    /// Overrides the lease store locations.
    pub fn with_lease_files(
        mut self,
        dnsmasq: impl Into<PathBuf>,
        isc: impl Into<PathBuf>,
    ) -> Self {
        self.dnsmasq_lease_file = dnsmasq.into();
        self.isc_lease_file = isc.into();
        self
    }

    /// Sets the advertised address-pool bounds.
    pub fn with_pool(mut self, pool: PoolInfo) -> Self {
        self.pool = pool;
        self
    }

    /// Detects which leasing daemon is currently active.
    async fn active_daemon(&self) -> Option<LeaseDaemon> {
        for daemon in [LeaseDaemon::IscDhcpServer, LeaseDaemon::Dnsmasq] {
            let cmd = format!("systemctl is-active {}", daemon.unit());
            if let Ok(output) = self.executor.run(&cmd).await {
                if output.stdout.trim() == "active" {
                    return Some(daemon);
                }
            }
        }
        None
    }

    fn lease_file(&self, daemon: LeaseDaemon) -> &PathBuf {
        match daemon {
            LeaseDaemon::Dnsmasq => &self.dnsmasq_lease_file,
            LeaseDaemon::IscDhcpServer => &self.isc_lease_file,
        }
    }

    /// Reads and parses the active daemon's lease store.
    pub async fn leases(&self) -> Result<Vec<DhcpLease>> {
        let daemon = self.active_daemon().await.ok_or(Error::DaemonNotRunning)?;
        let path = self.lease_file(daemon);
        let content = tokio::fs::read_to_string(path).await.map_err(|err| {
            Error::LeaseStoreUnavailable(format!("{}: {err}", path.display()))
        })?;

        Ok(match daemon {
            LeaseDaemon::Dnsmasq => parse_dnsmasq_leases(&content),
            LeaseDaemon::IscDhcpServer => parse_isc_leases(&content),
        })
    }

    /// One refresh: parse the store, probe every client concurrently, and
    /// rebuild the cached report. A failed probe only clears that client's
    /// online flag.
    pub async fn refresh(&self) -> Result<ClientReport> {
        let leases = self.leases().await?;
        let now = unix_secs();

        let probes = leases.iter().map(|lease| self.prober.is_reachable(&lease.ip));
        let online: Vec<bool> = future::join_all(probes).await;

        let mut clients = FxHashMap::default();
        for (lease, online) in leases.into_iter().zip(online) {
            let ip = lease.ip.clone();
            clients.insert(ip, ClientView::new(lease, online, now));
        }

        let report = ClientReport {
            total_clients: clients.len(),
            active_clients: clients
                .values()
                .filter(|client| client.status == LeaseStatus::Active)
                .count(),
            online_clients: clients.values().filter(|client| client.online).count(),
            clients,
        };

        *self.cached.write() = report.clone();
        Ok(report)
    }

    /// Most recent successfully built report.
    pub fn snapshot(&self) -> ClientReport {
        self.cached.read().clone()
    }

    /// Daemon status for the control surface. Degrades to `running = false`
    /// both when no daemon is active and when its store cannot be read.
    pub async fn status(&self) -> DhcpStatus {
        let Some(daemon) = self.active_daemon().await else {
            return DhcpStatus::down(Some("no leasing daemon detected".to_string()));
        };

        if let Err(err) = tokio::fs::metadata(self.lease_file(daemon)).await {
            let mut status = DhcpStatus::down(Some(format!(
                "lease store unavailable: {}: {err}",
                self.lease_file(daemon).display()
            )));
            status.server_type = Some(daemon);
            return status;
        }

        let uptime = self.daemon_uptime(daemon).await;
        DhcpStatus {
            running: true,
            server_type: Some(daemon),
            config_file: Some(daemon.config_file().to_string()),
            lease_file: Some(self.lease_file(daemon).display().to_string()),
            subnet: self.pool.subnet.clone(),
            range: self.pool.range.clone(),
            uptime,
            error: None,
        }
    }

    /// The `Active: ... since <when>` line of `systemctl status`.
    async fn daemon_uptime(&self, daemon: LeaseDaemon) -> Option<String> {
        let cmd = format!("systemctl status {} --no-pager", daemon.unit());
        let output = self.executor.run(&cmd).await.ok()?;
        output
            .stdout
            .lines()
            .find(|line| line.contains("Active:") && line.contains("since"))
            .and_then(|line| line.split("since").nth(1))
            .map(|since| since.trim().to_string())
    }

    /// Restarts the active leasing daemon.
    pub async fn restart(&self) -> Result<LeaseDaemon> {
        let daemon = self.active_daemon().await.ok_or(Error::DaemonNotRunning)?;
        self.executor.run(&format!("systemctl restart {}", daemon.unit())).await?;
        tracing::info!(unit = daemon.unit(), "leasing daemon restarted");
        Ok(daemon)
    }

    /// Spawns the periodic refresh task. Failed refreshes degrade the cached
    /// view only; the tick keeps running.
    pub fn spawn(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(err) = monitor.refresh().await {
                    tracing::debug!(%err, "lease refresh degraded");
                }
            }
        })
    }
}

/// Parses dnsmasq's store: one `<expiry> <mac> <ip> <hostname> <client-id>`
/// record per line. The leading field is the expiry timestamp.
pub fn parse_dnsmasq_leases(content: &str) -> Vec<DhcpLease> {
    let mut leases = Vec::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let Ok(expiry) = fields[0].parse() else { continue };
        let ip = fields[2].to_string();
        let hostname = if fields[3] == "*" {
            synthesized_hostname(&ip)
        } else {
            fields[3].to_string()
        };
        leases.push(DhcpLease { ip, mac: fields[1].to_uppercase(), hostname, expiry });
    }
    leases
}

/// Parses ISC dhcpd's store: `lease <ip> { ... }` blocks. Later blocks for
/// the same address supersede earlier ones, mirroring how dhcpd appends to
/// its file.
pub fn parse_isc_leases(content: &str) -> Vec<DhcpLease> {
    let mut by_ip: Vec<(String, DhcpLease)> = Vec::new();
    let mut current: Option<IscBlock> = None;

    for raw in content.lines() {
        let line = raw.trim();
        if let Some(rest) = line.strip_prefix("lease ") {
            let ip = rest.trim_end_matches('{').trim().to_string();
            current = Some(IscBlock::new(ip));
        } else if line.starts_with('}') {
            if let Some(lease) = current.take().and_then(IscBlock::finish) {
                if let Some(slot) = by_ip.iter_mut().find(|(ip, _)| *ip == lease.ip) {
                    slot.1 = lease;
                } else {
                    by_ip.push((lease.ip.clone(), lease));
                }
            }
        } else if let Some(block) = current.as_mut() {
            block.feed(line);
        }
    }

    by_ip.into_iter().map(|(_, lease)| lease).collect()
}

struct IscBlock {
    ip: String,
    mac: Option<String>,
    hostname: Option<String>,
    expiry: Option<u64>,
}

impl IscBlock {
    fn new(ip: String) -> Self {
        Self { ip, mac: None, hostname: None, expiry: None }
    }

    fn feed(&mut self, line: &str) {
        let line = line.trim_end_matches(';');
        if let Some(mac) = line.strip_prefix("hardware ethernet ") {
            self.mac = Some(mac.trim().to_uppercase());
        } else if let Some(hostname) = line.strip_prefix("client-hostname ") {
            self.hostname = Some(hostname.trim().trim_matches('"').to_string());
        } else if let Some(ends) = line.strip_prefix("ends ") {
            self.expiry = parse_isc_timestamp(ends.trim());
        }
    }

    fn finish(self) -> Option<DhcpLease> {
        let expiry = self.expiry?;
        let hostname = self.hostname.unwrap_or_else(|| synthesized_hostname(&self.ip));
        Some(DhcpLease {
            ip: self.ip,
            mac: self.mac.unwrap_or_default(),
            hostname,
            expiry,
        })
    }
}

/// Parses an ISC `ends` clause: `<weekday> YYYY/MM/DD HH:MM:SS` in UTC, or
/// the literal `never`.
fn parse_isc_timestamp(value: &str) -> Option<u64> {
    if value == "never" {
        return Some(u64::MAX);
    }
    // Drop the leading weekday number.
    let datetime = value.split_once(' ')?.1;
    let parsed = chrono::NaiveDateTime::parse_from_str(datetime, "%Y/%m/%d %H:%M:%S").ok()?;
    u64::try_from(parsed.and_utc().timestamp()).ok()
}

/// Placeholder hostname for leases without one: `client-<last-octet>`.
fn synthesized_hostname(ip: &str) -> String {
    let suffix = ip.rsplit('.').next().unwrap_or(ip);
    format!("client-{suffix}")
}

/// Human form of a remaining duration, coarsest two units.
fn format_remaining(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Current UNIX timestamp in seconds.
fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
