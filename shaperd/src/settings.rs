//! Daemon settings, loaded once from the environment at startup.

use std::{net::SocketAddr, str::FromStr, time::Duration};

/// Runtime settings. Every field has a safe default so the daemon comes up
/// with no environment at all.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Control surface bind address.
    pub listen: SocketAddr,
    /// Interface name seeded into the default shaping configuration,
    /// client-facing side.
    pub default_interface_in: String,
    /// Interface name seeded into the default shaping configuration,
    /// uplink-facing side.
    pub default_interface_out: String,
    /// Telemetry sampler period.
    pub sample_period: Duration,
    /// Lease & presence monitor period.
    pub lease_refresh_period: Duration,
    /// Hard deadline for every external command.
    pub command_timeout: Duration,
    /// Address-pool bounds advertised in the DHCP status view.
    pub dhcp_subnet: Option<String>,
    pub dhcp_range: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            default_interface_in: String::new(),
            default_interface_out: String::new(),
            sample_period: Duration::from_secs(2),
            lease_refresh_period: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            dhcp_subnet: None,
            dhcp_range: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = env_or("HOST", "0.0.0.0");
        let port: u16 = env_parse("PORT", 8000);
        let listen = format!("{host}:{port}").parse().unwrap_or_else(|_| {
            tracing::warn!(%host, port, "invalid listen address, using default");
            defaults.listen
        });

        Self {
            listen,
            default_interface_in: env_or("DEFAULT_INTERFACE_IN", ""),
            default_interface_out: env_or("DEFAULT_INTERFACE_OUT", ""),
            sample_period: Duration::from_secs(env_parse("SAMPLE_PERIOD_SECS", 2)),
            lease_refresh_period: Duration::from_secs(env_parse("LEASE_REFRESH_SECS", 10)),
            command_timeout: Duration::from_secs(env_parse("COMMAND_TIMEOUT_SECS", 10)),
            dhcp_subnet: std::env::var("DHCP_SUBNET").ok(),
            dhcp_range: std::env::var("DHCP_RANGE").ok(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|value| value.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_safe() {
        let settings = Settings::default();
        assert_eq!(settings.listen.port(), 8000);
        assert_eq!(settings.sample_period, Duration::from_secs(2));
        assert_eq!(settings.lease_refresh_period, Duration::from_secs(10));
        assert!(settings.default_interface_in.is_empty());
    }
}
