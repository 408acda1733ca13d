//! Declarative shaping intent.

use serde::{Deserialize, Serialize};

/// Maximum artificial delay, in milliseconds.
pub const MAX_DELAY_MS: u32 = 10_000;
/// Smallest accepted bandwidth cap, in Mbps.
pub const MIN_BANDWIDTH_MBPS: f64 = 0.1;
/// Largest accepted bandwidth cap, in Mbps. A cap at this value means
/// "line rate": no rate-limiting class is installed.
pub const MAX_BANDWIDTH_MBPS: f64 = 1000.0;

/// Process-wide traffic shaping configuration.
///
/// There is exactly one live instance, created with safe defaults at startup
/// and mutated only through the apply operation. Out-of-range values are
/// rejected by [`validate`](Self::validate) before any kernel-facing call;
/// an empty interface name is valid only while `enabled` is `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapingConfig {
    pub enabled: bool,
    /// Artificial delay added to every packet, in milliseconds.
    #[serde(default)]
    pub delay_ms: u32,
    /// Rate cap applied in both directions, in Mbps.
    #[serde(default = "default_bandwidth")]
    pub bandwidth_mbps: f64,
    /// Interface facing the shaped client network.
    #[serde(default)]
    pub interface_in: String,
    /// Interface facing the uplink.
    #[serde(default)]
    pub interface_out: String,
}

fn default_bandwidth() -> f64 {
    MAX_BANDWIDTH_MBPS
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_ms: 0,
            bandwidth_mbps: MAX_BANDWIDTH_MBPS,
            interface_in: String::new(),
            interface_out: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("delay cannot exceed {MAX_DELAY_MS}ms, got {0}ms")]
    DelayOutOfRange(u32),
    #[error(
        "bandwidth must be between {MIN_BANDWIDTH_MBPS} and {MAX_BANDWIDTH_MBPS} Mbps, got {0}"
    )]
    BandwidthOutOfRange(f64),
    #[error("both interfaces must be set while shaping is enabled")]
    MissingInterface,
}

impl ShapingConfig {
    /// Checks range bounds. Runs before any kernel-facing operation, so a
    /// rejected configuration never has side effects.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.delay_ms > MAX_DELAY_MS {
            return Err(ValidationError::DelayOutOfRange(self.delay_ms));
        }
        if !(MIN_BANDWIDTH_MBPS..=MAX_BANDWIDTH_MBPS).contains(&self.bandwidth_mbps) {
            return Err(ValidationError::BandwidthOutOfRange(self.bandwidth_mbps));
        }
        if self.enabled && (self.interface_in.is_empty() || self.interface_out.is_empty()) {
            return Err(ValidationError::MissingInterface);
        }
        Ok(())
    }

    /// The distinct devices this configuration shapes, client-facing first.
    /// Both directions collapse onto one device when in and out name the
    /// same interface. Empty while disabled with no interfaces configured.
    pub fn devices(&self) -> Vec<&str> {
        let mut devices = Vec::with_capacity(2);
        for name in [self.interface_in.as_str(), self.interface_out.as_str()] {
            if !name.is_empty() && !devices.contains(&name) {
                devices.push(name);
            }
        }
        devices
    }

    /// Whether a rate cap below line rate is requested.
    pub fn has_rate_cap(&self) -> bool {
        self.bandwidth_mbps < MAX_BANDWIDTH_MBPS
    }

    /// One-line human description of the applied shaping, for operator
    /// responses and logs.
    pub fn summary(&self) -> String {
        if !self.enabled {
            return "traffic shaping disabled".to_string();
        }
        let mut parts = Vec::new();
        if self.has_rate_cap() {
            parts.push(format!(
                "bandwidth limited to {} (both directions)",
                format_bandwidth(self.bandwidth_mbps * 1_000_000.0)
            ));
        }
        if self.delay_ms > 0 {
            parts.push(format!(
                "packet delay set to {} (both directions)",
                format_delay(self.delay_ms)
            ));
        }
        if parts.is_empty() {
            return "traffic shaping enabled at native throughput".to_string();
        }
        parts.join("; ")
    }
}

fn format_bandwidth(bps: f64) -> String {
    if bps >= 1e9 {
        format!("{:.1} Gbps", bps / 1e9)
    } else if bps >= 1e6 {
        format!("{:.1} Mbps", bps / 1e6)
    } else if bps >= 1e3 {
        format!("{:.1} Kbps", bps / 1e3)
    } else {
        format!("{bps:.0} bps")
    }
}

fn format_delay(ms: u32) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> ShapingConfig {
        ShapingConfig {
            enabled: true,
            delay_ms: 100,
            bandwidth_mbps: 10.0,
            interface_in: "enp1s0".to_string(),
            interface_out: "enp2s0".to_string(),
        }
    }

    #[test]
    fn default_config_is_valid_and_disabled() {
        let config = ShapingConfig::default();
        assert!(!config.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn delay_above_bound_is_rejected() {
        let config = ShapingConfig { delay_ms: 10_001, ..enabled_config() };
        assert_eq!(config.validate(), Err(ValidationError::DelayOutOfRange(10_001)));
    }

    #[test]
    fn bandwidth_below_bound_is_rejected() {
        let config = ShapingConfig { bandwidth_mbps: 0.05, ..enabled_config() };
        assert_eq!(config.validate(), Err(ValidationError::BandwidthOutOfRange(0.05)));
    }

    #[test]
    fn bandwidth_above_bound_is_rejected() {
        let config = ShapingConfig { bandwidth_mbps: 1000.1, ..enabled_config() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_interface_is_only_valid_while_disabled() {
        let config = ShapingConfig { interface_in: String::new(), ..enabled_config() };
        assert_eq!(config.validate(), Err(ValidationError::MissingInterface));

        let config = ShapingConfig { enabled: false, ..config };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn devices_collapse_when_both_directions_share_one_interface() {
        let config = ShapingConfig { interface_out: "enp1s0".to_string(), ..enabled_config() };
        assert_eq!(config.devices(), ["enp1s0"]);
    }

    #[test]
    fn summary_names_cap_and_delay() {
        let summary = enabled_config().summary();
        assert!(summary.contains("10.0 Mbps"), "{summary}");
        assert!(summary.contains("100ms"), "{summary}");
    }

    #[test]
    fn summary_formats_sub_megabit_caps_and_long_delays() {
        let config = ShapingConfig {
            delay_ms: 2500,
            bandwidth_mbps: 0.5,
            ..enabled_config()
        };
        let summary = config.summary();
        assert!(summary.contains("500.0 Kbps"), "{summary}");
        assert!(summary.contains("2.5s"), "{summary}");
    }
}
