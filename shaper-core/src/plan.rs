//! Translation of a [`ShapingConfig`] into the ordered `tc` operations that
//! realize it.
//!
//! The plan is pure data: deriving it touches no kernel state, so it can be
//! recomputed from scratch on every apply and inspected in tests as plain
//! command strings.

use crate::config::ShapingConfig;

/// Major handle of the hierarchy on the client-facing device.
const CLIENT_SIDE_MAJOR: u16 = 1;
/// Offset multiplier for the nested delay node handles (`10:`, `20:`).
const NETEM_HANDLE_STEP: u16 = 10;

/// A single kernel queueing object, in install order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanNode {
    /// Root hierarchical rate-limiting discipline on `device`.
    HtbRoot { device: String, handle: u16 },
    /// The rate-limiting class under an HTB root. Rate and ceiling are equal,
    /// so the class enforces a hard cap rather than a guaranteed share.
    HtbClass { device: String, parent: u16, rate_kbit: u64 },
    /// Match-all classification rule binding all IP traffic on `device` to
    /// class `parent:1`.
    MatchAll { device: String, parent: u16 },
    /// Delay-emulation node. Nested under the rate class when `parent` is
    /// set, installed at the device root otherwise.
    Netem { device: String, parent: Option<u16>, handle: u16, delay_ms: u32 },
}

impl PlanNode {
    /// Renders the `tc` invocation that installs this node.
    pub fn command(&self) -> String {
        match self {
            Self::HtbRoot { device, handle } => {
                format!("tc qdisc add dev {device} root handle {handle}: htb default 1")
            }
            Self::HtbClass { device, parent, rate_kbit } => format!(
                "tc class add dev {device} parent {parent}: classid {parent}:1 \
                 htb rate {rate_kbit}kbit ceil {rate_kbit}kbit"
            ),
            Self::MatchAll { device, parent } => format!(
                "tc filter add dev {device} protocol ip parent {parent}: \
                 prio 1 u32 match u32 0 0 flowid {parent}:1"
            ),
            Self::Netem { device, parent: Some(parent), handle, delay_ms } => format!(
                "tc qdisc add dev {device} parent {parent}:1 handle {handle}: \
                 netem delay {delay_ms}ms"
            ),
            Self::Netem { device, parent: None, handle: _, delay_ms } => {
                format!("tc qdisc add dev {device} root netem delay {delay_ms}ms")
            }
        }
    }
}

/// The ordered set of queueing objects derived from one [`ShapingConfig`].
///
/// Derived, never persisted; owned by the planner. Install order matters:
/// roots before classes, classes before filters and nested delay nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueingPlan {
    nodes: Vec<PlanNode>,
    devices: Vec<String>,
}

impl QueueingPlan {
    /// Derives the plan for a configuration. A disabled configuration, or an
    /// enabled one at line rate with no delay, yields an empty plan: the
    /// apply degenerates to a teardown.
    pub fn build(config: &ShapingConfig) -> Self {
        let devices: Vec<String> =
            config.devices().into_iter().map(str::to_string).collect();

        if !config.enabled {
            return Self { nodes: Vec::new(), devices };
        }

        let rate_kbit = (config.bandwidth_mbps * 1000.0).round() as u64;
        let mut nodes = Vec::new();

        for (index, device) in devices.iter().enumerate() {
            let major = CLIENT_SIDE_MAJOR + index as u16;
            let netem_handle = major * NETEM_HANDLE_STEP;

            if config.has_rate_cap() {
                nodes.push(PlanNode::HtbRoot { device: device.clone(), handle: major });
                nodes.push(PlanNode::HtbClass {
                    device: device.clone(),
                    parent: major,
                    rate_kbit,
                });
                nodes.push(PlanNode::MatchAll { device: device.clone(), parent: major });
                if config.delay_ms > 0 {
                    nodes.push(PlanNode::Netem {
                        device: device.clone(),
                        parent: Some(major),
                        handle: netem_handle,
                        delay_ms: config.delay_ms,
                    });
                }
            } else if config.delay_ms > 0 {
                nodes.push(PlanNode::Netem {
                    device: device.clone(),
                    parent: None,
                    handle: netem_handle,
                    delay_ms: config.delay_ms,
                });
            }
        }

        Self { nodes, devices }
    }

    /// Whether the plan installs anything at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The devices this plan touches, client-facing first.
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Install commands, in order.
    pub fn commands(&self) -> Vec<String> {
        self.nodes.iter().map(PlanNode::command).collect()
    }

    /// Commands clearing any hierarchy previously installed on `device`.
    /// Both are expected to fail when nothing is installed; callers treat
    /// that as success.
    pub fn teardown_commands(device: &str) -> [String; 2] {
        [
            format!("tc qdisc del dev {device} root"),
            format!("tc qdisc del dev {device} ingress"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(delay_ms: u32, bandwidth_mbps: f64) -> ShapingConfig {
        ShapingConfig {
            enabled: true,
            delay_ms,
            bandwidth_mbps,
            interface_in: "enp1s0".to_string(),
            interface_out: "enp2s0".to_string(),
        }
    }

    #[test]
    fn cap_and_delay_build_full_hierarchy_per_device() {
        let plan = QueueingPlan::build(&config(100, 10.0));

        assert_eq!(
            plan.commands(),
            [
                "tc qdisc add dev enp1s0 root handle 1: htb default 1",
                "tc class add dev enp1s0 parent 1: classid 1:1 htb rate 10000kbit ceil 10000kbit",
                "tc filter add dev enp1s0 protocol ip parent 1: prio 1 u32 match u32 0 0 flowid 1:1",
                "tc qdisc add dev enp1s0 parent 1:1 handle 10: netem delay 100ms",
                "tc qdisc add dev enp2s0 root handle 2: htb default 1",
                "tc class add dev enp2s0 parent 2: classid 2:1 htb rate 10000kbit ceil 10000kbit",
                "tc filter add dev enp2s0 protocol ip parent 2: prio 1 u32 match u32 0 0 flowid 2:1",
                "tc qdisc add dev enp2s0 parent 2:1 handle 20: netem delay 100ms",
            ]
        );
    }

    #[test]
    fn delay_only_goes_directly_on_the_root() {
        let plan = QueueingPlan::build(&config(250, 1000.0));

        assert_eq!(
            plan.commands(),
            [
                "tc qdisc add dev enp1s0 root netem delay 250ms",
                "tc qdisc add dev enp2s0 root netem delay 250ms",
            ]
        );
    }

    #[test]
    fn cap_without_delay_has_no_netem_node() {
        let plan = QueueingPlan::build(&config(0, 0.5));

        let commands = plan.commands();
        assert_eq!(commands.len(), 6);
        assert!(commands.iter().all(|c| !c.contains("netem")));
        assert!(commands[1].contains("rate 500kbit ceil 500kbit"));
    }

    #[test]
    fn single_interface_collapses_both_directions() {
        let mut config = config(50, 20.0);
        config.interface_out = "enp1s0".to_string();
        let plan = QueueingPlan::build(&config);

        assert_eq!(plan.devices(), ["enp1s0"]);
        assert_eq!(plan.commands().len(), 4);
    }

    #[test]
    fn line_rate_without_delay_is_an_empty_plan() {
        let plan = QueueingPlan::build(&config(0, 1000.0));
        assert!(plan.is_empty());
        assert_eq!(plan.devices(), ["enp1s0", "enp2s0"]);
    }

    #[test]
    fn disabled_config_is_an_empty_plan() {
        let mut config = config(100, 10.0);
        config.enabled = false;
        assert!(QueueingPlan::build(&config).is_empty());
    }

    #[test]
    fn same_config_derives_the_same_plan() {
        let config = config(100, 10.0);
        assert_eq!(QueueingPlan::build(&config), QueueingPlan::build(&config));
    }

    #[test]
    fn teardown_clears_root_and_ingress() {
        assert_eq!(
            QueueingPlan::teardown_commands("enp1s0"),
            ["tc qdisc del dev enp1s0 root", "tc qdisc del dev enp1s0 ingress"]
        );
    }
}
