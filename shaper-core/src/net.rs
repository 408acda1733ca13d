//! Network interface inventory.
//!
//! Enumerates physical interfaces with their link state, speed, MTU and
//! addresses. Read by the control surface and used by the planner to check
//! that shaping targets exist.

use std::path::Path;

use pnet::datalink::NetworkInterface;
use serde::Serialize;

/// Snapshot of one network interface.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceDetails {
    pub name: String,
    pub mac: Option<String>,
    /// Assigned networks in CIDR form.
    pub addresses: Vec<String>,
    pub is_up: bool,
    pub mtu: Option<u32>,
    /// Link speed in Mbps, when the driver reports one.
    pub speed_mbps: Option<u32>,
    pub oper_state: String,
}

/// Enumerates all interfaces except loopback.
pub fn interfaces() -> Vec<InterfaceDetails> {
    collect(pnet::datalink::interfaces())
}

/// Names of all non-loopback interfaces; the planner's existence check.
pub fn interface_names() -> Vec<String> {
    interfaces().into_iter().map(|iface| iface.name).collect()
}

fn collect(list: Vec<NetworkInterface>) -> Vec<InterfaceDetails> {
    list.into_iter().filter(|iface| !iface.is_loopback()).map(details).collect()
}

fn details(iface: NetworkInterface) -> InterfaceDetails {
    InterfaceDetails {
        mac: iface.mac.map(|mac| mac.to_string()),
        addresses: iface.ips.iter().map(|ip| ip.to_string()).collect(),
        is_up: iface.is_up(),
        mtu: sys_attr(&iface.name, "mtu").and_then(|value| value.parse().ok()),
        // The kernel reports -1 for links without a negotiated speed; the
        // failed parse maps those to None.
        speed_mbps: sys_attr(&iface.name, "speed").and_then(|value| value.parse().ok()),
        oper_state: sys_attr(&iface.name, "operstate")
            .unwrap_or_else(|| "unknown".to_string()),
        name: iface.name,
    }
}

/// Reads a single attribute from `/sys/class/net/<name>/<attr>`.
fn sys_attr(name: &str, attr: &str) -> Option<String> {
    let path = Path::new("/sys/class/net").join(name).join(attr);
    std::fs::read_to_string(path).ok().map(|raw| raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const IFF_UP: u32 = 0x1;
    const IFF_LOOPBACK: u32 = 0x8;

    fn iface(name: &str, flags: u32) -> NetworkInterface {
        NetworkInterface {
            name: name.to_string(),
            description: String::new(),
            index: 0,
            mac: None,
            ips: Vec::new(),
            flags,
        }
    }

    #[test]
    fn loopback_is_excluded() {
        let details = collect(vec![
            iface("lo", IFF_UP | IFF_LOOPBACK),
            iface("enp1s0", IFF_UP),
            iface("enp2s0", 0),
        ]);

        let names: Vec<&str> = details.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["enp1s0", "enp2s0"]);
    }

    #[test]
    fn link_flags_map_to_up_state() {
        let details = collect(vec![iface("enp1s0", IFF_UP), iface("enp2s0", 0)]);
        assert!(details[0].is_up);
        assert!(!details[1].is_up);
    }
}
