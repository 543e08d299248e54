//! Network interface discovery from procfs and sysfs.

use std::path::Path;

use crate::error::Result;

const PROC_NET_DEV: &str = "/proc/net/dev";
const SYS_CLASS_NET: &str = "/sys/class/net";

/// Names of all interfaces listed in `/proc/net/dev`.
pub fn get_ifnames() -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(PROC_NET_DEV)?;
    Ok(parse_proc_net_dev(&raw))
}

/// Interface names from `/proc/net/dev` content. Header lines carry no
/// `:` and are skipped.
pub fn parse_proc_net_dev(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, _)| name.trim_matches(' ').to_string())
        .collect()
}

/// Whether `ifname` is a port of `bridge`.
pub fn iface_is_in_bridge(bridge: &str, ifname: &str) -> bool {
    iface_is_in_bridge_at(Path::new(SYS_CLASS_NET), bridge, ifname)
}

/// [`iface_is_in_bridge`] against an arbitrary `class/net` directory.
///
/// `<root>/<ifname>/brport/bridge` must resolve to an existing path, must
/// itself be a symlink, and its target's last component must be `bridge`.
pub fn iface_is_in_bridge_at(sys_class_net: &Path, bridge: &str, ifname: &str) -> bool {
    let link = sys_class_net.join(ifname).join("brport").join("bridge");
    if !link.exists() {
        return false;
    }
    let is_symlink = std::fs::symlink_metadata(&link)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if !is_symlink {
        return false;
    }
    std::fs::read_link(&link)
        .ok()
        .and_then(|target| target.file_name().map(|n| n == bridge))
        .unwrap_or(false)
}
