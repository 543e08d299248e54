//! Harness configuration loaded from TOML.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! configuration matching a stock hwsim VM.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::host::{ApDev, Host, DEFAULT_SSH_USER};
use crate::monitor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory holding wpa_supplicant per-interface control sockets.
    pub wpas_ctrl_dir: PathBuf,
    /// Directory holding hostapd per-interface control sockets.
    pub hostapd_ctrl_dir: PathBuf,
    /// Login used when reaching remote hosts over ssh.
    pub ssh_user: String,
    pub ctrl_timeout_ms: u64,
    pub monitor: MonitorConfig,
    pub regdom: RegdomTiming,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            wpas_ctrl_dir: PathBuf::from("/var/run/wpa_supplicant"),
            hostapd_ctrl_dir: PathBuf::from("/var/run/hostapd"),
            ssh_user: DEFAULT_SSH_USER.into(),
            ctrl_timeout_ms: 10_000,
            monitor: MonitorConfig::default(),
            regdom: RegdomTiming::default(),
        }
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn ctrl_timeout(&self) -> Duration {
        Duration::from_millis(self.ctrl_timeout_ms)
    }

    /// Host handle for `hostname`, using the configured ssh login.
    pub fn host(&self, hostname: Option<&str>) -> Host {
        Host::new(hostname).with_user(&self.ssh_user)
    }

    /// AP radio descriptor whose remote commands use the configured login.
    pub fn ap_dev(&self, ifname: &str, hostname: Option<&str>) -> ApDev {
        ApDev {
            hostname: hostname.map(str::to_string),
            ..ApDev::new(ifname).with_ssh_user(&self.ssh_user)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub recv_timeout_ms: u64,
    pub default_freq: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            recv_timeout_ms: monitor::MONITOR_RECV_TIMEOUT.as_millis() as u64,
            default_freq: monitor::DEFAULT_MONITOR_FREQ,
        }
    }
}

impl MonitorConfig {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

/// Retry and settle budgets for the regulatory-domain reset sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegdomTiming {
    pub poll_iterations: u32,
    pub poll_interval_ms: u64,
    /// Sleep after tearing down the throwaway country-clear network.
    pub settle_ms: u64,
    /// Sleep after `DISABLE`, `iw reg set` and scan flush commands.
    pub short_settle_ms: u64,
}

impl Default for RegdomTiming {
    fn default() -> Self {
        Self {
            poll_iterations: 10,
            poll_interval_ms: 100,
            settle_ms: 1000,
            short_settle_ms: 100,
        }
    }
}

impl RegdomTiming {
    /// No sleeping at all; used by tests driving scripted devices.
    pub fn immediate() -> Self {
        Self {
            poll_iterations: 10,
            poll_interval_ms: 0,
            settle_ms: 0,
            short_settle_ms: 0,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn short_settle(&self) -> Duration {
        Duration::from_millis(self.short_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, HarnessConfig::default());
        assert_eq!(cfg.monitor.recv_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.regdom.poll_iterations, 10);
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let cfg = HarnessConfig::from_toml_str(
            r#"
ssh_user = "tester"

[regdom]
settle_ms = 250
"#,
        )
        .unwrap();
        assert_eq!(cfg.ssh_user, "tester");
        assert_eq!(cfg.regdom.settle(), Duration::from_millis(250));
        assert_eq!(cfg.regdom.poll_interval(), Duration::from_millis(100));
        assert_eq!(cfg.wpas_ctrl_dir, PathBuf::from("/var/run/wpa_supplicant"));

        let cmd = cfg.host(Some("vm2")).command(&["iw", "reg", "get"]).unwrap();
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy()).collect();
        assert_eq!(args[0], "tester@vm2");
        assert!(cfg.host(Some("localhost")).is_local());

        let ap = cfg.ap_dev("wlan3", Some("vm2"));
        assert_eq!(ap.ssh_user, "tester");
        assert_eq!(ap.host(), cfg.host(Some("vm2")));
    }

    #[test]
    fn bad_types_are_rejected() {
        let err = HarnessConfig::from_toml_str("ctrl_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, crate::error::HarnessError::Config(_)));
    }
}
