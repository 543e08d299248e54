//! Helpers for integration tests that drive wpa_supplicant and hostapd on
//! mac80211_hwsim radios.
//!
//! Provides capability-gated skips, scoped fault injection, information
//! element parsing, regulatory domain reset, monitor-mode sockets and
//! wrappers that run a test with system state temporarily changed.

pub mod capability;
pub mod config;
pub mod ctrl;
pub mod error;
pub mod fault;
pub mod host;
pub mod ie;
pub mod monitor;
pub mod netif;
pub mod regdom;
pub mod sysctl;
pub mod testcase;
pub mod testing;
pub mod util;

pub use ctrl::{CtrlDevice, Device, RemoteDevice};
pub use error::{HarnessError, Result};
pub use host::{ApDev, Host};
