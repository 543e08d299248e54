//! Kernel parameter writes and scoped overrides.

use std::process::{Command, Stdio};

use tracing::warn;

pub const IPV6_DISABLE_ALL: &str = "net.ipv6.conf.all.disable_ipv6";
pub const IPV6_DISABLE_DEFAULT: &str = "net.ipv6.conf.default.disable_ipv6";

/// Applies `name=value` kernel parameter assignments.
pub trait Sysctl {
    fn write(&self, assignment: &str);
}

/// Writes through `sysctl -w`, ignoring failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSysctl;

impl Sysctl for CommandSysctl {
    fn write(&self, assignment: &str) {
        let status = Command::new("sysctl")
            .args(["-w", assignment])
            .stdout(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => {}
            Ok(s) => warn!(assignment, status = %s, "sysctl write failed"),
            Err(e) => warn!(assignment, "failed to run sysctl: {e}"),
        }
    }
}

/// IPv6 disabled system-wide for as long as this value lives.
pub struct Ipv6Disabled<'a> {
    sysctl: &'a dyn Sysctl,
}

impl<'a> Ipv6Disabled<'a> {
    pub fn new(sysctl: &'a dyn Sysctl) -> Self {
        sysctl.write(&format!("{IPV6_DISABLE_ALL}=1"));
        sysctl.write(&format!("{IPV6_DISABLE_DEFAULT}=1"));
        Self { sysctl }
    }
}

impl Drop for Ipv6Disabled<'_> {
    fn drop(&mut self) {
        self.sysctl.write(&format!("{IPV6_DISABLE_ALL}=0"));
        self.sysctl.write(&format!("{IPV6_DISABLE_DEFAULT}=0"));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records assignments instead of applying them.
    #[derive(Default)]
    pub(crate) struct RecordingSysctl {
        pub(crate) writes: Mutex<Vec<String>>,
    }

    impl RecordingSysctl {
        pub(crate) fn writes(&self) -> Vec<String> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl Sysctl for RecordingSysctl {
        fn write(&self, assignment: &str) {
            self.writes.lock().unwrap().push(assignment.to_string());
        }
    }

    #[test]
    fn guard_restores_on_drop() {
        let sysctl = RecordingSysctl::default();
        {
            let _guard = Ipv6Disabled::new(&sysctl);
            assert_eq!(
                sysctl.writes(),
                vec![
                    "net.ipv6.conf.all.disable_ipv6=1",
                    "net.ipv6.conf.default.disable_ipv6=1"
                ]
            );
        }
        assert_eq!(
            &sysctl.writes()[2..],
            &[
                "net.ipv6.conf.all.disable_ipv6=0",
                "net.ipv6.conf.default.disable_ipv6=0"
            ]
        );
    }
}
