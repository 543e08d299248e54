//! Scoped fault injection through the daemon's test hooks.
//!
//! Builds with `CONFIG_TESTING_OPTIONS` expose `TEST_FAIL` and
//! `TEST_ALLOC_FAIL`, which make the Nth call of a matching internal
//! function fail. A [`FaultScope`] arms those hooks for the duration of a
//! test body and checks afterwards that every armed fault actually fired.

use std::fmt;
use std::time::Duration;

use tracing::info;

use crate::ctrl::Device;
use crate::error::{HarnessError, Result};

/// Which instrumentation hook a scope drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Generic failure points (`TEST_FAIL` / `GET_FAIL`).
    Generic,
    /// Memory allocation failures (`TEST_ALLOC_FAIL` / `GET_ALLOC_FAIL`).
    Alloc,
}

impl FaultKind {
    pub fn arm_command(self) -> &'static str {
        match self {
            FaultKind::Generic => "TEST_FAIL",
            FaultKind::Alloc => "TEST_ALLOC_FAIL",
        }
    }

    pub fn query_command(self) -> &'static str {
        match self {
            FaultKind::Generic => "GET_FAIL",
            FaultKind::Alloc => "GET_ALLOC_FAIL",
        }
    }
}

/// Fail the `count`th call of the functions matched by `pattern`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultTrigger {
    pub count: u32,
    pub pattern: String,
}

impl FaultTrigger {
    pub fn new(count: u32, pattern: &str) -> Self {
        Self {
            count,
            pattern: pattern.to_string(),
        }
    }
}

impl fmt::Display for FaultTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.count, self.pattern)
    }
}

/// Armed fault-injection hooks on one device.
///
/// Finish the scope with [`FaultScope::finish`] when the body succeeded or
/// [`FaultScope::abandon`] when it failed; [`FaultScope::run`] does both.
#[must_use = "an armed fault scope must be finished or abandoned"]
pub struct FaultScope<'a, D: Device + ?Sized> {
    dev: &'a D,
    kind: FaultKind,
    triggers: Vec<FaultTrigger>,
}

impl<'a, D: Device + ?Sized> FaultScope<'a, D> {
    /// Arm `triggers` on `dev`. Skips if the daemon lacks the hook.
    pub fn arm(dev: &'a D, kind: FaultKind, triggers: Vec<FaultTrigger>) -> Result<Self> {
        if triggers.is_empty() {
            return Err(HarnessError::failure("fault scope needs at least one trigger"));
        }
        let patterns = triggers
            .iter()
            .map(FaultTrigger::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        let reply = dev.request(&format!("{} {patterns}", kind.arm_command()))?;
        if !reply.contains("OK") {
            return Err(HarnessError::skip(format!(
                "{} not supported",
                kind.arm_command()
            )));
        }
        Ok(Self {
            dev,
            kind,
            triggers,
        })
    }

    /// Pending state reported once every trigger has fired.
    pub fn expected_pending(&self) -> String {
        self.triggers
            .iter()
            .map(|t| format!("0:{}", t.pattern))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Verify that every trigger fired. If not, disarm and fail.
    pub fn finish(self) -> Result<()> {
        let pending = self.dev.request(self.kind.query_command())?;
        if pending != self.expected_pending() {
            self.dev.request(&format!("{} 0:", self.kind.arm_command()))?;
            return Err(HarnessError::failure(format!(
                "Not all failures triggered (pending: {pending})"
            )));
        }
        Ok(())
    }

    /// Log the pending state after the body failed with `err`.
    pub fn abandon(self, err: &HarnessError) {
        match self.dev.request(self.kind.query_command()) {
            Ok(pending) => info!("Pending failures at time of exception: {pending}"),
            Err(e) => info!("Could not read pending failures after `{err}`: {e}"),
        }
    }

    /// Run `body` with the hooks armed. An error from `body` is returned
    /// unchanged; only a successful body is checked for unfired faults.
    pub fn run<T>(self, body: impl FnOnce(&D) -> Result<T>) -> Result<T> {
        match body(self.dev) {
            Ok(value) => {
                self.finish()?;
                Ok(value)
            }
            Err(e) => {
                self.abandon(&e);
                Err(e)
            }
        }
    }
}

/// Run `body` with generic failure points armed.
pub fn fail_test<D, T>(
    dev: &D,
    triggers: Vec<FaultTrigger>,
    body: impl FnOnce(&D) -> Result<T>,
) -> Result<T>
where
    D: Device + ?Sized,
{
    FaultScope::arm(dev, FaultKind::Generic, triggers)?.run(body)
}

/// Run `body` with allocation failures armed.
pub fn alloc_fail<D, T>(
    dev: &D,
    triggers: Vec<FaultTrigger>,
    body: impl FnOnce(&D) -> Result<T>,
) -> Result<T>
where
    D: Device + ?Sized,
{
    FaultScope::arm(dev, FaultKind::Alloc, triggers)?.run(body)
}

pub const WAIT_FAIL_NOTE: &str = "Failure not triggered";
pub const WAIT_FAIL_MAX_ITER: u32 = 40;
pub const WAIT_FAIL_INTERVAL: Duration = Duration::from_millis(50);

/// Poll `cmd` until the reply shows the armed fault has fired (`0:`).
///
/// Fails with `note` once `max_iter` polls have come back pending. With
/// `max_iter == 0` nothing is polled and the wait succeeds.
pub fn wait_fail_trigger<D: Device + ?Sized>(
    dev: &D,
    cmd: &str,
    note: &str,
    max_iter: u32,
    interval: Duration,
) -> Result<()> {
    for i in 0..max_iter {
        if dev.request(cmd)?.starts_with("0:") {
            return Ok(());
        }
        if i + 1 == max_iter {
            return Err(HarnessError::failure(note));
        }
        std::thread::sleep(interval);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDevice;

    #[test]
    fn all_triggers_fired() {
        let dev = ScriptedDevice::new("wlan0").reply("GET_FAIL", "0:foo 0:bar");
        let out = fail_test(
            &dev,
            vec![FaultTrigger::new(1, "foo"), FaultTrigger::new(2, "bar")],
            |d| d.request("SCAN"),
        )
        .unwrap();
        assert_eq!(out, "OK");
        assert_eq!(dev.requests(), vec!["TEST_FAIL 1:foo 2:bar", "SCAN", "GET_FAIL"]);
    }

    #[test]
    fn pending_trigger_disarms_then_fails() {
        let dev = ScriptedDevice::new("wlan0").reply("GET_ALLOC_FAIL", "1:foo");
        let err = alloc_fail(&dev, vec![FaultTrigger::new(1, "foo")], |_| Ok(())).unwrap_err();
        assert!(!err.is_skip());
        assert_eq!(err.to_string(), "Not all failures triggered (pending: 1:foo)");
        assert_eq!(
            dev.requests(),
            vec!["TEST_ALLOC_FAIL 1:foo", "GET_ALLOC_FAIL", "TEST_ALLOC_FAIL 0:"]
        );
    }

    #[test]
    fn unsupported_hook_skips() {
        let dev = ScriptedDevice::new("wlan0").reply("TEST_FAIL", "UNKNOWN COMMAND");
        let err = fail_test(&dev, vec![FaultTrigger::new(1, "foo")], |_| Ok(())).unwrap_err();
        assert_eq!(err.skip_reason(), Some("TEST_FAIL not supported"));
        assert_eq!(dev.requests(), vec!["TEST_FAIL 1:foo"]);
    }

    #[test]
    fn body_error_is_not_masked() {
        let dev = ScriptedDevice::new("wlan0").reply("GET_FAIL", "1:foo");
        let err = fail_test(&dev, vec![FaultTrigger::new(1, "foo")], |_| -> Result<()> {
            Err(HarnessError::failure("connection failed"))
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "connection failed");
        // Pending state is only queried, never disarmed.
        assert_eq!(dev.requests(), vec!["TEST_FAIL 1:foo", "GET_FAIL"]);
    }

    #[test]
    fn expected_pending_format() {
        let dev = ScriptedDevice::new("wlan0");
        let scope = FaultScope::arm(
            &dev,
            FaultKind::Generic,
            vec![FaultTrigger::new(3, "wpa_sm_*"), FaultTrigger::new(1, "os_get_random")],
        )
        .unwrap();
        assert_eq!(scope.expected_pending(), "0:wpa_sm_* 0:os_get_random");
        scope.abandon(&HarnessError::failure("done"));
    }

    #[test]
    fn wait_for_trigger() {
        let dev = ScriptedDevice::new("wlan0")
            .reply_once("GET_FAIL", "1:foo")
            .reply("GET_FAIL", "0:foo");
        wait_fail_trigger(&dev, "GET_FAIL", WAIT_FAIL_NOTE, 3, Duration::ZERO).unwrap();
        assert_eq!(dev.requests().len(), 2);

        let stuck = ScriptedDevice::new("wlan0").reply("GET_FAIL", "1:foo");
        let err = wait_fail_trigger(&stuck, "GET_FAIL", WAIT_FAIL_NOTE, 3, Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.to_string(), WAIT_FAIL_NOTE);
        assert_eq!(stuck.requests().len(), 3);
    }

    #[test]
    fn zero_poll_budget_waits_for_nothing() {
        let dev = ScriptedDevice::new("wlan0").reply("GET_FAIL", "1:foo");
        wait_fail_trigger(&dev, "GET_FAIL", WAIT_FAIL_NOTE, 0, Duration::ZERO).unwrap();
        assert!(dev.requests().is_empty());
    }
}
