//! Test support: a scripted [`Device`] for exercising harness helpers
//! without daemons, and a privilege probe for tests on real radios.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::process::Command;
use std::time::Duration;

use crate::ctrl::Device;
use crate::error::Result;

/// Whether this process may reconfigure wireless interfaces: effective
/// root with a working `iw`. Tests touching real radios return early when
/// this is `false`.
pub fn check_privileges() -> bool {
    let root = unsafe { libc::geteuid() } == 0;
    root && match Command::new("iw").arg("--version").output() {
        Ok(o) => o.status.success(),
        Err(_) => false,
    }
}

/// Replies to requests by longest matching prefix (default `OK`), records
/// everything it is asked to do, and serves events from an in-memory queue.
///
/// `wait_event` never blocks: the timeout is ignored and `None` is returned
/// as soon as the queue holds no matching event.
#[derive(Debug, Default)]
pub struct ScriptedDevice {
    ifname: String,
    replies: Vec<(String, String)>,
    one_shot: RefCell<HashMap<String, VecDeque<String>>>,
    triggers: Vec<(String, String)>,
    events: RefCell<VecDeque<String>>,
    requests: RefCell<Vec<String>>,
    executed: RefCell<Vec<Vec<String>>>,
}

impl ScriptedDevice {
    pub fn new(ifname: &str) -> Self {
        Self {
            ifname: ifname.to_string(),
            ..Default::default()
        }
    }

    /// Answer every request starting with `prefix` with `reply`.
    pub fn reply(mut self, prefix: &str, reply: &str) -> Self {
        self.replies.push((prefix.to_string(), reply.to_string()));
        self
    }

    /// Answer the next request starting with `prefix` with `reply`; later
    /// requests fall back to [`ScriptedDevice::reply`] rules.
    pub fn reply_once(self, prefix: &str, reply: &str) -> Self {
        self.one_shot
            .borrow_mut()
            .entry(prefix.to_string())
            .or_default()
            .push_back(reply.to_string());
        self
    }

    /// Queue `event` whenever a request starting with `prefix` is made.
    pub fn event_after(mut self, prefix: &str, event: &str) -> Self {
        self.triggers.push((prefix.to_string(), event.to_string()));
        self
    }

    pub fn push_event(&self, event: &str) {
        self.events.borrow_mut().push_back(event.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    pub fn executed(&self) -> Vec<Vec<String>> {
        self.executed.borrow().clone()
    }

    fn scripted_reply(&self, cmd: &str) -> String {
        let mut one_shot = self.one_shot.borrow_mut();
        let queued = one_shot
            .iter_mut()
            .filter(|(prefix, queue)| cmd.starts_with(prefix.as_str()) && !queue.is_empty())
            .max_by_key(|(prefix, _)| prefix.len())
            .and_then(|(_, queue)| queue.pop_front());
        if let Some(reply) = queued {
            return reply;
        }
        self.replies
            .iter()
            .filter(|(prefix, _)| cmd.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| "OK".to_string())
    }
}

impl Device for ScriptedDevice {
    fn ifname(&self) -> &str {
        &self.ifname
    }

    fn request(&self, cmd: &str) -> Result<String> {
        self.requests.borrow_mut().push(cmd.to_string());
        for (prefix, event) in &self.triggers {
            if cmd.starts_with(prefix.as_str()) {
                self.push_event(event);
            }
        }
        Ok(self.scripted_reply(cmd))
    }

    fn wait_event(&self, events: &[&str], _timeout: Duration) -> Result<Option<String>> {
        let mut queue = self.events.borrow_mut();
        while let Some(ev) = queue.pop_front() {
            if events.iter().any(|p| ev.contains(p)) {
                return Ok(Some(ev));
            }
        }
        Ok(None)
    }

    fn cmd_execute(&self, argv: &[&str]) -> Result<(i32, String)> {
        self.executed
            .borrow_mut()
            .push(argv.iter().map(|a| a.to_string()).collect());
        Ok((0, String::new()))
    }
}
