//! Control-interface clients for wpa_supplicant and hostapd.
//!
//! [`Device`] is the request/response/event surface every helper in this
//! crate is written against. Two implementations exist: [`CtrlDevice`]
//! talks to a daemon on this machine over its Unix datagram control socket,
//! [`RemoteDevice`] drives `wpa_cli`/`hostapd_cli` on another host over ssh.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::debug;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::host::Host;

/// How long [`Device::scan`] waits for scan results.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(15);
/// How long [`Device::connect`] waits for `CTRL-EVENT-CONNECTED`.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default wait for `CTRL-EVENT-DISCONNECTED`.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Network parameters whose values must be sent as quoted strings.
const QUOTED_NETWORK_FIELDS: &[&str] = &["ssid", "psk", "identity", "password"];

/// A wpa_supplicant or hostapd instance under test.
///
/// Implementors provide the four transport primitives; everything else is
/// built on top of them.
pub trait Device {
    fn ifname(&self) -> &str;

    /// Send a control command and return the daemon's reply.
    fn request(&self, cmd: &str) -> Result<String>;

    /// Wait up to `timeout` for an event containing any of `events`.
    ///
    /// Events that match nothing are consumed and dropped. A zero timeout
    /// only looks at events already queued. An empty pattern matches any
    /// event.
    fn wait_event(&self, events: &[&str], timeout: Duration) -> Result<Option<String>>;

    /// Run a command on the host this daemon lives on.
    fn cmd_execute(&self, argv: &[&str]) -> Result<(i32, String)>;

    /// Tokens reported by `GET_CAPABILITY <field>`, or `None` if the daemon
    /// does not know the field.
    fn get_capability(&self, field: &str) -> Result<Option<Vec<String>>> {
        let res = self.request(&format!("GET_CAPABILITY {field}"))?;
        if res.contains("FAIL") {
            return Ok(None);
        }
        Ok(Some(res.split_whitespace().map(str::to_string).collect()))
    }

    fn get_driver_status(&self) -> Result<BTreeMap<String, String>> {
        let res = self.request("STATUS-DRIVER")?;
        Ok(res
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    fn get_driver_status_field(&self, field: &str) -> Result<Option<String>> {
        Ok(self.get_driver_status()?.remove(field))
    }

    /// Drop every queued event. Returns how many were discarded.
    fn dump_monitor(&self) -> Result<usize> {
        let mut count = 0;
        while self.wait_event(&[""], Duration::ZERO)?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    fn disconnect_and_stop_scan(&self) -> Result<()> {
        self.request("DISCONNECT")?;
        let res = self.request("ABORT_SCAN")?;
        if res.contains("OK") {
            self.wait_event(
                &["CTRL-EVENT-SCAN-RESULTS", "CTRL-EVENT-SCAN-FAILED"],
                Duration::from_millis(500),
            )?;
        }
        self.dump_monitor()?;
        Ok(())
    }

    /// Trigger a scan limited to `freq` and wait for its results.
    fn scan(&self, freq: u32, only_new: bool) -> Result<()> {
        let mut cmd = format!("SCAN TYPE=ONLY freq={freq}");
        if only_new {
            cmd.push_str(" only_new=1");
        }
        let res = self.request(&cmd)?;
        if !res.contains("OK") {
            return Err(HarnessError::failure(format!(
                "Failed to trigger scan: {}",
                res.trim()
            )));
        }
        self.wait_event(&["CTRL-EVENT-SCAN-RESULTS"], SCAN_TIMEOUT)?
            .ok_or_else(|| HarnessError::failure("Scan timed out"))?;
        Ok(())
    }

    /// Empty the BSS table, forcing a fresh scan so nothing cached survives.
    fn flush_scan_cache(&self) -> Result<()> {
        self.request("BSS_FLUSH 0")?;
        self.scan(2417, true)?;
        let res = self.request("SCAN_RESULTS")?;
        if res.lines().count() > 1 {
            debug!(
                ifname = self.ifname(),
                "scan results remaining after first flush:\n{res}"
            );
            self.request("BSS_FLUSH 0")?;
            self.scan(2422, true)?;
            let res = self.request("SCAN_RESULTS")?;
            if res.lines().count() > 1 {
                debug!(ifname = self.ifname(), "scan results still remaining:\n{res}");
            }
        }
        Ok(())
    }

    fn add_network(&self) -> Result<u32> {
        let res = self.request("ADD_NETWORK")?;
        res.trim()
            .parse()
            .map_err(|_| HarnessError::failure(format!("ADD_NETWORK failed: {}", res.trim())))
    }

    fn set_network(&self, id: u32, field: &str, value: &str) -> Result<()> {
        let res = self.request(&format!("SET_NETWORK {id} {field} {value}"))?;
        if !res.contains("OK") {
            return Err(HarnessError::failure(format!(
                "SET_NETWORK {id} {field} failed: {}",
                res.trim()
            )));
        }
        Ok(())
    }

    fn set_network_quoted(&self, id: u32, field: &str, value: &str) -> Result<()> {
        self.set_network(id, field, &format!("\"{value}\""))
    }

    fn select_network(&self, id: u32) -> Result<()> {
        let res = self.request(&format!("SELECT_NETWORK {id}"))?;
        if !res.contains("OK") {
            return Err(HarnessError::failure(format!(
                "SELECT_NETWORK {id} failed: {}",
                res.trim()
            )));
        }
        Ok(())
    }

    /// Add a network for `ssid` with `params`, select it and wait for the
    /// association to complete. Returns the network id.
    fn connect(&self, ssid: &str, params: &[(&str, &str)]) -> Result<u32> {
        let id = self.add_network()?;
        self.set_network_quoted(id, "ssid", ssid)?;
        for (field, value) in params {
            if QUOTED_NETWORK_FIELDS.contains(field) {
                self.set_network_quoted(id, field, value)?;
            } else {
                self.set_network(id, field, value)?;
            }
        }
        self.select_network(id)?;
        self.wait_event(&["CTRL-EVENT-CONNECTED"], CONNECT_TIMEOUT)?
            .ok_or_else(|| HarnessError::failure("Association with the AP timed out"))?;
        Ok(id)
    }

    fn wait_disconnected(&self, timeout: Duration) -> Result<String> {
        self.wait_event(&["CTRL-EVENT-DISCONNECTED"], timeout)?
            .ok_or_else(|| HarnessError::failure("Disconnection event timed out"))
    }
}

impl<D: Device + ?Sized> Device for &D {
    fn ifname(&self) -> &str {
        (**self).ifname()
    }
    fn request(&self, cmd: &str) -> Result<String> {
        (**self).request(cmd)
    }
    fn wait_event(&self, events: &[&str], timeout: Duration) -> Result<Option<String>> {
        (**self).wait_event(events, timeout)
    }
    fn cmd_execute(&self, argv: &[&str]) -> Result<(i32, String)> {
        (**self).cmd_execute(argv)
    }
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn ifname(&self) -> &str {
        (**self).ifname()
    }
    fn request(&self, cmd: &str) -> Result<String> {
        (**self).request(cmd)
    }
    fn wait_event(&self, events: &[&str], timeout: Duration) -> Result<Option<String>> {
        (**self).wait_event(events, timeout)
    }
    fn cmd_execute(&self, argv: &[&str]) -> Result<(i32, String)> {
        (**self).cmd_execute(argv)
    }
}

/// Strip the `<N>` priority prefix from an unsolicited control message.
pub fn strip_event_priority(msg: &str) -> &str {
    if msg.starts_with('<') {
        if let Some(end) = msg.find('>') {
            return &msg[end + 1..];
        }
    }
    msg
}

fn matches_any(event: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| event.contains(p))
}

// ── Local control socket ────────────────────────────────────────────

static LOCAL_SOCKET_SEQ: AtomicU32 = AtomicU32::new(0);

fn local_socket_path(ifname: &str) -> PathBuf {
    let seq = LOCAL_SOCKET_SEQ.fetch_add(1, Ordering::Relaxed);
    let iface: String = ifname.chars().take(16).collect();
    std::env::temp_dir().join(format!(
        "hwsim_ctrl_{}_{}_{}",
        iface,
        std::process::id(),
        seq
    ))
}

/// A datagram socket bound to a private path and connected to a daemon's
/// control socket. The private path is removed on drop.
struct CtrlSocket {
    sock: UnixDatagram,
    local: PathBuf,
}

impl CtrlSocket {
    fn connect(ctrl_path: &Path, ifname: &str) -> Result<Self> {
        let local = local_socket_path(ifname);
        let _ = std::fs::remove_file(&local);
        let sock = UnixDatagram::bind(&local)?;
        // Keep the path owned before connecting so a failure still cleans up.
        let this = Self { sock, local };
        this.sock.connect(ctrl_path).map_err(|e| {
            HarnessError::Ctrl(format!(
                "cannot connect to {}: {e}",
                ctrl_path.display()
            ))
        })?;
        Ok(this)
    }

    fn send(&self, cmd: &str) -> Result<()> {
        self.sock.send(cmd.as_bytes())?;
        Ok(())
    }

    /// Receive one datagram, or `None` if nothing arrives within `timeout`.
    fn recv(&self, timeout: Duration) -> Result<Option<String>> {
        let mut buf = vec![0u8; 8192];
        let res = if timeout.is_zero() {
            self.sock.set_nonblocking(true)?;
            let res = self.sock.recv(&mut buf);
            self.sock.set_nonblocking(false)?;
            res
        } else {
            self.sock.set_read_timeout(Some(timeout))?;
            self.sock.recv(&mut buf)
        };
        match res {
            Ok(n) => Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned())),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for CtrlSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.local);
    }
}

/// A daemon on this machine reached through its control socket.
///
/// Holds two sockets: one for request/reply and one attached for events.
pub struct CtrlDevice {
    ifname: String,
    ctrl_path: PathBuf,
    host: Host,
    cmd: CtrlSocket,
    mon: CtrlSocket,
    timeout: Duration,
}

impl CtrlDevice {
    pub fn open(ifname: &str, ctrl_path: &Path, timeout: Duration) -> Result<Self> {
        if !ctrl_path.exists() {
            return Err(HarnessError::Ctrl(format!(
                "control socket {} not found; is the daemon running on {ifname}?",
                ctrl_path.display()
            )));
        }
        let cmd = CtrlSocket::connect(ctrl_path, ifname)?;
        let mon = CtrlSocket::connect(ctrl_path, ifname)?;
        let dev = Self {
            ifname: ifname.to_string(),
            ctrl_path: ctrl_path.to_path_buf(),
            host: Host::local(),
            cmd,
            mon,
            timeout,
        };
        dev.mon.send("ATTACH")?;
        match dev.mon.recv(timeout)? {
            Some(reply) if reply.starts_with("OK") => {}
            other => {
                return Err(HarnessError::Ctrl(format!(
                    "ATTACH to {} failed: {other:?}",
                    ctrl_path.display()
                )));
            }
        }
        debug!(ifname, path = %ctrl_path.display(), "control interface attached");
        Ok(dev)
    }

    pub fn wpa_supplicant(ifname: &str, cfg: &HarnessConfig) -> Result<Self> {
        Self::open(ifname, &cfg.wpas_ctrl_dir.join(ifname), cfg.ctrl_timeout())
    }

    pub fn hostapd(ifname: &str, cfg: &HarnessConfig) -> Result<Self> {
        Self::open(ifname, &cfg.hostapd_ctrl_dir.join(ifname), cfg.ctrl_timeout())
    }

    pub fn ctrl_path(&self) -> &Path {
        &self.ctrl_path
    }
}

impl Device for CtrlDevice {
    fn ifname(&self) -> &str {
        &self.ifname
    }

    fn request(&self, cmd: &str) -> Result<String> {
        debug!(ifname = %self.ifname, cmd, "ctrl request");
        self.cmd.send(cmd)?;
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.cmd.recv(remaining)? {
                // Unsolicited messages never belong to a request.
                Some(reply) if reply.starts_with('<') => continue,
                Some(reply) => return Ok(reply),
                None => {
                    return Err(HarnessError::Ctrl(format!(
                        "timeout waiting for reply to {cmd} on {}",
                        self.ifname
                    )));
                }
            }
        }
    }

    fn wait_event(&self, events: &[&str], timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(msg) = self.mon.recv(remaining)? else {
                return Ok(None);
            };
            let ev = strip_event_priority(&msg);
            if matches_any(ev, events) {
                return Ok(Some(ev.to_string()));
            }
        }
    }

    fn cmd_execute(&self, argv: &[&str]) -> Result<(i32, String)> {
        self.host.execute(argv)
    }
}

impl Drop for CtrlDevice {
    fn drop(&mut self) {
        let _ = self.mon.send("DETACH");
    }
}

// ── Remote host over ssh ────────────────────────────────────────────

/// Which command-line client drives a [`RemoteDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlClient {
    WpaCli,
    HostapdCli,
}

impl CtrlClient {
    pub fn program(self) -> &'static str {
        match self {
            CtrlClient::WpaCli => "wpa_cli",
            CtrlClient::HostapdCli => "hostapd_cli",
        }
    }

    /// Client invocation for one control command on `ifname`. `raw` hands
    /// the command to the daemon verbatim, including commands the client
    /// has no entry for (`TEST_FAIL`, `STATUS-DRIVER`).
    pub fn request_argv<'a>(self, ifname: &'a str, cmd: &'a str) -> [&'a str; 5] {
        [self.program(), "-i", ifname, "raw", cmd]
    }
}

/// A daemon on another host driven through its command-line client.
///
/// Requests run one client invocation each; events come from a long-lived
/// interactive client whose output is read on a background thread.
pub struct RemoteDevice {
    ifname: String,
    host: Host,
    client: CtrlClient,
    events: Receiver<String>,
    monitor: Child,
}

impl RemoteDevice {
    pub fn new(host: Host, client: CtrlClient, ifname: &str) -> Result<Self> {
        let mut monitor = host
            .command(&[client.program(), "-i", ifname])?
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = monitor
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Ctrl("monitor client has no stdout".into()))?;

        let (tx, rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name(format!("{}-{ifname}", client.program()))
            .spawn(move || {
                for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                    if let Some(ev) = parse_cli_event(&line) {
                        if tx.send(ev.to_string()).is_err() {
                            break;
                        }
                    }
                }
            })?;

        debug!(host = ?host.hostname(), ifname, "remote monitor started");
        Ok(Self {
            ifname: ifname.to_string(),
            host,
            client,
            events: rx,
            monitor,
        })
    }

    pub fn host(&self) -> &Host {
        &self.host
    }
}

/// Extract the event text from a line printed by an interactive client.
///
/// Lines look like `<3>CTRL-EVENT-CONNECTED ...`, possibly preceded by a
/// carriage return and the `> ` prompt. Anything else is not an event.
pub fn parse_cli_event(line: &str) -> Option<&str> {
    let line = line.trim_start_matches(['\r', '>', ' ']);
    let rest = line.strip_prefix('<')?;
    let end = rest.find('>')?;
    if end == 0 || !rest[..end].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(rest[end + 1..].trim_end())
}

impl Device for RemoteDevice {
    fn ifname(&self) -> &str {
        &self.ifname
    }

    fn request(&self, cmd: &str) -> Result<String> {
        let argv = self.client.request_argv(&self.ifname, cmd);
        let (status, out) = self.host.execute(&argv)?;
        if status != 0 {
            return Err(HarnessError::Ctrl(format!(
                "{} {cmd} exited with {status}: {}",
                self.client.program(),
                out.trim()
            )));
        }
        Ok(out.trim_end_matches('\n').to_string())
    }

    fn wait_event(&self, events: &[&str], timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let ev = if remaining.is_zero() {
                match self.events.try_recv() {
                    Ok(ev) => ev,
                    Err(TryRecvError::Empty) => return Ok(None),
                    Err(TryRecvError::Disconnected) => return Err(monitor_gone(&self.ifname)),
                }
            } else {
                match self.events.recv_timeout(remaining) {
                    Ok(ev) => ev,
                    Err(RecvTimeoutError::Timeout) => return Ok(None),
                    Err(RecvTimeoutError::Disconnected) => return Err(monitor_gone(&self.ifname)),
                }
            };
            if matches_any(&ev, events) {
                return Ok(Some(ev));
            }
        }
    }

    fn cmd_execute(&self, argv: &[&str]) -> Result<(i32, String)> {
        self.host.execute(argv)
    }
}

fn monitor_gone(ifname: &str) -> HarnessError {
    HarnessError::Ctrl(format!("event monitor for {ifname} exited"))
}

impl Drop for RemoteDevice {
    fn drop(&mut self) {
        let _ = self.monitor.kill();
        let _ = self.monitor.wait();
    }
}
