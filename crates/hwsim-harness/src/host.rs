//! Command execution on the local machine or a remote test host.

use std::process::{Command, Output, Stdio};

use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

pub const DEFAULT_SSH_USER: &str = "root";

/// A machine that commands can be run on.
///
/// A host without a hostname (or named `localhost`) runs commands directly;
/// anything else goes through `ssh <user>@<hostname>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    hostname: Option<String>,
    user: String,
}

impl Default for Host {
    fn default() -> Self {
        Self::local()
    }
}

impl Host {
    pub fn local() -> Self {
        Self {
            hostname: None,
            user: DEFAULT_SSH_USER.into(),
        }
    }

    pub fn new(hostname: Option<&str>) -> Self {
        let hostname = hostname
            .filter(|h| !h.is_empty() && *h != "localhost")
            .map(str::to_string);
        Self {
            hostname,
            ..Self::local()
        }
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn is_local(&self) -> bool {
        self.hostname.is_none()
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Build the command for `argv`, wrapped in ssh for remote hosts.
    pub fn command(&self, argv: &[&str]) -> Result<Command> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HarnessError::failure("empty command line"))?;
        let cmd = match &self.hostname {
            None => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            Some(host) => {
                let mut cmd = Command::new("ssh");
                cmd.arg(format!("{}@{}", self.user, host));
                cmd.args(argv.iter().map(|a| shell_quote(a)));
                cmd
            }
        };
        Ok(cmd)
    }

    fn output(&self, argv: &[&str]) -> Result<Output> {
        debug!(host = ?self.hostname, command = %argv.join(" "), "executing");
        Ok(self.command(argv)?.stdin(Stdio::null()).output()?)
    }

    /// Run `argv` and return the exit status and combined stdout/stderr.
    ///
    /// A process killed by a signal reports status `-1`.
    pub fn execute(&self, argv: &[&str]) -> Result<(i32, String)> {
        let output = self.output(argv)?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.code().unwrap_or(-1), text))
    }

    /// Run `argv`, turning a spawn failure or non-zero exit into an error.
    pub fn check_call(&self, argv: &[&str]) -> Result<()> {
        let output = self.output(argv)?;
        if !output.status.success() {
            return Err(HarnessError::Command {
                command: argv.join(" "),
                detail: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    /// Run `argv` best effort. Failures are logged and otherwise ignored.
    pub fn call(&self, argv: &[&str]) -> Option<i32> {
        match self.output(argv) {
            Ok(output) => {
                if !output.status.success() {
                    warn!(command = %argv.join(" "), status = %output.status, "command failed");
                }
                output.status.code()
            }
            Err(e) => {
                warn!(command = %argv.join(" "), "failed to run command: {e}");
                None
            }
        }
    }
}

/// Single-quote an argument for the remote shell ssh hands it to.
fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// An AP-side radio used by a test: interface name plus the host owning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApDev {
    pub ifname: String,
    pub hostname: Option<String>,
    /// Login used when `hostname` is remote.
    pub ssh_user: String,
}

impl ApDev {
    pub fn new(ifname: &str) -> Self {
        Self {
            ifname: ifname.to_string(),
            hostname: None,
            ssh_user: DEFAULT_SSH_USER.to_string(),
        }
    }

    pub fn on_host(ifname: &str, hostname: &str) -> Self {
        Self {
            hostname: Some(hostname.to_string()),
            ..Self::new(ifname)
        }
    }

    pub fn with_ssh_user(mut self, user: &str) -> Self {
        self.ssh_user = user.to_string();
        self
    }

    pub fn host(&self) -> Host {
        Host::new(self.hostname.as_deref()).with_user(&self.ssh_user)
    }

    /// Run a command on the host owning this radio.
    pub fn cmd_execute(&self, argv: &[&str]) -> Result<(i32, String)> {
        self.host().execute(argv)
    }
}
