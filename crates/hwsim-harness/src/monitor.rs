//! Monitor-mode capture and injection through an `AF_PACKET` socket.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::host::Host;

pub const DEFAULT_MONITOR_FREQ: u32 = 2412;
pub const MONITOR_RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Radiotap present bits: flags (1), RX flags (14), TX flags (15).
const RADIOTAP_PRESENT: u32 = 0x0000_c002;
const RADIOTAP_LEN: u16 = 14;

/// Minimal radiotap header for injecting frames on a monitor interface.
///
/// Layout: version, pad, length (LE u16), present bitmap (LE u32), then
/// the flags byte (`0x08`), a pad byte, RX flags and TX flags (LE u16 each).
pub fn radiotap_build() -> [u8; RADIOTAP_LEN as usize] {
    let mut hdr = [0u8; RADIOTAP_LEN as usize];
    hdr[2..4].copy_from_slice(&RADIOTAP_LEN.to_le_bytes());
    hdr[4..8].copy_from_slice(&RADIOTAP_PRESENT.to_le_bytes());
    hdr[8] = 0x08;
    hdr
}

/// Raw packet socket bound to one interface, receiving every protocol.
#[derive(Debug)]
pub struct MonitorSocket {
    fd: OwnedFd,
    ifname: String,
}

impl MonitorSocket {
    pub fn open(ifname: &str, recv_timeout: Duration) -> Result<Self> {
        let c_name = CString::new(ifname)
            .map_err(|_| HarnessError::failure(format!("bad interface name {ifname:?}")))?;
        let ifindex = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
        if ifindex == 0 {
            return Err(io::Error::last_os_error().into());
        }

        let proto = (libc::ETH_P_ALL as u16).to_be();
        let raw = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, proto as libc::c_int) };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = proto;
        addr.sll_ifindex = ifindex as libc::c_int;
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let tv = libc::timeval {
            tv_sec: recv_timeout.as_secs() as libc::time_t,
            tv_usec: recv_timeout.subsec_micros() as libc::suseconds_t,
        };
        let ret = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }

        debug!(ifname, ifindex, "monitor socket bound");
        Ok(Self {
            fd,
            ifname: ifname.to_string(),
        })
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    /// Receive one frame. `None` means the receive timeout expired.
    pub fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Ok(None),
                _ => Err(err.into()),
            };
        }
        Ok(Some(n as usize))
    }

    /// Send a frame that already carries its radiotap header.
    pub fn send(&self, frame: &[u8]) -> Result<usize> {
        let n = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(n as usize)
    }
}

impl AsRawFd for MonitorSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Put `ifname` in monitor mode on `freq` and open a capture socket on it.
///
/// Switching the type and channel must succeed; bringing the link up is
/// best effort since it may already be up.
pub fn start_monitor(ifname: &str, freq: u32) -> Result<MonitorSocket> {
    start_monitor_with_timeout(ifname, freq, MONITOR_RECV_TIMEOUT)
}

pub fn start_monitor_with_timeout(
    ifname: &str,
    freq: u32,
    recv_timeout: Duration,
) -> Result<MonitorSocket> {
    let host = Host::local();
    host.check_call(&["iw", ifname, "set", "type", "monitor"])?;
    host.call(&["ip", "link", "set", "dev", ifname, "up"]);
    host.check_call(&["iw", ifname, "set", "freq", &freq.to_string()])?;
    MonitorSocket::open(ifname, recv_timeout)
}

/// Take `ifname` down and back to managed mode. Failures are ignored.
pub fn stop_monitor(ifname: &str) {
    let host = Host::local();
    host.call(&["ip", "link", "set", "dev", ifname, "down"]);
    host.call(&["iw", ifname, "set", "type", "managed"]);
}

/// A monitor socket whose interface is restored to managed mode on drop.
#[derive(Debug)]
pub struct MonitorSession {
    sock: MonitorSocket,
}

impl MonitorSession {
    /// Like [`start_monitor`], but a failure part way through also restores
    /// the interface.
    pub fn start(ifname: &str, freq: u32, recv_timeout: Duration) -> Result<Self> {
        match start_monitor_with_timeout(ifname, freq, recv_timeout) {
            Ok(sock) => Ok(Self { sock }),
            Err(e) => {
                stop_monitor(ifname);
                Err(e)
            }
        }
    }

    pub fn socket(&self) -> &MonitorSocket {
        &self.sock
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        stop_monitor(&self.sock.ifname);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radiotap_header_bytes() {
        assert_eq!(
            radiotap_build(),
            [0x00, 0x00, 0x0e, 0x00, 0x02, 0xc0, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn open_rejects_unknown_interface() {
        assert!(MonitorSocket::open("hwsim-nope0", MONITOR_RECV_TIMEOUT).is_err());
        assert!(MonitorSocket::open("bad\0name", MONITOR_RECV_TIMEOUT).is_err());
    }
}
