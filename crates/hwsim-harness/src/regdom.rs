//! Regulatory domain inspection and reset.
//!
//! Tests that change the country code must put the world domain (`00`)
//! back before the next test runs, otherwise channel availability leaks
//! between tests.

use std::thread::sleep;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::config::RegdomTiming;
use crate::ctrl::Device;
use crate::error::{HarnessError, Result};
use crate::host::{ApDev, Host};

pub const WORLD_REGDOM: &str = "00";
const REGDOM_CHANGE_EVENT: &str = "CTRL-EVENT-REGDOM-CHANGE";
const COUNTRY_CLEAR_SSID: &str = "country-clear";
const COUNTRY_CLEAR_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Start of a rule line in `iw reg get` output: `(lo - hi`.
static REG_RULE_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\((\d+)\s*-\s*(\d+)").expect("static regex"));

fn iw_reg_get() -> Result<String> {
    let (_, out) = Host::local().execute(&["iw", "reg", "get"])?;
    Ok(out)
}

/// Whether any rule allows 80 or 160 MHz channels.
pub fn reg_allows_vht(reg: &str) -> bool {
    reg.contains("@ 80)") || reg.contains("@ 160)")
}

pub fn reg_allows_eht_320(reg: &str) -> bool {
    reg.contains("@ 320)")
}

/// Whether any rule's frequency range (MHz) contains `freq`.
pub fn reg_covers_freq(reg: &str, freq: u32) -> bool {
    reg.lines().any(|rule| {
        REG_RULE_RANGE.captures(rule).is_some_and(|caps| {
            let lo = caps[1].parse::<u64>().unwrap_or(u64::MAX);
            let hi = caps[2].parse::<u64>().unwrap_or(0);
            lo <= freq as u64 && freq as u64 <= hi
        })
    })
}

pub fn vht_supported() -> Result<bool> {
    Ok(reg_allows_vht(&iw_reg_get()?))
}

pub fn eht_320mhz_supported() -> Result<bool> {
    Ok(reg_allows_eht_320(&iw_reg_get()?))
}

pub const HE_6GHZ_DEFAULT_FREQ: u32 = 5975;

pub fn he_6ghz_supported(freq: u32) -> Result<bool> {
    Ok(reg_covers_freq(&iw_reg_get()?, freq))
}

/// `phy<N>` from the `wiphy N` line of `iw dev <if> info`.
pub fn parse_wiphy(info: &str) -> Option<String> {
    info.lines()
        .find(|line| line.contains("wiphy"))
        .and_then(|line| line.split_whitespace().nth(1))
        .map(|idx| format!("phy{idx}"))
}

/// The wiphy behind `ifname` (default: the AP's own interface).
///
/// Falls back to `phy3` when `iw` prints no wiphy line.
pub fn get_phy(ap: &ApDev, ifname: Option<&str>) -> Result<String> {
    let ifname = ifname.unwrap_or(&ap.ifname);
    let (status, out) = ap.host().execute(&["iw", "dev", ifname, "info"])?;
    if status != 0 {
        return Err(HarnessError::failure(format!("iw {ifname} info failed")));
    }
    Ok(parse_wiphy(&out).unwrap_or_else(|| "phy3".to_string()))
}

/// Drain regdom change events until one polling interval passes quietly.
pub fn wait_regdom_changes<D: Device + ?Sized>(dev: &D, timing: &RegdomTiming) -> Result<()> {
    for _ in 0..timing.poll_iterations {
        if dev
            .wait_event(&[REGDOM_CHANGE_EVENT], timing.poll_interval())?
            .is_none()
        {
            break;
        }
    }
    Ok(())
}

pub fn disable_hapd(hapd: Option<&dyn Device>, timing: &RegdomTiming) -> Result<()> {
    if let Some(hapd) = hapd {
        hapd.request("DISABLE")?;
        sleep(timing.short_settle());
    }
    Ok(())
}

/// Force the kernel to drop a sticky country hint.
///
/// `devs[1]` starts an open AP on 2412 MHz and `devs[0]` associates with
/// it and disconnects again; the association makes cfg80211 reprocess the
/// regulatory hints.
pub fn clear_country<D: Device>(devs: &[D], timing: &RegdomTiming) -> Result<()> {
    let [dev0, dev1, ..] = devs else {
        return Err(HarnessError::failure("clearing the country needs two devices"));
    };
    info!("Try to clear country");
    let id = dev1.add_network()?;
    dev1.set_network(id, "mode", "2")?;
    dev1.set_network_quoted(id, "ssid", COUNTRY_CLEAR_SSID)?;
    dev1.set_network(id, "key_mgmt", "NONE")?;
    dev1.set_network(id, "frequency", "2412")?;
    dev1.set_network(id, "scan_freq", "2412")?;
    dev1.select_network(id)?;
    if dev1
        .wait_event(&["CTRL-EVENT-CONNECTED"], COUNTRY_CLEAR_CONNECT_TIMEOUT)?
        .is_some()
    {
        dev0.connect(
            COUNTRY_CLEAR_SSID,
            &[("key_mgmt", "NONE"), ("scan_freq", "2412")],
        )?;
        dev1.request("DISCONNECT")?;
        dev0.wait_disconnected(crate::ctrl::DISCONNECT_TIMEOUT)?;
        dev0.request("DISCONNECT")?;
        dev0.request("ABORT_SCAN")?;
        sleep(timing.settle());
        dev0.dump_monitor()?;
        dev1.dump_monitor()?;
    }
    Ok(())
}

/// Disable the AP (if any) and reset the first `count` stations to the
/// world regulatory domain.
pub fn clear_regdom<D: Device>(
    hapd: Option<&dyn Device>,
    devs: &[D],
    count: usize,
    timing: &RegdomTiming,
) -> Result<()> {
    disable_hapd(hapd, timing)?;
    clear_regdom_dev(devs, count, timing)
}

pub fn clear_regdom_dev<D: Device>(devs: &[D], count: usize, timing: &RegdomTiming) -> Result<()> {
    if devs.is_empty() || count > devs.len() {
        return Err(HarnessError::failure(format!(
            "regdom reset for {count} devices but {} available",
            devs.len()
        )));
    }
    let active = &devs[..count];
    for dev in active {
        dev.request("DISCONNECT")?;
    }
    for dev in active {
        dev.disconnect_and_stop_scan()?;
    }
    devs[0].cmd_execute(&["iw", "reg", "set", WORLD_REGDOM])?;
    wait_regdom_changes(&devs[0], timing)?;
    let country = devs[0]
        .get_driver_status_field("country")?
        .unwrap_or_default();
    info!("Country code at the end: {country}");
    if country != WORLD_REGDOM {
        clear_country(devs, timing)?;
    }
    for dev in active {
        dev.flush_scan_cache()?;
    }
    Ok(())
}

/// Set the world regulatory domain on each given radio host.
pub fn set_world_reg(
    apdev0: Option<&ApDev>,
    apdev1: Option<&ApDev>,
    dev0: Option<&dyn Device>,
    timing: &RegdomTiming,
) -> Result<()> {
    let argv = ["iw", "reg", "set", WORLD_REGDOM];
    for ap in [apdev0, apdev1].into_iter().flatten() {
        ap.cmd_execute(&argv)?;
    }
    if let Some(dev) = dev0 {
        dev.cmd_execute(&argv)?;
    }
    sleep(timing.short_settle());
    Ok(())
}

/// Flush cfg80211's BSS cache for the AP's radio with a flushing scan.
pub fn clear_scan_cache(apdev: &ApDev, timing: &RegdomTiming) -> Result<()> {
    let ifname = apdev.ifname.as_str();
    apdev.cmd_execute(&["ifconfig", ifname, "up"])?;
    apdev.cmd_execute(&["iw", ifname, "scan", "trigger", "freq", "2412", "flush"])?;
    sleep(timing.short_settle());
    apdev.cmd_execute(&["ifconfig", ifname, "down"])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDevice;

    const REG_GET: &str = "\
global
country 00: DFS-UNSET
	(2402 - 2472 @ 40), (N/A, 20), (N/A)
	(2457 - 2482 @ 20), (N/A, 20), (N/A), AUTO-BW, PASSIVE-SCAN
	(5170 - 5250 @ 80), (N/A, 20), (N/A), AUTO-BW, PASSIVE-SCAN
	(5925 - 7125 @ 320), (N/A, 20), (N/A), NO-OUTDOOR
";

    #[test]
    fn reg_rule_inspection() {
        assert!(reg_allows_vht(REG_GET));
        assert!(reg_allows_eht_320(REG_GET));
        assert!(reg_covers_freq(REG_GET, HE_6GHZ_DEFAULT_FREQ));
        assert!(reg_covers_freq(REG_GET, 2412));
        assert!(!reg_covers_freq(REG_GET, 5500));

        let narrow = "country 00:\n\t(2402 - 2472 @ 40), (N/A, 20), (N/A)\n";
        assert!(!reg_allows_vht(narrow));
        assert!(!reg_allows_eht_320(narrow));
        assert!(!reg_covers_freq(narrow, 5975));
    }

    #[test]
    fn wiphy_from_iw_info() {
        let info = "Interface wlan3\n\tifindex 7\n\twdev 0x300000001\n\taddr 02:00:00:00:03:00\n\ttype AP\n\twiphy 3\n";
        assert_eq!(parse_wiphy(info).as_deref(), Some("phy3"));
        assert_eq!(parse_wiphy("Interface wlan0\n"), None);
    }

    #[test]
    fn regdom_polling_stops_on_quiet_interval() {
        let dev = ScriptedDevice::new("wlan0");
        dev.push_event("CTRL-EVENT-REGDOM-CHANGE init=USER type=COUNTRY alpha2=FI");
        dev.push_event("CTRL-EVENT-REGDOM-CHANGE init=CORE type=WORLD");
        dev.push_event("CTRL-EVENT-REGDOM-CHANGE init=CORE type=WORLD");
        let timing = RegdomTiming {
            poll_iterations: 2,
            ..RegdomTiming::immediate()
        };
        wait_regdom_changes(&dev, &timing).unwrap();
        // Only the iteration budget was consumed.
        assert_eq!(dev.dump_monitor().unwrap(), 1);
    }

    #[test]
    fn world_domain_reached_skips_country_clear() {
        let devs = vec![
            ScriptedDevice::new("wlan0")
                .reply("STATUS-DRIVER", "country=00\n")
                .event_after("SCAN TYPE=ONLY", "CTRL-EVENT-SCAN-RESULTS"),
            ScriptedDevice::new("wlan1"),
        ];
        let hapd = ScriptedDevice::new("wlan3");
        clear_regdom(Some(&hapd), &devs, 1, &RegdomTiming::immediate()).unwrap();

        assert_eq!(hapd.requests(), vec!["DISABLE"]);
        let reqs = devs[0].requests();
        assert_eq!(&reqs[..3], &["DISCONNECT", "DISCONNECT", "ABORT_SCAN"]);
        assert!(reqs.contains(&"BSS_FLUSH 0".to_string()));
        assert!(!reqs.contains(&"ADD_NETWORK".to_string()));
        assert_eq!(devs[0].executed(), vec![vec!["iw", "reg", "set", "00"]]);
        assert!(devs[1].requests().is_empty());
    }

    #[test]
    fn sticky_country_runs_throwaway_network() {
        let timing = RegdomTiming::immediate();
        let devs = vec![
            ScriptedDevice::new("wlan0")
                .reply("STATUS-DRIVER", "country=FI\n")
                .reply("ADD_NETWORK", "0")
                .event_after("SELECT_NETWORK", "CTRL-EVENT-CONNECTED - Connection to 02:00:00:00:01:00")
                .event_after("SELECT_NETWORK", "CTRL-EVENT-DISCONNECTED bssid=02:00:00:00:01:00 reason=3")
                .event_after("SCAN TYPE=ONLY", "CTRL-EVENT-SCAN-RESULTS"),
            ScriptedDevice::new("wlan1")
                .reply("ADD_NETWORK", "2")
                .event_after("SELECT_NETWORK", "CTRL-EVENT-CONNECTED - Connection to 02:00:00:00:01:00"),
        ];
        clear_regdom_dev(&devs, 1, &timing).unwrap();

        assert_eq!(
            devs[1].requests(),
            vec![
                "ADD_NETWORK",
                "SET_NETWORK 2 mode 2",
                "SET_NETWORK 2 ssid \"country-clear\"",
                "SET_NETWORK 2 key_mgmt NONE",
                "SET_NETWORK 2 frequency 2412",
                "SET_NETWORK 2 scan_freq 2412",
                "SELECT_NETWORK 2",
                "DISCONNECT",
            ]
        );
        let reqs = devs[0].requests();
        assert!(reqs.contains(&"SET_NETWORK 0 ssid \"country-clear\"".to_string()));
        let abort = reqs.iter().rposition(|r| r == "ABORT_SCAN").unwrap();
        assert_eq!(reqs[abort - 1], "DISCONNECT");
    }

    #[test]
    fn country_clear_needs_two_devices() {
        let devs = vec![ScriptedDevice::new("wlan0").reply("STATUS-DRIVER", "country=US\n")];
        let err = clear_regdom_dev(&devs, 1, &RegdomTiming::immediate()).unwrap_err();
        assert!(!err.is_skip());
    }

    #[test]
    fn count_larger_than_device_list_fails() {
        let devs = vec![ScriptedDevice::new("wlan0")];
        assert!(clear_regdom_dev(&devs, 2, &RegdomTiming::immediate()).is_err());
    }

    #[test]
    fn world_reg_on_station_host() {
        let dev = ScriptedDevice::new("wlan0");
        set_world_reg(None, None, Some(&dev), &RegdomTiming::immediate()).unwrap();
        assert_eq!(dev.executed(), vec![vec!["iw", "reg", "set", "00"]]);
    }
}
