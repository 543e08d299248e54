//! hwsim-util: command-line access to the harness helpers for shell-driven
//! test setup.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hwsim_harness::config::HarnessConfig;
use hwsim_harness::ctrl::CtrlDevice;
use hwsim_harness::{ie, monitor, netif, regdom, util, Device};

#[derive(Parser, Debug)]
#[command(name = "hwsim-util", about = "mac80211_hwsim test harness utilities")]
struct Cli {
    /// Harness configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Decode hex-encoded information elements.
    ParseIe {
        #[arg(value_name = "HEX")]
        encoded: String,
        /// Print a JSON object of element ID to hex payload.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List network interfaces.
    Ifnames,
    /// Exit 0 if the interface is a port of the bridge, 1 otherwise.
    InBridge { bridge: String, ifname: String },
    /// Parse a boolean test parameter.
    ParseBool { value: String },
    /// Print the injection radiotap header as hex.
    Radiotap,
    /// Report which channel widths the current regulatory domain allows.
    RegSupport {
        #[arg(long, default_value_t = regdom::HE_6GHZ_DEFAULT_FREQ)]
        freq: u32,
    },
    /// Reset stations (and optionally an AP) to the world regulatory domain.
    ClearRegdom {
        /// Station interfaces, in device order.
        #[arg(long = "ifname", required = true)]
        ifnames: Vec<String>,
        /// hostapd interface to disable first.
        #[arg(long)]
        hapd: Option<String>,
        /// How many stations to disconnect and flush.
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Switch an interface into or out of monitor mode.
    Monitor {
        #[command(subcommand)]
        action: MonitorAction,
    },
}

#[derive(Subcommand, Debug)]
enum MonitorAction {
    /// Enter monitor mode and wait for one frame.
    Start {
        ifname: String,
        #[arg(long)]
        freq: Option<u32>,
    },
    /// Return to managed mode.
    Stop { ifname: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => HarnessConfig::default(),
    };

    match cli.command {
        Cmd::ParseIe { encoded, json } => {
            let ies = ie::parse_ie(&encoded).context("parsing information elements")?;
            if json {
                let map: serde_json::Map<String, serde_json::Value> = ies
                    .iter()
                    .map(|(id, payload)| {
                        (id.to_string(), serde_json::Value::String(hex::encode(payload)))
                    })
                    .collect();
                println!("{}", serde_json::Value::Object(map));
            } else {
                for (id, payload) in &ies {
                    println!("{id:3} len={:3} {}", payload.len(), hex::encode(payload));
                }
            }
        }
        Cmd::Ifnames => {
            for name in netif::get_ifnames().context("reading interface list")? {
                println!("{name}");
            }
        }
        Cmd::InBridge { bridge, ifname } => {
            if !netif::iface_is_in_bridge(&bridge, &ifname) {
                std::process::exit(1);
            }
        }
        Cmd::ParseBool { value } => {
            println!("{}", util::parse_bool(&value)?);
        }
        Cmd::Radiotap => {
            println!("{}", hex::encode(monitor::radiotap_build()));
        }
        Cmd::RegSupport { freq } => {
            println!("vht={}", regdom::vht_supported()?);
            println!("eht_320={}", regdom::eht_320mhz_supported()?);
            println!("he_6ghz({freq})={}", regdom::he_6ghz_supported(freq)?);
        }
        Cmd::ClearRegdom {
            ifnames,
            hapd,
            count,
        } => {
            let devs = ifnames
                .iter()
                .map(|ifname| {
                    CtrlDevice::wpa_supplicant(ifname, &cfg)
                        .with_context(|| format!("opening wpa_supplicant on {ifname}"))
                })
                .collect::<Result<Vec<_>>>()?;
            let hapd = hapd
                .as_deref()
                .map(|ifname| {
                    CtrlDevice::hostapd(ifname, &cfg)
                        .with_context(|| format!("opening hostapd on {ifname}"))
                })
                .transpose()?;
            regdom::clear_regdom(
                hapd.as_ref().map(|h| h as &dyn Device),
                &devs,
                count,
                &cfg.regdom,
            )?;
            tracing::info!("regulatory domain reset complete");
        }
        Cmd::Monitor { action } => match action {
            MonitorAction::Start { ifname, freq } => {
                let freq = freq.unwrap_or(cfg.monitor.default_freq);
                let sock = monitor::start_monitor_with_timeout(
                    &ifname,
                    freq,
                    cfg.monitor.recv_timeout(),
                )?;
                let mut buf = vec![0u8; 4096];
                match sock.recv(&mut buf)? {
                    Some(n) => println!("captured {n} bytes on {ifname}"),
                    None => bail!("no frame captured on {ifname} within the receive timeout"),
                }
            }
            MonitorAction::Stop { ifname } => monitor::stop_monitor(&ifname),
        },
    }

    Ok(())
}
