//! # wifikit
//!
//! Wi-Fi management for Linux hosts: scan for networks, join one as a station, or
//! run a NAT'd access point. Scanning and capability queries talk nl80211 directly;
//! association, DHCP and the access point are delegated to `wpa_supplicant`,
//! `dhclient`, `hostapd` and `dnsmasq`, which this crate configures, supervises and
//! tears down.
//!
//! All operations go through [`WifiBackend`]. They report success as a `bool` (or an
//! empty scan, or [`ConnectionStatus::Error`]) and log the reason for any failure.
//!
//! ```no_run
//! use wifikit::{logging, platform_backend, WifiConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     logging::init(&logging::LoggingConfig::default())?;
//!     let mut wifi = platform_backend(WifiConfig::from_env())?;
//!     for net in wifi.scan() {
//!         println!("{:<32} {:>4} dBm {}", net.ssid, net.signal_dbm, net.security);
//!     }
//!     if wifi.is_hotspot_supported() && wifi.create_hotspot("Guest", None) {
//!         println!("hotspot up");
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;

#[cfg(target_os = "linux")]
pub mod generated;
#[cfg(target_os = "linux")]
pub mod hotspot;
#[cfg(target_os = "linux")]
pub mod manager;
#[cfg(target_os = "linux")]
pub mod station;
#[cfg(target_os = "linux")]
pub mod system;

pub use backend::{platform_backend, ConnectionStatus, WifiBackend};
pub use config::WifiConfig;
pub use error::{Result, WifiError};
pub use wifikit_netlink::{NetworkRecord, SecurityClass};

#[cfg(target_os = "linux")]
pub use manager::{LinuxWifiManager, WifiManager};
