//! # wifikit-netlink
//!
//! Kernel-facing primitives for wifikit: an nl80211 generic-netlink session, a
//! bounds-checked attribute and information-element parser, the scan coordinator,
//! rtnetlink/sysfs interface control and `/proc` based process supervision.
//!
//! ## Platform Support
//!
//! Linux-only. Socket and process code is gated with `#[cfg(target_os = "linux")]`;
//! the parsers and data types build everywhere.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use wifikit_netlink::*;
//!
//! fn main() -> Result<()> {
//!     let iface = find_wireless_interface(Path::new(SYSFS_NET))?.unwrap_or_default();
//!     let ifindex = InterfaceController::open(&iface)?.index();
//!     let mut session = Nl80211Session::open()?;
//!     for net in scan_networks(&mut session, ifindex, &ScanWaitPolicy::default()) {
//!         println!("{} {} {} dBm", net.ssid, net.security, net.signal_dbm);
//!     }
//!     Ok(())
//! }
//! ```

pub mod attr;
pub mod bss;
pub mod error;
#[cfg(target_os = "linux")]
pub mod interface;
pub mod iptables;
#[cfg(target_os = "linux")]
pub mod nl80211;
#[cfg(target_os = "linux")]
pub mod process;
#[cfg(target_os = "linux")]
pub mod scan;

pub use bss::{classify_security, format_mac, frequency_to_channel, NetworkRecord, SecurityClass};
pub use error::{NetlinkError, Result};

#[cfg(target_os = "linux")]
pub use interface::{
    default_route_interface, find_wireless_interface, set_ip_forwarding, InterfaceController,
    LinkState, PROC_IP_FORWARD, PROC_ROUTE, SYSFS_NET,
};
#[cfg(target_os = "linux")]
pub use nl80211::{InterfaceMode, Nl80211Session, ScanEvents, ScanWait};
#[cfg(target_os = "linux")]
pub use process::{ManagedProcess, ProcessInfo, ProcessSupervisor};
#[cfg(target_os = "linux")]
pub use scan::{scan_networks, try_scan, ScanSession, ScanWaitPolicy};
