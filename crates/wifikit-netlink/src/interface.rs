//! Interface control for the managed wireless interface.
//!
//! Link state and index come from sysfs; address changes go through rtnetlink on a
//! private current-thread runtime so callers stay synchronous.

use crate::error::{NetlinkError, Result};
use futures::stream::TryStreamExt;
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use rtnetlink::{new_connection, Handle};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info};

pub const SYSFS_NET: &str = "/sys/class/net";
pub const PROC_ROUTE: &str = "/proc/net/route";
pub const PROC_IP_FORWARD: &str = "/proc/sys/net/ipv4/ip_forward";

const IFF_UP: u32 = 0x1;
const IFF_RUNNING: u32 = 0x40;

/// Administrative and operational state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkState {
    pub up: bool,
    pub running: bool,
}

impl LinkState {
    pub fn from_flags(flags: u32) -> Self {
        Self {
            up: flags & IFF_UP != 0,
            running: flags & IFF_RUNNING != 0,
        }
    }
}

/// Parse the hex `flags` file sysfs exposes per interface (e.g. `0x1003`).
pub fn parse_link_flags(raw: &str) -> Option<LinkState> {
    let trimmed = raw.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u32::from_str_radix(hex, 16).ok().map(LinkState::from_flags)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.len() > 15 {
        return Err(NetlinkError::InvalidArgument {
            parameter: "interface name".to_string(),
            value: name.to_string(),
            reason: "must be 1-15 characters without '/'".to_string(),
        });
    }
    Ok(())
}

pub fn read_ifindex(sysfs_root: &Path, name: &str) -> Result<u32> {
    validate_name(name)?;
    let raw = fs::read_to_string(sysfs_root.join(name).join("ifindex")).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            NetlinkError::InterfaceNotFound {
                name: name.to_string(),
            }
        } else {
            NetlinkError::InterfaceIndexError {
                interface: name.to_string(),
                reason: e.to_string(),
            }
        }
    })?;
    raw.trim()
        .parse::<u32>()
        .map_err(|e| NetlinkError::InterfaceIndexError {
            interface: name.to_string(),
            reason: e.to_string(),
        })
}

pub fn is_wireless(sysfs_root: &Path, name: &str) -> bool {
    let dir = sysfs_root.join(name);
    dir.join("wireless").exists() || dir.join("phy80211").exists()
}

/// First wireless interface in name order, if any.
pub fn find_wireless_interface(sysfs_root: &Path) -> Result<Option<String>> {
    let entries = fs::read_dir(sysfs_root)
        .map_err(|e| NetlinkError::io_error(format!("reading {}", sysfs_root.display()), e))?;

    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| is_wireless(sysfs_root, name))
        .collect();
    names.sort();
    Ok(names.into_iter().next())
}

/// Interface carrying the first default route in `/proc/net/route` format,
/// ignoring `exclude`.
pub fn parse_default_route(contents: &str, exclude: &str) -> Option<String> {
    contents.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return None;
        }
        let (iface, destination, mask) = (fields[0], fields[1], fields[7]);
        let is_default = u32::from_str_radix(destination, 16) == Ok(0)
            && u32::from_str_radix(mask, 16) == Ok(0);
        (is_default && iface != exclude).then(|| iface.to_string())
    })
}

pub fn default_route_interface(route_path: &Path, exclude: &str) -> Result<Option<String>> {
    let contents = fs::read_to_string(route_path)
        .map_err(|e| NetlinkError::io_error(format!("reading {}", route_path.display()), e))?;
    Ok(parse_default_route(&contents, exclude))
}

pub fn set_ip_forwarding(path: &Path, enabled: bool) -> Result<()> {
    let value = if enabled { "1\n" } else { "0\n" };
    fs::write(path, value)
        .map_err(|e| NetlinkError::io_error(format!("writing {}", path.display()), e))?;
    debug!(enabled, "ip forwarding updated");
    Ok(())
}

/// Controller bound to one interface. The index is resolved once at open.
pub struct InterfaceController {
    name: String,
    index: u32,
    sysfs_root: PathBuf,
    runtime: Runtime,
    handle: Handle,
}

impl InterfaceController {
    pub fn open(name: &str) -> Result<Self> {
        Self::open_in(name, Path::new(SYSFS_NET))
    }

    pub fn open_in(name: &str, sysfs_root: &Path) -> Result<Self> {
        let index = read_ifindex(sysfs_root, name)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NetlinkError::runtime("building rtnetlink runtime", e.to_string()))?;
        let handle = {
            let _guard = runtime.enter();
            let (connection, handle, _) = new_connection().map_err(|e| {
                NetlinkError::runtime("creating rtnetlink connection", e.to_string())
            })?;
            runtime.spawn(connection);
            handle
        };

        debug!(interface = name, index, "interface controller opened");
        Ok(Self {
            name: name.to_string(),
            index,
            sysfs_root: sysfs_root.to_path_buf(),
            runtime,
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn link_state(&self) -> Result<LinkState> {
        let path = self.sysfs_root.join(&self.name).join("flags");
        let raw = fs::read_to_string(&path)
            .map_err(|e| NetlinkError::io_error(format!("reading {}", path.display()), e))?;
        parse_link_flags(&raw).ok_or_else(|| NetlinkError::InvalidArgument {
            parameter: "flags".to_string(),
            value: raw.trim().to_string(),
            reason: "not a hex flag word".to_string(),
        })
    }

    pub fn set_link(&self, up: bool) -> Result<()> {
        let request = self.handle.link().set(self.index);
        let request = if up { request.up() } else { request.down() };
        self.runtime
            .block_on(request.execute())
            .map_err(|e| NetlinkError::SetStateError {
                interface: self.name.clone(),
                desired_state: if up { "UP" } else { "DOWN" }.to_string(),
                reason: e.to_string(),
            })?;
        info!(interface = %self.name, up, "link state set");
        Ok(())
    }

    fn addresses(&self) -> Result<Vec<AddressMessage>> {
        let handle = self.handle.clone();
        let index = self.index;
        self.runtime
            .block_on(async move {
                handle
                    .address()
                    .get()
                    .set_link_index_filter(index)
                    .execute()
                    .try_collect::<Vec<_>>()
                    .await
            })
            .map_err(|e| NetlinkError::ListAddressesError {
                interface: self.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Remove every address bound to the interface.
    pub fn flush_addresses(&self) -> Result<()> {
        for message in self.addresses()? {
            let address = address_label(&message);
            let handle = self.handle.clone();
            self.runtime
                .block_on(async move { handle.address().del(message).execute().await })
                .map_err(|e| NetlinkError::DeleteAddressError {
                    address,
                    interface: self.name.clone(),
                    reason: e.to_string(),
                })?;
        }
        info!(interface = %self.name, "addresses flushed");
        Ok(())
    }

    pub fn add_ipv4(&self, address: Ipv4Addr, prefix: u8) -> Result<()> {
        if prefix > 32 {
            return Err(NetlinkError::AddAddressError {
                address: address.to_string(),
                prefix,
                interface: self.name.clone(),
                reason: format!("invalid IPv4 prefix length {}", prefix),
            });
        }
        let handle = self.handle.clone();
        let index = self.index;
        self.runtime
            .block_on(async move {
                handle
                    .address()
                    .add(index, IpAddr::V4(address), prefix)
                    .execute()
                    .await
            })
            .map_err(|e| NetlinkError::AddAddressError {
                address: address.to_string(),
                prefix,
                interface: self.name.clone(),
                reason: e.to_string(),
            })?;
        info!(interface = %self.name, %address, prefix, "address added");
        Ok(())
    }

    pub fn has_ipv4(&self) -> Result<bool> {
        Ok(self.addresses()?.iter().any(|message| {
            message
                .attributes
                .iter()
                .any(|attr| matches!(attr, AddressAttribute::Address(IpAddr::V4(_))))
        }))
    }
}

/// `addr/prefix` for error reports, `?` when the message carries no address.
fn address_label(message: &AddressMessage) -> String {
    message
        .attributes
        .iter()
        .find_map(|attr| match attr {
            AddressAttribute::Address(ip) => Some(format!("{}/{}", ip, message.header.prefix_len)),
            _ => None,
        })
        .unwrap_or_else(|| "?".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ROUTE_TABLE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
wlan0\t00000000\t0104A8C0\t0003\t0\t0\t600\t00000000\t0\t0\t0
eth0\t00000000\t0101A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0
eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0
";

    fn fake_iface(root: &Path, name: &str, index: u32, flags: &str, wireless: bool) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("ifindex"), format!("{}\n", index)).unwrap();
        fs::write(dir.join("flags"), flags).unwrap();
        if wireless {
            fs::create_dir_all(dir.join("wireless")).unwrap();
        }
    }

    #[test]
    fn flags_decode_up_and_running() {
        assert_eq!(
            parse_link_flags("0x1043\n"),
            Some(LinkState {
                up: true,
                running: true
            })
        );
        assert_eq!(
            parse_link_flags("0x1002"),
            Some(LinkState {
                up: false,
                running: false
            })
        );
        assert_eq!(parse_link_flags("garbage"), None);
    }

    #[test]
    fn default_route_skips_ap_interface() {
        assert_eq!(
            parse_default_route(ROUTE_TABLE, "wlan0").as_deref(),
            Some("eth0")
        );
        assert_eq!(
            parse_default_route(ROUTE_TABLE, "eth1").as_deref(),
            Some("wlan0")
        );
        assert_eq!(parse_default_route("Iface\tDestination\n", "wlan0"), None);
    }

    #[test]
    fn picks_first_wireless_interface_in_order() {
        let root = TempDir::new().unwrap();
        fake_iface(root.path(), "eth0", 2, "0x1003", false);
        fake_iface(root.path(), "wlan1", 4, "0x1003", true);
        fake_iface(root.path(), "wlan0", 3, "0x1003", true);

        let found = find_wireless_interface(root.path()).unwrap();
        assert_eq!(found.as_deref(), Some("wlan0"));
    }

    #[test]
    fn no_wireless_interface_is_none() {
        let root = TempDir::new().unwrap();
        fake_iface(root.path(), "lo", 1, "0x9", false);
        assert_eq!(find_wireless_interface(root.path()).unwrap(), None);
    }

    #[test]
    fn ifindex_errors_are_specific() {
        let root = TempDir::new().unwrap();
        fake_iface(root.path(), "wlan0", 7, "0x1003", true);

        assert_eq!(read_ifindex(root.path(), "wlan0").unwrap(), 7);
        assert!(matches!(
            read_ifindex(root.path(), "wlan9"),
            Err(NetlinkError::InterfaceNotFound { .. })
        ));
        assert!(matches!(
            read_ifindex(root.path(), "../etc"),
            Err(NetlinkError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn ip_forward_file_is_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ip_forward");
        set_ip_forwarding(&path, true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\n");
        set_ip_forwarding(&path, false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0\n");
    }

    #[test]
    fn address_label_names_the_failed_address() {
        let mut message = AddressMessage::default();
        message.header.prefix_len = 24;
        assert_eq!(address_label(&message), "?");

        message
            .attributes
            .push(AddressAttribute::Address(IpAddr::V4(Ipv4Addr::new(192, 168, 4, 1))));
        assert_eq!(address_label(&message), "192.168.4.1/24");

        let err = NetlinkError::DeleteAddressError {
            address: address_label(&message),
            interface: "wlan0".into(),
            reason: "Operation not permitted".into(),
        };
        assert!(err.to_string().contains("192.168.4.1/24"));
    }
}
