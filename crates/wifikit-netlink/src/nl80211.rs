use crate::attr::AttrCursor;
use crate::error::{NetlinkError, Result};
use neli::{
    consts::{
        nl::{NlmF, NlmFFlags},
        socket::NlFamily,
    },
    err::NlError,
    genl::{Genlmsghdr, Nlattr},
    nl::{NlPayload, Nlmsghdr},
    socket::NlSocketHandle,
    types::{Buffer, GenlBuffer},
};
use std::io;
use std::time::{Duration, Instant};
use tracing::debug;

const NL80211_GENL_NAME: &str = "nl80211";
const NL80211_SCAN_GROUP: &str = "scan";
const NLMSG_ERR: u16 = 2;
const NLMSG_DONE: u16 = 3;

const NL80211_CMD_GET_WIPHY: u8 = 1;
const NL80211_CMD_GET_INTERFACE: u8 = 5;
const NL80211_CMD_GET_SCAN: u8 = 32;
const NL80211_CMD_TRIGGER_SCAN: u8 = 33;
const NL80211_CMD_NEW_SCAN_RESULTS: u8 = 34;
const NL80211_CMD_SCAN_ABORTED: u8 = 35;

const NL80211_ATTR_WIPHY: u16 = 1;
const NL80211_ATTR_IFINDEX: u16 = 3;
const NL80211_ATTR_SUPPORTED_IFTYPES: u16 = 32;
const NL80211_ATTR_SCAN_SSIDS: u16 = 45;
const NL80211_ATTR_BSS: u16 = 47;

const NL80211_IFTYPE_ADHOC: u16 = 1;
const NL80211_IFTYPE_STATION: u16 = 2;
const NL80211_IFTYPE_AP: u16 = 3;
const NL80211_IFTYPE_MONITOR: u16 = 6;
const NL80211_IFTYPE_MESH_POINT: u16 = 7;
const NL80211_IFTYPE_P2P_CLIENT: u16 = 8;
const NL80211_IFTYPE_P2P_GO: u16 = 9;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(800);
const EVENT_POLL: Duration = Duration::from_millis(200);

/// Wireless interface mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceMode {
    Adhoc,
    Station,
    AccessPoint,
    Monitor,
    MeshPoint,
    P2PClient,
    P2PGo,
}

impl InterfaceMode {
    fn from_nl80211(iftype: u16) -> Option<Self> {
        match iftype {
            NL80211_IFTYPE_ADHOC => Some(Self::Adhoc),
            NL80211_IFTYPE_STATION => Some(Self::Station),
            NL80211_IFTYPE_AP => Some(Self::AccessPoint),
            NL80211_IFTYPE_MONITOR => Some(Self::Monitor),
            NL80211_IFTYPE_MESH_POINT => Some(Self::MeshPoint),
            NL80211_IFTYPE_P2P_CLIENT => Some(Self::P2PClient),
            NL80211_IFTYPE_P2P_GO => Some(Self::P2PGo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adhoc => "adhoc",
            Self::Station => "managed",
            Self::AccessPoint => "ap",
            Self::Monitor => "monitor",
            Self::MeshPoint => "mesh",
            Self::P2PClient => "p2p-client",
            Self::P2PGo => "p2p-go",
        }
    }
}

/// Outcome of waiting on the nl80211 `scan` multicast group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanWait {
    Completed,
    Aborted,
    TimedOut,
}

fn set_recv_timeout(sock: &NlSocketHandle, timeout: Duration) {
    use std::os::unix::io::AsRawFd;

    let fd = sock.as_raw_fd();
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        debug!(
            error = %io::Error::last_os_error(),
            "failed to set nl80211 recv timeout"
        );
    }
}

fn ifindex_attrs(ifindex: u32) -> Result<GenlBuffer<u16, Buffer>> {
    let mut attrs = GenlBuffer::new();
    attrs.push(
        Nlattr::new(false, false, NL80211_ATTR_IFINDEX, ifindex)
            .map_err(|e| NetlinkError::netlink_error("building ifindex attribute", e.to_string()))?,
    );
    Ok(attrs)
}

/// Empty wildcard SSID list: a single zero-length nested entry.
fn scan_ssids_payload() -> Vec<u8> {
    let len: u16 = 4;
    let nla_type: u16 = 0;
    let mut bytes = Vec::with_capacity(4);
    bytes.extend_from_slice(&len.to_ne_bytes());
    bytes.extend_from_slice(&nla_type.to_ne_bytes());
    bytes
}

fn errno_result(operation: &str, code: i32) -> Result<()> {
    if code == 0 {
        return Ok(());
    }
    let errno = code.abs();
    let io_err = io::Error::from_raw_os_error(errno);
    Err(NetlinkError::netlink_error(
        operation,
        format!("{} (errno {})", io_err, errno),
    ))
}

/// Result of a trigger request given the kernel's error code. A scan already
/// running (`EBUSY`) will still produce results to dump.
fn trigger_outcome(ifindex: u32, code: i32) -> Result<()> {
    if code.abs() == libc::EBUSY {
        debug!(ifindex, "scan already in progress");
        return Ok(());
    }
    errno_result("trigger scan", code)
}

fn genl_u32(genl: &Genlmsghdr<u8, u16>, nla_type: u16) -> Option<u32> {
    genl.get_attr_handle()
        .iter()
        .find(|attr| attr.nla_type.nla_type == nla_type)
        .and_then(|attr| {
            let bytes: [u8; 4] = attr.nla_payload.as_ref().get(..4)?.try_into().ok()?;
            Some(u32::from_ne_bytes(bytes))
        })
}

/// Generic netlink session bound to the nl80211 family.
///
/// The family id is resolved once at open; every request afterwards reuses the
/// same socket.
pub struct Nl80211Session {
    socket: NlSocketHandle,
    family_id: u16,
}

impl Nl80211Session {
    /// Connect to the generic netlink dispatcher and resolve `nl80211`.
    ///
    /// # Errors
    ///
    /// Returns [`NetlinkError::Transport`] if the socket cannot be created or the
    /// family is unknown (no wireless drivers loaded).
    pub fn open() -> Result<Self> {
        let mut socket = NlSocketHandle::connect(NlFamily::Generic, None, &[]).map_err(|e| {
            NetlinkError::Transport {
                reason: format!("failed to create generic netlink socket: {}", e),
            }
        })?;

        let family_id = socket
            .resolve_genl_family(NL80211_GENL_NAME)
            .map_err(|e| NetlinkError::Transport {
                reason: format!("failed to resolve nl80211 family: {}", e),
            })?;

        debug!(family_id, "nl80211 session opened");
        Ok(Self { socket, family_id })
    }

    fn send(
        &mut self,
        cmd: u8,
        attrs: GenlBuffer<u16, Buffer>,
        flags: &[NlmF],
        operation: &str,
    ) -> Result<()> {
        let genlhdr = Genlmsghdr::new(cmd, 1, attrs);
        let nlhdr = Nlmsghdr::new(
            None,
            self.family_id,
            NlmFFlags::new(flags),
            None,
            None,
            NlPayload::Payload(genlhdr),
        );
        self.socket
            .send(nlhdr)
            .map_err(|e| NetlinkError::netlink_error(operation, format!("send failed: {}", e)))
    }

    fn recv_one(&mut self, operation: &str) -> Result<Genlmsghdr<u8, u16>> {
        set_recv_timeout(&self.socket, REQUEST_TIMEOUT);
        let response: Nlmsghdr<u16, Genlmsghdr<u8, u16>> = match self.socket.recv() {
            Ok(Some(response)) => response,
            Ok(None) => return Err(NetlinkError::netlink_error(operation, "no response")),
            Err(NlError::Nlmsgerr(err)) => {
                errno_result(operation, err.error)?;
                return Err(NetlinkError::netlink_error(operation, "empty response"));
            }
            Err(e) => {
                return Err(NetlinkError::netlink_error(
                    operation,
                    format!("recv failed: {}", e),
                ))
            }
        };

        match response.nl_payload {
            NlPayload::Payload(genl) => Ok(genl),
            _ => Err(NetlinkError::netlink_error(operation, "unexpected response")),
        }
    }

    /// Ask the kernel to start a scan on `ifindex`. A scan already in progress
    /// (`EBUSY`) counts as success.
    pub fn trigger_scan(&mut self, ifindex: u32) -> Result<()> {
        let mut attrs = ifindex_attrs(ifindex)?;
        let ssids = scan_ssids_payload();
        attrs.push(
            Nlattr::new(true, false, NL80211_ATTR_SCAN_SSIDS, ssids.as_slice()).map_err(
                |e| NetlinkError::netlink_error("building scan SSIDs attribute", e.to_string()),
            )?,
        );
        self.send(
            NL80211_CMD_TRIGGER_SCAN,
            attrs,
            &[NlmF::Request, NlmF::Ack],
            "trigger scan",
        )?;

        // neli hands kernel error replies back as `Err`, acks as `Ok`.
        set_recv_timeout(&self.socket, REQUEST_TIMEOUT);
        match self.socket.recv::<u16, Genlmsghdr<u8, u16>>() {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(NetlinkError::netlink_error("trigger scan", "no response")),
            Err(NlError::Nlmsgerr(err)) => trigger_outcome(ifindex, err.error),
            Err(e) => Err(NetlinkError::netlink_error("trigger scan", e.to_string())),
        }
    }

    /// Dump cached scan results for `ifindex`, handing each raw BSS nest to `on_bss`.
    pub fn dump_scan<F>(&mut self, ifindex: u32, mut on_bss: F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        let attrs = ifindex_attrs(ifindex)?;
        self.send(
            NL80211_CMD_GET_SCAN,
            attrs,
            &[NlmF::Request, NlmF::Dump],
            "dump scan",
        )?;

        set_recv_timeout(&self.socket, REQUEST_TIMEOUT);
        loop {
            let msg: Nlmsghdr<u16, Genlmsghdr<u8, u16>> = match self.socket.recv() {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(NlError::Nlmsgerr(err)) => {
                    errno_result("dump scan", err.error)?;
                    break;
                }
                Err(e) => return Err(NetlinkError::netlink_error("dump scan", e.to_string())),
            };

            if msg.nl_type == NLMSG_DONE || msg.nl_type == NLMSG_ERR {
                break;
            }

            if let NlPayload::Payload(genl) = msg.nl_payload {
                for attr in genl.get_attr_handle().iter() {
                    if attr.nla_type.nla_type == NL80211_ATTR_BSS {
                        on_bss(attr.nla_payload.as_ref());
                    }
                }
            }
        }
        Ok(())
    }

    /// Index of the wiphy backing `ifindex`.
    pub fn wiphy_index(&mut self, ifindex: u32) -> Result<u32> {
        let attrs = ifindex_attrs(ifindex)?;
        self.send(
            NL80211_CMD_GET_INTERFACE,
            attrs,
            &[NlmF::Request],
            "get interface",
        )?;
        let genl = self.recv_one("get interface")?;
        genl_u32(&genl, NL80211_ATTR_WIPHY)
            .ok_or_else(|| NetlinkError::netlink_error("get interface", "no wiphy attribute"))
    }

    /// Interface types the radio behind `ifindex` can operate in.
    pub fn supported_iftypes(&mut self, ifindex: u32) -> Result<Vec<InterfaceMode>> {
        let wiphy = self.wiphy_index(ifindex)?;

        let mut attrs = GenlBuffer::new();
        attrs.push(
            Nlattr::new(false, false, NL80211_ATTR_WIPHY, wiphy)
                .map_err(|e| NetlinkError::netlink_error("building wiphy attribute", e.to_string()))?,
        );
        self.send(NL80211_CMD_GET_WIPHY, attrs, &[NlmF::Request], "get wiphy")?;
        let genl = self.recv_one("get wiphy")?;

        let modes = genl
            .get_attr_handle()
            .iter()
            .find(|attr| attr.nla_type.nla_type == NL80211_ATTR_SUPPORTED_IFTYPES)
            .map(|attr| parse_iftypes(attr.nla_payload.as_ref()))
            .unwrap_or_default();
        debug!(
            ifindex,
            wiphy,
            modes = ?modes.iter().map(InterfaceMode::as_str).collect::<Vec<_>>(),
            "supported interface types"
        );
        Ok(modes)
    }

    pub fn supports_ap_mode(&mut self, ifindex: u32) -> Result<bool> {
        Ok(self
            .supported_iftypes(ifindex)?
            .contains(&InterfaceMode::AccessPoint))
    }
}

/// `NL80211_ATTR_SUPPORTED_IFTYPES` is a nest of flag attributes keyed by iftype.
pub(crate) fn parse_iftypes(payload: &[u8]) -> Vec<InterfaceMode> {
    AttrCursor::new(payload)
        .filter_map(|attr| InterfaceMode::from_nl80211(attr.nla_type))
        .collect()
}

/// Listener on the nl80211 `scan` multicast group.
pub struct ScanEvents {
    socket: NlSocketHandle,
}

impl ScanEvents {
    /// Join the `scan` group on a dedicated socket. Must happen before the trigger
    /// so the completion event cannot be missed.
    pub fn subscribe() -> Result<Self> {
        let mut socket = NlSocketHandle::connect(NlFamily::Generic, None, &[]).map_err(|e| {
            NetlinkError::netlink_error("scan event socket", e.to_string())
        })?;
        let group = socket
            .resolve_nl_mcast_group(NL80211_GENL_NAME, NL80211_SCAN_GROUP)
            .map_err(|e| NetlinkError::netlink_error("resolve scan group", e.to_string()))?;
        socket
            .add_mcast_membership(&[group])
            .map_err(|e| NetlinkError::netlink_error("join scan group", e.to_string()))?;
        Ok(Self { socket })
    }

    /// Block until the kernel reports new results or an aborted scan for `ifindex`,
    /// or until `timeout` elapses.
    pub fn wait(&mut self, ifindex: u32, timeout: Duration) -> ScanWait {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ScanWait::TimedOut;
            }
            set_recv_timeout(&self.socket, remaining.min(EVENT_POLL));

            match self.socket.recv::<u16, Genlmsghdr<u8, u16>>() {
                Ok(Some(msg)) => {
                    let NlPayload::Payload(genl) = msg.nl_payload else {
                        continue;
                    };
                    let target = genl_u32(&genl, NL80211_ATTR_IFINDEX);
                    if target.is_some_and(|idx| idx != ifindex) {
                        continue;
                    }
                    match genl.cmd {
                        NL80211_CMD_NEW_SCAN_RESULTS => return ScanWait::Completed,
                        NL80211_CMD_SCAN_ABORTED => return ScanWait::Aborted,
                        _ => {}
                    }
                }
                // Receive timeouts surface as errors; the deadline check decides.
                Ok(None) | Err(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::encode_attr;

    #[test]
    fn iftype_nest_is_decoded() {
        let mut nest = encode_attr(NL80211_IFTYPE_STATION, &[]);
        nest.extend(encode_attr(NL80211_IFTYPE_AP, &[]));
        nest.extend(encode_attr(NL80211_IFTYPE_MONITOR, &[]));
        nest.extend(encode_attr(12, &[]));

        let modes = parse_iftypes(&nest);
        assert_eq!(
            modes,
            vec![
                InterfaceMode::Station,
                InterfaceMode::AccessPoint,
                InterfaceMode::Monitor
            ]
        );
    }

    #[test]
    fn station_only_radio_has_no_ap() {
        let nest = encode_attr(NL80211_IFTYPE_STATION, &[]);
        assert!(!parse_iftypes(&nest).contains(&InterfaceMode::AccessPoint));
    }

    #[test]
    fn wildcard_ssid_list_is_single_empty_attr() {
        let payload = scan_ssids_payload();
        let attrs: Vec<_> = AttrCursor::new(&payload).collect();
        assert_eq!(attrs.len(), 1);
        assert!(attrs[0].payload.is_empty());
    }

    #[test]
    fn busy_trigger_is_not_an_error() {
        assert!(trigger_outcome(3, -libc::EBUSY).is_ok());
        assert!(trigger_outcome(3, 0).is_ok());
        let err = trigger_outcome(3, -libc::ENETDOWN).unwrap_err();
        assert!(err.to_string().contains("trigger scan"));
    }

    #[test]
    fn errno_zero_is_ok() {
        assert!(errno_result("x", 0).is_ok());
        let err = errno_result("trigger scan", -libc::ENODEV).unwrap_err();
        assert!(err.to_string().contains("trigger scan"));
    }
}
