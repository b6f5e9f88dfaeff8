//! In-memory stand-ins for the kernel, the interface and the process table.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use wifikit::system::{NetControl, NlResult, ProcessControl, WirelessControl};
use wifikit::{WifiConfig, WifiManager};
use wifikit_netlink::attr::encode_attr;
use wifikit_netlink::{LinkState, ManagedProcess, NetlinkError, NetworkRecord, ScanSession, ScanWaitPolicy};

pub const IFACE: &str = "wlan0";
pub const LEASED: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

#[derive(Debug, Clone)]
pub struct Spawned {
    pub program: String,
    pub args: Vec<String>,
    pub pid: i32,
    /// Contents of the config file named on the command line, read at spawn time.
    pub config: Option<String>,
}

#[derive(Debug)]
pub struct World {
    pub link_up: bool,
    pub link_running: bool,
    pub addresses: Vec<(Ipv4Addr, u8)>,
    pub ip_forward: bool,
    pub default_route: Option<String>,
    pub installed: BTreeSet<String>,
    /// Programs that exit as soon as they are started.
    pub crashing: BTreeSet<String>,
    /// Programs that start, then exit after the given delay.
    pub exits_after: BTreeMap<String, Duration>,
    /// Installed programs whose exec fails.
    pub spawn_fails: BTreeSet<String>,
    pub flush_fails: bool,
    pub deadlines: BTreeMap<i32, Instant>,
    pub dhcp_grants_lease: bool,
    pub running: BTreeMap<i32, String>,
    pub next_pid: i32,
    pub spawned: Vec<Spawned>,
    pub runs: Vec<(String, Vec<String>)>,
    pub killed: Vec<i32>,
}

impl Default for World {
    fn default() -> Self {
        Self {
            link_up: true,
            link_running: true,
            addresses: Vec::new(),
            ip_forward: false,
            default_route: Some("eth0".to_string()),
            installed: ["wpa_supplicant", "dhclient", "hostapd", "dnsmasq", "iptables"]
                .into_iter()
                .map(String::from)
                .collect(),
            crashing: BTreeSet::new(),
            exits_after: BTreeMap::new(),
            spawn_fails: BTreeSet::new(),
            flush_fails: false,
            deadlines: BTreeMap::new(),
            dhcp_grants_lease: true,
            running: BTreeMap::new(),
            next_pid: 1000,
            spawned: Vec::new(),
            runs: Vec::new(),
            killed: Vec::new(),
        }
    }
}

impl World {
    pub fn is_running(&self, name: &str) -> bool {
        self.running.values().any(|n| n == name)
    }

    /// Drop processes whose exit delay has passed.
    fn reap(&mut self) {
        let now = Instant::now();
        let expired: Vec<i32> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(pid, _)| *pid)
            .collect();
        for pid in expired {
            self.deadlines.remove(&pid);
            self.running.remove(&pid);
        }
    }

    pub fn spawned_named(&self, name: &str) -> Vec<Spawned> {
        self.spawned
            .iter()
            .filter(|s| s.program == name)
            .cloned()
            .collect()
    }

    pub fn runs_of(&self, name: &str) -> Vec<Vec<String>> {
        self.runs
            .iter()
            .filter(|(p, _)| p == name)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

pub type Shared = Rc<RefCell<World>>;

fn basename(program: &str) -> String {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
        .to_string()
}

/// Raw `NL80211_ATTR_BSS` nest as the kernel would put it in a scan dump.
pub fn bss_nest(mac: [u8; 6], ssid: &str, frequency: u32, signal_mbm: i32, ies: &[u8]) -> Vec<u8> {
    let mut blob = vec![0u8, ssid.len() as u8];
    blob.extend_from_slice(ssid.as_bytes());
    blob.extend_from_slice(ies);

    let mut nest = encode_attr(1, &mac);
    nest.extend(encode_attr(2, &frequency.to_ne_bytes()));
    nest.extend(encode_attr(5, &0x0411u16.to_ne_bytes()));
    nest.extend(encode_attr(6, &blob));
    nest.extend(encode_attr(7, &signal_mbm.to_ne_bytes()));
    nest
}

pub const RSN_IE: [u8; 4] = [48, 2, 1, 0];

pub struct FakeWireless {
    pub dump: Vec<Vec<u8>>,
    pub ap_mode: Result<bool, ()>,
    pub scans: Rc<RefCell<u32>>,
}

impl FakeWireless {
    pub fn with_networks(ssids: &[&str]) -> Self {
        let dump = ssids
            .iter()
            .enumerate()
            .map(|(i, ssid)| bss_nest([2, 0, 0, 0, 0, i as u8], ssid, 2437, -5500, &RSN_IE))
            .collect();
        Self {
            dump,
            ap_mode: Ok(true),
            scans: Rc::new(RefCell::new(0)),
        }
    }
}

impl WirelessControl for FakeWireless {
    fn scan(&mut self, _ifindex: u32, _policy: &ScanWaitPolicy) -> Vec<NetworkRecord> {
        *self.scans.borrow_mut() += 1;
        let mut session = ScanSession::new();
        for bss in &self.dump {
            session.absorb(bss);
        }
        session.into_records()
    }

    fn supports_ap_mode(&mut self, _ifindex: u32) -> NlResult<bool> {
        self.ap_mode.map_err(|()| NetlinkError::NetlinkProtocol {
            operation: "get wiphy".into(),
            reason: "unsupported".into(),
        })
    }
}

pub struct FakeNet {
    pub world: Shared,
}

impl NetControl for FakeNet {
    fn name(&self) -> &str {
        IFACE
    }

    fn index(&self) -> u32 {
        3
    }

    fn link_state(&self) -> NlResult<LinkState> {
        let w = self.world.borrow();
        Ok(LinkState {
            up: w.link_up,
            running: w.link_up && w.link_running,
        })
    }

    fn set_link(&self, up: bool) -> NlResult<()> {
        self.world.borrow_mut().link_up = up;
        Ok(())
    }

    fn flush_addresses(&self) -> NlResult<()> {
        let mut w = self.world.borrow_mut();
        if w.flush_fails {
            return Err(NetlinkError::DeleteAddressError {
                address: "192.168.1.50/24".into(),
                interface: IFACE.into(),
                reason: "Operation not permitted".into(),
            });
        }
        w.addresses.clear();
        Ok(())
    }

    fn add_ipv4(&self, address: Ipv4Addr, prefix: u8) -> NlResult<()> {
        self.world.borrow_mut().addresses.push((address, prefix));
        Ok(())
    }

    fn has_ipv4(&self) -> NlResult<bool> {
        Ok(!self.world.borrow().addresses.is_empty())
    }

    fn set_ip_forwarding(&self, enabled: bool) -> NlResult<()> {
        self.world.borrow_mut().ip_forward = enabled;
        Ok(())
    }

    fn default_route_interface(&self) -> NlResult<Option<String>> {
        Ok(self.world.borrow().default_route.clone())
    }
}

pub struct FakeProcess {
    pub world: Shared,
}

fn config_arg(args: &[String]) -> Option<PathBuf> {
    if let Some(i) = args.iter().position(|a| a == "-c") {
        return args.get(i + 1).map(PathBuf::from);
    }
    if let Some(path) = args.iter().find_map(|a| a.strip_prefix("--conf-file=")) {
        return Some(PathBuf::from(path));
    }
    args.iter()
        .find(|a| a.ends_with(".conf"))
        .map(PathBuf::from)
}

impl ProcessControl for FakeProcess {
    fn is_running(&self, name: &str) -> NlResult<bool> {
        let mut w = self.world.borrow_mut();
        w.reap();
        Ok(w.is_running(name))
    }

    fn terminate(&self, name: &str) -> NlResult<usize> {
        let mut w = self.world.borrow_mut();
        w.reap();
        let pids: Vec<i32> = w
            .running
            .iter()
            .filter(|(_, n)| n.as_str() == name)
            .map(|(pid, _)| *pid)
            .collect();
        for pid in &pids {
            w.running.remove(pid);
            w.killed.push(*pid);
        }
        Ok(pids.len())
    }

    fn terminate_pid(&self, pid: i32, _name: &str) -> NlResult<()> {
        let mut w = self.world.borrow_mut();
        if w.running.remove(&pid).is_some() {
            w.killed.push(pid);
        }
        Ok(())
    }

    fn is_alive(&self, pid: i32) -> bool {
        let mut w = self.world.borrow_mut();
        w.reap();
        w.running.contains_key(&pid)
    }

    fn spawn(&self, program: &str, args: &[String]) -> NlResult<ManagedProcess> {
        let name = basename(program);
        let mut w = self.world.borrow_mut();
        if !w.installed.contains(&name) {
            return Err(NetlinkError::SpawnError {
                program: program.to_string(),
                reason: io::Error::from(io::ErrorKind::NotFound).to_string(),
            });
        }
        if w.spawn_fails.contains(&name) {
            return Err(NetlinkError::SpawnError {
                program: program.to_string(),
                reason: io::Error::from(io::ErrorKind::PermissionDenied).to_string(),
            });
        }
        let pid = w.next_pid;
        w.next_pid += 1;
        let config = config_arg(args).and_then(|p| fs::read_to_string(p).ok());
        w.spawned.push(Spawned {
            program: name.clone(),
            args: args.to_vec(),
            pid,
            config,
        });
        if !w.crashing.contains(&name) {
            w.running.insert(pid, name.clone());
        }
        if let Some(delay) = w.exits_after.get(&name).copied() {
            w.deadlines.insert(pid, Instant::now() + delay);
        }
        Ok(ManagedProcess { name, pid })
    }

    fn run(&self, program: &str, args: &[String], _timeout: Duration) -> NlResult<bool> {
        let name = basename(program);
        let mut w = self.world.borrow_mut();
        w.runs.push((name.clone(), args.to_vec()));
        if name == "dhclient" {
            match args.first().map(String::as_str) {
                Some("-1") if w.dhcp_grants_lease => {
                    w.addresses.push((LEASED, 24));
                    return Ok(true);
                }
                Some("-1") => return Ok(false),
                Some("-r") => {
                    w.addresses.retain(|(a, _)| *a != LEASED);
                }
                _ => {}
            }
        }
        Ok(true)
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        let name = basename(program);
        self.world
            .borrow()
            .installed
            .contains(&name)
            .then(|| PathBuf::from("/usr/sbin").join(name))
    }
}

pub type FakeManager = WifiManager<FakeWireless, FakeNet, FakeProcess>;

pub struct Harness {
    pub manager: FakeManager,
    pub world: Shared,
    pub scans: Rc<RefCell<u32>>,
    pub scratch: TempDir,
}

impl Harness {
    pub fn new(wireless: FakeWireless) -> Self {
        Self::with_world(wireless, World::default())
    }

    pub fn with_world(wireless: FakeWireless, world: World) -> Self {
        Self::with_startup(wireless, world, 0)
    }

    /// Like `with_world`, waiting `startup_ms` before checking a new daemon.
    pub fn with_startup(wireless: FakeWireless, world: World, startup_ms: u64) -> Self {
        let scratch = TempDir::new().unwrap();
        let config = WifiConfig {
            interface: Some(IFACE.to_string()),
            scratch_dir: scratch.path().join("wifikit"),
            ctrl_interface_dir: scratch.path().join("ctrl"),
            scan_settle_ms: 0,
            scan_timeout_ms: 0,
            await_scan_events: false,
            daemon_startup_ms: startup_ms,
            dhcp_timeout_ms: 10,
            ..WifiConfig::default()
        };
        let world = Rc::new(RefCell::new(world));
        let scans = Rc::clone(&wireless.scans);
        let manager = WifiManager::with_parts(
            config,
            wireless,
            FakeNet {
                world: Rc::clone(&world),
            },
            FakeProcess {
                world: Rc::clone(&world),
            },
        );
        Self {
            manager,
            world,
            scans,
            scratch,
        }
    }

    pub fn scratch_files(&self) -> Vec<PathBuf> {
        match fs::read_dir(self.scratch.path().join("wifikit")) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
pub struct LogSink(pub Arc<Mutex<Vec<u8>>>);

impl LogSink {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogSink {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with a subscriber that writes into the returned sink.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let sink = LogSink::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, sink.contents())
}
