use std::env;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCRATCH_DIR: &str = "/run/wifikit";
pub const DEFAULT_CTRL_DIR: &str = "/run/wpa_supplicant";
pub const DEFAULT_SUPPLICANT_BIN: &str = "wpa_supplicant";
pub const DEFAULT_DHCP_CLIENT_BIN: &str = "dhclient";
pub const DEFAULT_AP_DAEMON_BIN: &str = "hostapd";
pub const DEFAULT_DHCP_SERVER_BIN: &str = "dnsmasq";
pub const DEFAULT_FIREWALL_BIN: &str = "iptables";
pub const DEFAULT_HOTSPOT_CHANNEL: u8 = 6;
pub const DEFAULT_SCAN_SETTLE_MS: u64 = 3000;
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_DAEMON_STARTUP_MS: u64 = 2000;
pub const DEFAULT_DHCP_TIMEOUT_MS: u64 = 15_000;

pub const AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);
pub const AP_PREFIX: u8 = 24;
pub const AP_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const DHCP_POOL_START: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 2);
pub const DHCP_POOL_END: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 20);
pub const DHCP_LEASE: &str = "12h";

/// Runtime settings for a wifikit manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    /// Explicit interface; the first wireless interface is used when unset.
    pub interface: Option<String>,
    pub scratch_dir: PathBuf,
    pub ctrl_interface_dir: PathBuf,
    pub supplicant_bin: String,
    pub dhcp_client_bin: String,
    pub ap_daemon_bin: String,
    pub dhcp_server_bin: String,
    pub firewall_bin: String,
    pub hotspot_channel: u8,
    pub scan_settle_ms: u64,
    pub scan_timeout_ms: u64,
    pub await_scan_events: bool,
    pub daemon_startup_ms: u64,
    pub dhcp_timeout_ms: u64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            interface: None,
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            ctrl_interface_dir: PathBuf::from(DEFAULT_CTRL_DIR),
            supplicant_bin: DEFAULT_SUPPLICANT_BIN.to_string(),
            dhcp_client_bin: DEFAULT_DHCP_CLIENT_BIN.to_string(),
            ap_daemon_bin: DEFAULT_AP_DAEMON_BIN.to_string(),
            dhcp_server_bin: DEFAULT_DHCP_SERVER_BIN.to_string(),
            firewall_bin: DEFAULT_FIREWALL_BIN.to_string(),
            hotspot_channel: DEFAULT_HOTSPOT_CHANNEL,
            scan_settle_ms: DEFAULT_SCAN_SETTLE_MS,
            scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
            await_scan_events: true,
            daemon_startup_ms: DEFAULT_DAEMON_STARTUP_MS,
            dhcp_timeout_ms: DEFAULT_DHCP_TIMEOUT_MS,
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => {
            let value = value.trim();
            value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
        }
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: String) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

impl WifiConfig {
    /// Defaults overlaid with `WIFIKIT_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// JSON file, then environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading wifikit config {}", path.display()))?;
        let mut cfg: Self = serde_json::from_str(&contents)
            .with_context(|| format!("parsing wifikit config {}", path.display()))?;
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Some(iface) = env::var("WIFIKIT_INTERFACE")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            self.interface = Some(iface.trim().to_string());
        }
        self.scratch_dir = env::var("WIFIKIT_SCRATCH_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.scratch_dir.clone());
        self.ctrl_interface_dir = env::var("WIFIKIT_CTRL_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.ctrl_interface_dir.clone());
        self.supplicant_bin = env_string("WIFIKIT_SUPPLICANT_BIN", self.supplicant_bin.clone());
        self.dhcp_client_bin = env_string("WIFIKIT_DHCP_CLIENT_BIN", self.dhcp_client_bin.clone());
        self.ap_daemon_bin = env_string("WIFIKIT_AP_DAEMON_BIN", self.ap_daemon_bin.clone());
        self.dhcp_server_bin = env_string("WIFIKIT_DHCP_SERVER_BIN", self.dhcp_server_bin.clone());
        self.firewall_bin = env_string("WIFIKIT_FIREWALL_BIN", self.firewall_bin.clone());
        self.hotspot_channel = env_parse("WIFIKIT_HOTSPOT_CHANNEL", self.hotspot_channel);
        self.scan_settle_ms = env_parse("WIFIKIT_SCAN_SETTLE_MS", self.scan_settle_ms);
        self.scan_timeout_ms = env_parse("WIFIKIT_SCAN_TIMEOUT_MS", self.scan_timeout_ms);
        self.await_scan_events = env_bool("WIFIKIT_AWAIT_SCAN_EVENTS", self.await_scan_events);
        self.daemon_startup_ms = env_parse("WIFIKIT_DAEMON_STARTUP_MS", self.daemon_startup_ms);
        self.dhcp_timeout_ms = env_parse("WIFIKIT_DHCP_TIMEOUT_MS", self.dhcp_timeout_ms);
    }

    pub fn scan_settle(&self) -> Duration {
        Duration::from_millis(self.scan_settle_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn daemon_startup(&self) -> Duration {
        Duration::from_millis(self.daemon_startup_ms)
    }

    pub fn dhcp_timeout(&self) -> Duration {
        Duration::from_millis(self.dhcp_timeout_ms)
    }
}
