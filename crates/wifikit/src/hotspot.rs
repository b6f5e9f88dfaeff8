//! Access point mode: hostapd, dnsmasq, addressing and NAT on the managed interface.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use wifikit_netlink::iptables::{hotspot_nat_rules, Rule};
use wifikit_netlink::ManagedProcess;

use crate::config::{
    WifiConfig, AP_ADDRESS, AP_NETMASK, AP_PREFIX, DHCP_LEASE, DHCP_POOL_END, DHCP_POOL_START,
};
use crate::error::{Result, WifiError};
use crate::generated::{remove_config, GeneratedConfig};
use crate::station::validate_credentials;
use crate::system::{process_name, DaemonGuard, NetControl, ProcessControl};

const FIREWALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a running hotspot owns.
#[derive(Debug, Clone)]
pub struct ActiveHotspot {
    pub ssid: String,
    pub ap_daemon: ManagedProcess,
    pub dhcp_server: ManagedProcess,
    pub config_paths: Vec<PathBuf>,
    pub upstream: Option<String>,
    pub nat_rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default)]
pub enum HotspotState {
    #[default]
    Inactive,
    Active(ActiveHotspot),
}

impl HotspotState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn config_paths(&self) -> &[PathBuf] {
        match self {
            Self::Active(active) => &active.config_paths,
            Self::Inactive => &[],
        }
    }
}

/// `ssid=` for printable ASCII, `ssid2=` hex for anything else.
fn hostapd_ssid(ssid: &str) -> String {
    if ssid.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        format!("ssid={}", ssid)
    } else {
        let hex: String = ssid.bytes().map(|b| format!("{:02x}", b)).collect();
        format!("ssid2={}", hex)
    }
}

pub fn hostapd_config(interface: &str, ssid: &str, password: &str, channel: u8) -> String {
    let conf = format!(
        "interface={}\ndriver=nl80211\n{}\nhw_mode=g\nchannel={}\nwmm_enabled=1\n",
        interface,
        hostapd_ssid(ssid),
        channel
    );
    if password.is_empty() {
        format!("{conf}auth_algs=1\nignore_broadcast_ssid=0\n")
    } else {
        format!("{conf}wpa=2\nwpa_passphrase={password}\nwpa_key_mgmt=WPA-PSK\nrsn_pairwise=CCMP\n")
    }
}

pub fn dnsmasq_config(interface: &str) -> String {
    format!(
        "interface={}\n\
         bind-interfaces\n\
         listen-address={gw}\n\
         dhcp-range={},{},{},{}\n\
         dhcp-option=3,{gw}\n\
         dhcp-option=6,{gw}\n\
         dhcp-authoritative\n",
        interface,
        DHCP_POOL_START,
        DHCP_POOL_END,
        AP_NETMASK,
        DHCP_LEASE,
        gw = AP_ADDRESS
    )
}

/// Create and stop a hotspot on one interface.
pub struct Hotspot<'a, N: ?Sized, P: ?Sized> {
    pub config: &'a WifiConfig,
    pub net: &'a N,
    pub process: &'a P,
}

impl<'a, N, P> Hotspot<'a, N, P>
where
    N: NetControl + ?Sized,
    P: ProcessControl + ?Sized,
{
    fn ap_daemon(&self) -> &str {
        process_name(&self.config.ap_daemon_bin)
    }

    fn dhcp_server(&self) -> &str {
        process_name(&self.config.dhcp_server_bin)
    }

    pub fn is_active(&self) -> Result<bool> {
        Ok(self.process.is_running(self.ap_daemon())?)
    }

    /// Bring the hotspot up. On error nothing started here is left behind: daemons
    /// are stopped, generated files removed and the interface reset.
    pub fn create(&self, state: &mut HotspotState, ssid: &str, password: &str) -> Result<()> {
        validate_credentials(ssid, password)?;
        if !self.stop(state) {
            return Err(WifiError::partial("stop previous", "daemon still running"));
        }
        for name in [self.ap_daemon(), self.dhcp_server()] {
            if self.process.terminate(name)? > 0 {
                debug!(name, "stray daemon stopped");
            }
        }

        match self.bring_up(ssid, password) {
            Ok(active) => {
                info!(
                    ssid,
                    ap_pid = active.ap_daemon.pid,
                    dhcp_pid = active.dhcp_server.pid,
                    upstream = ?active.upstream,
                    "hotspot started"
                );
                *state = HotspotState::Active(active);
                Ok(())
            }
            Err(err) => {
                self.reset_interface();
                Err(err)
            }
        }
    }

    fn bring_up(&self, ssid: &str, password: &str) -> Result<ActiveHotspot> {
        let iface = self.net.name().to_string();
        let hostapd_conf = GeneratedConfig::write(
            &self.config.scratch_dir,
            &format!("hostapd-{}.conf", iface),
            &hostapd_config(&iface, ssid, password, self.config.hotspot_channel),
        )?;
        let dnsmasq_conf = GeneratedConfig::write(
            &self.config.scratch_dir,
            &format!("dnsmasq-{}.conf", iface),
            &dnsmasq_config(&iface),
        )?;

        self.configure_interface()
            .map_err(|e| WifiError::partial("interface", e))?;

        let ap = self.spawn_guarded(
            &self.config.ap_daemon_bin,
            vec![hostapd_conf.path().display().to_string()],
        )?;
        thread::sleep(self.config.daemon_startup());
        if !ap.is_alive() {
            return Err(WifiError::partial("ap daemon", "exited during startup"));
        }

        let dhcp = self.spawn_guarded(
            &self.config.dhcp_server_bin,
            vec![
                "-k".to_string(),
                format!("--conf-file={}", dnsmasq_conf.path().display()),
            ],
        )?;
        thread::sleep(self.config.daemon_startup());
        if !dhcp.is_alive() {
            return Err(WifiError::partial("dhcp server", "exited during startup"));
        }

        if let Err(err) = self.net.set_ip_forwarding(true) {
            warn!(operation = "create_hotspot", ssid, stage = "ip forwarding", error = %err, "forwarding not enabled");
        }
        let upstream = match self.net.default_route_interface() {
            Ok(upstream) => upstream,
            Err(err) => {
                warn!(operation = "create_hotspot", ssid, stage = "default route", error = %err, "no upstream lookup");
                None
            }
        };
        let nat_rules = match &upstream {
            Some(upstream) => self.install_nat(&iface, upstream),
            None => {
                info!(interface = %iface, "no default route, skipping NAT");
                Vec::new()
            }
        };

        Ok(ActiveHotspot {
            ssid: ssid.to_string(),
            ap_daemon: ap.commit(),
            dhcp_server: dhcp.commit(),
            config_paths: vec![hostapd_conf.keep(), dnsmasq_conf.keep()],
            upstream,
            nat_rules,
        })
    }

    fn spawn_guarded(&self, program: &str, args: Vec<String>) -> Result<DaemonGuard<'a, P>> {
        let daemon = self
            .process
            .spawn(program, &args)
            .map_err(|e| WifiError::ProcessSpawn {
                program: program.to_string(),
                reason: e.to_string(),
            })?;
        Ok(DaemonGuard::new(self.process, daemon))
    }

    fn configure_interface(&self) -> wifikit_netlink::Result<()> {
        self.net.set_link(false)?;
        self.net.flush_addresses()?;
        self.net.add_ipv4(AP_ADDRESS, AP_PREFIX)?;
        self.net.set_link(true)
    }

    fn reset_interface(&self) {
        let steps = [
            ("flush", self.net.flush_addresses()),
            ("down", self.net.set_link(false)),
            ("up", self.net.set_link(true)),
        ];
        for (step, result) in steps {
            if let Err(err) = result {
                warn!(interface = %self.net.name(), step, error = %err, "interface reset step failed");
            }
        }
    }

    fn install_nat(&self, ap: &str, upstream: &str) -> Vec<Rule> {
        let mut added = Vec::new();
        for rule in hotspot_nat_rules(ap, upstream) {
            match self
                .process
                .run(&self.config.firewall_bin, &rule.append_args(), FIREWALL_TIMEOUT)
            {
                Ok(true) => added.push(rule),
                Ok(false) => warn!(stage = "nat", args = ?rule.append_args(), "firewall rule rejected"),
                Err(err) => warn!(stage = "nat", error = %err, "firewall unavailable"),
            }
        }
        debug!(rules = added.len(), upstream, "NAT rules installed");
        added
    }

    fn remove_nat(&self, rules: &[Rule]) {
        for rule in rules {
            match self
                .process
                .run(&self.config.firewall_bin, &rule.delete_args(), FIREWALL_TIMEOUT)
            {
                Ok(true) => {}
                Ok(false) => debug!(args = ?rule.delete_args(), "firewall rule already gone"),
                Err(err) => warn!(stage = "nat", error = %err, "firewall rule not removed"),
            }
        }
    }

    /// Tear the hotspot down. Always leaves `state` inactive; `false` only when a
    /// daemon could not be stopped.
    pub fn stop(&self, state: &mut HotspotState) -> bool {
        let active = match std::mem::take(state) {
            HotspotState::Inactive => return true,
            HotspotState::Active(active) => active,
        };

        let mut stopped = true;
        for daemon in [&active.ap_daemon, &active.dhcp_server] {
            if let Err(err) = self.process.terminate_pid(daemon.pid, &daemon.name) {
                warn!(operation = "stop_hotspot", stage = "terminate", name = %daemon.name, error = %err, "daemon still running");
                stopped = false;
            }
        }
        for path in &active.config_paths {
            remove_config(path);
        }
        self.remove_nat(&active.nat_rules);
        if let Err(err) = self.net.set_ip_forwarding(false) {
            warn!(operation = "stop_hotspot", stage = "ip forwarding", error = %err, "forwarding not disabled");
        }
        self.reset_interface();
        info!(ssid = %active.ssid, "hotspot stopped");
        stopped
    }
}
