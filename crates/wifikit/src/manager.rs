use tracing::{debug, info, info_span, warn, Span};
use wifikit_netlink::{
    find_wireless_interface, InterfaceController, NetworkRecord, Nl80211Session,
    ProcessSupervisor, ScanWaitPolicy, SYSFS_NET,
};

use crate::backend::{ConnectionStatus, WifiBackend};
use crate::config::WifiConfig;
use crate::error::{Result, WifiError};
use crate::hotspot::{Hotspot, HotspotState};
use crate::station::{validate_credentials, Station};
use crate::system::{NetControl, ProcessControl, WirelessControl};

/// Linux backend over one wireless interface.
///
/// Generic over its three kernel seams so orchestration can run against fakes.
pub struct WifiManager<W, N, P> {
    config: WifiConfig,
    wireless: W,
    net: N,
    process: P,
    span: Span,
    expected_connection: bool,
    hotspot: HotspotState,
}

pub type LinuxWifiManager = WifiManager<Nl80211Session, InterfaceController, ProcessSupervisor>;

impl LinuxWifiManager {
    /// Resolve the interface and open the nl80211 and rtnetlink channels.
    pub fn new(config: WifiConfig) -> Result<Self> {
        let name = match config.interface.clone() {
            Some(name) => name,
            None => find_wireless_interface(std::path::Path::new(SYSFS_NET))?
                .ok_or(WifiError::NoWirelessInterface)?,
        };
        let net = InterfaceController::open(&name)?;
        let wireless = Nl80211Session::open()?;
        info!(interface = %name, ifindex = net.index(), "wifi manager ready");
        Ok(Self::with_parts(config, wireless, net, ProcessSupervisor::new()))
    }
}

impl<W, N, P> WifiManager<W, N, P>
where
    W: WirelessControl,
    N: NetControl,
    P: ProcessControl,
{
    pub fn with_parts(config: WifiConfig, wireless: W, net: N, process: P) -> Self {
        let span = info_span!("wifikit", interface = %net.name());
        Self {
            config,
            wireless,
            net,
            process,
            span,
            expected_connection: false,
            hotspot: HotspotState::default(),
        }
    }

    pub fn config(&self) -> &WifiConfig {
        &self.config
    }

    pub fn interface(&self) -> &str {
        self.net.name()
    }

    pub fn hotspot_state(&self) -> &HotspotState {
        &self.hotspot
    }

    fn scan_policy(&self) -> ScanWaitPolicy {
        ScanWaitPolicy {
            settle: self.config.scan_settle(),
            event_timeout: self.config.scan_timeout(),
            await_events: self.config.await_scan_events,
        }
    }

    fn station(&self) -> Station<'_, N, P> {
        Station {
            config: &self.config,
            net: &self.net,
            process: &self.process,
        }
    }

    fn try_connect(&mut self, ssid: &str, password: &str) -> Result<bool> {
        let visible = self.scan_inner();
        if !visible.iter().any(|net| net.ssid == ssid) {
            info!(ssid, seen = visible.len(), "network not in range");
            return Ok(false);
        }
        validate_credentials(ssid, password)?;
        // Any previous association is torn down from here on.
        let result = self.station().connect(ssid, password);
        self.expected_connection = matches!(result, Ok(true));
        result
    }

    fn scan_inner(&mut self) -> Vec<NetworkRecord> {
        let policy = self.scan_policy();
        let ifindex = self.net.index();
        self.wireless.scan(ifindex, &policy)
    }

    fn supported(&mut self) -> bool {
        if self.process.locate(&self.config.ap_daemon_bin).is_none() {
            debug!(program = %self.config.ap_daemon_bin, "ap daemon not installed");
            return false;
        }
        let ifindex = self.net.index();
        match self.wireless.supports_ap_mode(ifindex) {
            Ok(supported) => supported,
            Err(err) => {
                warn!(operation = "is_hotspot_supported", stage = "capability", error = %err, "AP mode query failed");
                false
            }
        }
    }
}

impl<W, N, P> WifiBackend for WifiManager<W, N, P>
where
    W: WirelessControl,
    N: NetControl,
    P: ProcessControl,
{
    fn scan(&mut self) -> Vec<NetworkRecord> {
        let span = self.span.clone();
        let _enter = span.enter();
        let records = self.scan_inner();
        info!(count = records.len(), "scan complete");
        records
    }

    fn connect(&mut self, ssid: &str, password: Option<&str>) -> bool {
        let span = self.span.clone();
        let _enter = span.enter();
        match self.try_connect(ssid, password.unwrap_or("")) {
            Ok(connected) => connected,
            Err(err) => {
                warn!(operation = "connect", ssid, stage = err.stage(), error = %err, "connect failed");
                false
            }
        }
    }

    fn disconnect(&mut self) -> bool {
        let _enter = self.span.enter();
        self.expected_connection = false;
        match self.station().disconnect() {
            Ok(()) => true,
            Err(err) => {
                warn!(operation = "disconnect", stage = err.stage(), error = %err, "disconnect failed");
                false
            }
        }
    }

    fn status(&self) -> ConnectionStatus {
        let _enter = self.span.enter();
        match self.station().status(self.expected_connection) {
            Ok(status) => status,
            Err(err) => {
                warn!(operation = "status", stage = err.stage(), error = %err, "status query failed");
                ConnectionStatus::Error
            }
        }
    }

    fn create_hotspot(&mut self, ssid: &str, password: Option<&str>) -> bool {
        let span = self.span.clone();
        let _enter = span.enter();
        if !self.supported() {
            warn!(operation = "create_hotspot", ssid, stage = "capability", "AP mode not available");
            return false;
        }

        let password = password.unwrap_or("");
        if let Err(err) = validate_credentials(ssid, password) {
            warn!(operation = "create_hotspot", ssid, stage = err.stage(), error = %err, "rejected");
            return false;
        }

        self.station().teardown();
        self.expected_connection = false;

        let hotspot = Hotspot {
            config: &self.config,
            net: &self.net,
            process: &self.process,
        };
        match hotspot.create(&mut self.hotspot, ssid, password) {
            Ok(()) => true,
            Err(err) => {
                warn!(operation = "create_hotspot", ssid, stage = err.stage(), error = %err, "hotspot setup rolled back");
                false
            }
        }
    }

    fn stop_hotspot(&mut self) -> bool {
        let _enter = self.span.enter();
        let hotspot = Hotspot {
            config: &self.config,
            net: &self.net,
            process: &self.process,
        };
        hotspot.stop(&mut self.hotspot)
    }

    fn is_hotspot_active(&self) -> bool {
        let _enter = self.span.enter();
        let hotspot = Hotspot {
            config: &self.config,
            net: &self.net,
            process: &self.process,
        };
        match hotspot.is_active() {
            Ok(active) => active,
            Err(err) => {
                debug!(error = %err, "process table unreadable");
                false
            }
        }
    }

    fn is_hotspot_supported(&mut self) -> bool {
        let span = self.span.clone();
        let _enter = span.enter();
        self.supported()
    }
}
