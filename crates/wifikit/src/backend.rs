use std::fmt;

use serde::Serialize;
use wifikit_netlink::NetworkRecord;

use crate::config::WifiConfig;
use crate::error::Result;

/// Station link status as reported by [`WifiBackend::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Connecting,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Error => "Error",
        };
        f.write_str(label)
    }
}

/// Capability contract shared by every platform backend.
///
/// None of these operations fail loudly: failures collapse into `false`, an empty
/// scan or [`ConnectionStatus::Error`], with details in the log. Calls on one
/// backend must be serialized by the caller.
pub trait WifiBackend {
    fn scan(&mut self) -> Vec<NetworkRecord>;
    /// `None` and `Some("")` both mean an open network.
    fn connect(&mut self, ssid: &str, password: Option<&str>) -> bool;
    fn disconnect(&mut self) -> bool;
    fn status(&self) -> ConnectionStatus;
    fn create_hotspot(&mut self, ssid: &str, password: Option<&str>) -> bool;
    fn stop_hotspot(&mut self) -> bool;
    fn is_hotspot_active(&self) -> bool;
    fn is_hotspot_supported(&mut self) -> bool;
}

/// Backend for the platform this crate was built for.
///
/// # Errors
///
/// Construction errors from the Linux manager (no wireless interface, nl80211
/// unavailable), or `Unsupported` on other platforms.
#[cfg(target_os = "linux")]
pub fn platform_backend(config: WifiConfig) -> Result<Box<dyn WifiBackend>> {
    let manager = crate::manager::LinuxWifiManager::new(config)?;
    Ok(Box::new(manager))
}

#[cfg(not(target_os = "linux"))]
pub fn platform_backend(_config: WifiConfig) -> Result<Box<dyn WifiBackend>> {
    Err(crate::error::WifiError::Unsupported(format!(
        "no wifikit backend for {}",
        std::env::consts::OS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display() {
        assert_eq!(ConnectionStatus::Connected.to_string(), "Connected");
        assert_eq!(ConnectionStatus::Error.to_string(), "Error");
    }
}
