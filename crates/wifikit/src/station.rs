//! Station mode: supplicant plus DHCP client on the managed interface.

use std::thread;

use tracing::{debug, info, warn};

use crate::backend::ConnectionStatus;
use crate::config::WifiConfig;
use crate::error::{Result, WifiError};
use crate::generated::GeneratedConfig;
use crate::system::{process_name, DaemonGuard, NetControl, ProcessControl};

/// SSID must be 1-32 bytes with no control characters. Passphrases, when present,
/// 8-63 printable ASCII without `"`.
pub fn validate_credentials(ssid: &str, password: &str) -> Result<()> {
    if ssid.is_empty() || ssid.len() > 32 {
        return Err(WifiError::InvalidCredentials(format!(
            "SSID must be 1-32 bytes, got {}",
            ssid.len()
        )));
    }
    if ssid.chars().any(char::is_control) {
        return Err(WifiError::InvalidCredentials(
            "SSID must not contain control characters".to_string(),
        ));
    }
    if password.is_empty() {
        return Ok(());
    }
    if !(8..=63).contains(&password.len()) {
        return Err(WifiError::InvalidCredentials(
            "passphrase must be 8-63 characters".to_string(),
        ));
    }
    if !password.bytes().all(|b| (0x20..0x7f).contains(&b) && b != b'"') {
        return Err(WifiError::InvalidCredentials(
            "passphrase must be printable ASCII without '\"'".to_string(),
        ));
    }
    Ok(())
}

/// Quoted when printable and quote-free, raw hex otherwise.
fn supplicant_ssid(ssid: &str) -> String {
    let printable = ssid.bytes().all(|b| (0x20..0x7f).contains(&b) && b != b'"');
    if printable {
        format!("\"{}\"", ssid)
    } else {
        ssid.bytes().map(|b| format!("{:02x}", b)).collect()
    }
}

pub fn supplicant_config(config: &WifiConfig, ssid: &str, password: &str) -> String {
    let mut out = format!(
        "ctrl_interface={}\nupdate_config=0\n\nnetwork={{\n    ssid={}\n",
        config.ctrl_interface_dir.display(),
        supplicant_ssid(ssid)
    );
    if password.is_empty() {
        out.push_str("    key_mgmt=NONE\n");
    } else {
        out.push_str("    key_mgmt=WPA-PSK\n");
        out.push_str(&format!("    psk=\"{}\"\n", password));
    }
    out.push_str("}\n");
    out
}

/// Connect, disconnect and status for one interface.
pub struct Station<'a, N: ?Sized, P: ?Sized> {
    pub config: &'a WifiConfig,
    pub net: &'a N,
    pub process: &'a P,
}

impl<'a, N, P> Station<'a, N, P>
where
    N: NetControl + ?Sized,
    P: ProcessControl + ?Sized,
{
    fn supplicant(&self) -> &str {
        process_name(&self.config.supplicant_bin)
    }

    fn config_name(&self) -> String {
        format!("wpa_supplicant-{}.conf", self.net.name())
    }

    /// Associate and lease an address. `Ok(false)` when no IPv4 address shows up;
    /// in that case the supplicant started here has already been stopped.
    pub fn connect(&self, ssid: &str, password: &str) -> Result<bool> {
        validate_credentials(ssid, password)?;
        let iface = self.net.name().to_string();

        let generated = GeneratedConfig::write(
            &self.config.scratch_dir,
            &self.config_name(),
            &supplicant_config(self.config, ssid, password),
        )?;

        let stopped = self.process.terminate(self.supplicant())?;
        if stopped > 0 {
            debug!(stopped, "previous supplicant stopped");
        }
        self.release_lease();
        self.net
            .flush_addresses()
            .map_err(|e| WifiError::partial("flush", e))?;

        let conf_path = generated.path().display().to_string();
        let args = vec![
            "-i".to_string(),
            iface.clone(),
            "-c".to_string(),
            conf_path,
            "-D".to_string(),
            "nl80211,wext".to_string(),
        ];
        let daemon = self
            .process
            .spawn(&self.config.supplicant_bin, &args)
            .map_err(|e| WifiError::ProcessSpawn {
                program: self.config.supplicant_bin.clone(),
                reason: e.to_string(),
            })?;
        let supplicant = DaemonGuard::new(self.process, daemon);

        thread::sleep(self.config.daemon_startup());
        if !supplicant.is_alive() {
            return Err(WifiError::partial("supplicant", "exited during startup"));
        }

        let dhcp_args = vec!["-1".to_string(), iface.clone()];
        match self.process.run(
            &self.config.dhcp_client_bin,
            &dhcp_args,
            self.config.dhcp_timeout(),
        ) {
            Ok(true) => debug!(interface = %iface, "dhcp lease acquired"),
            Ok(false) => warn!(operation = "connect", ssid, stage = "dhcp", "dhcp client failed"),
            Err(err) => {
                warn!(operation = "connect", ssid, stage = "dhcp", error = %err, "dhcp client failed")
            }
        }
        drop(generated);

        if self.net.has_ipv4()? {
            let daemon = supplicant.commit();
            info!(ssid, pid = daemon.pid, "connected");
            Ok(true)
        } else {
            warn!(operation = "connect", ssid, stage = "address", "no IPv4 address after dhcp");
            Ok(false)
        }
    }

    /// Stop the supplicant and lease without touching the link.
    pub fn teardown(&self) {
        match self.process.terminate(self.supplicant()) {
            Ok(0) => {}
            Ok(stopped) => debug!(stopped, "supplicant stopped"),
            Err(err) => warn!(operation = "disconnect", stage = "supplicant", error = %err, "supplicant stop failed"),
        }
        self.release_lease();
    }

    fn release_lease(&self) {
        let args = vec!["-r".to_string(), self.net.name().to_string()];
        if let Err(err) =
            self.process
                .run(&self.config.dhcp_client_bin, &args, self.config.dhcp_timeout())
        {
            debug!(error = %err, "dhcp release skipped");
        }
    }

    /// Tear down and bounce the link. Fails only when the link toggle fails.
    pub fn disconnect(&self) -> Result<()> {
        self.teardown();
        self.net.set_link(false)?;
        self.net.set_link(true)?;
        info!(interface = %self.net.name(), "disconnected");
        Ok(())
    }

    /// `expected` is whether this manager believes a connection is established.
    pub fn status(&self, expected: bool) -> Result<ConnectionStatus> {
        let link = self.net.link_state()?;
        if !link.up {
            return Ok(ConnectionStatus::Disconnected);
        }
        if !self.net.has_ipv4()? {
            return Ok(ConnectionStatus::Connecting);
        }
        let supplicant = self.process.is_running(self.supplicant())?;
        Ok(match (supplicant, link.running, expected) {
            (true, true, _) => ConnectionStatus::Connected,
            (true, false, _) => ConnectionStatus::Connecting,
            (false, _, true) => ConnectionStatus::Error,
            (false, _, false) => ConnectionStatus::Disconnected,
        })
    }
}
