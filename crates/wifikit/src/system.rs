//! Traits the orchestrators depend on, with the kernel-backed implementations.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;
use wifikit_netlink::{
    default_route_interface, scan_networks, set_ip_forwarding, InterfaceController, LinkState,
    ManagedProcess, NetworkRecord, Nl80211Session, ProcessSupervisor, ScanWaitPolicy,
    PROC_IP_FORWARD, PROC_ROUTE,
};

pub use wifikit_netlink::Result as NlResult;

/// Wireless control channel (nl80211).
pub trait WirelessControl {
    /// One scan; failures are logged and produce an empty list.
    fn scan(&mut self, ifindex: u32, policy: &ScanWaitPolicy) -> Vec<NetworkRecord>;
    fn supports_ap_mode(&mut self, ifindex: u32) -> NlResult<bool>;
}

/// The managed interface plus host-wide IPv4 routing knobs.
pub trait NetControl {
    fn name(&self) -> &str;
    fn index(&self) -> u32;
    fn link_state(&self) -> NlResult<LinkState>;
    fn set_link(&self, up: bool) -> NlResult<()>;
    fn flush_addresses(&self) -> NlResult<()>;
    fn add_ipv4(&self, address: Ipv4Addr, prefix: u8) -> NlResult<()>;
    fn has_ipv4(&self) -> NlResult<bool>;
    fn set_ip_forwarding(&self, enabled: bool) -> NlResult<()>;
    /// Interface of the default route, ignoring the managed interface.
    fn default_route_interface(&self) -> NlResult<Option<String>>;
}

/// Process table access and child process management.
pub trait ProcessControl {
    fn is_running(&self, name: &str) -> NlResult<bool>;
    fn terminate(&self, name: &str) -> NlResult<usize>;
    fn terminate_pid(&self, pid: i32, name: &str) -> NlResult<()>;
    fn is_alive(&self, pid: i32) -> bool;
    fn spawn(&self, program: &str, args: &[String]) -> NlResult<ManagedProcess>;
    /// Run to completion; `Ok(true)` on a zero exit status.
    fn run(&self, program: &str, args: &[String], timeout: Duration) -> NlResult<bool>;
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

impl WirelessControl for Nl80211Session {
    fn scan(&mut self, ifindex: u32, policy: &ScanWaitPolicy) -> Vec<NetworkRecord> {
        scan_networks(self, ifindex, policy)
    }

    fn supports_ap_mode(&mut self, ifindex: u32) -> NlResult<bool> {
        Nl80211Session::supports_ap_mode(self, ifindex)
    }
}

impl NetControl for InterfaceController {
    fn name(&self) -> &str {
        InterfaceController::name(self)
    }

    fn index(&self) -> u32 {
        InterfaceController::index(self)
    }

    fn link_state(&self) -> NlResult<LinkState> {
        InterfaceController::link_state(self)
    }

    fn set_link(&self, up: bool) -> NlResult<()> {
        InterfaceController::set_link(self, up)
    }

    fn flush_addresses(&self) -> NlResult<()> {
        InterfaceController::flush_addresses(self)
    }

    fn add_ipv4(&self, address: Ipv4Addr, prefix: u8) -> NlResult<()> {
        InterfaceController::add_ipv4(self, address, prefix)
    }

    fn has_ipv4(&self) -> NlResult<bool> {
        InterfaceController::has_ipv4(self)
    }

    fn set_ip_forwarding(&self, enabled: bool) -> NlResult<()> {
        set_ip_forwarding(Path::new(PROC_IP_FORWARD), enabled)
    }

    fn default_route_interface(&self) -> NlResult<Option<String>> {
        default_route_interface(Path::new(PROC_ROUTE), InterfaceController::name(self))
    }
}

impl ProcessControl for ProcessSupervisor {
    fn is_running(&self, name: &str) -> NlResult<bool> {
        ProcessSupervisor::is_running(self, name)
    }

    fn terminate(&self, name: &str) -> NlResult<usize> {
        ProcessSupervisor::terminate(self, name)
    }

    fn terminate_pid(&self, pid: i32, name: &str) -> NlResult<()> {
        ProcessSupervisor::terminate_pid(self, pid, name)
    }

    fn is_alive(&self, pid: i32) -> bool {
        ProcessSupervisor::is_alive(self, pid)
    }

    fn spawn(&self, program: &str, args: &[String]) -> NlResult<ManagedProcess> {
        ProcessSupervisor::spawn(self, program, args)
    }

    fn run(&self, program: &str, args: &[String], timeout: Duration) -> NlResult<bool> {
        ProcessSupervisor::run(self, program, args, timeout).map(|status| status.success())
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        ProcessSupervisor::locate(self, program)
    }
}

/// Scoped ownership of a spawned daemon.
///
/// Dropping an armed guard stops the process, so every early return during a
/// multi-stage setup tears down what was already started.
pub struct DaemonGuard<'a, P: ProcessControl + ?Sized> {
    process: &'a P,
    daemon: ManagedProcess,
    armed: bool,
}

impl<'a, P: ProcessControl + ?Sized> DaemonGuard<'a, P> {
    pub fn new(process: &'a P, daemon: ManagedProcess) -> Self {
        Self {
            process,
            daemon,
            armed: true,
        }
    }

    pub fn pid(&self) -> i32 {
        self.daemon.pid
    }

    pub fn is_alive(&self) -> bool {
        self.process.is_alive(self.daemon.pid)
    }

    /// Setup succeeded; the daemon outlives the guard.
    pub fn commit(mut self) -> ManagedProcess {
        self.armed = false;
        self.daemon.clone()
    }
}

impl<P: ProcessControl + ?Sized> Drop for DaemonGuard<'_, P> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let daemon = &self.daemon;
        if let Err(err) = self.process.terminate_pid(daemon.pid, &daemon.name) {
            warn!(pid = daemon.pid, name = %daemon.name, error = %err, "rollback stop failed");
        }
    }
}

/// Executable name used for `/proc` lookups, from a bare name or a path.
pub fn process_name(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        stopped: RefCell<Vec<i32>>,
    }

    impl ProcessControl for Recorder {
        fn is_running(&self, _name: &str) -> NlResult<bool> {
            Ok(false)
        }
        fn terminate(&self, _name: &str) -> NlResult<usize> {
            Ok(0)
        }
        fn terminate_pid(&self, pid: i32, _name: &str) -> NlResult<()> {
            self.stopped.borrow_mut().push(pid);
            Ok(())
        }
        fn is_alive(&self, pid: i32) -> bool {
            !self.stopped.borrow().contains(&pid)
        }
        fn spawn(&self, program: &str, _args: &[String]) -> NlResult<ManagedProcess> {
            Ok(ManagedProcess {
                name: program.to_string(),
                pid: 1,
            })
        }
        fn run(&self, _program: &str, _args: &[String], _timeout: Duration) -> NlResult<bool> {
            Ok(true)
        }
        fn locate(&self, _program: &str) -> Option<PathBuf> {
            None
        }
    }

    fn daemon(pid: i32) -> ManagedProcess {
        ManagedProcess {
            name: "hostapd".into(),
            pid,
        }
    }

    #[test]
    fn dropped_guard_stops_daemon() {
        let rec = Recorder::default();
        {
            let guard = DaemonGuard::new(&rec, daemon(41));
            assert!(guard.is_alive());
        }
        assert_eq!(*rec.stopped.borrow(), vec![41]);
    }

    #[test]
    fn committed_guard_leaves_daemon_running() {
        let rec = Recorder::default();
        let kept = DaemonGuard::new(&rec, daemon(42)).commit();
        assert_eq!(kept.pid, 42);
        assert!(rec.stopped.borrow().is_empty());
    }

    #[test]
    fn process_name_strips_directories() {
        assert_eq!(process_name("/usr/sbin/hostapd"), "hostapd");
        assert_eq!(process_name("dnsmasq"), "dnsmasq");
    }
}
