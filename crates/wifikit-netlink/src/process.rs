//! Process supervision via the `/proc` filesystem.
//!
//! Finds daemons by executable name, stops them with SIGTERM followed by SIGKILL
//! after a bounded number of polls, and spawns or runs helper programs.

use crate::error::{NetlinkError, Result};
use std::env;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const COMM_MAX: usize = 15;
const RUN_POLL: Duration = Duration::from_millis(50);

/// Process information from `/proc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    /// Kernel `comm` name, truncated to 15 bytes.
    pub name: String,
    /// Command line with NUL separators replaced by spaces.
    pub cmdline: String,
    /// State letter from `/proc/<pid>/stat` (`R`, `S`, `Z`, ...).
    pub state: char,
}

impl ProcessInfo {
    pub fn is_zombie(&self) -> bool {
        self.state == 'Z'
    }

    fn matches(&self, name: &str) -> bool {
        if self.name == name {
            return true;
        }
        if name.len() > COMM_MAX && name.get(..COMM_MAX) == Some(self.name.as_str()) {
            return true;
        }
        self.cmdline
            .split(' ')
            .next()
            .and_then(|argv0| Path::new(argv0).file_name())
            .is_some_and(|base| base == name)
    }
}

/// A daemon started by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcess {
    pub name: String,
    pub pid: i32,
}

/// State letter follows the last `)` since `comm` may itself contain parentheses.
pub fn parse_stat_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().next()?.chars().next()
}

fn program_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

fn signal_name(signal: i32) -> &'static str {
    match signal {
        libc::SIGTERM => "SIGTERM",
        libc::SIGKILL => "SIGKILL",
        _ => "signal",
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Resolve `program` against a `PATH`-style list. Names containing `/` are checked as-is.
pub fn locate_in(program: &str, path_var: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

/// Finds, stops, spawns and waits on OS processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    proc_root: PathBuf,
    stop_attempts: u32,
    stop_interval: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    pub fn with_proc_root(root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: root.into(),
            stop_attempts: 10,
            stop_interval: Duration::from_millis(100),
        }
    }

    /// Number of polls and delay between them after each stop signal.
    pub fn with_stop_policy(mut self, attempts: u32, interval: Duration) -> Self {
        self.stop_attempts = attempts.max(1);
        self.stop_interval = interval;
        self
    }

    pub fn stop_window(&self) -> Duration {
        self.stop_interval * self.stop_attempts * 2
    }

    fn read_process_info(&self, pid: i32) -> Option<ProcessInfo> {
        let dir = self.proc_root.join(pid.to_string());
        let stat = fs::read_to_string(dir.join("stat")).ok()?;
        let state = parse_stat_state(&stat)?;
        let name = fs::read_to_string(dir.join("comm"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let cmdline = fs::read(dir.join("cmdline"))
            .map(|raw| {
                String::from_utf8_lossy(&raw)
                    .split('\0')
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        Some(ProcessInfo {
            pid,
            name,
            cmdline,
            state,
        })
    }

    /// Live (non-zombie) processes whose `comm` or argv[0] basename equals `name`.
    pub fn find_by_name(&self, name: &str) -> Result<Vec<ProcessInfo>> {
        if name.is_empty() {
            return Err(NetlinkError::InvalidArgument {
                parameter: "process name".to_string(),
                value: String::new(),
                reason: "name cannot be empty".to_string(),
            });
        }
        let entries = fs::read_dir(&self.proc_root).map_err(|e| NetlinkError::ProcReadError {
            reason: format!("{}: {}", self.proc_root.display(), e),
        })?;

        let mut matches: Vec<ProcessInfo> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_string_lossy().parse::<i32>().ok())
            .filter_map(|pid| self.read_process_info(pid))
            .filter(|info| !info.is_zombie() && info.matches(name))
            .collect();
        matches.sort_by_key(|info| info.pid);
        Ok(matches)
    }

    pub fn is_running(&self, name: &str) -> Result<bool> {
        Ok(!self.find_by_name(name)?.is_empty())
    }

    pub fn signal_pid(&self, pid: i32, signal: i32) -> Result<()> {
        if unsafe { libc::kill(pid, signal) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        Err(NetlinkError::ProcessSignalError {
            pid,
            name: self
                .read_process_info(pid)
                .map(|info| info.name)
                .unwrap_or_default(),
            signal: signal_name(signal).to_string(),
            reason: err.to_string(),
        })
    }

    /// Reap `pid` if it is an exited child of ours. No-op for foreign processes.
    fn reap(&self, pid: i32) {
        let mut status = 0;
        unsafe {
            libc::waitpid(pid, &mut status, libc::WNOHANG);
        }
    }

    /// True while `pid` exists and is not a zombie.
    pub fn is_alive(&self, pid: i32) -> bool {
        self.reap(pid);
        self.read_process_info(pid)
            .is_some_and(|info| !info.is_zombie())
    }

    fn wait_exit(&self, pid: i32) -> bool {
        for _ in 0..self.stop_attempts {
            if !self.is_alive(pid) {
                return true;
            }
            thread::sleep(self.stop_interval);
        }
        !self.is_alive(pid)
    }

    /// Stop one process: SIGTERM, bounded wait, then SIGKILL. Already-gone is success.
    pub fn terminate_pid(&self, pid: i32, name: &str) -> Result<()> {
        if !self.is_alive(pid) {
            return Ok(());
        }
        for signal in [libc::SIGTERM, libc::SIGKILL] {
            if let Err(err) = self.signal_pid(pid, signal) {
                if !self.is_alive(pid) {
                    return Ok(());
                }
                warn!(pid, name, error = %err, "signal failed");
            }
            if self.wait_exit(pid) {
                debug!(pid, name, signal = signal_name(signal), "process stopped");
                return Ok(());
            }
        }
        Err(NetlinkError::StopError {
            name: name.to_string(),
            attempts: self.stop_attempts,
        })
    }

    /// Stop every live process named `name`. Returns how many were stopped.
    pub fn terminate(&self, name: &str) -> Result<usize> {
        let processes = self.find_by_name(name)?;
        let mut stopped = 0;
        for process in &processes {
            self.terminate_pid(process.pid, name)?;
            stopped += 1;
        }
        if stopped > 0 {
            info!(name, stopped, "processes terminated");
        }
        Ok(stopped)
    }

    /// Start a detached daemon with stdio redirected to `/dev/null`.
    pub fn spawn(&self, program: &str, args: &[String]) -> Result<ManagedProcess> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| NetlinkError::SpawnError {
                program: program.to_string(),
                reason: e.to_string(),
            })?;
        let process = ManagedProcess {
            name: program_name(program),
            pid: child.id() as i32,
        };
        info!(program, pid = process.pid, "process spawned");
        Ok(process)
    }

    /// Run a helper to completion, killing it once `timeout` elapses.
    pub fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<ExitStatus> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| NetlinkError::SpawnError {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(NetlinkError::Timeout {
                        operation: format!("running {}", program),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                Ok(None) => thread::sleep(RUN_POLL),
                Err(e) => return Err(NetlinkError::io_error(format!("waiting on {}", program), e)),
            }
        }
    }

    pub fn locate(&self, program: &str) -> Option<PathBuf> {
        let path_var = env::var("PATH").unwrap_or_else(|_| "/usr/sbin:/usr/bin:/sbin:/bin".into());
        locate_in(program, &path_var)
    }
}
