//! One scan: trigger, wait for completion, dump, decode.

use crate::bss::{parse_bss, NetworkRecord};
use crate::error::{NetlinkError, Result};
use crate::nl80211::{Nl80211Session, ScanEvents, ScanWait};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// How the coordinator waits between trigger and dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWaitPolicy {
    /// Fixed delay used when completion events are unavailable or disabled.
    pub settle: Duration,
    /// Upper bound on the completion-event wait.
    pub event_timeout: Duration,
    pub await_events: bool,
}

impl Default for ScanWaitPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(3000),
            event_timeout: Duration::from_millis(10_000),
            await_events: true,
        }
    }
}

/// Accumulates records from a multi-message dump.
///
/// Lives for exactly one scan call. SSIDs are unique in the output: the first
/// record seen for an SSID wins and records with an empty SSID are dropped.
#[derive(Debug, Default)]
pub struct ScanSession {
    records: Vec<NetworkRecord>,
    seen: HashSet<String>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one BSS nest and keep it if its SSID is new.
    pub fn absorb(&mut self, bss: &[u8]) {
        let Some(record) = parse_bss(bss) else {
            return;
        };
        self.push(record);
    }

    pub fn push(&mut self, record: NetworkRecord) {
        if record.ssid.is_empty() || self.seen.contains(&record.ssid) {
            return;
        }
        self.seen.insert(record.ssid.clone());
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<NetworkRecord> {
        self.records
    }
}

/// Run one scan, propagating the first failing stage.
pub fn try_scan(
    session: &mut Nl80211Session,
    ifindex: u32,
    policy: &ScanWaitPolicy,
) -> Result<Vec<NetworkRecord>> {
    let mut events = if policy.await_events {
        match ScanEvents::subscribe() {
            Ok(events) => Some(events),
            Err(err) => {
                debug!(ifindex, error = %err, "scan events unavailable, using settle delay");
                None
            }
        }
    } else {
        None
    };

    session
        .trigger_scan(ifindex)
        .map_err(|e| NetlinkError::scan("trigger", e))?;

    match events.as_mut() {
        Some(events) => match events.wait(ifindex, policy.event_timeout) {
            ScanWait::Completed => debug!(ifindex, "scan completed"),
            ScanWait::Aborted => debug!(ifindex, "scan aborted, dumping cached results"),
            ScanWait::TimedOut => debug!(
                ifindex,
                timeout_ms = policy.event_timeout.as_millis() as u64,
                "no scan completion event, dumping anyway"
            ),
        },
        None => thread::sleep(policy.settle),
    }

    let mut scan = ScanSession::new();
    session
        .dump_scan(ifindex, |bss| scan.absorb(bss))
        .map_err(|e| NetlinkError::scan("dump", e))?;
    debug!(ifindex, networks = scan.len(), "scan dump decoded");
    Ok(scan.into_records())
}

/// Run one scan; failures are logged and yield an empty list.
pub fn scan_networks(
    session: &mut Nl80211Session,
    ifindex: u32,
    policy: &ScanWaitPolicy,
) -> Vec<NetworkRecord> {
    match try_scan(session, ifindex, policy) {
        Ok(records) => records,
        Err(err) => {
            let stage = match &err {
                NetlinkError::Scan { stage, .. } => *stage,
                _ => "unknown",
            };
            warn!(operation = "scan", ifindex, stage, error = %err, "scan failed");
            Vec::new()
        }
    }
}
