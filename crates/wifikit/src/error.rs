use std::path::PathBuf;

use thiserror::Error;
use wifikit_netlink::NetlinkError;

#[derive(Error, Debug)]
pub enum WifiError {
    #[error(transparent)]
    Netlink(#[from] NetlinkError),

    #[error("no wireless interface found")]
    NoWirelessInterface,

    #[error("failed to write {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {program}: {reason}")]
    ProcessSpawn { program: String, reason: String },

    #[error("setup failed at {stage}: {reason}")]
    PartialSetup { stage: &'static str, reason: String },

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, WifiError>;

impl WifiError {
    pub fn partial(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::PartialSetup {
            stage,
            reason: err.to_string(),
        }
    }

    /// Short stage label for structured failure logs.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Netlink(_) => "netlink",
            Self::NoWirelessInterface => "discover",
            Self::ConfigWrite { .. } => "config",
            Self::ProcessSpawn { .. } => "spawn",
            Self::PartialSetup { stage, .. } => stage,
            Self::InvalidCredentials(_) => "validate",
            Self::Unsupported(_) => "capability",
        }
    }

    /// Transport failures surface only from construction.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Netlink(err) if err.is_fatal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_labels_follow_variant() {
        assert_eq!(WifiError::partial("dhcp server", "exited").stage(), "dhcp server");
        assert_eq!(WifiError::InvalidCredentials("short".into()).stage(), "validate");
        let transport = WifiError::from(NetlinkError::Transport {
            reason: "no nl80211".into(),
        });
        assert!(transport.is_transport());
        assert_eq!(transport.stage(), "netlink");
    }
}
