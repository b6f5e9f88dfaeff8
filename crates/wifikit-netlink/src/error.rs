use thiserror::Error;

/// Unified error type for the kernel-facing primitives.
///
/// Carries the interface, operation or stage that failed together with the
/// underlying cause, so callers can log one structured line per failure.
#[derive(Error, Debug)]
pub enum NetlinkError {
    // Transport errors
    #[error("nl80211 transport unavailable: {reason}")]
    Transport { reason: String },

    #[error("Netlink protocol error during {operation}: {reason}")]
    NetlinkProtocol { operation: String, reason: String },

    #[error("Scan failed at {stage}: {reason}")]
    Scan { stage: &'static str, reason: String },

    // Interface errors
    #[error("Interface '{name}' not found. Verify interface exists with 'ip link show'.")]
    InterfaceNotFound { name: String },

    #[error("Failed to get interface index for '{interface}': {reason}")]
    InterfaceIndexError { interface: String, reason: String },

    #[error("Failed to set interface '{interface}' state to {desired_state}: {reason}")]
    SetStateError {
        interface: String,
        desired_state: String,
        reason: String,
    },

    #[error("Failed to add address {address}/{prefix} to interface '{interface}': {reason}")]
    AddAddressError {
        address: String,
        prefix: u8,
        interface: String,
        reason: String,
    },

    #[error("Failed to list addresses for interface '{interface}': {reason}")]
    ListAddressesError { interface: String, reason: String },

    #[error("Failed to remove address {address} from interface '{interface}': {reason}")]
    DeleteAddressError {
        address: String,
        interface: String,
        reason: String,
    },

    // Process errors
    #[error("Failed to read /proc filesystem: {reason}")]
    ProcReadError { reason: String },

    #[error("Failed to signal process {pid} ({name}) with {signal}: {reason}")]
    ProcessSignalError {
        pid: i32,
        name: String,
        signal: String,
        reason: String,
    },

    #[error("Failed to spawn '{program}': {reason}")]
    SpawnError { program: String, reason: String },

    #[error("Process '{name}' still running after {attempts} stop attempts")]
    StopError { name: String, attempts: u32 },

    // Generic errors
    #[error("Invalid argument: {parameter} = '{value}': {reason}")]
    InvalidArgument {
        parameter: String,
        value: String,
        reason: String,
    },

    #[error("Permission denied: {operation}. Root privileges required.")]
    PermissionDenied { operation: String },

    #[error("Operation timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Runtime error: {context}: {reason}")]
    Runtime { context: String, reason: String },
}

pub type Result<T> = std::result::Result<T, NetlinkError>;

impl NetlinkError {
    /// Create an IO error with context
    pub fn io_error(operation: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                operation: operation.into(),
            };
        }
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a netlink protocol error with context
    pub fn netlink_error(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NetlinkProtocol {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a runtime error with context
    pub fn runtime(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Runtime {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn scan(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Scan {
            stage,
            reason: err.to_string(),
        }
    }

    /// True for errors that make the transport unusable for the rest of the
    /// instance's lifetime.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_io_is_promoted() {
        let err = NetlinkError::io_error(
            "writing ip_forward",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, NetlinkError::PermissionDenied { .. }));
    }

    #[test]
    fn only_transport_is_fatal() {
        assert!(NetlinkError::Transport {
            reason: "no nl80211".into()
        }
        .is_fatal());
        assert!(!NetlinkError::scan("dump", "EINTR").is_fatal());
    }
}
