//! Error types for the vSphere crate.
//!
//! Every variant is terminal for the invocation that raised it; nothing here
//! is retried internally. Variants carry the target, requested state or
//! device, and the remote task message where one exists.

use crate::types::{RequestedPowerState, VmPowerState};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum VsphereError {
    /// Endpoint unreachable or the HTTP client could not be built
    #[error("connection failed: {0}")]
    Connection(String),

    /// Login rejected or session no longer valid
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A managed object disappeared or never existed (HTTP 404 / ManagedObjectNotFound)
    #[error("managed object not found: {0}")]
    ObjectNotFound(String),

    #[error("no virtual machine matches {target}")]
    NotFound { target: String },

    #[error("{target} matches {} virtual machines ({}); specify an instance uuid", .matches.len(), .matches.join(", "))]
    AmbiguousTarget { target: String, matches: Vec<String> },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("changing powerState of {vm} to {requested} from {current} is not supported")]
    UnsupportedTransition {
        vm: String,
        current: VmPowerState,
        requested: RequestedPowerState,
    },

    #[error("cannot move {vm} from {current} to {requested}")]
    InvalidState {
        vm: String,
        current: VmPowerState,
        requested: RequestedPowerState,
    },

    #[error("setting boot device classes to \"{boot_classes}\" on {vm} failed: {}", .message.as_deref().unwrap_or("no task message"))]
    BootOrderConfigFailed {
        vm: String,
        boot_classes: String,
        message: Option<String>,
    },

    #[error("changing powerState of {vm} to {requested} failed: {}", .message.as_deref().unwrap_or("no task message"))]
    PowerTransitionFailed {
        vm: String,
        requested: RequestedPowerState,
        message: Option<String>,
    },

    #[error("device {device} on {vm} in unknown state after applying {spec}: {}", .message.as_deref().unwrap_or("backing unchanged"))]
    UnknownDeviceState {
        vm: String,
        device: String,
        spec: String,
        message: Option<String>,
    },

    #[error("virtual device not found on {vm}: {device}")]
    DeviceNotFound { vm: String, device: String },

    /// Non-success HTTP status with the fault body
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl VsphereError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn object_not_found(msg: impl Into<String>) -> Self {
        Self::ObjectNotFound(msg.into())
    }

    pub fn api(status: u16, msg: impl Into<String>) -> Self {
        Self::Api { status, message: msg.into() }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Stable machine-readable code for the automation host.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "ConnectionError",
            Self::Authentication(_) => "AuthenticationError",
            Self::ObjectNotFound(_) => "ObjectNotFound",
            Self::NotFound { .. } => "NotFound",
            Self::AmbiguousTarget { .. } => "AmbiguousTarget",
            Self::InvalidTarget(_) => "InvalidTarget",
            Self::UnsupportedTransition { .. } => "UnsupportedTransition",
            Self::InvalidState { .. } => "InvalidState",
            Self::BootOrderConfigFailed { .. } => "BootOrderConfigFailed",
            Self::PowerTransitionFailed { .. } => "PowerTransitionFailed",
            Self::UnknownDeviceState { .. } => "UnknownDeviceState",
            Self::DeviceNotFound { .. } => "DeviceNotFound",
            Self::Api { .. } => "ApiError",
            Self::Parse(_) => "ParseError",
            Self::Timeout(_) => "Timeout",
            Self::Cancelled(_) => "Cancelled",
        }
    }
}

impl From<VsphereError> for String {
    fn from(e: VsphereError) -> String {
        format!("[{}] {}", e.kind(), e)
    }
}

impl From<reqwest::Error> for VsphereError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(format!("HTTP timeout: {e}"))
        } else if e.is_connect() {
            Self::connection(format!("Connection failed: {e}"))
        } else {
            Self::connection(format!("HTTP error: {e}"))
        }
    }
}

impl From<serde_json::Error> for VsphereError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(format!("JSON parse error: {e}"))
    }
}

/// Convenience alias.
pub type VsphereResult<T> = Result<T, VsphereError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_target_lists_matches() {
        let err = VsphereError::AmbiguousTarget {
            target: "name=web01".into(),
            matches: vec!["vm-10".into(), "vm-77".into()],
        };
        let s = err.to_string();
        assert!(s.contains("2 virtual machines"));
        assert!(s.contains("vm-10, vm-77"));
        assert_eq!(err.kind(), "AmbiguousTarget");
    }

    #[test]
    fn task_failures_surface_remote_message() {
        let err = VsphereError::PowerTransitionFailed {
            vm: "web01 (5011)".into(),
            requested: RequestedPowerState::PoweredOff,
            message: Some("The attempted operation cannot be performed".into()),
        };
        let s = err.to_string();
        assert!(s.contains("poweredOff"));
        assert!(s.contains("cannot be performed"));
    }

    #[test]
    fn string_conversion_carries_kind() {
        let s: String = VsphereError::DeviceNotFound {
            vm: "web01".into(),
            device: "CD/DVD drive 2".into(),
        }
        .into();
        assert!(s.starts_with("[DeviceNotFound]"));
        assert!(s.contains("CD/DVD drive 2"));
    }

    #[test]
    fn unknown_device_state_without_message() {
        let err = VsphereError::UnknownDeviceState {
            vm: "web01".into(),
            device: "CD/DVD drive 1".into(),
            spec: "{}".into(),
            message: None,
        };
        assert!(err.to_string().ends_with("backing unchanged"));
    }
}
