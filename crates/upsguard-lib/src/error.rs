//! Error taxonomy shared by every component
//!
//! Per-deployment errors (telemetry, control plane, local shutdown) are
//! recovered by the poll loop. Configuration and persistence errors abort
//! the process: without durable fencing state a later run could repeat a
//! destructive shutdown.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("UPS at {host} unreachable: {message}")]
    TelemetryUnreachable { host: String, message: String },

    #[error("malformed UPS reading {oid} from {host}: {message}")]
    TelemetryMalformed {
        host: String,
        oid: String,
        message: String,
    },

    #[error("control plane session to {host} failed: {message}")]
    ControlPlaneSession { host: String, message: String },

    #[error("control plane call {operation} on {host} failed: {message}")]
    ControlPlaneApi {
        host: String,
        operation: String,
        message: String,
    },

    #[error("failed to read state file {}: {message}", path.display())]
    PersistenceReadFailed { path: PathBuf, message: String },

    #[error("failed to write state file {}: {message}", path.display())]
    PersistenceWriteFailed { path: PathBuf, message: String },

    #[error("local shutdown command failed: {message}")]
    LocalShutdownFailed { message: String },
}

impl GuardError {
    pub fn config(message: impl Into<String>) -> Self {
        GuardError::Config {
            message: message.into(),
        }
    }

    pub fn unreachable(host: impl Into<String>, message: impl Into<String>) -> Self {
        GuardError::TelemetryUnreachable {
            host: host.into(),
            message: message.into(),
        }
    }

    pub fn malformed(
        host: impl Into<String>,
        oid: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        GuardError::TelemetryMalformed {
            host: host.into(),
            oid: oid.into(),
            message: message.into(),
        }
    }

    pub fn api(
        host: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        GuardError::ControlPlaneApi {
            host: host.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether the error must terminate the process instead of being
    /// recovered at the next poll.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GuardError::Config { .. }
                | GuardError::PersistenceReadFailed { .. }
                | GuardError::PersistenceWriteFailed { .. }
        )
    }

    /// Whether the error came from reading UPS telemetry.
    pub fn is_telemetry(&self) -> bool {
        matches!(
            self,
            GuardError::TelemetryUnreachable { .. } | GuardError::TelemetryMalformed { .. }
        )
    }
}

pub type GuardResult<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(GuardError::config("missing deployments").is_fatal());
        assert!(GuardError::PersistenceWriteFailed {
            path: PathBuf::from("/tmp/state"),
            message: "disk full".into(),
        }
        .is_fatal());

        assert!(!GuardError::unreachable("ups1", "timeout").is_fatal());
        assert!(!GuardError::api("vc", "list_vms", "500").is_fatal());
        assert!(!GuardError::LocalShutdownFailed {
            message: "exit 1".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_telemetry_classification() {
        assert!(GuardError::unreachable("ups1", "timeout").is_telemetry());
        assert!(GuardError::malformed("ups1", ".1.3", "not a number").is_telemetry());
        assert!(!GuardError::config("bad").is_telemetry());
    }

    #[test]
    fn test_display_includes_context() {
        let err = GuardError::PersistenceWriteFailed {
            path: PathBuf::from("/var/lib/upsguard/upsguard.state"),
            message: "read-only file system".into(),
        };
        let text = err.to_string();
        assert!(text.contains("/var/lib/upsguard/upsguard.state"));
        assert!(text.contains("read-only"));
    }
}
