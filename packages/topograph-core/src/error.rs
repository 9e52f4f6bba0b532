//! Error types for the discovery engine.
//!
//! Job-level failures are `DiscoveryError`s. Per-device failures are plain
//! data (`DeviceError`) because they never abort sibling work.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jobs::JobStatus;

/// Result alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    /// Bad mode/method/parameter combination; the job is never created
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job ID already in use: {0}")]
    DuplicateJobId(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Result '{kind}' is not ready yet (job is {status})")]
    ResultNotReady { kind: String, status: JobStatus },

    #[error("Result '{kind}' is never produced by mode '{mode}'")]
    ResultUnavailable { kind: String, mode: String },

    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Unexpected fault inside a pipeline; fails the whole job
    #[error("Internal fault: {0}")]
    InternalFault(String),
}

impl DiscoveryError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalFault(message.into())
    }
}

/// Failure class recorded against a single device or address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceErrorKind {
    /// Every credential was rejected
    AuthExhausted,
    /// Connection refused, reset or timed out
    Unreachable,
    /// The adapter returned output that could not be interpreted
    ParseFailure,
    /// A neighbor advertised no address and its name did not resolve
    Unresolved,
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceErrorKind::AuthExhausted => write!(f, "auth_exhausted"),
            DeviceErrorKind::Unreachable => write!(f, "unreachable"),
            DeviceErrorKind::ParseFailure => write!(f, "parse_failure"),
            DeviceErrorKind::Unresolved => write!(f, "unresolved"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceError {
    pub target: String,
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(
        target: impl Into<String>,
        kind: DeviceErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.target, self.kind, self.message)
    }
}
