//! Typed error hierarchy for the cluster orchestrator.
//!
//! Every variant is startup-fatal for the run that raised it. Errors raised
//! while tearing down are logged and swallowed, so the error a caller sees is
//! always the first fatal cause.

use localnet_common::{FailureReason, KeyDecodeError, PortClaim, ServiceKind};
use std::time::Duration;
use thiserror::Error;

fn describe_claims(claims: &[PortClaim]) -> String {
    claims
        .iter()
        .map(|claim| claim.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Ports unavailable, nothing was started: {}", describe_claims(.conflicts))]
    PortConflict { conflicts: Vec<PortClaim> },

    #[error("Failed to spawn {service} (`{program}`): {source}")]
    ProcessSpawn {
        service: ServiceKind,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} exited before becoming ready ({status})")]
    ProcessExitedEarly { service: ServiceKind, status: String },

    #[error("{service} did not become ready within {timeout:?}")]
    ReadinessTimeout {
        service: ServiceKind,
        timeout: Duration,
    },

    #[error("`{command}` failed for {service} ({status}): {stderr}")]
    CommandFailed {
        service: ServiceKind,
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Cluster failed to start: {reason}")]
    ClusterStartupFailure { reason: FailureReason },

    #[error(
        "Could not decode wallet keys returned by the emulator. This is an internal \
         consistency error, please report it: {source}"
    )]
    KeyDecode {
        #[source]
        source: KeyDecodeError,
    },

    #[error("Gave up waiting for {what}: {source}")]
    RetryBudgetExceeded {
        what: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Emulator request {endpoint} failed: {source}")]
    Emulator {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Connection to {service} failed: {message}")]
    Connection {
        service: ServiceKind,
        message: String,
    },

    #[error("Connection to {service} is closed")]
    ConnectionClosed { service: ServiceKind },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Test body failed: {0:#}")]
    Body(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HarnessError {
    /// The service this error is attributed to, if any.
    pub fn service(&self) -> Option<ServiceKind> {
        match self {
            HarnessError::ProcessSpawn { service, .. }
            | HarnessError::ProcessExitedEarly { service, .. }
            | HarnessError::ReadinessTimeout { service, .. }
            | HarnessError::CommandFailed { service, .. }
            | HarnessError::Connection { service, .. }
            | HarnessError::ConnectionClosed { service } => Some(*service),
            HarnessError::ClusterStartupFailure { .. }
            | HarnessError::KeyDecode { .. }
            | HarnessError::Emulator { .. } => Some(ServiceKind::Emulator),
            _ => None,
        }
    }
}
