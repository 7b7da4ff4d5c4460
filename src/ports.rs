//! Port probing: preflight before anything is spawned, and confirmation that
//! a stopped service has actually released its listener.
//!
//! Signal delivery is not synchronous with socket release, so "the process
//! was interrupted" never implies "the port is free".

use crate::errors::HarnessError;
use crate::retry::{RetryPolicy, retry_or_give_up};
use localnet_common::{ClusterConfig, PortClaim, ServiceKind};
use std::collections::HashMap;
use std::net::TcpListener;

/// Whether a new listener could bind `host:port` right now. The probe
/// listener is closed before returning.
pub fn is_port_free(host: &str, port: u16) -> bool {
    match TcpListener::bind((host, port)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(err) => {
            tracing::trace!(host, port, error = %err, "port probe failed to bind");
            false
        }
    }
}

/// Reject the run if any configured port is occupied or claimed by two
/// services. Every offending service is reported, not just the first.
pub fn preflight(config: &ClusterConfig) -> Result<(), HarnessError> {
    let mut claimed: HashMap<u16, ServiceKind> = HashMap::new();
    let mut conflicts: Vec<PortClaim> = Vec::new();

    for claim in config.port_claims() {
        if let Some(owner) = claimed.get(&claim.port) {
            tracing::warn!(
                service = %claim.service,
                port = claim.port,
                owner = %owner,
                "port configured for two services"
            );
            conflicts.push(claim);
            continue;
        }
        claimed.insert(claim.port, claim.service);

        if !is_port_free(&claim.host, claim.port) {
            tracing::warn!(service = %claim.service, host = %claim.host, port = claim.port, "port already in use");
            conflicts.push(claim);
        }
    }

    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::PortConflict { conflicts })
    }
}

/// Block until `host:port` can be bound again, within the policy's budget.
pub async fn wait_until_free(
    service: ServiceKind,
    host: &str,
    port: u16,
    policy: &RetryPolicy,
) -> Result<(), HarnessError> {
    retry_or_give_up(
        policy,
        format!("{service} to release {host}:{port}"),
        || async {
            if is_port_free(host, port) {
                Ok(())
            } else {
                Err(anyhow::anyhow!("{host}:{port} is still bound"))
            }
        },
    )
    .await
}

/// Ask the OS for a currently unused port on the loopback interface.
pub fn ephemeral_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}
