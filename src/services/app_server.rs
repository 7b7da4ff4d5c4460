//! Optional application server, ready once it reports a working query-node
//! connection.

use super::{flags, spawn_until_ready};
use crate::errors::HarnessError;
use crate::process::{ManagedProcess, ReadinessPredicate};
use crate::retry::RetryPolicy;
use localnet_common::{ClusterConfig, ServerConfig, ServiceKind};

pub const READY_LINE: &str = "Successfully connected to Ogmios";

pub fn args(config: &ClusterConfig, endpoint: &ServerConfig) -> Vec<String> {
    flags([
        ("--port", endpoint.port.to_string()),
        ("--ogmios-host", config.query_node.host.clone()),
        ("--ogmios-port", config.query_node.port.to_string()),
    ])
}

pub async fn start(
    config: &ClusterConfig,
    endpoint: &ServerConfig,
    policy: &RetryPolicy,
) -> Result<ManagedProcess, HarnessError> {
    spawn_until_ready(
        ServiceKind::AppServer,
        &config.binaries.app_server,
        &args(config, endpoint),
        endpoint.clone(),
        &ReadinessPredicate::contains(READY_LINE),
        config.readiness_timeout(),
        policy,
    )
    .await
}
