//! Query node: the chain-query websocket service in front of the emulated
//! node.

use super::{flags, spawn_until_ready};
use crate::errors::HarnessError;
use crate::process::{ManagedProcess, ReadinessPredicate};
use crate::retry::RetryPolicy;
use localnet_common::{ClusterConfig, ClusterStartupSuccess, ServiceKind};

pub fn args(config: &ClusterConfig, cluster: &ClusterStartupSuccess) -> Vec<String> {
    flags([
        ("--host", config.query_node.host.clone()),
        ("--port", config.query_node.port.to_string()),
        ("--node-socket", cluster.node_socket_path.clone()),
        ("--node-config", cluster.node_config_path.clone()),
    ])
}

/// Start the query node against the node the emulator just launched. Its
/// first line of output means it is up.
pub async fn start(
    config: &ClusterConfig,
    cluster: &ClusterStartupSuccess,
    policy: &RetryPolicy,
) -> Result<ManagedProcess, HarnessError> {
    spawn_until_ready(
        ServiceKind::QueryNode,
        &config.binaries.query_node,
        &args(config, cluster),
        config.query_node.clone(),
        &ReadinessPredicate::AnyLine,
        config.readiness_timeout(),
        policy,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_node_paths_from_the_cluster() {
        let cluster = ClusterStartupSuccess {
            private_keys: vec![],
            node_socket_path: "/tmp/c/node.socket".into(),
            node_config_path: "/tmp/c/node.config".into(),
            keys_directory: "/tmp/c/keys".into(),
        };
        assert_eq!(
            args(&ClusterConfig::default(), &cluster),
            vec![
                "--host",
                "127.0.0.1",
                "--port",
                "1338",
                "--node-socket",
                "/tmp/c/node.socket",
                "--node-config",
                "/tmp/c/node.config"
            ]
        );
    }
}
