//! Datum indexer. Ready once it has found its chain intersection, which
//! implies both its query-node and database connections work.

use super::{flags, spawn_until_ready};
use crate::errors::HarnessError;
use crate::process::{ManagedProcess, ReadinessPredicate};
use crate::retry::RetryPolicy;
use localnet_common::{ClusterConfig, ServiceKind};

pub const READY_LINE: &str = "Intersection found";

pub fn args(config: &ClusterConfig) -> Vec<String> {
    let db = &config.database;
    flags([
        ("--server-api", config.indexer.control_api_token.clone()),
        ("--server-port", config.indexer.port.to_string()),
        ("--ogmios-address", config.query_node.host.clone()),
        ("--ogmios-port", config.query_node.port.to_string()),
        ("--db-host", db.host.clone()),
        ("--db-port", db.port.to_string()),
        ("--db-user", db.user.clone()),
        ("--db-password", db.password.clone()),
        ("--db-name", db.dbname.clone()),
    ])
}

pub async fn start(
    config: &ClusterConfig,
    policy: &RetryPolicy,
) -> Result<ManagedProcess, HarnessError> {
    spawn_until_ready(
        ServiceKind::Indexer,
        &config.binaries.indexer,
        &args(config),
        config.indexer.endpoint(),
        &ReadinessPredicate::contains(READY_LINE),
        config.readiness_timeout(),
        policy,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wires_query_node_and_database() {
        let args = args(&ClusterConfig::default());
        let pairs: Vec<(&str, &str)> = args
            .chunks(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
            .collect();
        assert!(pairs.contains(&("--server-port", "10000")));
        assert!(pairs.contains(&("--ogmios-port", "1338")));
        assert!(pairs.contains(&("--db-port", "5433")));
        assert!(pairs.contains(&("--db-name", "localnet")));
        assert_eq!(pairs.len(), 9);
    }
}
