//! The handle a test body receives once the whole cluster is Ready.

use super::connection::{IndexerConnection, ProtocolParameters, QueryNodeConnection};
use super::used::UsedOutputs;
use crate::errors::HarnessError;
use localnet_common::{ClusterConfig, Wallets};
use uuid::Uuid;

/// Live connections, protocol parameters, funded wallets and the resolved
/// configuration for one run.
#[derive(Debug)]
pub struct RuntimeEnvironment {
    run_id: Uuid,
    config: ClusterConfig,
    query_node: QueryNodeConnection,
    indexer: IndexerConnection,
    protocol_parameters: ProtocolParameters,
    wallets: Wallets,
    used_outputs: UsedOutputs,
}

impl RuntimeEnvironment {
    /// Connect to the query node and indexer and fetch the current
    /// protocol parameters. On failure any opened connection is closed.
    pub async fn connect(
        run_id: Uuid,
        config: ClusterConfig,
        wallets: Wallets,
    ) -> Result<Self, HarnessError> {
        let query_node = QueryNodeConnection::connect(&config.query_node).await?;
        let indexer = match IndexerConnection::connect(&config.indexer.endpoint()).await {
            Ok(indexer) => indexer,
            Err(err) => {
                query_node.close().await;
                return Err(err);
            }
        };
        let protocol_parameters = match query_node.current_protocol_parameters().await {
            Ok(params) => params,
            Err(err) => {
                query_node.close().await;
                indexer.close().await;
                return Err(err);
            }
        };
        tracing::info!(%run_id, wallets = wallets.len(), "runtime environment ready");

        Ok(Self {
            run_id,
            config,
            query_node,
            indexer,
            protocol_parameters,
            wallets,
            used_outputs: UsedOutputs::new(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn query_node(&self) -> &QueryNodeConnection {
        &self.query_node
    }

    pub fn indexer(&self) -> &IndexerConnection {
        &self.indexer
    }

    pub fn protocol_parameters(&self) -> &ProtocolParameters {
        &self.protocol_parameters
    }

    pub fn wallets(&self) -> &Wallets {
        &self.wallets
    }

    pub fn used_outputs(&self) -> &UsedOutputs {
        &self.used_outputs
    }

    /// Close both connections. Idempotent.
    pub async fn close(&self) {
        self.indexer.close().await;
        self.query_node.close().await;
        tracing::debug!(run_id = %self.run_id, "runtime environment closed");
    }
}
