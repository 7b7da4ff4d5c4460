//! Chain-emulator control service: process launch and the HTTP control
//! client.

use super::abandon;
use crate::errors::HarnessError;
use crate::process::ManagedProcess;
use crate::retry::{RetryPolicy, retry_or_give_up};
use localnet_common::{
    ClusterConfig, ClusterStartupResult, ClusterStartupSuccess, ServerConfig, ServiceKind,
    StartClusterRequest, StopClusterRequest, StopClusterResponse,
};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Starting a cluster spins up a whole node; allow for it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP client for the emulator's `/start` and `/stop` endpoints.
#[derive(Debug, Clone)]
pub struct EmulatorClient {
    http: reqwest::Client,
    base_url: String,
}

impl EmulatorClient {
    pub fn new(endpoint: &ServerConfig) -> Result<Self, HarnessError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| HarnessError::Emulator {
                endpoint: "client",
                source,
            })?;
        Ok(Self {
            http,
            base_url: endpoint.http_url(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /stop`. Also the liveness probe: any decodable answer means the
    /// service is accepting requests.
    pub async fn stop_cluster(&self) -> Result<StopClusterResponse, HarnessError> {
        let endpoint = "/stop";
        self.http
            .post(format!("{}{}", self.base_url, endpoint))
            .json(&StopClusterRequest::default())
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|source| HarnessError::Emulator { endpoint, source })?
            .json::<StopClusterResponse>()
            .await
            .map_err(|source| HarnessError::Emulator { endpoint, source })
    }

    /// `POST /start`.
    pub async fn start_cluster(
        &self,
        request: &StartClusterRequest,
    ) -> Result<ClusterStartupResult, HarnessError> {
        let endpoint = "/start";
        self.http
            .post(format!("{}{}", self.base_url, endpoint))
            .json(request)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|source| HarnessError::Emulator { endpoint, source })?
            .json::<ClusterStartupResult>()
            .await
            .map_err(|source| HarnessError::Emulator { endpoint, source })
    }
}

/// Spawn the emulator and probe `/stop` until it answers.
pub async fn start(
    config: &ClusterConfig,
    policy: &RetryPolicy,
) -> Result<(ManagedProcess, EmulatorClient), HarnessError> {
    let endpoint = config.emulator.clone();
    let args = vec!["-p".to_string(), endpoint.port.to_string()];
    let mut process = ManagedProcess::spawn(
        ServiceKind::Emulator,
        &config.binaries.emulator,
        &args,
        Some(endpoint.clone()),
    )?;
    process.forward_output();

    let client = EmulatorClient::new(&endpoint)?;
    let probe = retry_or_give_up(
        policy,
        format!("emulator to answer on {}", client.base_url()),
        || client.stop_cluster(),
    )
    .await;

    match probe {
        Ok(_) => Ok((process, client)),
        Err(err) => Err(abandon(process, policy, err).await),
    }
}

/// Ask the emulator for a cluster funded per `request`.
pub async fn start_cluster(
    client: &EmulatorClient,
    request: &StartClusterRequest,
) -> Result<ClusterStartupSuccess, HarnessError> {
    tracing::info!(
        wallets = request.keys_to_generate.len(),
        "requesting cluster start"
    );
    match client.start_cluster(request).await? {
        ClusterStartupResult::ClusterStartupSuccess(success) => {
            tracing::info!(
                node_socket = %success.node_socket_path,
                keys_directory = %success.keys_directory,
                "cluster started"
            );
            Ok(success)
        }
        ClusterStartupResult::ClusterStartupFailure(reason) => {
            Err(HarnessError::ClusterStartupFailure { reason })
        }
    }
}

/// Cleanup for a started cluster.
pub async fn stop_cluster(client: &EmulatorClient) -> Result<(), HarnessError> {
    match client.stop_cluster().await? {
        StopClusterResponse::StopClusterSuccess => {
            tracing::info!("cluster stopped");
            Ok(())
        }
        StopClusterResponse::StopClusterFailure(reason) => Err(HarnessError::Other(
            anyhow::anyhow!("emulator refused to stop the cluster: {reason}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use localnet_common::{ClusterParams, UtxoDistribution};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    async fn serve(app: Router) -> ServerConfig {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        ServerConfig::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn start_cluster_sends_camel_case_and_decodes_success() {
        let seen = Arc::new(Mutex::new(None::<Value>));
        let record = seen.clone();
        let app = Router::new().route(
            "/start",
            post(move |Json(body): Json<Value>| {
                let record = record.clone();
                async move {
                    *record.lock().unwrap() = Some(body);
                    Json(json!({
                        "tag": "ClusterStartupSuccess",
                        "contents": {
                            "privateKeys": [],
                            "nodeSocketPath": "/tmp/node.socket",
                            "nodeConfigPath": "/tmp/node.config",
                            "keysDirectory": "/tmp/keys"
                        }
                    }))
                }
            }),
        );
        let client = EmulatorClient::new(&serve(app).await).unwrap();
        let dist = UtxoDistribution::uniform(2, vec![1_000_000]);
        let request = StartClusterRequest::new(
            &dist,
            &ClusterParams {
                slot_length: Some(0.1),
                epoch_size: None,
            },
        );

        let success = start_cluster(&client, &request).await.unwrap();
        assert_eq!(success.node_socket_path, "/tmp/node.socket");
        assert_eq!(
            seen.lock().unwrap().clone().unwrap(),
            json!({"keysToGenerate": [[1_000_000], [1_000_000]], "slotLength": 0.1})
        );
    }

    #[tokio::test]
    async fn startup_failure_carries_the_reason() {
        let app = Router::new().route(
            "/start",
            post(|| async {
                Json(json!({
                    "tag": "ClusterStartupFailure",
                    "contents": "NegativeLovelaces"
                }))
            }),
        );
        let client = EmulatorClient::new(&serve(app).await).unwrap();
        let request = StartClusterRequest::new(
            &UtxoDistribution::Single(vec![0]),
            &ClusterParams::default(),
        );
        let err = start_cluster(&client, &request).await.unwrap_err();
        assert!(matches!(err, HarnessError::ClusterStartupFailure { .. }));
        assert_eq!(err.to_string(), "Cluster failed to start: NegativeLovelaces");
    }

    #[tokio::test]
    async fn stop_cluster_maps_failure_to_error() {
        let app = Router::new().route(
            "/stop",
            post(|| async {
                Json(json!({"tag": "StopClusterFailure", "contents": "NotStarted"}))
            }),
        );
        let client = EmulatorClient::new(&serve(app).await).unwrap();
        let err = stop_cluster(&client).await.unwrap_err();
        assert!(err.to_string().contains("NotStarted"));
    }

    #[tokio::test]
    async fn unreachable_emulator_is_a_transport_error() {
        let port = crate::ports::ephemeral_port().unwrap();
        let client = EmulatorClient::new(&ServerConfig::new("127.0.0.1", port)).unwrap();
        let err = client.stop_cluster().await.unwrap_err();
        assert!(matches!(err, HarnessError::Emulator { endpoint: "/stop", .. }));
    }

    #[tokio::test]
    async fn liveness_probe_respects_budget_when_emulator_never_answers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let client = EmulatorClient::new(&ServerConfig::new("127.0.0.1", port)).unwrap();
        let started = std::time::Instant::now();

        let err = retry_or_give_up(&RetryPolicy::DEFAULT, "emulator", || client.stop_cluster())
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::RetryBudgetExceeded { .. }), "{err:?}");
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "probe held for {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn start_gives_up_when_nothing_ever_listens() {
        let mut config = ClusterConfig::default();
        config.emulator = ServerConfig::new("127.0.0.1", crate::ports::ephemeral_port().unwrap());
        config.binaries.emulator = localnet_common::CommandSpec::with_args("sh", ["-c", "exec sleep 30", "emulator"]);
        let policy = RetryPolicy::new(Duration::from_millis(20), Duration::from_millis(200));

        let err = start(&config, &policy).await.unwrap_err();
        assert!(matches!(err, HarnessError::RetryBudgetExceeded { .. }), "{err:?}");
    }
}
