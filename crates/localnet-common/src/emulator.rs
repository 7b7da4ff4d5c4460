//! Messages exchanged with the emulator control service.
//!
//! Responses are adjacently tagged (`{"tag": ..., "contents": ...}`).

use crate::config::ClusterParams;
use crate::distribution::{Amounts, UtxoDistribution};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Body of `POST /start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartClusterRequest {
    pub keys_to_generate: Vec<Amounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_size: Option<u64>,
}

impl StartClusterRequest {
    pub fn new(distribution: &UtxoDistribution, params: &ClusterParams) -> Self {
        Self {
            keys_to_generate: distribution.keys_to_generate(),
            slot_length: params.slot_length,
            epoch_size: params.epoch_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStartupSuccess {
    pub private_keys: Vec<String>,
    pub node_socket_path: String,
    pub node_config_path: String,
    pub keys_directory: String,
}

/// Why the emulator refused to start a cluster. Kept as raw JSON; the
/// emulator's reason vocabulary is not ours to validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureReason(pub serde_json::Value);

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            serde_json::Value::String(reason) => f.write_str(reason),
            serde_json::Value::Object(map) => match map.get("tag").and_then(|t| t.as_str()) {
                Some(tag) => f.write_str(tag),
                None => write!(f, "{}", self.0),
            },
            other => write!(f, "{}", other),
        }
    }
}

/// Response of `POST /start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "contents")]
pub enum ClusterStartupResult {
    ClusterStartupSuccess(ClusterStartupSuccess),
    ClusterStartupFailure(FailureReason),
}

/// Body of `POST /stop`: an empty marker object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopClusterRequest {}

/// Response of `POST /stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "contents")]
pub enum StopClusterResponse {
    StopClusterSuccess,
    StopClusterFailure(FailureReason),
}
