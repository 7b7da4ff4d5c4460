//! Live websocket connections to the query node and the indexer.
//!
//! Both speak JSON-WSP: a request names a service and a method, and the
//! response carries the answer under `result` (or a `fault`). The request id
//! travels in `mirror` and comes back in `reflection`.

use crate::errors::HarnessError;
use futures::{SinkExt, StreamExt};
use localnet_common::{ServerConfig, ServiceKind};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One JSON-WSP request/response channel. Requests are serialised; the
/// connection is closed exactly once.
pub struct WsRpcConnection {
    service: ServiceKind,
    servicename: &'static str,
    url: String,
    stream: Mutex<Option<WsStream>>,
    next_id: AtomicU64,
}

impl WsRpcConnection {
    pub async fn connect(
        service: ServiceKind,
        endpoint: &ServerConfig,
        servicename: &'static str,
    ) -> Result<Self, HarnessError> {
        let url = endpoint.ws_url();
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| HarnessError::Connection {
                service,
                message: format!("{url}: {err}"),
            })?;
        tracing::debug!(%service, %url, "websocket connected");
        Ok(Self {
            service,
            servicename,
            url,
            stream: Mutex::new(Some(stream)),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn failure(&self, message: impl Into<String>) -> HarnessError {
        HarnessError::Connection {
            service: self.service,
            message: message.into(),
        }
    }

    /// Send `method(args)` and wait for its response.
    pub async fn request(&self, method: &str, args: Value) -> Result<Value, HarnessError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(HarnessError::ConnectionClosed {
            service: self.service,
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "type": "jsonwsp/request",
            "version": "1.0",
            "servicename": self.servicename,
            "methodname": method,
            "args": args,
            "mirror": { "id": id },
        });
        tracing::trace!(service = %self.service, method, id, "request");
        stream
            .send(Message::text(request.to_string()))
            .await
            .map_err(|err| self.failure(format!("send {method}: {err}")))?;

        let response = tokio::time::timeout(RESPONSE_TIMEOUT, async {
            loop {
                let text = match stream.next().await {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Err(self.failure(format!("receive {method}: {err}"))),
                };
                let value: Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(err) => {
                        return Err(self.failure(format!("malformed response to {method}: {err}")));
                    }
                };
                if value.pointer("/reflection/id").and_then(Value::as_u64) == Some(id) {
                    return Ok(Some(value));
                }
                tracing::debug!(service = %self.service, "skipping unrelated message");
            }
        })
        .await
        .map_err(|_| self.failure(format!("no response to {method} within {RESPONSE_TIMEOUT:?}")))??;

        let Some(mut response) = response else {
            *guard = None;
            return Err(HarnessError::ConnectionClosed {
                service: self.service,
            });
        };

        if let Some(fault) = response.get("fault") {
            return Err(self.failure(format!("{method} faulted: {fault}")));
        }
        response
            .get_mut("result")
            .map(Value::take)
            .ok_or_else(|| self.failure(format!("response to {method} has no result")))
    }

    /// Close the socket. Later requests fail with
    /// [`HarnessError::ConnectionClosed`].
    pub async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            if let Err(err) = stream.close(None).await {
                tracing::debug!(service = %self.service, error = %err, "websocket close failed");
            }
            tracing::debug!(service = %self.service, "websocket closed");
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.stream.lock().await.is_none()
    }
}

impl std::fmt::Debug for WsRpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRpcConnection")
            .field("service", &self.service)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Current ledger protocol parameters, as reported by the query node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolParameters(pub Value);

impl ProtocolParameters {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

#[derive(Debug)]
pub struct QueryNodeConnection {
    rpc: WsRpcConnection,
}

impl QueryNodeConnection {
    pub const SERVICE_NAME: &'static str = "ogmios";

    pub async fn connect(endpoint: &ServerConfig) -> Result<Self, HarnessError> {
        let rpc = WsRpcConnection::connect(ServiceKind::QueryNode, endpoint, Self::SERVICE_NAME).await?;
        Ok(Self { rpc })
    }

    pub async fn current_protocol_parameters(&self) -> Result<ProtocolParameters, HarnessError> {
        self.rpc
            .request("Query", json!({ "query": "currentProtocolParameters" }))
            .await
            .map(ProtocolParameters)
    }

    pub fn rpc(&self) -> &WsRpcConnection {
        &self.rpc
    }

    pub async fn close(&self) {
        self.rpc.close().await
    }
}

#[derive(Debug)]
pub struct IndexerConnection {
    rpc: WsRpcConnection,
}

impl IndexerConnection {
    pub const SERVICE_NAME: &'static str = "ogmios-datum-cache";

    pub async fn connect(endpoint: &ServerConfig) -> Result<Self, HarnessError> {
        let rpc = WsRpcConnection::connect(ServiceKind::Indexer, endpoint, Self::SERVICE_NAME).await?;
        Ok(Self { rpc })
    }

    /// Look up datums by hash. The indexer answers with its own result
    /// shape, returned as is.
    pub async fn datums_by_hashes(&self, hashes: &[String]) -> Result<Value, HarnessError> {
        self.rpc
            .request("GetDatumsByHashes", json!({ "hashes": hashes }))
            .await
    }

    pub fn rpc(&self) -> &WsRpcConnection {
        &self.rpc
    }

    pub async fn close(&self) {
        self.rpc.close().await
    }
}
