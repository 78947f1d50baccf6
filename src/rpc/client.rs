//! Per-node RPC client: the `NodeRpc` trait and its JSON-RPC/HTTP
//! implementation. One trait impl per transport; the aggregator in
//! `multi.rs` only ever sees `Arc<dyn NodeRpc>` snapshots.

use crate::rpc::error::{RpcError, RpcResult};
use crate::rpc::types::*;
use async_trait::async_trait;
use base64::Engine as _;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::client::Error as ClientError;
use jsonrpsee::http_client::{HeaderMap, HeaderValue, HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Connection settings for one node replica.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl NodeEndpoint {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Identifier used in logs; never includes credentials.
    pub fn label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// RPC surface the gateway consumes from one node replica.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Log label for this node (host:port).
    fn label(&self) -> String;

    async fn get_blockchain_info(&self) -> RpcResult<ChainInfo>;
    async fn get_network_info(&self) -> RpcResult<NetworkInfo>;
    async fn get_block_header(&self, block_hash: &str) -> RpcResult<BlockHeaderInfo>;
    async fn get_block_raw(&self, block_hash: &str) -> RpcResult<Vec<u8>>;
    async fn get_raw_transaction(&self, txid: &str) -> RpcResult<RawTransactionInfo>;
    async fn get_raw_transaction_bytes(&self, txid: &str) -> RpcResult<Vec<u8>>;
    async fn get_tx_outs(
        &self,
        outpoints: &[(String, u32)],
        fields: &[&str],
        include_mempool: bool,
    ) -> RpcResult<TxOutsResult>;
    async fn send_raw_transactions(&self, txs: &[SubmitTxSpec]) -> RpcResult<SendRawTxsResult>;
    async fn get_raw_mempool(&self) -> RpcResult<Vec<String>>;
    async fn get_mempool_ancestors(&self, txid: &str) -> RpcResult<MempoolAncestors>;
    async fn get_merkle_proof(&self, txid: &str, block_hash: &str) -> RpcResult<Value>;
    /// TSC-format proof; parameter order differs from `get_merkle_proof` on
    /// the wire.
    async fn get_merkle_proof2(&self, block_hash: &str, txid: &str) -> RpcResult<Value>;
}

/// Source of the current node client snapshot. Rebuilt per call batch so a
/// configuration change never requires restarting in-flight aggregation.
pub trait NodeProvider: Send + Sync {
    fn snapshot(&self) -> Vec<Arc<dyn NodeRpc>>;
}

/// Static provider over a fixed client list (tests, simple deployments).
pub struct StaticNodeProvider {
    clients: parking_lot::RwLock<Vec<Arc<dyn NodeRpc>>>,
}

impl StaticNodeProvider {
    pub fn new(clients: Vec<Arc<dyn NodeRpc>>) -> Self {
        Self {
            clients: parking_lot::RwLock::new(clients),
        }
    }

    pub fn replace(&self, clients: Vec<Arc<dyn NodeRpc>>) {
        *self.clients.write() = clients;
    }
}

impl NodeProvider for StaticNodeProvider {
    fn snapshot(&self) -> Vec<Arc<dyn NodeRpc>> {
        self.clients.read().clone()
    }
}

/// Builds an `HttpNodeRpc` per configured endpoint on every snapshot.
pub struct HttpNodeProvider {
    endpoints: parking_lot::RwLock<Vec<NodeEndpoint>>,
    request_timeout: Duration,
}

impl HttpNodeProvider {
    pub fn new(endpoints: Vec<NodeEndpoint>, request_timeout: Duration) -> Self {
        Self {
            endpoints: parking_lot::RwLock::new(endpoints),
            request_timeout,
        }
    }

    pub fn set_endpoints(&self, endpoints: Vec<NodeEndpoint>) {
        *self.endpoints.write() = endpoints;
    }
}

impl NodeProvider for HttpNodeProvider {
    fn snapshot(&self) -> Vec<Arc<dyn NodeRpc>> {
        self.endpoints
            .read()
            .iter()
            .filter_map(
                |ep| match HttpNodeRpc::connect(ep.clone(), self.request_timeout) {
                    Ok(client) => Some(Arc::new(client) as Arc<dyn NodeRpc>),
                    Err(e) => {
                        tracing::error!("cannot build rpc client for {}: {}", ep.label(), e);
                        None
                    }
                },
            )
            .collect()
    }
}

/// JSON-RPC over HTTP with basic auth, the transport bitcoind-family nodes
/// speak.
pub struct HttpNodeRpc {
    endpoint: NodeEndpoint,
    client: HttpClient,
}

impl HttpNodeRpc {
    pub fn connect(endpoint: NodeEndpoint, request_timeout: Duration) -> RpcResult<Self> {
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", endpoint.username, endpoint.password));
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Basic {}", credentials))
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        headers.insert("authorization", auth);

        let client = HttpClientBuilder::default()
            .request_timeout(request_timeout)
            .set_headers(headers)
            .build(endpoint.url())
            .map_err(map_client_error)?;

        Ok(Self { endpoint, client })
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: jsonrpsee::core::params::ArrayParams,
    ) -> RpcResult<T> {
        self.client
            .request(method, params)
            .await
            .map_err(map_client_error)
    }
}

fn map_client_error(err: ClientError) -> RpcError {
    match err {
        ClientError::Call(e) => RpcError::Protocol {
            code: e.code() as i64,
            message: e.message().to_string(),
        },
        ClientError::RequestTimeout => RpcError::Timeout,
        other => RpcError::Transport(other.to_string()),
    }
}

#[async_trait]
impl NodeRpc for HttpNodeRpc {
    fn label(&self) -> String {
        self.endpoint.label()
    }

    async fn get_blockchain_info(&self) -> RpcResult<ChainInfo> {
        self.call("getblockchaininfo", rpc_params![]).await
    }

    async fn get_network_info(&self) -> RpcResult<NetworkInfo> {
        self.call("getnetworkinfo", rpc_params![]).await
    }

    async fn get_block_header(&self, block_hash: &str) -> RpcResult<BlockHeaderInfo> {
        self.call("getblockheader", rpc_params![block_hash, true])
            .await
    }

    async fn get_block_raw(&self, block_hash: &str) -> RpcResult<Vec<u8>> {
        let raw: String = self.call("getblock", rpc_params![block_hash, 0]).await?;
        hex::decode(&raw).map_err(|e| RpcError::Transport(format!("bad block hex: {}", e)))
    }

    async fn get_raw_transaction(&self, txid: &str) -> RpcResult<RawTransactionInfo> {
        self.call("getrawtransaction", rpc_params![txid, 1]).await
    }

    async fn get_raw_transaction_bytes(&self, txid: &str) -> RpcResult<Vec<u8>> {
        let raw: String = self.call("getrawtransaction", rpc_params![txid, 0]).await?;
        hex::decode(&raw).map_err(|e| RpcError::Transport(format!("bad tx hex: {}", e)))
    }

    async fn get_tx_outs(
        &self,
        outpoints: &[(String, u32)],
        fields: &[&str],
        include_mempool: bool,
    ) -> RpcResult<TxOutsResult> {
        let utxos: Vec<Value> = outpoints
            .iter()
            .map(|(txid, n)| json!({ "txid": txid, "n": n }))
            .collect();
        self.call("gettxouts", rpc_params![utxos, fields, include_mempool])
            .await
    }

    async fn send_raw_transactions(&self, txs: &[SubmitTxSpec]) -> RpcResult<SendRawTxsResult> {
        let specs: Vec<Value> = txs
            .iter()
            .map(|tx| {
                let mut spec = json!({
                    "hex": hex::encode(&tx.raw),
                    "allowhighfees": tx.allow_high_fees,
                    "dontcheckfee": tx.dont_check_fees,
                    "listunconfirmedancestors": tx.list_unconfirmed_ancestors,
                });
                if let Some(config) = &tx.config {
                    spec["config"] = Value::Object(config.clone());
                }
                spec
            })
            .collect();
        self.call("sendrawtransactions", rpc_params![specs]).await
    }

    async fn get_raw_mempool(&self) -> RpcResult<Vec<String>> {
        self.call("getrawmempool", rpc_params![]).await
    }

    async fn get_mempool_ancestors(&self, txid: &str) -> RpcResult<MempoolAncestors> {
        self.call("getmempoolancestors", rpc_params![txid, true])
            .await
    }

    async fn get_merkle_proof(&self, txid: &str, block_hash: &str) -> RpcResult<Value> {
        self.call("getmerkleproof", rpc_params![txid, block_hash])
            .await
    }

    async fn get_merkle_proof2(&self, block_hash: &str, txid: &str) -> RpcResult<Value> {
        self.call("getmerkleproof2", rpc_params![block_hash, txid])
            .await
    }
}
