//! Shared test fixtures: a scripted mock node client and builders for raw
//! transactions and blocks.

use crate::chain::tx::testutil::encode_tx;
use crate::chain::{txid_of, OutPoint, Transaction, TxInput, TxOutput, Txid};
use crate::quotes::{InMemQuoteProvider, PolicyQuote};
use crate::rpc::error::{RpcError, RpcResult};
use crate::rpc::types::*;
use crate::rpc::{MultiNodeClient, NodeRpc, StaticNodeProvider};
use crate::store::InMemTxStore;
use crate::submit::{SubmitEngine, SubmitSettings};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Per-node scripted behavior.
#[derive(Default)]
pub struct NodeScript {
    pub chain_info: Option<ChainInfo>,
    pub headers: HashMap<String, BlockHeaderInfo>,
    pub blocks: HashMap<String, Vec<u8>>,
    pub raw_txs: HashMap<String, RawTransactionInfo>,
    pub tx_outs: HashMap<(String, u32), TxOutEntry>,
    /// txid -> (reject code, reject reason)
    pub reject: HashMap<String, (Option<i32>, Option<String>)>,
    pub evict: HashSet<String>,
    pub known: HashSet<String>,
    pub mempool: Vec<String>,
    /// Every call fails at the transport level.
    pub fail_transport: bool,
    /// Only `sendrawtransactions` fails at the transport level.
    pub fail_send: bool,
}

pub struct MockNode {
    label: String,
    pub script: Mutex<NodeScript>,
    /// txids of every `sendrawtransactions` batch, in call order.
    pub sent: Mutex<Vec<Vec<String>>>,
}

impl MockNode {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(MockNode {
            label: label.to_string(),
            script: Mutex::new(NodeScript {
                chain_info: Some(ChainInfo {
                    blocks: 100,
                    best_block_hash: "00".repeat(32),
                }),
                ..Default::default()
            }),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn check_transport(&self) -> RpcResult<()> {
        if self.script.lock().fail_transport {
            return Err(RpcError::Transport("connection refused".into()));
        }
        Ok(())
    }

    pub fn sent_txids(&self) -> Vec<Vec<String>> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn get_blockchain_info(&self) -> RpcResult<ChainInfo> {
        self.check_transport()?;
        self.script
            .lock()
            .chain_info
            .clone()
            .ok_or(RpcError::Transport("no chain info scripted".into()))
    }

    async fn get_network_info(&self) -> RpcResult<NetworkInfo> {
        self.check_transport()?;
        Ok(NetworkInfo::default())
    }

    async fn get_block_header(&self, block_hash: &str) -> RpcResult<BlockHeaderInfo> {
        self.check_transport()?;
        self.script
            .lock()
            .headers
            .get(block_hash)
            .cloned()
            .ok_or(RpcError::Protocol {
                code: -5,
                message: "Block not found".into(),
            })
    }

    async fn get_block_raw(&self, block_hash: &str) -> RpcResult<Vec<u8>> {
        self.check_transport()?;
        self.script
            .lock()
            .blocks
            .get(block_hash)
            .cloned()
            .ok_or(RpcError::Protocol {
                code: -5,
                message: "Block not found".into(),
            })
    }

    async fn get_raw_transaction(&self, txid: &str) -> RpcResult<RawTransactionInfo> {
        self.check_transport()?;
        self.script
            .lock()
            .raw_txs
            .get(txid)
            .cloned()
            .ok_or(RpcError::Protocol {
                code: -5,
                message: "No such mempool or blockchain transaction".into(),
            })
    }

    async fn get_raw_transaction_bytes(&self, txid: &str) -> RpcResult<Vec<u8>> {
        self.check_transport()?;
        let script = self.script.lock();
        script
            .raw_txs
            .get(txid)
            .and_then(|info| hex::decode(&info.hex).ok())
            .ok_or(RpcError::Protocol {
                code: -5,
                message: "No such mempool or blockchain transaction".into(),
            })
    }

    async fn get_tx_outs(
        &self,
        outpoints: &[(String, u32)],
        _fields: &[&str],
        _include_mempool: bool,
    ) -> RpcResult<TxOutsResult> {
        self.check_transport()?;
        let script = self.script.lock();
        Ok(TxOutsResult {
            tx_outs: outpoints
                .iter()
                .map(|key| {
                    script.tx_outs.get(key).cloned().unwrap_or(TxOutEntry {
                        error: Some("missing".into()),
                        ..Default::default()
                    })
                })
                .collect(),
        })
    }

    async fn send_raw_transactions(&self, txs: &[SubmitTxSpec]) -> RpcResult<SendRawTxsResult> {
        self.check_transport()?;
        if self.script.lock().fail_send {
            return Err(RpcError::Transport("connection reset".into()));
        }
        let txids: Vec<String> = txs.iter().map(|t| txid_of(&t.raw).to_string()).collect();
        self.sent.lock().push(txids.clone());

        let script = self.script.lock();
        let mut result = SendRawTxsResult::default();
        for txid in &txids {
            if let Some((code, reason)) = script.reject.get(txid) {
                result.invalid.push(InvalidTx {
                    txid: txid.clone(),
                    reject_code: *code,
                    reject_reason: reason.clone(),
                    collided_with: vec![],
                });
            } else if script.evict.contains(txid) {
                result.evicted.push(txid.clone());
            } else if script.known.contains(txid) {
                result.known.push(txid.clone());
            }
        }
        Ok(result)
    }

    async fn get_raw_mempool(&self) -> RpcResult<Vec<String>> {
        self.check_transport()?;
        Ok(self.script.lock().mempool.clone())
    }

    async fn get_mempool_ancestors(&self, _txid: &str) -> RpcResult<MempoolAncestors> {
        self.check_transport()?;
        Ok(MempoolAncestors::new())
    }

    async fn get_merkle_proof(
        &self,
        _txid: &str,
        _block_hash: &str,
    ) -> RpcResult<serde_json::Value> {
        self.check_transport()?;
        Ok(serde_json::json!({ "nodes": [] }))
    }

    async fn get_merkle_proof2(
        &self,
        _block_hash: &str,
        _txid: &str,
    ) -> RpcResult<serde_json::Value> {
        self.check_transport()?;
        Ok(serde_json::json!({ "format": "TSC" }))
    }
}

pub fn multi_over(nodes: &[Arc<MockNode>]) -> Arc<MultiNodeClient> {
    let clients: Vec<Arc<dyn NodeRpc>> = nodes
        .iter()
        .map(|n| n.clone() as Arc<dyn NodeRpc>)
        .collect();
    Arc::new(MultiNodeClient::new(
        Arc::new(StaticNodeProvider::new(clients)),
        Duration::from_secs(5),
    ))
}

pub struct EngineFixture {
    pub engine: Arc<SubmitEngine>,
    pub multi: Arc<MultiNodeClient>,
    pub store: Arc<InMemTxStore>,
    pub quotes: Arc<InMemQuoteProvider>,
}

/// Engine over the given mock nodes, an in-memory store and one anonymous
/// quote (standard 500/250 sat per kB, data 250/125).
pub fn engine_over(nodes: &[Arc<MockNode>], settings: SubmitSettings) -> EngineFixture {
    let multi = multi_over(nodes);
    let store = Arc::new(InMemTxStore::new());
    let quotes = Arc::new(InMemQuoteProvider::new(Duration::from_secs(3600)));
    quotes.add(crate::quotes::testutil::quote(1, 500, 250));
    let engine = Arc::new(SubmitEngine::new(
        multi.clone(),
        store.clone(),
        quotes.clone(),
        settings,
    ));
    EngineFixture {
        engine,
        multi,
        store,
        quotes,
    }
}

pub fn p2pkh_script() -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[0u8; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

/// Build a raw transaction; returns (raw bytes, txid, txid hex).
pub fn raw_tx(inputs: &[(Txid, u32)], outputs: &[(i64, Vec<u8>)]) -> (Vec<u8>, Txid, String) {
    let tx = Transaction {
        version: 1,
        inputs: inputs
            .iter()
            .map(|(txid, vout)| TxInput {
                prev_out: OutPoint {
                    txid: *txid,
                    vout: *vout,
                },
                script_sig: vec![0x51; 30],
                sequence: 0xffff_ffff,
            })
            .collect(),
        outputs: outputs
            .iter()
            .map(|(value, script)| TxOutput {
                value: *value,
                script_pubkey: script.clone(),
            })
            .collect(),
        lock_time: 0,
    };
    let raw = encode_tx(&tx);
    let txid = txid_of(&raw);
    let hex_id = txid.to_string();
    (raw, txid, hex_id)
}

/// Script a spendable output on every given node.
pub fn script_tx_out(nodes: &[Arc<MockNode>], outpoint: (Txid, u32), value_satoshis: i64) {
    for node in nodes {
        node.script.lock().tx_outs.insert(
            (outpoint.0.to_string(), outpoint.1),
            TxOutEntry {
                error: None,
                collided_with: None,
                value: Some(value_satoshis as f64 / 100_000_000.0),
                script_pub_key_len: Some(25),
                is_standard: Some(true),
                confirmations: Some(10),
            },
        );
    }
}

/// An anonymous quote provider entry valid for one hour.
pub fn quote_valid_now(id: u64, standard: u64, data: u64) -> PolicyQuote {
    let mut quote = crate::quotes::testutil::quote(id, standard, data);
    quote.valid_from = SystemTime::now() - Duration::from_secs(1);
    quote
}
