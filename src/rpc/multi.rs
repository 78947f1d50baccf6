//! Multi-node aggregator: fans calls out to the current node snapshot and
//! merges the replies. Four strategies, chosen per RPC method by its
//! consistency requirements:
//!
//! - first successful over a shuffled order (any honest replica will do)
//! - all nodes, ignore individual errors, require at least one success
//! - all nodes, require unanimous agreement among the successes
//! - submit-and-merge for `sendrawtransactions`, classifying every
//!   transaction with the precedence OK < Known < Evicted <
//!   FailureRetryable < Invalid (lower wins: one accepting node is enough)

use crate::chain::txid_of;
use crate::rpc::client::{NodeProvider, NodeRpc};
use crate::rpc::error::{RpcError, RpcResult};
use crate::rpc::types::*;
use crate::submit::reject;
use crate::utils::errors::{GatewayError, Result};
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Result of a strategy that requires unanimous successful responses.
#[derive(Debug)]
pub struct Unanimity<T> {
    pub first: Option<T>,
    pub unanimous: bool,
    pub first_error: Option<RpcError>,
}

pub struct MultiNodeClient {
    provider: Arc<dyn NodeProvider>,
    call_timeout: Duration,
}

impl MultiNodeClient {
    pub fn new(provider: Arc<dyn NodeProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            call_timeout,
        }
    }

    /// Fresh snapshot of node clients; fails when the configuration holds
    /// none.
    pub fn clients(&self) -> Result<Vec<Arc<dyn NodeRpc>>> {
        let clients = self.provider.snapshot();
        if clients.is_empty() {
            return Err(GatewayError::NoNodesAvailable);
        }
        Ok(clients)
    }

    async fn call_with_timeout<T, Fut>(&self, fut: Fut) -> RpcResult<T>
    where
        Fut: Future<Output = RpcResult<T>>,
    {
        match timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout),
        }
    }

    /// Shuffle the snapshot and call nodes sequentially until one succeeds.
    /// Shuffling avoids hot-node bias and load concentration.
    async fn first_successful<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn(Arc<dyn NodeRpc>) -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let mut clients = self.clients()?;
        clients.shuffle(&mut rand::thread_rng());

        let mut last_error: Option<RpcError> = None;
        for client in clients {
            let label = client.label();
            match self.call_with_timeout(call(client)).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::error!("error while calling node {}: {}", label, e);
                    last_error = Some(e);
                }
            }
        }
        Err(map_single_error(last_error.unwrap_or(RpcError::Transport(
            "no nodes available".into(),
        ))))
    }

    /// Call every node concurrently; a stuck replica never blocks the rest.
    async fn call_all<T, F, Fut>(&self, call: F) -> Result<Vec<RpcResult<T>>>
    where
        F: Fn(Arc<dyn NodeRpc>) -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let clients = self.clients()?;
        let futures = clients
            .into_iter()
            .map(|client| self.call_with_timeout(call(client)));
        Ok(join_all(futures).await)
    }

    /// All nodes, errors ignored, at least one success required.
    async fn all_without_errors<T, F, Fut>(&self, call: F) -> Result<Vec<T>>
    where
        F: Fn(Arc<dyn NodeRpc>) -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let results = self.call_all(call).await?;
        let mut successes = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(value) => successes.push(value),
                Err(e) => errors.push(e),
            }
        }

        if successes.is_empty() {
            let first = first_error_preferring_protocol(&errors);
            if errors.iter().all(|e| e.is_protocol()) {
                return Err(map_single_error(first));
            }
            return Err(GatewayError::TransientNode(format!(
                "none of the nodes returned a successful response; first error: {}",
                first
            )));
        }
        Ok(successes)
    }

    /// All nodes; the successful responses must agree. Disagreement is
    /// reported, not resolved: it indicates a fork or a node inconsistency.
    async fn all_check_same<T, F, Fut>(&self, call: F) -> Result<Unanimity<T>>
    where
        T: PartialEq,
        F: Fn(Arc<dyn NodeRpc>) -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let results = self.call_all(call).await?;
        let mut successes = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(value) => successes.push(value),
                Err(e) => errors.push(e),
            }
        }

        let first_error = if errors.is_empty() {
            None
        } else {
            Some(first_error_preferring_protocol(&errors))
        };

        if successes.is_empty() {
            return match first_error {
                Some(e) if e.is_protocol() => Ok(Unanimity {
                    first: None,
                    unanimous: true,
                    first_error: Some(e),
                }),
                other => Err(GatewayError::TransientNode(format!(
                    "failed to connect to node(s); first error: {}",
                    other.unwrap_or(RpcError::Transport("no response".into()))
                ))),
            };
        }

        let unanimous = successes.windows(2).all(|w| w[0] == w[1]);
        if !unanimous {
            return Ok(Unanimity {
                first: None,
                unanimous: false,
                first_error,
            });
        }

        Ok(Unanimity {
            first: successes.into_iter().next(),
            unanimous: true,
            first_error,
        })
    }

    pub async fn get_block_header(&self, block_hash: &str) -> Result<BlockHeaderInfo> {
        self.first_successful(|c| {
            let hash = block_hash.to_string();
            async move { c.get_block_header(&hash).await }
        })
        .await
    }

    pub async fn get_block_raw(&self, block_hash: &str) -> Result<Vec<u8>> {
        self.first_successful(|c| {
            let hash = block_hash.to_string();
            async move { c.get_block_raw(&hash).await }
        })
        .await
    }

    pub async fn get_raw_transaction_bytes(&self, txid: &str) -> Result<Vec<u8>> {
        self.first_successful(|c| {
            let txid = txid.to_string();
            async move { c.get_raw_transaction_bytes(&txid).await }
        })
        .await
    }

    pub async fn get_merkle_proof(
        &self,
        txid: &str,
        block_hash: &str,
    ) -> Result<serde_json::Value> {
        self.first_successful(|c| {
            let txid = txid.to_string();
            let hash = block_hash.to_string();
            async move { c.get_merkle_proof(&txid, &hash).await }
        })
        .await
    }

    pub async fn get_merkle_proof2(
        &self,
        block_hash: &str,
        txid: &str,
    ) -> Result<serde_json::Value> {
        self.first_successful(|c| {
            let txid = txid.to_string();
            let hash = block_hash.to_string();
            async move { c.get_merkle_proof2(&hash, &txid).await }
        })
        .await
    }

    pub async fn get_raw_mempool(&self) -> Result<Vec<String>> {
        self.first_successful(|c| async move { c.get_raw_mempool().await })
            .await
    }

    pub async fn get_mempool_ancestors(&self, txid: &str) -> Result<MempoolAncestors> {
        self.first_successful(|c| {
            let txid = txid.to_string();
            async move { c.get_mempool_ancestors(&txid).await }
        })
        .await
    }

    pub async fn get_any_network_info(&self) -> Result<NetworkInfo> {
        self.first_successful(|c| async move { c.get_network_info().await })
            .await
    }

    /// Previous-output lookup for the submission pipeline: any replica's
    /// answer suffices.
    pub async fn get_tx_outs(
        &self,
        outpoints: &[(String, u32)],
        fields: &[&str],
    ) -> Result<TxOutsResult> {
        self.first_successful(|c| {
            let outpoints = outpoints.to_vec();
            let fields = fields.to_vec();
            async move { c.get_tx_outs(&outpoints, &fields, true).await }
        })
        .await
    }

    /// Unanimous `gettxouts`, for the public tx-outs query.
    pub async fn get_tx_outs_check_same(
        &self,
        outpoints: &[(String, u32)],
        fields: &[&str],
        include_mempool: bool,
    ) -> Result<Unanimity<TxOutsResult>> {
        self.all_check_same(|c| {
            let outpoints = outpoints.to_vec();
            let fields = fields.to_vec();
            async move { c.get_tx_outs(&outpoints, &fields, include_mempool).await }
        })
        .await
    }

    /// Unanimous `getrawtransaction`.
    pub async fn get_raw_transaction(&self, txid: &str) -> Result<Unanimity<RawTransactionInfo>> {
        self.all_check_same(|c| {
            let txid = txid.to_string();
            async move { c.get_raw_transaction(&txid).await }
        })
        .await
    }

    async fn get_blockchain_infos(&self) -> Result<Vec<ChainInfo>> {
        self.all_without_errors(|c| async move { c.get_blockchain_info().await })
            .await
    }

    /// Chain info from the replica with the highest tip.
    pub async fn best_blockchain_info(&self) -> Result<ChainInfo> {
        let mut infos = self.get_blockchain_infos().await?;
        infos.sort_by(|a, b| b.blocks.cmp(&a.blocks));
        infos
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Fatal("empty blockchain info result".into()))
    }

    /// Chain info from the replica with the lowest tip.
    pub async fn worst_blockchain_info(&self) -> Result<ChainInfo> {
        let mut infos = self.get_blockchain_infos().await?;
        infos.sort_by(|a, b| a.blocks.cmp(&b.blocks));
        infos
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Fatal("empty blockchain info result".into()))
    }

    /// Submit to every node and merge the N responses into one
    /// per-transaction classification.
    pub async fn send_raw_transactions(&self, txs: &[SubmitTxSpec]) -> Result<SendRawTxsResult> {
        let all_txids: Vec<String> = txs.iter().map(|t| txid_of(&t.raw).to_string()).collect();

        let ok_results = self
            .all_without_errors(|c| {
                let txs = txs.to_vec();
                async move { c.send_raw_transactions(&txs).await }
            })
            .await?;

        let mut merged: HashMap<String, TxOutcome> = HashMap::new();
        for response in &ok_results {
            merge_outcomes(&mut merged, categorize(response, &all_txids));
        }

        Ok(fold_outcomes(&all_txids, merged))
    }
}

fn map_single_error(err: RpcError) -> GatewayError {
    match err {
        RpcError::Protocol { code, message } => GatewayError::ProtocolRejection { code, message },
        RpcError::Timeout => GatewayError::TransientNode("request timed out".into()),
        RpcError::Transport(msg) => GatewayError::TransientNode(msg),
    }
}

fn first_error_preferring_protocol(errors: &[RpcError]) -> RpcError {
    errors
        .iter()
        .find(|e| e.is_protocol())
        .or_else(|| errors.first())
        .cloned()
        .unwrap_or(RpcError::Transport("no response".into()))
}

/// Per-transaction classification, ordered by precedence: a lower class is
/// a more successful outcome and wins the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum OutcomeClass {
    Ok,
    Known,
    Evicted,
    FailureRetryable,
    Invalid,
}

#[derive(Debug, Clone)]
struct TxOutcome {
    class: OutcomeClass,
    reject_code: Option<i32>,
    reject_reason: Option<String>,
    collided_with: Vec<CollidedWith>,
    ancestors: Option<Vec<UnconfirmedAncestor>>,
}

/// Classify one node's response into per-transaction outcomes. Submitted
/// ids absent from every response list were accepted as new.
fn categorize(response: &SendRawTxsResult, submitted: &[String]) -> HashMap<String, TxOutcome> {
    let mut outcomes: HashMap<String, TxOutcome> = HashMap::new();

    for invalid in &response.invalid {
        let class = if reject::is_success_code(invalid.reject_code) {
            OutcomeClass::Known
        } else {
            let combined = reject::combine_code_and_reason(
                invalid.reject_code,
                invalid.reject_reason.as_deref(),
            );
            if reject::is_retryable(&combined) {
                OutcomeClass::FailureRetryable
            } else {
                OutcomeClass::Invalid
            }
        };
        outcomes.entry(invalid.txid.clone()).or_insert(TxOutcome {
            class,
            reject_code: invalid.reject_code,
            reject_reason: invalid.reject_reason.clone(),
            collided_with: invalid.collided_with.clone(),
            ancestors: None,
        });
    }

    for evicted in &response.evicted {
        outcomes.entry(evicted.clone()).or_insert(TxOutcome {
            class: OutcomeClass::Evicted,
            reject_code: None,
            reject_reason: None,
            collided_with: Vec::new(),
            ancestors: None,
        });
    }

    for known in &response.known {
        outcomes.entry(known.clone()).or_insert(TxOutcome {
            class: OutcomeClass::Known,
            reject_code: None,
            reject_reason: None,
            collided_with: Vec::new(),
            ancestors: None,
        });
    }

    for txid in submitted {
        if !outcomes.contains_key(txid) {
            let ancestors = response
                .unconfirmed
                .iter()
                .find(|u| &u.txid == txid)
                .map(|u| u.ancestors.clone());
            outcomes.insert(
                txid.clone(),
                TxOutcome {
                    class: OutcomeClass::Ok,
                    reject_code: None,
                    reject_reason: None,
                    collided_with: Vec::new(),
                    ancestors,
                },
            );
        }
    }

    outcomes
}

/// Merge one node's outcomes into the running result. The strictly more
/// successful class wins; on equal class the first-seen value is kept.
fn merge_outcomes(merged: &mut HashMap<String, TxOutcome>, new: HashMap<String, TxOutcome>) {
    for (txid, outcome) in new {
        match merged.get(&txid) {
            Some(old) if outcome.class < old.class => {
                merged.insert(txid, outcome);
            }
            Some(_) => {}
            None => {
                merged.insert(txid, outcome);
            }
        }
    }
}

/// Fold merged classifications back into the wire response shape, in
/// submitted-txid order. Retryable failures reappear in the invalid list;
/// callers re-derive the retry hint from the code+reason.
fn fold_outcomes(submitted: &[String], merged: HashMap<String, TxOutcome>) -> SendRawTxsResult {
    let mut result = SendRawTxsResult::default();
    for txid in submitted {
        let Some(outcome) = merged.get(txid) else {
            continue;
        };
        match outcome.class {
            OutcomeClass::Ok => {
                if let Some(ancestors) = &outcome.ancestors {
                    result.unconfirmed.push(UnconfirmedTx {
                        txid: txid.clone(),
                        ancestors: ancestors.clone(),
                    });
                }
            }
            OutcomeClass::Known => result.known.push(txid.clone()),
            OutcomeClass::Evicted => result.evicted.push(txid.clone()),
            OutcomeClass::FailureRetryable | OutcomeClass::Invalid => {
                result.invalid.push(InvalidTx {
                    txid: txid.clone(),
                    reject_code: outcome.reject_code,
                    reject_reason: outcome.reject_reason.clone(),
                    collided_with: outcome.collided_with.clone(),
                });
            }
        }
    }
    result
}
