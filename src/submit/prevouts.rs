//! Previous-output resolution for a submission batch.
//!
//! Outputs are looked up in the batch itself first (chained transactions
//! submitted together), the rest in one node query. The node must answer
//! with exactly one entry per requested outpoint, in request order; a
//! length mismatch is a response-contract violation, not a per-input error.

use crate::chain::{OutPoint, Transaction, Txid};
use crate::rpc::types::CollidedWith;
use crate::rpc::MultiNodeClient;
use crate::submit::reject;
use crate::utils::errors::{GatewayError, Result};
use std::collections::HashMap;

/// Fields requested from `gettxouts`; the script body is deliberately left
/// out, it can be large and only its length matters here.
pub const GET_TX_OUT_FIELDS: &[&str] = &["scriptPubKeyLen", "value", "isStandard", "confirmations"];

const SATOSHIS_PER_COIN: f64 = 100_000_000.0;

/// Resolved previous output for one input. Computed per submission attempt,
/// never persisted.
#[derive(Debug, Clone, Default)]
pub struct PrevOut {
    pub error: Option<String>,
    pub collided_with: Option<CollidedWith>,
    /// satoshis
    pub value: i64,
    pub script_pub_key_len: u64,
    pub is_standard: bool,
    pub confirmations: u64,
}

/// Collect the previous outputs spent by `tx`. Returns the sum of resolved
/// values and one entry per input, in input order. Per-input problems are
/// recorded in the entry's `error`; only node/contract failures error out.
///
/// A single output spent twice within `batch_txs` is not detected here; the
/// node rejects one of the two spenders itself.
pub async fn collect_previous_outputs(
    tx: &Transaction,
    batch_txs: &HashMap<Txid, Vec<u8>>,
    multi: &MultiNodeClient,
) -> Result<(i64, Vec<PrevOut>)> {
    let mut parents_from_batch: HashMap<Txid, Transaction> = HashMap::new();
    let mut outpoints_not_in_batch: Vec<OutPoint> = Vec::with_capacity(tx.inputs.len());

    for input in &tx.inputs {
        let prev = input.prev_out;
        if parents_from_batch.contains_key(&prev.txid) {
            continue;
        }
        if let Some(raw) = batch_txs.get(&prev.txid) {
            if let Ok(parent) = Transaction::parse(raw) {
                parents_from_batch.insert(prev.txid, parent);
                continue;
            }
            // parse errors are ignored here; the node may still know it
        }
        outpoints_not_in_batch.push(prev);
    }

    let mut outs_from_node: HashMap<OutPoint, PrevOut> = HashMap::new();
    if !outpoints_not_in_batch.is_empty() {
        let missing: Vec<(String, u32)> = outpoints_not_in_batch
            .iter()
            .map(|o| (o.txid.to_string(), o.vout))
            .collect();
        let response = multi.get_tx_outs(&missing, GET_TX_OUT_FIELDS).await?;

        if response.tx_outs.len() != missing.len() {
            return Err(GatewayError::Consistency(format!(
                "gettxouts returned {} entries for {} outpoints",
                response.tx_outs.len(),
                missing.len()
            )));
        }

        for (outpoint, entry) in outpoints_not_in_batch.iter().zip(response.tx_outs) {
            outs_from_node.insert(
                *outpoint,
                PrevOut {
                    error: entry.error,
                    collided_with: entry.collided_with,
                    value: entry
                        .value
                        .map(|v| (v * SATOSHIS_PER_COIN).round() as i64)
                        .unwrap_or(0),
                    script_pub_key_len: entry.script_pub_key_len.unwrap_or(0),
                    is_standard: entry.is_standard.unwrap_or(true),
                    confirmations: entry.confirmations.unwrap_or(0),
                },
            );
        }
    }

    let mut sum: i64 = 0;
    let mut prevouts = Vec::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        let outpoint = input.prev_out;
        let prevout = if let Some(parent) = parents_from_batch.get(&outpoint.txid) {
            match parent.outputs.get(outpoint.vout as usize) {
                Some(output) => PrevOut {
                    error: None,
                    collided_with: None,
                    value: output.value,
                    script_pub_key_len: output.script_pubkey.len() as u64,
                    // an in-batch parent is by definition unconfirmed
                    is_standard: true,
                    confirmations: 0,
                },
                None => PrevOut {
                    error: Some(format!("{} - invalid output index", reject::MISSING_INPUTS)),
                    ..Default::default()
                },
            }
        } else {
            match outs_from_node.get(&outpoint) {
                Some(prevout) => prevout.clone(),
                None => {
                    return Err(GatewayError::Consistency(format!(
                        "node did not return requested output {}:{}",
                        outpoint.txid, outpoint.vout
                    )))
                }
            }
        };

        if prevout.error.is_none() {
            sum += prevout.value;
        }
        prevouts.push(prevout);
    }

    Ok((sum, prevouts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satoshi_conversion_rounds() {
        let coins = 0.00000001f64;
        assert_eq!((coins * SATOSHIS_PER_COIN).round() as i64, 1);
        let coins = 12.34567891f64;
        assert_eq!((coins * SATOSHIS_PER_COIN).round() as i64, 1_234_567_891);
    }
}
