//! Submission engine: validates raw transactions against fee policy,
//! resolves previous outputs, submits batches through the aggregator and
//! reconciles node responses into per-transaction results.
//!
//! Failures are per-transaction: one bad transaction never blocks the
//! independent transactions submitted alongside it.

use crate::chain::{txid_of, Transaction, Txid};
use crate::quotes::{ConsolidationParams, PolicyQuote, QuoteProvider};
use crate::rpc::types::{SendRawTxsResult, SubmitTxSpec};
use crate::rpc::MultiNodeClient;
use crate::store::{
    Identity, NewTx, ResubmitUpdate, StoreError, TxInputRecord, TxRecord, TxStatus, TxStore,
    TxUpsert, UpsertMode,
};
use crate::submit::fees::{check_fees, fee_preference, is_consolidation, scan_outputs};
use crate::submit::prevouts::collect_previous_outputs;
use crate::submit::reject;
use crate::submit::types::*;
use crate::utils::errors::{GatewayError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SubmitSettings {
    /// Deployment does not parse blocks: merkle/DS callbacks unsupported.
    pub dont_parse_blocks: bool,
    /// Deployment does not persist transactions.
    pub dont_insert_transactions: bool,
    /// Resubmit transactions the store already marks accepted.
    pub resubmit_known_transactions: bool,
    /// Accept everything regardless of fees.
    pub check_fee_disabled: bool,
    /// Resolve previous outputs before resubmitting instead of letting the
    /// node report missing inputs (used when the retry budget is zero).
    pub resubmit_prechecks_inputs: bool,
    pub resubmit_batch_size: usize,
}

impl Default for SubmitSettings {
    fn default() -> Self {
        SubmitSettings {
            dont_parse_blocks: false,
            dont_insert_transactions: false,
            resubmit_known_transactions: false,
            check_fee_disabled: false,
            resubmit_prechecks_inputs: false,
            resubmit_batch_size: 1000,
        }
    }
}

/// A transaction that passed validation and is headed for the node.
struct TxToSubmit {
    txid: String,
    request: SubmitTxRequest,
    inputs: Vec<TxInputRecord>,
    allow_high_fees: bool,
    dont_check_fees: bool,
    list_unconfirmed_ancestors: bool,
    quote_id: Option<u64>,
    policies: Option<String>,
    status: TxStatus,
    warnings: Vec<String>,
}

#[derive(Default)]
struct BatchState {
    responses: Vec<SubmitTxResult>,
    to_submit: Vec<TxToSubmit>,
    all_txs: HashMap<Txid, Vec<u8>>,
    txs_to_update: HashSet<String>,
    failure_count: usize,
}

pub struct SubmitEngine {
    multi: Arc<MultiNodeClient>,
    store: Arc<dyn TxStore>,
    quotes: Arc<dyn QuoteProvider>,
    settings: SubmitSettings,
}

fn store_err(e: StoreError) -> GatewayError {
    GatewayError::Fatal(e.to_string())
}

impl SubmitEngine {
    pub fn new(
        multi: Arc<MultiNodeClient>,
        store: Arc<dyn TxStore>,
        quotes: Arc<dyn QuoteProvider>,
        settings: SubmitSettings,
    ) -> Self {
        Self {
            multi,
            store,
            quotes,
            settings,
        }
    }

    pub async fn submit_transaction(
        &self,
        request: SubmitTxRequest,
        user: Option<&Identity>,
    ) -> Result<SubmitBatchResponse> {
        let response = self.submit_transactions(vec![request], user).await?;
        if response.txs.len() != 1 {
            return Err(GatewayError::Fatal(format!(
                "expected exactly 1 transaction in response but got {}",
                response.txs.len()
            )));
        }
        Ok(response)
    }

    pub async fn submit_transactions(
        &self,
        requests: Vec<SubmitTxRequest>,
        user: Option<&Identity>,
    ) -> Result<SubmitBatchResponse> {
        // one metadata snapshot and one quote set for the whole batch
        let info = self.multi.best_blockchain_info().await?;
        let network = self.multi.get_any_network_info().await.unwrap_or_default();
        let consolidation_base = ConsolidationParams::from(&network);

        let quotes = self.quotes.valid_quotes(user);
        if quotes.is_empty() {
            return Err(GatewayError::Fatal("no fee quotes available".into()));
        }

        let mut state = BatchState::default();
        for request in requests {
            if !self
                .validate_one(user, request, &mut state, &quotes, &consolidation_base)
                .await?
            {
                state.failure_count += 1;
            }
        }
        debug!(
            "transactions to submit: {}: {}",
            state.to_submit.len(),
            state
                .to_submit
                .iter()
                .map(|t| t.txid.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        );

        let default_quote_id = quotes[0].id;
        let mut saved_before_send: Vec<String> = Vec::new();

        let outcome = if state.to_submit.is_empty() {
            SendRawTxsResult::default()
        } else {
            // persist a SentToNode snapshot so a crash mid-submit leaves
            // the batch recoverable by the mempool checker
            if !self.settings.dont_insert_transactions && user.is_some() {
                let snapshot: Vec<TxUpsert> = state
                    .to_submit
                    .iter()
                    .filter(|t| t.status < TxStatus::SentToNode)
                    .map(|t| TxUpsert {
                        tx: self.new_tx_from(t, user, TxStatus::SentToNode, default_quote_id, None),
                        mode: if state.txs_to_update.contains(&t.txid) {
                            UpsertMode::Update
                        } else {
                            UpsertMode::Insert
                        },
                    })
                    .collect();
                saved_before_send = state
                    .to_submit
                    .iter()
                    .filter(|t| t.status < TxStatus::SentToNode)
                    .map(|t| t.txid.clone())
                    .collect();
                let inserted = self
                    .store
                    .insert_or_update_txs(snapshot, false)
                    .await
                    .map_err(store_err)?;
                for txid in inserted {
                    state.txs_to_update.insert(txid.to_string());
                }
            }

            let specs: Vec<SubmitTxSpec> = state.to_submit.iter().map(spec_from_submit).collect();
            match self.multi.send_raw_transactions(&specs).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("error while submitting transactions to the node: {}", e);
                    // uniform failure; never expose transport details
                    return Err(GatewayError::TransientNode(
                        "error while submitting transactions to the node".into(),
                    ));
                }
            }
        };

        let submitted: Vec<(String, Vec<String>)> = state
            .to_submit
            .iter()
            .map(|t| (t.txid.clone(), t.warnings.clone()))
            .collect();
        let (submit_failures, transformed) = transform_rpc_response(&outcome, &submitted);

        let successful: Vec<&TxToSubmit> = state
            .to_submit
            .iter()
            .filter(|t| {
                transformed
                    .iter()
                    .any(|r| r.is_success() && r.txid.as_deref() == Some(t.txid.as_str()))
            })
            .collect();
        state.responses.extend(transformed.iter().cloned());
        state.failure_count += submit_failures;

        if !self.settings.dont_insert_transactions && !state.to_submit.is_empty() {
            let now = SystemTime::now();
            let upserts: Vec<TxUpsert> = successful
                .iter()
                .map(|t| {
                    let status = if t.status < TxStatus::UnknownOldTx {
                        TxStatus::Accepted
                    } else {
                        t.status
                    };
                    TxUpsert {
                        tx: self.new_tx_from(t, user, status, default_quote_id, Some(now)),
                        mode: if state.txs_to_update.contains(&t.txid) {
                            if t.status < TxStatus::UnknownOldTx && user.is_none() {
                                UpsertMode::Update
                            } else {
                                UpsertMode::StatusAndResubmit
                            }
                        } else {
                            UpsertMode::Insert
                        },
                    }
                })
                .collect();
            self.store
                .insert_or_update_txs(upserts, false)
                .await
                .map_err(store_err)?;

            // ancestors returned inline with the submit (first acceptance)
            let mut txs_with_ancestors: HashSet<&str> = HashSet::new();
            let mut ancestor_rows: Vec<TxUpsert> = Vec::new();
            for unconfirmed in &outcome.unconfirmed {
                txs_with_ancestors.insert(unconfirmed.txid.as_str());
                for ancestor in &unconfirmed.ancestors {
                    let Ok(external) = Txid::from_hex(&ancestor.txid) else {
                        continue;
                    };
                    let inputs = ancestor
                        .vin
                        .iter()
                        .enumerate()
                        .filter_map(|(n, vin)| {
                            Txid::from_hex(&vin.txid).ok().map(|prev| TxInputRecord {
                                n: n as u32,
                                prev_txid: prev,
                                prev_n: vin.vout,
                            })
                        })
                        .collect();
                    ancestor_rows.push(TxUpsert {
                        tx: NewTx::ancestor(external, inputs, Some(default_quote_id), now),
                        mode: UpsertMode::Insert,
                    });
                }
            }
            if !ancestor_rows.is_empty() {
                self.store
                    .insert_or_update_txs(ancestor_rows, true)
                    .await
                    .map_err(store_err)?;
            }

            // a node only lists ancestors on first acceptance; transactions
            // it already knew need a separate mempool-ancestors lookup
            let backfill: Vec<(&str, Option<u64>)> = successful
                .iter()
                .filter(|t| {
                    t.list_unconfirmed_ancestors
                        && t.status >= TxStatus::SentToNode
                        && !txs_with_ancestors.contains(t.txid.as_str())
                })
                .map(|t| (t.txid.as_str(), t.quote_id))
                .collect();
            for (txid, quote_id) in backfill {
                let (ok, _) = self
                    .insert_missing_mempool_ancestors(txid, quote_id.unwrap_or(default_quote_id))
                    .await;
                if !ok {
                    state.responses.retain(|r| r.txid.as_deref() != Some(txid));
                    state.responses.push(SubmitTxResult::failure(
                        Some(txid.to_string()),
                        reject::UNCONFIRMED_ANCESTORS_ERROR,
                    ));
                    state.failure_count += 1;
                }
            }

            // the SentToNode snapshot of rejected transactions moves on
            let rejected: Vec<Txid> = saved_before_send
                .iter()
                .filter(|txid| {
                    transformed
                        .iter()
                        .any(|r| !r.is_success() && r.txid.as_deref() == Some(txid.as_str()))
                })
                .filter_map(|txid| Txid::from_hex(txid).ok())
                .collect();
            if !rejected.is_empty() {
                self.store
                    .update_tx_status(&rejected, TxStatus::NodeRejected)
                    .await
                    .map_err(store_err)?;
            }
        }

        Ok(SubmitBatchResponse {
            timestamp: SystemTime::now(),
            best_block_hash: info.best_block_hash,
            best_block_height: info.blocks,
            txs: state.responses,
            failure_count: state.failure_count,
        })
    }

    /// Validate one transaction of the batch. Returns false when a failure
    /// response was recorded; Err is reserved for fatal store faults.
    async fn validate_one(
        &self,
        user: Option<&Identity>,
        request: SubmitTxRequest,
        state: &mut BatchState,
        quotes: &[PolicyQuote],
        consolidation_base: &ConsolidationParams,
    ) -> Result<bool> {
        if let Some(format) = request.merkle_format.as_deref() {
            if !format.is_empty() && !VALID_MERKLE_FORMATS.contains(&format) {
                state.responses.push(SubmitTxResult::failure(
                    None,
                    format!(
                        "Invalid merkle format {}. Supported formats: {}",
                        format,
                        VALID_MERKLE_FORMATS.join(",")
                    ),
                ));
                return Ok(false);
            }
        }

        if request.raw_tx.is_empty() {
            state
                .responses
                .push(SubmitTxResult::failure(None, "raw transaction is required"));
            return Ok(false);
        }

        let external_id = txid_of(&request.raw_tx);
        let txid = external_id.to_string();

        let callbacks_unsupported =
            self.settings.dont_parse_blocks || self.settings.dont_insert_transactions;
        if request.merkle_proof && callbacks_unsupported {
            state.responses.push(SubmitTxResult::failure(
                Some(txid),
                "Transaction requires merkle proof notification but this instance does not support callbacks",
            ));
            return Ok(false);
        }
        if request.ds_check && callbacks_unsupported {
            state.responses.push(SubmitTxResult::failure(
                Some(txid),
                "Transaction requires double spend notification but this instance does not support callbacks",
            ));
            return Ok(false);
        }

        if (request.merkle_proof || request.ds_check) && request.callback_url.is_none() {
            state.responses.push(SubmitTxResult::failure(
                Some(txid),
                "Callback url is required when notifications are requested",
            ));
            return Ok(false);
        }

        if state.all_txs.contains_key(&external_id) {
            state.responses.push(SubmitTxResult::failure(
                Some(txid),
                "Transaction with this id occurs more than once within request",
            ));
            return Ok(false);
        }
        state.all_txs.insert(external_id, request.raw_tx.clone());

        let mut warnings: Vec<String> = Vec::new();
        let status = self
            .store
            .tx_status(&external_id)
            .await
            .map_err(store_err)?;

        if status > TxStatus::NotPresentInDb && status != TxStatus::NodeRejected {
            return self
                .validate_known(user, request, state, status, external_id, txid)
                .await;
        }

        // fresh submission (or NodeRejected re-entry): full analysis
        let parsed = match Transaction::parse(&request.raw_tx) {
            Ok(parsed) => parsed,
            Err(_) => {
                state
                    .responses
                    .push(SubmitTxResult::failure(Some(txid), "Can not parse transaction"));
                return Ok(false);
            }
        };
        if parsed.is_coinbase() {
            state.responses.push(SubmitTxResult::failure(
                Some(txid),
                "Invalid transaction - coinbase transactions are not accepted",
            ));
            return Ok(false);
        }

        let (sum_prev_outputs, prevouts) =
            match collect_previous_outputs(&parsed, &state.all_txs, &self.multi).await {
                Ok(result) => result,
                Err(GatewayError::Validation(message)) => {
                    state
                        .responses
                        .push(SubmitTxResult::failure(Some(txid), message));
                    return Ok(false);
                }
                Err(e) => {
                    error!("cannot fetch inputs for {}: {}", txid, e);
                    state
                        .responses
                        .push(SubmitTxResult::failure(Some(txid), "Error fetching inputs"));
                    return Ok(false);
                }
            };

        let prevout_errors: Vec<&str> = prevouts
            .iter()
            .filter_map(|p| p.error.as_deref())
            .collect();
        let mut collided: Vec<ConflictedTx> = Vec::new();
        for prevout in &prevouts {
            if let Some(c) = &prevout.collided_with {
                if !c.hex.is_empty() && !collided.iter().any(|seen| seen.txid == c.txid) {
                    collided.push(ConflictedTx {
                        txid: c.txid.clone(),
                        size: c.size,
                        hex: c.hex.clone(),
                    });
                }
            }
        }
        debug!(
            "collected {} prevouts for {} ({} errors, {} collisions)",
            prevouts.len(),
            txid,
            prevout_errors.len(),
            collided.len()
        );

        let mut ok_to_mine = false;
        let mut ok_to_relay = false;
        let mut selected_quote: Option<&PolicyQuote> = None;

        if collided.iter().any(|c| c.txid == txid) {
            // the transaction itself is already in the mempool: submit it
            // and let the node answer "known"
            ok_to_mine = true;
            ok_to_relay = true;
        } else if !prevout_errors.is_empty() || !collided.is_empty() {
            // the node's exact reason is usually just "missing"; report the
            // uniform description and attach collision details
            let mut failure = SubmitTxResult::failure(Some(txid), reject::MISSING_INPUTS);
            failure.conflicted_with = collided;
            state.responses.push(failure);
            return Ok(false);
        } else if self.settings.check_fee_disabled {
            ok_to_mine = true;
            ok_to_relay = true;
        } else {
            let scan = match scan_outputs(&parsed, request.ds_check, &mut warnings) {
                Ok(scan) => scan,
                Err(GatewayError::Validation(message)) => {
                    state
                        .responses
                        .push(SubmitTxResult::failure(Some(txid), message));
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            for quote in quotes {
                if is_consolidation(
                    &parsed,
                    &quote.merged_consolidation_params(consolidation_base),
                    &prevouts,
                ) {
                    debug!("{} qualifies as consolidation transaction", txid);
                    ok_to_mine = true;
                    ok_to_relay = true;
                    selected_quote = Some(quote);
                    break;
                }
                let (mine, relay) = check_fees(
                    request.raw_tx.len() as u64,
                    sum_prev_outputs,
                    scan.sum_new_outputs,
                    scan.data_bytes,
                    quote,
                );
                if fee_preference(mine, relay) > fee_preference(ok_to_mine, ok_to_relay) {
                    ok_to_mine = mine;
                    ok_to_relay = relay;
                    selected_quote = Some(quote);
                }
            }
        }

        if !ok_to_mine && !ok_to_relay {
            state
                .responses
                .push(SubmitTxResult::failure(Some(txid), reject::NOT_ENOUGH_FEES));
            return Ok(false);
        }

        let inputs = input_records(&parsed);
        let list_unconfirmed_ancestors = self.needs_ancestor_listing(&request, &inputs).await?;

        state.to_submit.push(TxToSubmit {
            txid,
            request,
            inputs,
            allow_high_fees: false,
            dont_check_fees: ok_to_mine,
            list_unconfirmed_ancestors,
            quote_id: selected_quote.map(|q| q.id),
            policies: selected_quote.and_then(|q| q.policies.clone()),
            status,
            warnings,
        });
        Ok(true)
    }

    /// Handle a transaction the store already tracks (anything past
    /// NotPresentInDb except the NodeRejected re-entry path).
    async fn validate_known(
        &self,
        user: Option<&Identity>,
        request: SubmitTxRequest,
        state: &mut BatchState,
        status: TxStatus,
        external_id: Txid,
        txid: String,
    ) -> Result<bool> {
        state.txs_to_update.insert(txid.clone());

        let stored = self
            .store
            .tx_by_external_id(&external_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| GatewayError::Fatal(format!("status/record mismatch for {}", txid)))?;

        let identity_mismatch =
            status != TxStatus::UnknownOldTx && user != stored.identity.as_ref();
        if request.callback_url != stored.callback_url
            || request.merkle_proof != stored.merkle_proof
            || request.ds_check != stored.ds_check
            || identity_mismatch
        {
            state.responses.push(SubmitTxResult::failure(
                Some(txid),
                "Transaction already submitted with different parameters",
            ));
            return Ok(false);
        }

        if status == TxStatus::SentToNode {
            info!("transaction {} marked as sent to node, will resubmit", txid);
        } else if self.settings.resubmit_known_transactions {
            info!("transaction {} already known, will resubmit", txid);
        }

        let mut warnings = Vec::new();
        let mut inputs = stored.inputs.clone();
        let mut list_unconfirmed_ancestors = false;
        if let Ok(parsed) = Transaction::parse(&request.raw_tx) {
            inputs = input_records(&parsed);
            list_unconfirmed_ancestors = self.needs_ancestor_listing(&request, &inputs).await?;
            // only DSNT warnings are of interest for known transactions
            let _ = scan_outputs(&parsed, request.ds_check, &mut warnings);
        }

        if status == TxStatus::UnknownOldTx {
            if !self.settings.resubmit_known_transactions {
                state.responses.push(SubmitTxResult::success(
                    txid,
                    Some(reject::RESULT_ALREADY_KNOWN.into()),
                    warnings,
                ));
                return Ok(true);
            }
            // no identity or quote is stored for legacy rows and a current
            // quote cannot be derived, so resend with fees unchecked
            state.to_submit.push(TxToSubmit {
                txid,
                request,
                inputs,
                allow_high_fees: false,
                dont_check_fees: true,
                list_unconfirmed_ancestors: false,
                quote_id: None,
                policies: None,
                status,
                warnings,
            });
            return Ok(true);
        }

        if status >= TxStatus::Accepted && !self.settings.resubmit_known_transactions {
            if list_unconfirmed_ancestors {
                let (ok, _) = self
                    .insert_missing_mempool_ancestors(
                        &txid,
                        stored.policy_quote_id.unwrap_or_default(),
                    )
                    .await;
                if !ok {
                    state.responses.push(SubmitTxResult::failure(
                        Some(txid),
                        reject::UNCONFIRMED_ANCESTORS_ERROR,
                    ));
                    return Ok(false);
                }
            }
            state.responses.push(SubmitTxResult::success(
                txid,
                Some(reject::RESULT_ALREADY_KNOWN.into()),
                warnings,
            ));
            return Ok(true);
        }

        state.to_submit.push(TxToSubmit {
            txid,
            request,
            inputs,
            allow_high_fees: false,
            dont_check_fees: stored.ok_to_mine,
            list_unconfirmed_ancestors,
            quote_id: stored.policy_quote_id,
            policies: stored.policies.clone(),
            status,
            warnings,
        });
        Ok(true)
    }

    /// DS-checked transactions list their mempool ancestors when any spent
    /// output is not yet known to the store.
    async fn needs_ancestor_listing(
        &self,
        request: &SubmitTxRequest,
        inputs: &[TxInputRecord],
    ) -> Result<bool> {
        if !request.ds_check {
            return Ok(false);
        }
        for input in inputs {
            if !self
                .store
                .prev_out_known(&input.outpoint())
                .await
                .map_err(store_err)?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fetch and persist mempool ancestors for an already-accepted
    /// transaction. Returns (success, inserted count); "not in mempool" is
    /// not a failure.
    async fn insert_missing_mempool_ancestors(&self, txid: &str, quote_id: u64) -> (bool, usize) {
        if self.settings.dont_insert_transactions {
            return (true, 0);
        }
        match self.multi.get_mempool_ancestors(txid).await {
            Ok(ancestors) => {
                let now = SystemTime::now();
                let rows: Vec<TxUpsert> = ancestors
                    .iter()
                    .filter_map(|(ancestor_txid, entry)| {
                        let external = Txid::from_hex(ancestor_txid).ok()?;
                        let inputs = entry
                            .depends
                            .iter()
                            .enumerate()
                            .filter_map(|(n, dep)| {
                                Txid::from_hex(dep).ok().map(|prev| TxInputRecord {
                                    n: n as u32,
                                    prev_txid: prev,
                                    prev_n: n as u32,
                                })
                            })
                            .collect();
                        Some(TxUpsert {
                            tx: NewTx::ancestor(external, inputs, Some(quote_id), now),
                            mode: UpsertMode::Insert,
                        })
                    })
                    .collect();
                let count = rows.len();
                info!("mempool ancestors returned {} transactions for {}", count, txid);
                match self.store.insert_or_update_txs(rows, true).await {
                    Ok(_) => (true, count),
                    Err(e) => {
                        error!("cannot store mempool ancestors for {}: {}", txid, e);
                        (false, 0)
                    }
                }
            }
            Err(GatewayError::ProtocolRejection { code, message }) => {
                info!("mempool ancestors lookup for {} rejected: {}", txid, message);
                (code == crate::rpc::error::RPC_NOT_IN_MEMPOOL, 0)
            }
            Err(e) => {
                info!("mempool ancestors lookup for {} failed: {}", txid, e);
                (false, 0)
            }
        }
    }

    fn new_tx_from(
        &self,
        tx: &TxToSubmit,
        user: Option<&Identity>,
        status: TxStatus,
        default_quote_id: u64,
        submitted_at: Option<SystemTime>,
    ) -> NewTx {
        NewTx {
            external_id: txid_of(&tx.request.raw_tx),
            payload: tx.request.raw_tx.clone(),
            merkle_proof: tx.request.merkle_proof,
            merkle_format: tx.request.merkle_format.clone(),
            ds_check: tx.request.ds_check,
            callback_url: tx.request.callback_url.clone(),
            callback_token: tx.request.callback_token.clone(),
            callback_encryption: tx.request.callback_encryption.clone(),
            identity: user.cloned(),
            status,
            policy_quote_id: Some(tx.quote_id.unwrap_or(default_quote_id)),
            policies: tx.policies.clone(),
            ok_to_mine: tx.dont_check_fees,
            inputs: tx.inputs.clone(),
            received_at: SystemTime::now(),
            submitted_at,
        }
    }

    /// Re-drive mempool-missing transactions through the raw-send path in
    /// fixed-size ordered batches. Ordering matters: a child only becomes
    /// acceptable once its parent was re-accepted in the same or an earlier
    /// batch. Returns overall success and the internal ids quarantined for
    /// missing inputs.
    pub async fn resubmit_missing_transactions(
        &self,
        mempool_txids: &HashSet<String>,
        resubmitted_at: SystemTime,
    ) -> Result<(bool, Vec<u64>)> {
        let txs = self
            .store
            .missing_transactions(mempool_txids, resubmitted_at)
            .await
            .map_err(store_err)?;
        let batch_size = self.settings.resubmit_batch_size.max(1);
        debug!(
            "resubmitting {} missing transactions in batches of {}",
            txs.len(),
            batch_size
        );

        let mut missing_input_ids: Vec<u64> = Vec::new();
        let mut successful_count: usize = 0;
        let mut ignored_failures: usize = 0;

        for chunk in txs.chunks(batch_size) {
            let mut to_send: Vec<&TxRecord> = chunk.iter().collect();

            if self.settings.resubmit_prechecks_inputs {
                let mut batch_map: HashMap<Txid, Vec<u8>> = HashMap::new();
                for tx in chunk {
                    batch_map.insert(tx.external_id, tx.payload.clone());
                    let Ok(parsed) = Transaction::parse(&tx.payload) else {
                        missing_input_ids.push(tx.internal_id);
                        continue;
                    };
                    match collect_previous_outputs(&parsed, &batch_map, &self.multi).await {
                        Ok((_, prevouts)) => {
                            let unresolvable = prevouts.iter().any(|p| {
                                p.error.is_some()
                                    || p.collided_with
                                        .as_ref()
                                        .map(|c| !c.hex.is_empty())
                                        .unwrap_or(false)
                            });
                            if unresolvable {
                                missing_input_ids.push(tx.internal_id);
                            }
                        }
                        Err(e) => debug!("resubmit input fetch failed: {}", e),
                    }
                }
                to_send.retain(|t| !missing_input_ids.contains(&t.internal_id));
                if to_send.is_empty() {
                    continue;
                }
            }

            let specs: Vec<SubmitTxSpec> = to_send.iter().map(|t| spec_from_record(t)).collect();
            let outcome = match self.multi.send_raw_transactions(&specs).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("error while resubmitting transactions: {}", e);
                    continue;
                }
            };

            let submitted: Vec<(String, Vec<String>)> = to_send
                .iter()
                .map(|t| (t.external_id.to_string(), Vec::new()))
                .collect();
            let (_, transformed) = transform_rpc_response(&outcome, &submitted);

            let now = SystemTime::now();
            let successful: Vec<&&TxRecord> = to_send
                .iter()
                .filter(|t| {
                    transformed.iter().any(|r| {
                        r.is_success() && r.txid.as_deref() == Some(t.external_id.to_string().as_str())
                    })
                })
                .collect();
            successful_count += successful.len();
            self.store
                .update_txs_on_resubmit(
                    successful
                        .iter()
                        .map(|t| ResubmitUpdate {
                            internal_id: t.internal_id,
                            status: t.status,
                            submitted_at: now,
                        })
                        .collect(),
                )
                .await
                .map_err(store_err)?;

            for result in transformed.iter().filter(|r| !r.is_success()) {
                let description = result.description.as_deref().unwrap_or("");
                let internal_id = result.txid.as_deref().and_then(|txid| {
                    to_send
                        .iter()
                        .find(|t| t.external_id.to_string() == txid)
                        .map(|t| t.internal_id)
                });
                if reject::is_missing_inputs(description) {
                    if let Some(id) = internal_id {
                        missing_input_ids.push(id);
                    }
                } else if !description.starts_with(reject::MEMPOOL_ERROR) {
                    // this failure will probably persist on resubmit
                    warn!(
                        "resubmit of {:?} failed with '{}', ignored",
                        result.txid, description
                    );
                    ignored_failures += 1;
                }
            }
        }

        let failures = txs.len() as i64
            - successful_count as i64
            - ignored_failures as i64
            - missing_input_ids.len() as i64;
        info!(
            "resubmitted {} txs: {} successful, {} failures, {} ignored, {} missing inputs",
            txs.len(),
            successful_count,
            failures.max(0),
            ignored_failures,
            missing_input_ids.len()
        );
        Ok((failures <= 0, missing_input_ids))
    }

    /// Unanimous transaction lookup with optional merkle proof.
    pub async fn query_transaction(
        &self,
        txid: &str,
        want_merkle_proof: bool,
        merkle_format: Option<&str>,
    ) -> Result<QueryTxResponse> {
        let unanimity = self.multi.get_raw_transaction(txid).await?;
        let timestamp = SystemTime::now();

        if unanimity.first.is_none() && unanimity.first_error.is_some() {
            let description = unanimity
                .first_error
                .as_ref()
                .and_then(|e| e.safe_description());
            return Ok(QueryTxResponse {
                timestamp,
                txid: txid.to_string(),
                result: ResultCode::Failure,
                description,
                block_hash: None,
                block_height: None,
                confirmations: None,
                merkle_format: None,
                merkle_proof: None,
            });
        }

        // disagreement, or partial protocol rejections next to successes,
        // must not be silently resolved
        let protocol_error_present = unanimity
            .first_error
            .as_ref()
            .map(|e| e.is_protocol())
            .unwrap_or(false);
        if !unanimity.unanimous || protocol_error_present {
            return Ok(QueryTxResponse {
                timestamp,
                txid: txid.to_string(),
                result: ResultCode::Failure,
                description: Some("Mixed results".into()),
                block_hash: None,
                block_height: None,
                confirmations: None,
                merkle_format: None,
                merkle_proof: None,
            });
        }

        let info = unanimity
            .first
            .ok_or_else(|| GatewayError::Fatal("unanimous result missing".into()))?;

        let mut merkle_proof = None;
        if want_merkle_proof {
            if let Some(block_hash) = &info.block_hash {
                merkle_proof = Some(match merkle_format {
                    Some(MERKLE_FORMAT_TSC) => {
                        self.multi.get_merkle_proof2(block_hash, txid).await?
                    }
                    _ => self.multi.get_merkle_proof(txid, block_hash).await?,
                });
            }
        }

        Ok(QueryTxResponse {
            timestamp,
            txid: txid.to_string(),
            result: ResultCode::Success,
            description: None,
            block_hash: info.block_hash,
            block_height: info.block_height,
            confirmations: info.confirmations,
            merkle_format: merkle_format.map(|s| s.to_string()),
            merkle_proof,
        })
    }

    /// Unanimous `gettxouts` for the public query surface.
    pub async fn get_tx_outs(
        &self,
        outpoints: &[(String, u32)],
        fields: &[&str],
        include_mempool: bool,
    ) -> Result<TxOutsResponse> {
        let unanimity = self
            .multi
            .get_tx_outs_check_same(outpoints, fields, include_mempool)
            .await?;
        let timestamp = SystemTime::now();

        if unanimity.first.is_none() && unanimity.first_error.is_some() {
            return Ok(TxOutsResponse {
                timestamp,
                result: ResultCode::Failure,
                description: unanimity
                    .first_error
                    .as_ref()
                    .and_then(|e| e.safe_description()),
                tx_outs: Vec::new(),
            });
        }

        let protocol_error_present = unanimity
            .first_error
            .as_ref()
            .map(|e| e.is_protocol())
            .unwrap_or(false);
        if !unanimity.unanimous || protocol_error_present {
            return Ok(TxOutsResponse {
                timestamp,
                result: ResultCode::Failure,
                description: Some("Mixed results".into()),
                tx_outs: Vec::new(),
            });
        }

        Ok(TxOutsResponse {
            timestamp,
            result: ResultCode::Success,
            description: None,
            tx_outs: unanimity.first.map(|r| r.tx_outs).unwrap_or_default(),
        })
    }
}

fn input_records(tx: &Transaction) -> Vec<TxInputRecord> {
    tx.inputs
        .iter()
        .enumerate()
        .map(|(n, input)| TxInputRecord {
            n: n as u32,
            prev_txid: input.prev_out.txid,
            prev_n: input.prev_out.vout,
        })
        .collect()
}

fn spec_from_submit(tx: &TxToSubmit) -> SubmitTxSpec {
    SubmitTxSpec {
        raw: tx.request.raw_tx.clone(),
        allow_high_fees: tx.allow_high_fees,
        dont_check_fees: tx.dont_check_fees,
        list_unconfirmed_ancestors: tx.list_unconfirmed_ancestors,
        config: tx
            .policies
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
    }
}

fn spec_from_record(tx: &TxRecord) -> SubmitTxSpec {
    SubmitTxSpec {
        raw: tx.payload.clone(),
        allow_high_fees: false,
        dont_check_fees: tx.ok_to_mine,
        list_unconfirmed_ancestors: false,
        config: tx
            .policies
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
    }
}

/// Flatten a merged node response into per-transaction client results.
/// Every submitted transaction yields exactly one result; transactions
/// absent from the response were accepted as new.
pub(crate) fn transform_rpc_response(
    outcome: &SendRawTxsResult,
    submitted: &[(String, Vec<String>)],
) -> (usize, Vec<SubmitTxResult>) {
    let mut processed: HashSet<&str> = HashSet::new();
    let mut failed = 0usize;
    let mut responses = Vec::new();

    let warnings_of = |txid: &str| -> Vec<String> {
        submitted
            .iter()
            .find(|(id, _)| id == txid)
            .map(|(_, w)| w.clone())
            .unwrap_or_default()
    };

    for invalid in &outcome.invalid {
        if !processed.insert(&invalid.txid) {
            continue;
        }
        if reject::is_success_code(invalid.reject_code) {
            responses.push(SubmitTxResult::success(
                invalid.txid.clone(),
                Some(reject::RESULT_ALREADY_KNOWN.into()),
                warnings_of(&invalid.txid),
            ));
            continue;
        }
        let combined =
            reject::combine_code_and_reason(invalid.reject_code, invalid.reject_reason.as_deref());
        let description = if reject::is_retryable(&combined) {
            reject::mempool_error_with(&combined)
        } else {
            combined
        };
        let mut failure = SubmitTxResult::failure(Some(invalid.txid.clone()), description);
        failure.conflicted_with = invalid
            .collided_with
            .iter()
            .map(|c| ConflictedTx {
                txid: c.txid.clone(),
                size: c.size,
                hex: c.hex.clone(),
            })
            .collect();
        responses.push(failure);
        failed += 1;
    }

    for evicted in &outcome.evicted {
        if !processed.insert(evicted) {
            continue;
        }
        // only happens when the mempool is full of higher-priority entries
        let mut failure = SubmitTxResult::failure(
            Some(evicted.clone()),
            reject::mempool_error_with(reject::EVICTED),
        );
        failure.warnings = warnings_of(evicted);
        responses.push(failure);
        failed += 1;
    }

    for known in &outcome.known {
        if !processed.insert(known) {
            continue;
        }
        responses.push(SubmitTxResult::success(
            known.clone(),
            Some(reject::RESULT_ALREADY_KNOWN.into()),
            warnings_of(known),
        ));
    }

    for (txid, warnings) in submitted {
        if !processed.contains(txid.as_str()) {
            responses.push(SubmitTxResult::success(
                txid.clone(),
                None,
                warnings.clone(),
            ));
        }
    }

    (failed, responses)
}
