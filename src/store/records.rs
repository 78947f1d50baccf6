//! Durable record shapes owned by the store.

use crate::chain::{BlockHash, OutPoint, Txid};
use std::time::SystemTime;

/// Lifecycle of a submitted transaction. Ordering matters: status moves
/// forward only, except for the `NodeRejected` and `UnknownOldTx` re-entry
/// paths of the submission pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxStatus {
    NotPresentInDb,
    NodeRejected,
    /// Persisted just before `sendrawtransactions`; a crash mid-call leaves
    /// the transaction recoverable by resubmission.
    SentToNode,
    /// Legacy rows with no stored identity or quote.
    UnknownOldTx,
    Accepted,
    /// Terminal: resubmission gave up after the missing-inputs retry budget.
    MissingInputsExhausted,
    Mined,
}

/// Authenticated submitter identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInputRecord {
    pub n: u32,
    pub prev_txid: Txid,
    pub prev_n: u32,
}

impl TxInputRecord {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.prev_txid,
            vout: self.prev_n,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TxRecord {
    pub internal_id: u64,
    pub external_id: Txid,
    pub payload: Vec<u8>,
    pub merkle_proof: bool,
    pub merkle_format: Option<String>,
    pub ds_check: bool,
    pub callback_url: Option<String>,
    pub callback_token: Option<String>,
    pub callback_encryption: Option<String>,
    pub identity: Option<Identity>,
    pub status: TxStatus,
    pub policy_quote_id: Option<u64>,
    /// JSON policy overrides forwarded verbatim to the node on resubmit.
    pub policies: Option<String>,
    /// Submit with fee checks disabled (consolidation or legacy rows).
    pub ok_to_mine: bool,
    pub inputs: Vec<TxInputRecord>,
    pub received_at: SystemTime,
    pub submitted_at: Option<SystemTime>,
    pub resubmitted_at: Option<SystemTime>,
}

/// Transaction data for an upsert; the store assigns the internal id.
#[derive(Debug, Clone)]
pub struct NewTx {
    pub external_id: Txid,
    pub payload: Vec<u8>,
    pub merkle_proof: bool,
    pub merkle_format: Option<String>,
    pub ds_check: bool,
    pub callback_url: Option<String>,
    pub callback_token: Option<String>,
    pub callback_encryption: Option<String>,
    pub identity: Option<Identity>,
    pub status: TxStatus,
    pub policy_quote_id: Option<u64>,
    pub policies: Option<String>,
    pub ok_to_mine: bool,
    pub inputs: Vec<TxInputRecord>,
    pub received_at: SystemTime,
    pub submitted_at: Option<SystemTime>,
}

impl NewTx {
    /// Minimal row for an unconfirmed ancestor discovered via the node.
    pub fn ancestor(
        external_id: Txid,
        inputs: Vec<TxInputRecord>,
        policy_quote_id: Option<u64>,
        received_at: SystemTime,
    ) -> Self {
        NewTx {
            external_id,
            payload: Vec::new(),
            merkle_proof: false,
            merkle_format: None,
            ds_check: false,
            callback_url: None,
            callback_token: None,
            callback_encryption: None,
            identity: None,
            status: TxStatus::Accepted,
            policy_quote_id,
            policies: None,
            ok_to_mine: false,
            inputs,
            received_at,
            submitted_at: None,
        }
    }
}

/// How an upsert treats an existing row with the same external id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Insert a new row; an existing row is left untouched.
    Insert,
    /// Replace the stored submission parameters.
    Update,
    /// Touch only status and the resubmission timestamp.
    StatusAndResubmit,
}

#[derive(Debug, Clone)]
pub struct TxUpsert {
    pub tx: NewTx,
    pub mode: UpsertMode,
}

#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub internal_id: u64,
    pub hash: BlockHash,
    pub height: u64,
    pub prev_hash: BlockHash,
    pub time: u64,
    pub on_active_chain: bool,
    pub parsed_for_merkle_at: Option<SystemTime>,
    pub parsed_for_ds_at: Option<SystemTime>,
    pub inserted_at: SystemTime,
}

impl BlockRecord {
    pub fn fully_parsed(&self) -> bool {
        self.parsed_for_merkle_at.is_some() && self.parsed_for_ds_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewBlock {
    pub hash: BlockHash,
    pub height: u64,
    pub prev_hash: BlockHash,
    pub time: u64,
}

/// One double-spend conflict detected by the store: a stored DS-checked
/// unconfirmed transaction whose input is also spent by `ds_txid`.
#[derive(Debug, Clone)]
pub struct DsConflict {
    pub tx_internal_id: u64,
    pub tx_external_id: Txid,
    pub ds_txid: Txid,
}

/// Update applied to a transaction after a resubmission round.
#[derive(Debug, Clone)]
pub struct ResubmitUpdate {
    pub internal_id: u64,
    pub status: TxStatus,
    pub submitted_at: SystemTime,
}
