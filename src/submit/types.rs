//! Client-facing request/response shapes of the submission engine. The
//! REST layer maps these 1:1 onto its transport schema.

use serde_json::Value;
use std::time::SystemTime;

pub const MERKLE_FORMAT_TSC: &str = "TSC";
pub const VALID_MERKLE_FORMATS: &[&str] = &[MERKLE_FORMAT_TSC];

/// Warning attached when a DS-check submission carries no DSNT output.
pub const WARNING_MISSING_DSNT: &str =
    "Missing DSNT output: double spend notifications will not be sent";

#[derive(Debug, Clone, Default)]
pub struct SubmitTxRequest {
    pub raw_tx: Vec<u8>,
    pub callback_url: Option<String>,
    pub callback_token: Option<String>,
    pub callback_encryption: Option<String>,
    pub merkle_proof: bool,
    pub merkle_format: Option<String>,
    pub ds_check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    Failure,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictedTx {
    pub txid: String,
    pub size: u64,
    pub hex: String,
}

#[derive(Debug, Clone)]
pub struct SubmitTxResult {
    /// None when the failure happened before the payload could be
    /// identified (missing or unidentifiable raw transaction).
    pub txid: Option<String>,
    pub result: ResultCode,
    pub description: Option<String>,
    pub warnings: Vec<String>,
    pub conflicted_with: Vec<ConflictedTx>,
}

impl SubmitTxResult {
    pub fn failure(txid: Option<String>, description: impl Into<String>) -> Self {
        SubmitTxResult {
            txid,
            result: ResultCode::Failure,
            description: Some(description.into()),
            warnings: Vec::new(),
            conflicted_with: Vec::new(),
        }
    }

    pub fn success(txid: String, description: Option<String>, warnings: Vec<String>) -> Self {
        SubmitTxResult {
            txid: Some(txid),
            result: ResultCode::Success,
            description,
            warnings,
            conflicted_with: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == ResultCode::Success
    }
}

#[derive(Debug, Clone)]
pub struct SubmitBatchResponse {
    pub timestamp: SystemTime,
    pub best_block_hash: String,
    pub best_block_height: u64,
    pub txs: Vec<SubmitTxResult>,
    pub failure_count: usize,
}

#[derive(Debug, Clone)]
pub struct QueryTxResponse {
    pub timestamp: SystemTime,
    pub txid: String,
    pub result: ResultCode,
    pub description: Option<String>,
    pub block_hash: Option<String>,
    pub block_height: Option<u64>,
    pub confirmations: Option<u64>,
    pub merkle_format: Option<String>,
    pub merkle_proof: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct TxOutsResponse {
    pub timestamp: SystemTime,
    pub result: ResultCode,
    pub description: Option<String>,
    pub tx_outs: Vec<crate::rpc::types::TxOutEntry>,
}
