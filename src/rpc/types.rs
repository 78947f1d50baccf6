//! Node RPC response shapes. Unknown fields are ignored on purpose: node
//! releases add fields freely and the gateway only consumes this subset.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChainInfo {
    pub blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BlockHeaderInfo {
    pub hash: String,
    pub height: u64,
    pub time: u64,
    #[serde(default, rename = "previousblockhash")]
    pub previous_block_hash: Option<String>,
}

/// Consolidation policy the node enforces, from `getnetworkinfo`. Missing
/// fields fall back to the stock node defaults.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NetworkInfo {
    #[serde(default = "default_consolidation_factor", rename = "minconsolidationfactor")]
    pub min_consolidation_factor: u64,
    #[serde(
        default = "default_max_input_script_size",
        rename = "maxconsolidationinputscriptsize"
    )]
    pub max_consolidation_input_script_size: u64,
    #[serde(default = "default_min_conf_input", rename = "minconfconsolidationinput")]
    pub min_conf_consolidation_input: u64,
    #[serde(default, rename = "acceptnonstdconsolidationinput")]
    pub accept_non_std_consolidation_input: bool,
}

fn default_consolidation_factor() -> u64 {
    20
}
fn default_max_input_script_size() -> u64 {
    150
}
fn default_min_conf_input() -> u64 {
    6
}

impl Default for NetworkInfo {
    fn default() -> Self {
        NetworkInfo {
            min_consolidation_factor: default_consolidation_factor(),
            max_consolidation_input_script_size: default_max_input_script_size(),
            min_conf_consolidation_input: default_min_conf_input(),
            accept_non_std_consolidation_input: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawTransactionInfo {
    pub hex: String,
    #[serde(default, rename = "blockhash")]
    pub block_hash: Option<String>,
    #[serde(default, rename = "blockheight")]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub confirmations: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CollidedWith {
    pub txid: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub hex: String,
}

/// One entry of a `gettxouts` response. Either `error` (with an optional
/// colliding mempool transaction) or the output fields are present.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TxOutEntry {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "collidedWith")]
    pub collided_with: Option<CollidedWith>,
    /// Value in whole coins, as nodes report it.
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default, rename = "scriptPubKeyLen")]
    pub script_pub_key_len: Option<u64>,
    #[serde(default, rename = "isStandard")]
    pub is_standard: Option<bool>,
    #[serde(default)]
    pub confirmations: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TxOutsResult {
    #[serde(default, rename = "txouts")]
    pub tx_outs: Vec<TxOutEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvalidTx {
    pub txid: String,
    #[serde(default)]
    pub reject_code: Option<i32>,
    #[serde(default)]
    pub reject_reason: Option<String>,
    #[serde(default, rename = "collidedWith")]
    pub collided_with: Vec<CollidedWith>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AncestorVin {
    pub txid: String,
    pub vout: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnconfirmedAncestor {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<AncestorVin>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnconfirmedTx {
    pub txid: String,
    #[serde(default)]
    pub ancestors: Vec<UnconfirmedAncestor>,
}

/// `sendrawtransactions` response. Transactions absent from every list were
/// accepted as new.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRawTxsResult {
    #[serde(default)]
    pub known: Vec<String>,
    #[serde(default)]
    pub evicted: Vec<String>,
    #[serde(default)]
    pub invalid: Vec<InvalidTx>,
    #[serde(default)]
    pub unconfirmed: Vec<UnconfirmedTx>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MempoolAncestorEntry {
    #[serde(default)]
    pub depends: Vec<String>,
}

pub type MempoolAncestors = HashMap<String, MempoolAncestorEntry>;

/// One transaction of a `sendrawtransactions` submission batch.
#[derive(Debug, Clone)]
pub struct SubmitTxSpec {
    pub raw: Vec<u8>,
    pub allow_high_fees: bool,
    pub dont_check_fees: bool,
    pub list_unconfirmed_ancestors: bool,
    /// Per-transaction policy overrides forwarded verbatim to the node.
    pub config: Option<serde_json::Map<String, serde_json::Value>>,
}
