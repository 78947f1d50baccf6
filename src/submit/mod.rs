//! Transaction submission engine.
//!
//! - `engine`: the per-batch pipeline (validate, resolve inputs, price,
//!   submit, reconcile) and the resubmission sub-protocol
//! - `fees`: fee policy evaluation and consolidation detection
//! - `prevouts`: batch-first previous-output resolution
//! - `reject`: node reject-code policy and client-facing descriptions
//! - `types`: request/response shapes for the public surface

pub mod engine;
pub mod fees;
pub mod prevouts;
pub mod reject;
pub mod types;

pub use engine::{SubmitEngine, SubmitSettings};
pub use types::{
    ConflictedTx, QueryTxResponse, ResultCode, SubmitBatchResponse, SubmitTxRequest,
    SubmitTxResult, TxOutsResponse,
};
