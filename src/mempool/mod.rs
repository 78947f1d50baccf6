//! Mempool reconciliation: the periodic checker loop and the invalid-tx
//! handler.

pub mod checker;
pub mod invalid;

pub use checker::{MempoolChecker, MempoolCheckerSettings};
pub use invalid::{InvalidTxEvent, InvalidTxHandler};
