//! Chain wire codec and core chain types.
//!
//! - Hash256/Txid/BlockHash with node-facing reversed-hex rendering
//! - raw transaction and block decoding (bytes::Buf cursors)
//! - output script classification (data outputs, DSNT marker)

pub mod block;
pub mod hash;
pub mod script;
pub mod tx;

pub use block::{Block, BlockHeader, BlockTx};
pub use hash::{double_sha256, BlockHash, Hash256, Txid};
pub use tx::{txid_of, CodecError, OutPoint, Transaction, TxInput, TxOutput};
