//! Store module: the repository trait the core writes durable state
//! through, plus the in-memory implementation for dev/tests. Production
//! deployments plug a database-backed implementation in at wiring time.

pub mod memory;
pub mod records;
pub mod traits;

pub use memory::InMemTxStore;
pub use records::{
    BlockRecord, DsConflict, Identity, NewBlock, NewTx, ResubmitUpdate, TxInputRecord, TxRecord,
    TxStatus, TxUpsert, UpsertMode,
};
pub use traits::{StoreError, StoreResult, TxStore};
