//! Repository trait consumed by the submission engine, the block
//! synchronizer and the mempool checker. The store is the single writer of
//! durable state; the workers above it hold none.

use crate::chain::{BlockHash, OutPoint, Txid};
use crate::store::records::*;
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TxStore: Send + Sync {
    // -- blocks --------------------------------------------------------

    /// Insert a block; returns the assigned internal id, or None when a
    /// record for this hash already exists (at most one record per hash).
    async fn insert_block(&self, block: NewBlock) -> StoreResult<Option<u64>>;

    async fn block_by_hash(&self, hash: &BlockHash) -> StoreResult<Option<BlockRecord>>;

    /// Highest block on the active chain.
    async fn best_block(&self) -> StoreResult<Option<BlockRecord>>;

    /// Mark the block with `hash` as on the active chain and demote any
    /// sibling at the same height.
    async fn set_on_active_chain(&self, height: u64, hash: &BlockHash) -> StoreResult<()>;

    /// Active-chain blocks still missing a parse-complete marker.
    async fn unparsed_blocks(&self) -> StoreResult<Vec<BlockRecord>>;

    /// True once both parse passes are marked complete for this block.
    async fn block_was_parsed(&self, block_internal_id: u64) -> StoreResult<bool>;

    async fn set_parsed_for_merkle(&self, block_internal_id: u64) -> StoreResult<()>;
    async fn set_parsed_for_ds(&self, block_internal_id: u64) -> StoreResult<()>;

    // -- transactions --------------------------------------------------

    async fn tx_status(&self, external_id: &Txid) -> StoreResult<TxStatus>;

    async fn tx_by_external_id(&self, external_id: &Txid) -> StoreResult<Option<TxRecord>>;

    /// Upsert a batch. With `insert_only`, existing rows are skipped (used
    /// for unconfirmed ancestors). Returns the external ids of rows that
    /// were newly inserted.
    async fn insert_or_update_txs(
        &self,
        txs: Vec<TxUpsert>,
        insert_only: bool,
    ) -> StoreResult<Vec<Txid>>;

    async fn update_tx_status(&self, external_ids: &[Txid], status: TxStatus) -> StoreResult<()>;

    async fn update_txs_on_resubmit(&self, updates: Vec<ResubmitUpdate>) -> StoreResult<()>;

    /// Whether the referenced previous output belongs to a transaction this
    /// store has already seen confirmed.
    async fn prev_out_known(&self, outpoint: &OutPoint) -> StoreResult<bool>;

    /// Submitted transactions absent from the given mempool snapshot,
    /// oldest first, excluding terminal rows and rows already resubmitted
    /// at or after `resubmitted_before`.
    async fn missing_transactions(
        &self,
        mempool_txids: &HashSet<String>,
        resubmitted_before: SystemTime,
    ) -> StoreResult<Vec<TxRecord>>;

    // -- transaction/block links ---------------------------------------

    /// Stored transactions that have no link to any active-chain block.
    async fn txs_without_active_block_link(&self) -> StoreResult<Vec<TxRecord>>;

    async fn insert_tx_block_links(
        &self,
        tx_internal_ids: &[u64],
        block_internal_id: u64,
    ) -> StoreResult<()>;

    // -- double spends -------------------------------------------------

    /// Detect double spends of stored DS-checked unconfirmed transactions
    /// against the flattened input list of a block. `delta_height` bounds
    /// how far below the block's height conflicts are considered.
    async fn detect_block_double_spends(
        &self,
        spends: &[(Txid, OutPoint)],
        delta_height: u64,
        block_internal_id: u64,
    ) -> StoreResult<Vec<DsConflict>>;

    /// Record a block-scoped double spend; false when already recorded
    /// (duplicate parse), so callers notify at most once.
    async fn insert_block_double_spend(
        &self,
        tx_internal_id: u64,
        ds_txid: &Txid,
        payload: &[u8],
    ) -> StoreResult<bool>;

    /// Record a mempool double-spend attempt; false when already recorded.
    async fn insert_mempool_double_spend(
        &self,
        tx_internal_id: u64,
        ds_txid: &Txid,
        payload: &[u8],
    ) -> StoreResult<bool>;

    /// DS-checked stored transactions among the given external ids.
    async fn txs_for_ds_check(&self, external_ids: &[Txid]) -> StoreResult<Vec<TxRecord>>;

    // -- retention -----------------------------------------------------

    /// Delete blocks and transactions older than the cutoffs. Returns
    /// (blocks deleted, transactions deleted).
    async fn cleanup(
        &self,
        blocks_older_than: SystemTime,
        txs_older_than: SystemTime,
    ) -> StoreResult<(u64, u64)>;
}
