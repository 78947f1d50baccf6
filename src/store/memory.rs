//! In-memory store for development and tests. Interior mutability via a
//! single RwLock over the whole state; every operation is one lock scope,
//! which gives the same atomicity the database repository provides.

use crate::chain::{BlockHash, OutPoint, Txid};
use crate::store::records::*;
use crate::store::traits::{StoreResult, TxStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

#[derive(Default)]
struct Inner {
    next_tx_id: u64,
    next_block_id: u64,
    txs: HashMap<Txid, TxRecord>,
    tx_by_internal: HashMap<u64, Txid>,
    blocks: HashMap<BlockHash, BlockRecord>,
    block_by_internal: HashMap<u64, BlockHash>,
    /// (tx internal id, block internal id)
    tx_block_links: HashSet<(u64, u64)>,
    block_double_spends: HashMap<(u64, Txid), Vec<u8>>,
    mempool_double_spends: HashMap<(u64, Txid), Vec<u8>>,
}

impl Inner {
    fn linked_to_active_chain(&self, tx_internal_id: u64) -> bool {
        self.tx_block_links.iter().any(|(tx, block)| {
            *tx == tx_internal_id
                && self
                    .block_by_internal
                    .get(block)
                    .and_then(|h| self.blocks.get(h))
                    .map(|b| b.on_active_chain)
                    .unwrap_or(false)
        })
    }
}

#[derive(Default)]
pub struct InMemTxStore {
    inner: RwLock<Inner>,
}

impl InMemTxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TxStore for InMemTxStore {
    async fn insert_block(&self, block: NewBlock) -> StoreResult<Option<u64>> {
        let mut inner = self.inner.write();
        if inner.blocks.contains_key(&block.hash) {
            return Ok(None);
        }
        inner.next_block_id += 1;
        let id = inner.next_block_id;
        let record = BlockRecord {
            internal_id: id,
            hash: block.hash,
            height: block.height,
            prev_hash: block.prev_hash,
            time: block.time,
            on_active_chain: true,
            parsed_for_merkle_at: None,
            parsed_for_ds_at: None,
            inserted_at: SystemTime::now(),
        };
        inner.block_by_internal.insert(id, block.hash);
        inner.blocks.insert(block.hash, record);
        Ok(Some(id))
    }

    async fn block_by_hash(&self, hash: &BlockHash) -> StoreResult<Option<BlockRecord>> {
        Ok(self.inner.read().blocks.get(hash).cloned())
    }

    async fn best_block(&self) -> StoreResult<Option<BlockRecord>> {
        Ok(self
            .inner
            .read()
            .blocks
            .values()
            .filter(|b| b.on_active_chain)
            .max_by_key(|b| b.height)
            .cloned())
    }

    async fn set_on_active_chain(&self, height: u64, hash: &BlockHash) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for block in inner.blocks.values_mut() {
            if block.hash == *hash {
                block.on_active_chain = true;
            } else if block.height == height {
                block.on_active_chain = false;
            }
        }
        Ok(())
    }

    async fn unparsed_blocks(&self) -> StoreResult<Vec<BlockRecord>> {
        Ok(self
            .inner
            .read()
            .blocks
            .values()
            .filter(|b| b.on_active_chain && !b.fully_parsed())
            .cloned()
            .collect())
    }

    async fn block_was_parsed(&self, block_internal_id: u64) -> StoreResult<bool> {
        let inner = self.inner.read();
        Ok(inner
            .block_by_internal
            .get(&block_internal_id)
            .and_then(|h| inner.blocks.get(h))
            .map(|b| b.fully_parsed())
            .unwrap_or(false))
    }

    async fn set_parsed_for_merkle(&self, block_internal_id: u64) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if let Some(hash) = inner.block_by_internal.get(&block_internal_id).copied() {
            if let Some(block) = inner.blocks.get_mut(&hash) {
                block.parsed_for_merkle_at = Some(SystemTime::now());
            }
        }
        Ok(())
    }

    async fn set_parsed_for_ds(&self, block_internal_id: u64) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if let Some(hash) = inner.block_by_internal.get(&block_internal_id).copied() {
            if let Some(block) = inner.blocks.get_mut(&hash) {
                block.parsed_for_ds_at = Some(SystemTime::now());
            }
        }
        Ok(())
    }

    async fn tx_status(&self, external_id: &Txid) -> StoreResult<TxStatus> {
        Ok(self
            .inner
            .read()
            .txs
            .get(external_id)
            .map(|t| t.status)
            .unwrap_or(TxStatus::NotPresentInDb))
    }

    async fn tx_by_external_id(&self, external_id: &Txid) -> StoreResult<Option<TxRecord>> {
        Ok(self.inner.read().txs.get(external_id).cloned())
    }

    async fn insert_or_update_txs(
        &self,
        txs: Vec<TxUpsert>,
        insert_only: bool,
    ) -> StoreResult<Vec<Txid>> {
        let mut inner = self.inner.write();
        let mut inserted = Vec::new();
        for upsert in txs {
            let new = upsert.tx;
            match inner.txs.get_mut(&new.external_id) {
                Some(existing) => {
                    if insert_only {
                        continue;
                    }
                    match upsert.mode {
                        UpsertMode::Insert => {}
                        UpsertMode::Update => {
                            existing.payload = new.payload;
                            existing.merkle_proof = new.merkle_proof;
                            existing.merkle_format = new.merkle_format;
                            existing.ds_check = new.ds_check;
                            existing.callback_url = new.callback_url;
                            existing.callback_token = new.callback_token;
                            existing.callback_encryption = new.callback_encryption;
                            existing.identity = new.identity;
                            existing.status = new.status;
                            existing.policy_quote_id = new.policy_quote_id;
                            existing.policies = new.policies;
                            existing.ok_to_mine = new.ok_to_mine;
                            existing.inputs = new.inputs;
                            existing.submitted_at = new.submitted_at;
                        }
                        UpsertMode::StatusAndResubmit => {
                            existing.status = new.status;
                            existing.resubmitted_at = new.submitted_at;
                        }
                    }
                }
                None => {
                    inner.next_tx_id += 1;
                    let id = inner.next_tx_id;
                    let record = TxRecord {
                        internal_id: id,
                        external_id: new.external_id,
                        payload: new.payload,
                        merkle_proof: new.merkle_proof,
                        merkle_format: new.merkle_format,
                        ds_check: new.ds_check,
                        callback_url: new.callback_url,
                        callback_token: new.callback_token,
                        callback_encryption: new.callback_encryption,
                        identity: new.identity,
                        status: new.status,
                        policy_quote_id: new.policy_quote_id,
                        policies: new.policies,
                        ok_to_mine: new.ok_to_mine,
                        inputs: new.inputs,
                        received_at: new.received_at,
                        submitted_at: new.submitted_at,
                        resubmitted_at: None,
                    };
                    inner.tx_by_internal.insert(id, record.external_id);
                    inserted.push(record.external_id);
                    inner.txs.insert(record.external_id, record);
                }
            }
        }
        Ok(inserted)
    }

    async fn update_tx_status(&self, external_ids: &[Txid], status: TxStatus) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for id in external_ids {
            if let Some(tx) = inner.txs.get_mut(id) {
                tx.status = status;
            }
        }
        Ok(())
    }

    async fn update_txs_on_resubmit(&self, updates: Vec<ResubmitUpdate>) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for update in updates {
            if let Some(external) = inner.tx_by_internal.get(&update.internal_id).copied() {
                if let Some(tx) = inner.txs.get_mut(&external) {
                    tx.status = update.status;
                    tx.resubmitted_at = Some(update.submitted_at);
                }
            }
        }
        Ok(())
    }

    async fn prev_out_known(&self, outpoint: &OutPoint) -> StoreResult<bool> {
        let inner = self.inner.read();
        Ok(inner
            .txs
            .get(&outpoint.txid)
            .map(|t| inner.linked_to_active_chain(t.internal_id))
            .unwrap_or(false))
    }

    async fn missing_transactions(
        &self,
        mempool_txids: &HashSet<String>,
        resubmitted_before: SystemTime,
    ) -> StoreResult<Vec<TxRecord>> {
        let inner = self.inner.read();
        let mut missing: Vec<TxRecord> = inner
            .txs
            .values()
            .filter(|t| matches!(t.status, TxStatus::SentToNode | TxStatus::Accepted))
            // ancestor rows carry no payload and cannot be resubmitted
            .filter(|t| !t.payload.is_empty())
            .filter(|t| !inner.linked_to_active_chain(t.internal_id))
            .filter(|t| !mempool_txids.contains(&t.external_id.to_string()))
            .filter(|t| match t.resubmitted_at {
                Some(at) => at < resubmitted_before,
                None => true,
            })
            .cloned()
            .collect();
        // submission order: a parent is always older than its children
        missing.sort_by_key(|t| t.internal_id);
        Ok(missing)
    }

    async fn txs_without_active_block_link(&self) -> StoreResult<Vec<TxRecord>> {
        let inner = self.inner.read();
        let mut txs: Vec<TxRecord> = inner
            .txs
            .values()
            .filter(|t| !inner.linked_to_active_chain(t.internal_id))
            .cloned()
            .collect();
        txs.sort_by_key(|t| t.internal_id);
        Ok(txs)
    }

    async fn insert_tx_block_links(
        &self,
        tx_internal_ids: &[u64],
        block_internal_id: u64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for tx_id in tx_internal_ids {
            inner.tx_block_links.insert((*tx_id, block_internal_id));
        }
        Ok(())
    }

    async fn detect_block_double_spends(
        &self,
        spends: &[(Txid, OutPoint)],
        delta_height: u64,
        block_internal_id: u64,
    ) -> StoreResult<Vec<DsConflict>> {
        let inner = self.inner.read();
        let block_height = inner
            .block_by_internal
            .get(&block_internal_id)
            .and_then(|h| inner.blocks.get(h))
            .map(|b| b.height)
            .unwrap_or(0);
        let best_height = inner
            .blocks
            .values()
            .filter(|b| b.on_active_chain)
            .map(|b| b.height)
            .max()
            .unwrap_or(block_height);
        // blocks below the height window are stale forks; their spends are
        // not worth reporting against current unconfirmed transactions
        if block_height + delta_height < best_height {
            return Ok(Vec::new());
        }

        let mut conflicts = Vec::new();
        for tx in inner.txs.values() {
            if !tx.ds_check || inner.linked_to_active_chain(tx.internal_id) {
                continue;
            }
            for input in &tx.inputs {
                for (spender, outpoint) in spends {
                    if *outpoint == input.outpoint() && *spender != tx.external_id {
                        conflicts.push(DsConflict {
                            tx_internal_id: tx.internal_id,
                            tx_external_id: tx.external_id,
                            ds_txid: *spender,
                        });
                    }
                }
            }
        }
        Ok(conflicts)
    }

    async fn insert_block_double_spend(
        &self,
        tx_internal_id: u64,
        ds_txid: &Txid,
        payload: &[u8],
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        match inner.block_double_spends.entry((tx_internal_id, *ds_txid)) {
            std::collections::hash_map::Entry::Occupied(_) => Ok(false),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(payload.to_vec());
                Ok(true)
            }
        }
    }

    async fn insert_mempool_double_spend(
        &self,
        tx_internal_id: u64,
        ds_txid: &Txid,
        payload: &[u8],
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        match inner.mempool_double_spends.entry((tx_internal_id, *ds_txid)) {
            std::collections::hash_map::Entry::Occupied(_) => Ok(false),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(payload.to_vec());
                Ok(true)
            }
        }
    }

    async fn txs_for_ds_check(&self, external_ids: &[Txid]) -> StoreResult<Vec<TxRecord>> {
        let inner = self.inner.read();
        Ok(external_ids
            .iter()
            .filter_map(|id| inner.txs.get(id))
            .filter(|t| t.ds_check)
            .cloned()
            .collect())
    }

    async fn cleanup(
        &self,
        blocks_older_than: SystemTime,
        txs_older_than: SystemTime,
    ) -> StoreResult<(u64, u64)> {
        let mut inner = self.inner.write();

        let stale_blocks: Vec<BlockHash> = inner
            .blocks
            .values()
            .filter(|b| b.inserted_at < blocks_older_than)
            .map(|b| b.hash)
            .collect();
        for hash in &stale_blocks {
            if let Some(block) = inner.blocks.remove(hash) {
                inner.block_by_internal.remove(&block.internal_id);
                inner
                    .tx_block_links
                    .retain(|(_, b)| *b != block.internal_id);
            }
        }

        let stale_txs: Vec<Txid> = inner
            .txs
            .values()
            .filter(|t| t.received_at < txs_older_than)
            .map(|t| t.external_id)
            .collect();
        for id in &stale_txs {
            if let Some(tx) = inner.txs.remove(id) {
                inner.tx_by_internal.remove(&tx.internal_id);
                inner.tx_block_links.retain(|(t, _)| *t != tx.internal_id);
                inner
                    .block_double_spends
                    .retain(|(t, _), _| *t != tx.internal_id);
                inner
                    .mempool_double_spends
                    .retain(|(t, _), _| *t != tx.internal_id);
            }
        }

        Ok((stale_blocks.len() as u64, stale_txs.len() as u64))
    }
}
