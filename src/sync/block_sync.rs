//! Block synchronizer: ordered ingestion of new-block signals, backward
//! gap/fork filling, transaction-to-block linking and block-scoped
//! double-spend detection.
//!
//! Discovery walks the chain backwards from the announced block and pushes
//! a parse-ready marker per stored block onto a LIFO stack. When the walk
//! reaches genesis or an already-known ancestor the stack is flushed, which
//! hands the markers to the parsing stage oldest-parent-first even though
//! blocks were discovered most-recent-first.

use crate::chain::{Block, BlockHash, OutPoint, Txid};
use crate::notify::{NotificationEvent, NotificationSink};
use crate::rpc::MultiNodeClient;
use crate::store::{NewBlock, StoreError, TxStore};
use crate::sync::events::{BlockAvailable, EventChannel, Subscription};
use crate::utils::errors::{GatewayError, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Blocks this far below the best tip are not backfilled; the bound
    /// keeps a bogus announcement from walking the whole chain.
    pub max_fork_depth: u64,
    /// Height window for block-scoped double-spend detection.
    pub ds_height_window: u64,
    pub dont_parse_blocks: bool,
    pub parse_queue_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            max_fork_depth: 288,
            ds_height_window: 144,
            dont_parse_blocks: false,
            parse_queue_capacity: 1024,
        }
    }
}

/// Worker-owned counters, observable from outside.
#[derive(Default)]
pub struct SyncStatus {
    pub blocks_parsed: AtomicU64,
    pub blocks_duplicated: AtomicU64,
    pub errors: AtomicU64,
    pub best_height_seen: AtomicU64,
}

enum Walk {
    Done,
    Continue(String),
}

pub struct BlockSynchronizer {
    multi: Arc<MultiNodeClient>,
    store: Arc<dyn TxStore>,
    notifications: Arc<dyn NotificationSink>,
    settings: SyncSettings,
    parse_events: EventChannel<BlockAvailable>,
    /// Subscription consumed by the parse worker; created eagerly so
    /// events published before the worker starts are not lost.
    parse_subscription: Mutex<Option<Subscription<BlockAvailable>>>,
    parse_queue_depth: Arc<std::sync::atomic::AtomicUsize>,
    /// LIFO stack of parse-ready markers accumulated by the backward walk.
    pending: Mutex<Vec<BlockAvailable>>,
    /// Check-and-mark set: at most one concurrent parse per block hash.
    parsing: tokio::sync::Mutex<HashSet<String>>,
    /// Serializes tx-block-link insertion against concurrent double-spend
    /// processing of the same block.
    link_lock: tokio::sync::Mutex<()>,
    status: SyncStatus,
}

fn store_err(e: StoreError) -> GatewayError {
    GatewayError::Fatal(e.to_string())
}

impl BlockSynchronizer {
    pub fn new(
        multi: Arc<MultiNodeClient>,
        store: Arc<dyn TxStore>,
        notifications: Arc<dyn NotificationSink>,
        settings: SyncSettings,
    ) -> Self {
        let parse_events = EventChannel::new(settings.parse_queue_capacity);
        let subscription = parse_events.subscribe();
        let parse_queue_depth = subscription.depth_handle();
        Self {
            multi,
            store,
            notifications,
            settings,
            parse_events,
            parse_subscription: Mutex::new(Some(subscription)),
            parse_queue_depth,
            pending: Mutex::new(Vec::new()),
            parsing: tokio::sync::Mutex::new(HashSet::new()),
            link_lock: tokio::sync::Mutex::new(()),
            status: SyncStatus::default(),
        }
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// Parse-ready events published but not yet processed; the mempool
    /// checker uses this as the "caught up" signal.
    pub fn queued(&self) -> usize {
        self.parse_queue_depth.load(Ordering::SeqCst)
    }

    /// Additional observer of parse-ready events; the parse worker keeps
    /// its own subscription.
    pub fn subscribe_parse_events(&self) -> Subscription<BlockAvailable> {
        self.parse_events.subscribe()
    }

    /// Seed the store with the current node tip so backfill has an anchor.
    pub async fn initialize_store(&self) -> Result<()> {
        if self.store.best_block().await.map_err(store_err)?.is_some() {
            return Ok(());
        }
        let info = self.multi.best_blockchain_info().await?;
        let header = self.multi.get_block_header(&info.best_block_hash).await?;
        let hash = BlockHash::from_hex(&header.hash)
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        let prev_hash = match header.previous_block_hash.as_deref() {
            Some(prev) => BlockHash::from_hex(prev)
                .map_err(|e| GatewayError::Validation(e.to_string()))?,
            None => BlockHash::ZERO,
        };
        self.store
            .insert_block(NewBlock {
                hash,
                height: header.height,
                prev_hash,
                time: header.time,
            })
            .await
            .map_err(store_err)?;
        info!("seeded store with best block {} at {}", header.hash, header.height);
        Ok(())
    }

    /// Handle a "new block discovered" signal. External faults (node or
    /// request problems) are logged and swallowed, the event is dropped;
    /// anything else propagates.
    pub async fn handle_block_discovered(&self, block_hash: &str) -> Result<()> {
        if self.settings.dont_parse_blocks {
            info!("block parsing disabled, ignoring block {}", block_hash);
            return Ok(());
        }

        let mut next = Some(block_hash.to_string());
        while let Some(hash) = next.take() {
            match self.discover_one(&hash).await {
                Ok(Walk::Continue(parent)) => next = Some(parent),
                Ok(Walk::Done) => break,
                Err(e) if e.is_external_fault() => {
                    self.status.errors.fetch_add(1, Ordering::SeqCst);
                    error!("block discovery for {} failed: {}", hash, e);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// One step of the backward walk: look at `hash`, decide whether the
    /// walk continues with its parent.
    async fn discover_one(&self, hash: &str) -> Result<Walk> {
        if hash.is_empty() {
            self.flush_pending();
            return Ok(Walk::Done);
        }
        let block_hash =
            BlockHash::from_hex(hash).map_err(|e| GatewayError::Validation(e.to_string()))?;
        if block_hash.is_zero() {
            // reached genesis
            self.flush_pending();
            return Ok(Walk::Done);
        }

        if let Some(stored) = self.store.block_by_hash(&block_hash).await.map_err(store_err)? {
            if stored.on_active_chain {
                debug!("block {} already stored and on active chain", hash);
                self.flush_pending();
                return Ok(Walk::Done);
            }
            debug!("block {} already stored, re-activating", hash);
            self.store
                .set_on_active_chain(stored.height, &block_hash)
                .await
                .map_err(store_err)?;
            return Ok(Walk::Continue(stored.prev_hash.to_string()));
        }

        let header = self.multi.get_block_header(hash).await?;
        let best_height = self.multi.best_blockchain_info().await?.blocks;

        if header.height + self.settings.max_fork_depth < best_height {
            info!("block {} is too far below the best tip, stopping backfill", hash);
            self.flush_pending();
            return Ok(Walk::Done);
        }

        info!("storing new block {} at height {}", hash, header.height);
        let prev_hash = match header.previous_block_hash.as_deref() {
            Some(prev) => BlockHash::from_hex(prev)
                .map_err(|e| GatewayError::Validation(e.to_string()))?,
            None => BlockHash::ZERO,
        };
        let inserted = self
            .store
            .insert_block(NewBlock {
                hash: block_hash,
                height: header.height,
                prev_hash,
                time: header.time,
            })
            .await
            .map_err(store_err)?;

        let Some(block_internal_id) = inserted else {
            // lost the race against a concurrent discovery of the same hash
            debug!("block {} raced into the store, continuing with parent", hash);
            return Ok(Walk::Continue(prev_hash.to_string()));
        };

        self.status
            .best_height_seen
            .fetch_max(header.height, Ordering::SeqCst);
        self.pending.lock().push(BlockAvailable {
            created_at: SystemTime::now(),
            block_hash: hash.to_string(),
            block_internal_id,
            block_height: header.height,
        });

        if prev_hash.is_zero() {
            self.flush_pending();
            return Ok(Walk::Done);
        }
        Ok(Walk::Continue(prev_hash.to_string()))
    }

    /// Pop the pending stack into the parse queue. The walk pushed the
    /// newest block first, so popping emits oldest-parent-first.
    fn flush_pending(&self) {
        let mut pending = self.pending.lock();
        while let Some(event) = pending.pop() {
            self.parse_events.publish(event);
        }
    }

    /// Consume parse-ready events until shutdown. The current event is
    /// always finished before exiting; queued events stay behind for the
    /// re-discovery walk after restart.
    pub async fn run_parse_worker(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut subscription = self
            .parse_subscription
            .lock()
            .take()
            .ok_or_else(|| GatewayError::Fatal("parse worker already running".into()))?;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = subscription.recv() => {
                    match event {
                        Some(event) => self.parse_block(event).await?,
                        None => break,
                    }
                }
            }
        }
        info!("block parse worker shutting down");
        Ok(())
    }

    /// Parse one block, tolerating duplicate events: the check-and-mark
    /// set guarantees at most one concurrent parse per hash, the persisted
    /// pass markers make re-parsing a no-op.
    pub async fn parse_block(&self, event: BlockAvailable) -> Result<()> {
        {
            let mut parsing = self.parsing.lock().await;
            if parsing.contains(&event.block_hash) {
                self.status.blocks_duplicated.fetch_add(1, Ordering::SeqCst);
                debug!("block {} is already being parsed, skipped", event.block_hash);
                return Ok(());
            }
            if self
                .store
                .block_was_parsed(event.block_internal_id)
                .await
                .map_err(store_err)?
            {
                self.status.blocks_duplicated.fetch_add(1, Ordering::SeqCst);
                info!("block {} was already parsed, skipped", event.block_hash);
                return Ok(());
            }
            parsing.insert(event.block_hash.clone());
        }

        let result = self.parse_block_inner(&event).await;
        self.parsing.lock().await.remove(&event.block_hash);

        match result {
            Ok((linked, double_spends)) => {
                self.status.blocks_parsed.fetch_add(1, Ordering::SeqCst);
                info!(
                    "block {} parsed: {} transactions linked, {} double spends",
                    event.block_hash, linked, double_spends
                );
                Ok(())
            }
            Err(e) if e.is_external_fault() => {
                self.status.errors.fetch_add(1, Ordering::SeqCst);
                error!("parsing block {} failed: {}", event.block_hash, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn parse_block_inner(&self, event: &BlockAvailable) -> Result<(usize, usize)> {
        let raw = self.multi.get_block_raw(&event.block_hash).await?;
        let block = Block::parse(&raw).map_err(|e| {
            GatewayError::Validation(format!("cannot parse block {}: {}", event.block_hash, e))
        })?;

        let linked = self
            .link_transactions(&block, event.block_internal_id)
            .await?;
        let double_spends = self
            .double_spend_pass(&block, event.block_internal_id)
            .await?;
        Ok((linked, double_spends))
    }

    /// Link every stored transaction found in the block and publish merkle
    /// notifications for those that asked for one. Serialized against the
    /// double-spend pass so the link set and its completion marker stay
    /// consistent.
    async fn link_transactions(&self, block: &Block, block_internal_id: u64) -> Result<usize> {
        let _guard = self.link_lock.lock().await;

        let candidates = self
            .store
            .txs_without_active_block_link()
            .await
            .map_err(store_err)?;
        let block_txids: HashSet<Txid> = block.transactions.iter().map(|t| t.txid).collect();
        let to_link: Vec<_> = candidates
            .iter()
            .filter(|t| block_txids.contains(&t.external_id))
            .collect();

        self.store
            .insert_tx_block_links(
                &to_link.iter().map(|t| t.internal_id).collect::<Vec<_>>(),
                block_internal_id,
            )
            .await
            .map_err(store_err)?;

        for tx in to_link.iter().filter(|t| t.merkle_proof) {
            self.notifications
                .notify(NotificationEvent::merkle_proof(tx.external_id))
                .await;
        }

        self.store
            .set_parsed_for_merkle(block_internal_id)
            .await
            .map_err(store_err)?;
        Ok(to_link.len())
    }

    /// Flatten every (spender, previous output) pair in the block and let
    /// the store detect conflicts against recorded unconfirmed
    /// transactions. Each newly-recorded conflict carries the raw payload
    /// of the in-block spender and produces one notification.
    async fn double_spend_pass(&self, block: &Block, block_internal_id: u64) -> Result<usize> {
        let spends: Vec<(Txid, OutPoint)> = block
            .transactions
            .iter()
            .flat_map(|bt| bt.tx.inputs.iter().map(move |i| (bt.txid, i.prev_out)))
            .collect();

        let conflicts = self
            .store
            .detect_block_double_spends(&spends, self.settings.ds_height_window, block_internal_id)
            .await
            .map_err(store_err)?;

        let mut notified = 0;
        for conflict in conflicts {
            let payload = block
                .transactions
                .iter()
                .find(|t| t.txid == conflict.ds_txid)
                .map(|t| t.raw.clone())
                .unwrap_or_default();
            let recorded = self
                .store
                .insert_block_double_spend(conflict.tx_internal_id, &conflict.ds_txid, &payload)
                .await
                .map_err(store_err)?;
            if recorded {
                self.notifications
                    .notify(NotificationEvent::double_spend(
                        conflict.tx_external_id,
                        conflict.ds_txid,
                        payload,
                    ))
                    .await;
                notified += 1;
            }
        }

        self.store
            .set_parsed_for_ds(block_internal_id)
            .await
            .map_err(store_err)?;
        Ok(notified)
    }
}
