//! Mempool reconciliation loop: periodically compares every node's mempool
//! against the store and re-drives lost transactions through the
//! submission engine's raw-send path.

use crate::rpc::MultiNodeClient;
use crate::store::{ResubmitUpdate, StoreError, TxStatus, TxStore};
use crate::submit::SubmitEngine;
use crate::sync::BlockSynchronizer;
use crate::utils::errors::{GatewayError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MempoolCheckerSettings {
    pub interval: Duration,
    /// Shorter retry interval after an unsuccessful cycle.
    pub unsuccessful_interval: Duration,
    /// Skip the cycle while more than this many blocks await parsing.
    pub block_parser_queued_max: usize,
    /// Missing-inputs retries before a transaction is given up on.
    pub missing_inputs_retries: u32,
    pub disabled: bool,
}

impl Default for MempoolCheckerSettings {
    fn default() -> Self {
        MempoolCheckerSettings {
            interval: Duration::from_secs(60),
            unsuccessful_interval: Duration::from_secs(10),
            block_parser_queued_max: 10,
            missing_inputs_retries: 5,
            disabled: false,
        }
    }
}

pub struct MempoolChecker {
    multi: Arc<MultiNodeClient>,
    engine: Arc<SubmitEngine>,
    store: Arc<dyn TxStore>,
    synchronizer: Arc<BlockSynchronizer>,
    settings: MempoolCheckerSettings,
    /// Re-entry guard: a cycle already in progress makes a new trigger
    /// return immediately instead of queueing up.
    resubmit_in_progress: Mutex<bool>,
    /// Per-transaction missing-inputs retry ledger.
    retries: Mutex<HashMap<u64, u32>>,
}

fn store_err(e: StoreError) -> GatewayError {
    GatewayError::Fatal(e.to_string())
}

impl MempoolChecker {
    pub fn new(
        multi: Arc<MultiNodeClient>,
        engine: Arc<SubmitEngine>,
        store: Arc<dyn TxStore>,
        synchronizer: Arc<BlockSynchronizer>,
        settings: MempoolCheckerSettings,
    ) -> Self {
        Self {
            multi,
            engine,
            store,
            synchronizer,
            settings,
            resubmit_in_progress: Mutex::new(false),
            retries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.settings.disabled {
            info!("mempool checker is disabled");
            return Ok(());
        }

        self.wait_for_first_block(&mut shutdown).await;

        while !*shutdown.borrow() {
            let success = match self.check_and_resubmit().await {
                Ok(success) => success,
                Err(e) => {
                    warn!("mempool check failed: {}", e);
                    false
                }
            };

            let delay = if success {
                self.settings.interval
            } else {
                self.settings.unsuccessful_interval
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("mempool checker shutting down");
        Ok(())
    }

    /// Resubmission against an empty store is pointless; wait until block
    /// synchronization has an anchor.
    async fn wait_for_first_block(&self, shutdown: &mut watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            match self.store.best_block().await {
                Ok(Some(_)) => return,
                Ok(None) => {}
                Err(e) => warn!("cannot read best block: {}", e),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.unsuccessful_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// One reconciliation cycle. Returns true when everything was
    /// resubmitted cleanly and the block synchronizer was idle, i.e. the
    /// next cycle can wait the full interval.
    pub async fn check_and_resubmit(&self) -> Result<bool> {
        let unparsed = self.store.unparsed_blocks().await.map_err(store_err)?;
        if unparsed.len() > self.settings.block_parser_queued_max {
            // resubmitting now would mostly produce redundant sends for
            // transactions that are already mined but not yet linked
            info!(
                "{} unparsed blocks exceed the limit of {}, skipping resubmit",
                unparsed.len(),
                self.settings.block_parser_queued_max
            );
            return Ok(false);
        }

        {
            let mut in_progress = self.resubmit_in_progress.lock();
            if *in_progress {
                info!("resubmit already in progress");
                return Ok(false);
            }
            *in_progress = true;
        }

        let result = self.resubmit_to_nodes().await;
        *self.resubmit_in_progress.lock() = false;

        let resubmit_success = result?;
        let parser_idle = self.synchronizer.queued() == 0;
        info!(
            "mempool check finished: resubmit success={}, block parser idle={}",
            resubmit_success, parser_idle
        );
        Ok(resubmit_success && parser_idle)
    }

    /// Sweep every replica's mempool separately: each node may have lost a
    /// different subset.
    async fn resubmit_to_nodes(&self) -> Result<bool> {
        let clients = self.multi.clients()?;
        let mut missing_inputs: HashSet<u64> = HashSet::new();
        let mut success = true;

        for client in clients {
            let mempool_called_at = SystemTime::now();
            let mempool = client.get_raw_mempool().await.map_err(|e| {
                GatewayError::TransientNode(format!(
                    "getrawmempool on {} failed: {}",
                    client.label(),
                    e
                ))
            })?;
            info!("{} has {} transactions in mempool", client.label(), mempool.len());
            let mempool_set: HashSet<String> = mempool.into_iter().collect();

            let (resubmit_success, tx_ids) = self
                .engine
                .resubmit_missing_transactions(&mempool_set, mempool_called_at)
                .await?;
            missing_inputs.extend(tx_ids);
            success &= resubmit_success;
        }

        debug!("{} transactions with missing inputs", missing_inputs.len());
        self.arrange_missing_inputs(missing_inputs).await?;
        Ok(success)
    }

    /// Bump the retry count for every transaction that still lacks inputs;
    /// transactions over the budget become terminal and leave the ledger.
    /// Transactions that resolved drop out of the ledger entirely.
    async fn arrange_missing_inputs(&self, missing: HashSet<u64>) -> Result<()> {
        let mut incremented: HashMap<u64, u32> = HashMap::new();
        {
            let retries = self.retries.lock();
            for tx in &missing {
                incremented.insert(*tx, retries.get(tx).copied().unwrap_or(0) + 1);
            }
        }

        let exhausted: Vec<u64> = incremented
            .iter()
            .filter(|(_, count)| **count >= self.settings.missing_inputs_retries)
            .map(|(id, _)| *id)
            .collect();
        if !exhausted.is_empty() {
            debug!("{} transactions exhausted their input retries", exhausted.len());
            let now = SystemTime::now();
            self.store
                .update_txs_on_resubmit(
                    exhausted
                        .iter()
                        .map(|id| ResubmitUpdate {
                            internal_id: *id,
                            status: TxStatus::MissingInputsExhausted,
                            submitted_at: now,
                        })
                        .collect(),
                )
                .await
                .map_err(store_err)?;
        }

        for id in &exhausted {
            incremented.remove(id);
        }
        *self.retries.lock() = incremented;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn retry_count(&self, internal_id: u64) -> Option<u32> {
        self.retries.lock().get(&internal_id).copied()
    }
}
