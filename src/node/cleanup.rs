//! Retention cleanup worker: periodically deletes blocks and transactions
//! past their retention windows.

use crate::store::TxStore;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct CleanupSettings {
    pub period: Duration,
    pub tx_retention: Duration,
    /// Unmined transactions linger longer before deletion, matching the
    /// node-side mempool expiry.
    pub mempool_expired_retention: Duration,
}

pub struct CleanupWorker {
    store: Arc<dyn TxStore>,
    settings: CleanupSettings,
}

impl CleanupWorker {
    pub fn new(store: Arc<dyn TxStore>, settings: CleanupSettings) -> Self {
        Self { store, settings }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> crate::utils::Result<()> {
        while !*shutdown.borrow() {
            self.cleanup_once(SystemTime::now()).await;
            tokio::select! {
                _ = tokio::time::sleep(self.settings.period) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("cleanup worker shutting down");
        Ok(())
    }

    async fn cleanup_once(&self, now: SystemTime) {
        let blocks_cutoff = now - self.settings.tx_retention;
        let txs_cutoff = now - self.settings.mempool_expired_retention;
        match self.store.cleanup(blocks_cutoff, txs_cutoff).await {
            Ok((blocks, txs)) => info!("cleanup deleted {} blocks and {} transactions", blocks, txs),
            Err(e) => error!("cleanup failed: {}", e),
        }
    }
}
