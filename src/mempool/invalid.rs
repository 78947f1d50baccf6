//! Invalid-transaction handler: consumes node invalid-tx signals and turns
//! mempool conflicts against DS-checked transactions into
//! double-spend-attempt notifications.

use crate::chain::Txid;
use crate::notify::{NotificationEvent, NotificationSink};
use crate::rpc::types::CollidedWith;
use crate::store::{StoreError, TxStore};
use crate::submit::reject;
use crate::sync::Subscription;
use crate::utils::errors::{GatewayError, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Invalid-transaction signal as reported by a node.
#[derive(Debug, Clone)]
pub struct InvalidTxEvent {
    pub txid: String,
    pub reject_code: i32,
    /// Raw hex of the offending transaction, when the node included it.
    pub hex: String,
    pub collided_with: Vec<CollidedWith>,
}

pub struct InvalidTxHandler {
    store: Arc<dyn TxStore>,
    notifications: Arc<dyn NotificationSink>,
}

fn store_err(e: StoreError) -> GatewayError {
    GatewayError::Fatal(e.to_string())
}

impl InvalidTxHandler {
    pub fn new(store: Arc<dyn TxStore>, notifications: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            notifications,
        }
    }

    pub async fn run(
        &self,
        mut events: Subscription<InvalidTxEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.handle(event).await {
                                if e.is_external_fault() {
                                    error!("invalid-tx event dropped: {}", e);
                                } else {
                                    return Err(e);
                                }
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        info!("invalid-tx handler shutting down");
        Ok(())
    }

    pub async fn handle(&self, event: InvalidTxEvent) -> Result<()> {
        let conflict_codes = [
            reject::REJECT_MEMPOOL_CONFLICT,
            reject::REJECT_DOUBLE_SPEND,
        ];
        if !conflict_codes.contains(&event.reject_code) || event.collided_with.is_empty() {
            return Ok(());
        }

        let collision_ids: Vec<Txid> = event
            .collided_with
            .iter()
            .filter_map(|c| Txid::from_hex(&c.txid).ok())
            .collect();
        let ds_checked = self
            .store
            .txs_for_ds_check(&collision_ids)
            .await
            .map_err(store_err)?;
        if ds_checked.is_empty() {
            return Ok(());
        }

        let ds_txid = Txid::from_hex(&event.txid)
            .map_err(|e| GatewayError::Validation(e.to_string()))?;
        let payload = hex::decode(&event.hex).unwrap_or_default();

        for tx in ds_checked {
            let recorded = self
                .store
                .insert_mempool_double_spend(tx.internal_id, &ds_txid, &payload)
                .await
                .map_err(store_err)?;
            if recorded {
                self.notifications
                    .notify(NotificationEvent::double_spend_attempt(
                        tx.external_id,
                        ds_txid,
                        payload.clone(),
                    ))
                    .await;
            }
        }
        Ok(())
    }
}
