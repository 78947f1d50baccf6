//! Notification surface. The core only produces events; delivery, signing
//! and payload encryption happen outside.

use crate::chain::Txid;
use crate::sync::events::EventChannel;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    MerkleProof,
    DoubleSpend,
    DoubleSpendAttempt,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::MerkleProof => "merkleProof",
            NotificationType::DoubleSpend => "doubleSpend",
            NotificationType::DoubleSpendAttempt => "doubleSpendAttempt",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub created_at: SystemTime,
    pub notification_type: NotificationType,
    pub tx_external_id: Txid,
    /// The competing transaction for double-spend notifications.
    pub ds_txid: Option<Txid>,
    /// Raw payload of the competing transaction, when available.
    pub payload: Option<Vec<u8>>,
}

impl NotificationEvent {
    pub fn merkle_proof(tx_external_id: Txid) -> Self {
        NotificationEvent {
            created_at: SystemTime::now(),
            notification_type: NotificationType::MerkleProof,
            tx_external_id,
            ds_txid: None,
            payload: None,
        }
    }

    pub fn double_spend(tx_external_id: Txid, ds_txid: Txid, payload: Vec<u8>) -> Self {
        NotificationEvent {
            created_at: SystemTime::now(),
            notification_type: NotificationType::DoubleSpend,
            tx_external_id,
            ds_txid: Some(ds_txid),
            payload: Some(payload),
        }
    }

    pub fn double_spend_attempt(tx_external_id: Txid, ds_txid: Txid, payload: Vec<u8>) -> Self {
        NotificationEvent {
            created_at: SystemTime::now(),
            notification_type: NotificationType::DoubleSpendAttempt,
            tx_external_id,
            ds_txid: Some(ds_txid),
            payload: Some(payload),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: NotificationEvent);
}

/// Sink that forwards events onto a typed channel for the delivery layer.
pub struct ChannelNotificationSink {
    channel: Arc<EventChannel<NotificationEvent>>,
}

impl ChannelNotificationSink {
    pub fn new(channel: Arc<EventChannel<NotificationEvent>>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl NotificationSink for ChannelNotificationSink {
    async fn notify(&self, event: NotificationEvent) {
        self.channel.publish(event);
    }
}
