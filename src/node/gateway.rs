//! Gateway orchestration: wire up the aggregator, submission engine,
//! block synchronizer, mempool checker, invalid-tx handler and cleanup
//! worker, and spawn them under one shutdown handle.
//!
//! The transport layer in front of this (REST endpoints, ZMQ
//! subscriptions) publishes `BlockDiscovered`/`InvalidTxEvent` events into
//! the gateway and consumes the notification channel.

use crate::mempool::{InvalidTxEvent, InvalidTxHandler, MempoolChecker};
use crate::node::cleanup::CleanupWorker;
use crate::node::config::AppConfig;
use crate::node::service_handle::ServiceHandle;
use crate::notify::{ChannelNotificationSink, NotificationEvent};
use crate::quotes::QuoteProvider;
use crate::rpc::{HttpNodeProvider, MultiNodeClient, NodeProvider};
use crate::store::TxStore;
use crate::submit::SubmitEngine;
use crate::sync::events::BlockDiscovered;
use crate::sync::{BlockSynchronizer, EventChannel};
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

const EVENT_QUEUE_CAPACITY: usize = 4096;

pub struct Gateway {
    pub engine: Arc<SubmitEngine>,
    pub synchronizer: Arc<BlockSynchronizer>,
    /// Publish node "new block" signals here.
    pub block_events: Arc<EventChannel<BlockDiscovered>>,
    /// Publish node invalid-tx signals here.
    pub invalid_tx_events: Arc<EventChannel<InvalidTxEvent>>,
    /// Subscribe here to deliver notifications.
    pub notifications: Arc<EventChannel<NotificationEvent>>,
}

impl Gateway {
    /// Build and start all workers. The returned handle owns their
    /// lifecycle; dropping the `Gateway` itself only drops the publish
    /// sides of the event channels.
    pub async fn start(
        config: AppConfig,
        store: Arc<dyn TxStore>,
        quotes: Arc<dyn QuoteProvider>,
    ) -> Result<(Gateway, ServiceHandle)> {
        let provider: Arc<dyn NodeProvider> = Arc::new(HttpNodeProvider::new(
            config.nodes.clone(),
            config.request_timeout(),
        ));
        let multi = Arc::new(MultiNodeClient::new(
            provider,
            config.multi_request_timeout(),
        ));

        let notifications = Arc::new(EventChannel::<NotificationEvent>::new(EVENT_QUEUE_CAPACITY));
        let sink = Arc::new(ChannelNotificationSink::new(notifications.clone()));

        let synchronizer = Arc::new(BlockSynchronizer::new(
            multi.clone(),
            store.clone(),
            sink.clone(),
            config.sync_settings(),
        ));
        if let Err(e) = synchronizer.initialize_store().await {
            // nodes may simply not be reachable yet; discovery re-anchors
            warn!("cannot seed store with current tip: {}", e);
        }

        let engine = Arc::new(SubmitEngine::new(
            multi.clone(),
            store.clone(),
            quotes,
            config.submit_settings(),
        ));

        let checker = Arc::new(MempoolChecker::new(
            multi.clone(),
            engine.clone(),
            store.clone(),
            synchronizer.clone(),
            config.mempool_settings(),
        ));

        let invalid_handler = Arc::new(InvalidTxHandler::new(store.clone(), sink));
        let cleanup = Arc::new(CleanupWorker::new(store, config.cleanup_settings()));

        let block_events = Arc::new(EventChannel::<BlockDiscovered>::new(EVENT_QUEUE_CAPACITY));
        let invalid_tx_events = Arc::new(EventChannel::<InvalidTxEvent>::new(EVENT_QUEUE_CAPACITY));

        let (mut service, shutdown_rx) = ServiceHandle::new();

        // block discovery consumer
        {
            let synchronizer = synchronizer.clone();
            let mut events = block_events.subscribe();
            let mut shutdown = shutdown_rx.clone();
            service.attach(
                "block-discovery",
                tokio::spawn(async move {
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
                                        synchronizer
                                            .handle_block_discovered(&event.block_hash)
                                            .await?;
                                    }
                                    None => break,
                                }
                            }
                        }
                    }
                    Ok(())
                }),
            );
        }

        // block parse worker
        {
            let synchronizer = synchronizer.clone();
            let shutdown = shutdown_rx.clone();
            service.attach(
                "block-parser",
                tokio::spawn(async move { Ok(synchronizer.run_parse_worker(shutdown).await?) }),
            );
        }

        // mempool checker
        {
            let checker = checker.clone();
            let shutdown = shutdown_rx.clone();
            service.attach(
                "mempool-checker",
                tokio::spawn(async move { Ok(checker.run(shutdown).await?) }),
            );
        }

        // invalid-tx handler
        {
            let handler = invalid_handler.clone();
            let events = invalid_tx_events.subscribe();
            let shutdown = shutdown_rx.clone();
            service.attach(
                "invalid-tx",
                tokio::spawn(async move { Ok(handler.run(events, shutdown).await?) }),
            );
        }

        // retention cleanup
        {
            let cleanup = cleanup.clone();
            let shutdown = shutdown_rx.clone();
            service.attach(
                "cleanup",
                tokio::spawn(async move { Ok(cleanup.run(shutdown).await?) }),
            );
        }

        info!("gateway started with {} configured nodes", config.nodes.len());
        Ok((
            Gateway {
                engine,
                synchronizer,
                block_events,
                invalid_tx_events,
                notifications,
            },
            service,
        ))
    }
}
