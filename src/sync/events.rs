//! Typed, bounded, multi-subscriber event channels.
//!
//! Publishing is a non-blocking enqueue: processing one event never blocks
//! enqueueing the next. Each subscriber owns its queue and consumes it
//! strictly in arrival order. Queue depth is tracked explicitly per
//! subscription so other workers can use it as a backpressure signal.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

struct SubscriberHandle<T> {
    tx: mpsc::Sender<T>,
    depth: Arc<AtomicUsize>,
}

pub struct EventChannel<T> {
    subscribers: Mutex<Vec<SubscriberHandle<T>>>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> EventChannel<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let depth = Arc::new(AtomicUsize::new(0));
        self.subscribers.lock().push(SubscriberHandle {
            tx,
            depth: depth.clone(),
        });
        Subscription { rx, depth }
    }

    /// Fan the event out to every live subscriber. A full queue drops the
    /// event for that subscriber (the idempotent re-discovery walk recovers
    /// dropped block events); closed subscribers are pruned.
    pub fn publish(&self, event: T) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => {
                sub.depth.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("event queue full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> Subscription<T> {
    /// Blocking receive; returns None once all publishers are gone.
    pub async fn recv(&mut self) -> Option<T> {
        let event = self.rx.recv().await;
        if event.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        event
    }

    pub fn try_recv(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(event) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Some(event)
            }
            Err(_) => None,
        }
    }

    /// Events published but not yet consumed.
    pub fn queued(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Shared depth counter, observable by other workers.
    pub fn depth_handle(&self) -> Arc<AtomicUsize> {
        self.depth.clone()
    }
}

/// A block hash reported by a node signal (ZMQ or polling).
#[derive(Debug, Clone)]
pub struct BlockDiscovered {
    pub created_at: SystemTime,
    pub block_hash: String,
}

/// A block stored in the database and ready for the parsing stage.
#[derive(Debug, Clone)]
pub struct BlockAvailable {
    pub created_at: SystemTime,
    pub block_hash: String,
    pub block_internal_id: u64,
    pub block_height: u64,
}
