//! Block synchronization: event channels and the synchronizer worker.

pub mod block_sync;
pub mod events;

pub use block_sync::{BlockSynchronizer, SyncSettings, SyncStatus};
pub use events::{BlockAvailable, BlockDiscovered, EventChannel, Subscription};
