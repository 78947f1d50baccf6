//! Graceful-shutdown handle over the gateway's worker tasks.

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Holds running worker tasks and the shared shutdown channel. Call
/// `shutdown()` to signal every worker and wait for them to drain.
pub struct ServiceHandle {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl ServiceHandle {
    /// New handle plus a receiver workers clone to observe shutdown.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            ServiceHandle {
                shutdown_tx: tx,
                workers: Vec::new(),
            },
            rx,
        )
    }

    /// Track a worker task so shutdown waits for it.
    pub fn attach(&mut self, name: &'static str, handle: JoinHandle<Result<()>>) {
        self.workers.push((name, handle));
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown and await every worker. Worker errors are logged,
    /// not propagated: shutdown always completes.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.workers {
            match handle.await {
                Ok(Ok(())) => tracing::debug!("worker {} stopped", name),
                Ok(Err(e)) => tracing::error!("worker {} returned error: {:#}", name, e),
                Err(e) => tracing::error!("worker {} join error: {}", name, e),
            }
        }
        Ok(())
    }
}
