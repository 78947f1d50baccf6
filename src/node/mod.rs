//! Gateway wiring: configuration, worker orchestration, CLI and the
//! retention cleanup worker.

pub mod cleanup;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod service_handle;

pub use cleanup::{CleanupSettings, CleanupWorker};
pub use cli::run_cli;
pub use config::AppConfig;
pub use gateway::Gateway;
pub use service_handle::ServiceHandle;
