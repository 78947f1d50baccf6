//! Utility module: error taxonomy and logging.

pub mod errors;
pub mod logging;

pub use errors::{GatewayError, Result};
pub use logging::init_logging;
