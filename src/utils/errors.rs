use thiserror::Error;

/// Unified error taxonomy for the gateway core.
///
/// The variants map to very different handling strategies:
/// - `TransientNode` is retried against other replicas and never surfaced
///   verbatim to clients.
/// - `ProtocolRejection` carries a structured node reason and is surfaced.
/// - `Validation` is always client-visible and never retried.
/// - `Consistency` means the replicas disagree or violated their response
///   contract; clients get a generic internal error, the detail is logged.
/// - `Fatal` propagates: it indicates a bug, not an expected external fault.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("no nodes available")]
    NoNodesAvailable,

    #[error("node unavailable: {0}")]
    TransientNode(String),

    #[error("node rejected request ({code}): {message}")]
    ProtocolRejection { code: i64, message: String },

    #[error("{0}")]
    Validation(String),

    #[error("inconsistent node responses: {0}")]
    Consistency(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl GatewayError {
    /// True for failures that are expected from an external collaborator and
    /// may be swallowed by event-driven workers (logged, counted, dropped).
    pub fn is_external_fault(&self) -> bool {
        matches!(
            self,
            GatewayError::NoNodesAvailable
                | GatewayError::TransientNode(_)
                | GatewayError::ProtocolRejection { .. }
                | GatewayError::Validation(_)
        )
    }
}

/// Convenience alias
pub type Result<T> = std::result::Result<T, GatewayError>;
