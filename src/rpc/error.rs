use thiserror::Error;

/// Error from a single node RPC call.
///
/// `Protocol` means the node answered and rejected the request (carries the
/// node's error code); everything else is a transport-level fault that other
/// replicas may not share.
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("rpc error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,
}

impl RpcError {
    pub fn is_protocol(&self) -> bool {
        matches!(self, RpcError::Protocol { .. })
    }

    /// Node-side description safe to surface to clients (protocol errors
    /// only; transport errors may leak hosts/IPs).
    pub fn safe_description(&self) -> Option<String> {
        match self {
            RpcError::Protocol { message, .. } => Some(message.clone()),
            _ => None,
        }
    }
}

/// Error code bitcoind-family nodes return for "transaction not in mempool".
pub const RPC_NOT_IN_MEMPOOL: i64 = -5;

pub type RpcResult<T> = Result<T, RpcError>;
