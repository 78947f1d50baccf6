//! Node RPC layer.
//!
//! - `client`: the per-node `NodeRpc` trait and its JSON-RPC/HTTP impl
//! - `multi`: the multi-node aggregator with its four merge strategies
//! - `types`: wire response shapes
//!
//! Everything above this module talks to `MultiNodeClient`; single-node
//! access only exists for the mempool sweep, which must inspect each
//! replica's mempool separately.

pub mod client;
pub mod error;
pub mod multi;
pub mod types;

pub use client::{HttpNodeProvider, HttpNodeRpc, NodeEndpoint, NodeProvider, NodeRpc, StaticNodeProvider};
pub use error::{RpcError, RpcResult};
pub use multi::{MultiNodeClient, Unanimity};
