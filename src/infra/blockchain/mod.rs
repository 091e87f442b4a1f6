//! Blockchain client implementations.
//!
//! EVM chains are reached directly: HTTP JSON-RPC for queries and a
//! multiplexed WebSocket for log subscriptions. Both are owned by the
//! [`ConnectionManager`], which hands one shared [`ChainConnection`] per chain
//! to every monitor.

pub mod config;
pub mod connection;
pub mod erc20;
pub mod evm;
pub mod ws;

pub use config::{ChainEndpoints, FinalityConfig};
pub use connection::{ChainConnection, ChainConnector, ConnectionManager, RpcConnector};
pub use erc20::{TRANSFER_TOPIC, TransferEvent, decode_transfer, transfer_filter};
pub use evm::EvmRpcClient;
pub use ws::{WsConfig, WsLogSubscriber};
