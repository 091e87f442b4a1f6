//! Infrastructure layer implementations.

pub mod blockchain;
pub mod database;
pub mod delegated;
pub mod token;

pub use blockchain::{
    ChainConnection, ChainConnector, ChainEndpoints, ConnectionManager, EvmRpcClient,
    FinalityConfig, RpcConnector, WsLogSubscriber,
};
pub use database::{PostgresClient, PostgresConfig};
pub use delegated::{DelegatedServices, HttpDelegatedService};
pub use token::TokenRegistry;
