//! Shared per-chain connections with push-then-pull establishment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::domain::{
    AppError, BlockchainError, Chain, ChainClient, ChainFamily, ConfigError, HealthStatus,
    LogSubscriber,
};

use super::config::ChainEndpoints;
use super::evm::EvmRpcClient;
use super::ws::{WsConfig, WsLogSubscriber};

/// Handle to one chain's endpoints, shared by every monitor on that chain
pub struct ChainConnection {
    pub chain: Chain,
    /// Query endpoint; always present
    pub client: Arc<dyn ChainClient>,
    /// Subscription endpoint; `None` when the chain is pull-only
    pub subscriber: Option<Arc<dyn LogSubscriber>>,
}

impl ChainConnection {
    pub fn is_push_capable(&self) -> bool {
        self.subscriber.is_some()
    }
}

impl std::fmt::Debug for ChainConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConnection")
            .field("chain", &self.chain)
            .field("push_capable", &self.is_push_capable())
            .finish()
    }
}

/// Builds the raw transports for a chain
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Open a push transport. Errors are non-fatal to the caller.
    async fn connect_push(&self, chain: Chain) -> Result<Arc<dyn LogSubscriber>, AppError>;

    /// Build the pull client. Reachability is probed separately.
    async fn connect_pull(&self, chain: Chain) -> Result<Arc<dyn ChainClient>, AppError>;
}

/// Connector over HTTP JSON-RPC and WebSocket endpoints from configuration
pub struct RpcConnector {
    endpoints: HashMap<Chain, ChainEndpoints>,
    ws_config: WsConfig,
}

impl RpcConnector {
    pub fn new(endpoints: HashMap<Chain, ChainEndpoints>) -> Self {
        Self {
            endpoints,
            ws_config: WsConfig::default(),
        }
    }

    #[must_use]
    pub fn with_ws_config(mut self, ws_config: WsConfig) -> Self {
        self.ws_config = ws_config;
        self
    }

    pub fn from_env() -> Self {
        Self::new(ChainEndpoints::all_from_env())
    }

    pub fn configured_chains(&self) -> Vec<Chain> {
        self.endpoints.keys().copied().collect()
    }

    fn endpoints(&self, chain: Chain) -> Result<&ChainEndpoints, AppError> {
        self.endpoints
            .get(&chain)
            .ok_or_else(|| AppError::Config(ConfigError::MissingEndpoint(chain.to_string())))
    }
}

#[async_trait]
impl ChainConnector for RpcConnector {
    async fn connect_push(&self, chain: Chain) -> Result<Arc<dyn LogSubscriber>, AppError> {
        let endpoints = self.endpoints(chain)?;
        let url = endpoints.ws_url.as_deref().ok_or_else(|| {
            AppError::Config(ConfigError::MissingEndpoint(format!("{} websocket", chain)))
        })?;
        let subscriber = WsLogSubscriber::connect(chain, url, self.ws_config.clone()).await?;
        Ok(Arc::new(subscriber))
    }

    async fn connect_pull(&self, chain: Chain) -> Result<Arc<dyn ChainClient>, AppError> {
        let endpoints = self.endpoints(chain)?;
        Ok(Arc::new(EvmRpcClient::new(endpoints)))
    }
}

/// Minimum spacing between push upgrade attempts on a pull-only chain
pub const DEFAULT_PUSH_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Lazily established, shared connections keyed by chain
pub struct ConnectionManager {
    connector: Arc<dyn ChainConnector>,
    cells: DashMap<Chain, Arc<OnceCell<Arc<ChainConnection>>>>,
    /// Last failed push attempt per chain
    push_failures: DashMap<Chain, Instant>,
    push_retry_interval: Duration,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn ChainConnector>) -> Self {
        Self {
            connector,
            cells: DashMap::new(),
            push_failures: DashMap::new(),
            push_retry_interval: DEFAULT_PUSH_RETRY_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_push_retry_interval(mut self, interval: Duration) -> Self {
        self.push_retry_interval = interval;
        self
    }

    /// Shared connection for `chain`, established on first use.
    ///
    /// Concurrent callers wait on the same attempt. A failed attempt leaves
    /// nothing cached so the next caller retries.
    pub async fn acquire(&self, chain: Chain) -> Result<Arc<ChainConnection>, AppError> {
        if chain.family() != ChainFamily::Evm {
            return Err(AppError::Config(ConfigError::UnsupportedChain(format!(
                "{} has no direct connection; it is watched by a delegated service",
                chain
            ))));
        }

        // Clone the cell out so the map shard is not held across the await
        let cell = self.cells.entry(chain).or_default().value().clone();
        let connection = cell
            .get_or_try_init(|| self.establish(chain))
            .await
            .map(Arc::clone)?;
        if connection.is_push_capable() {
            return Ok(connection);
        }
        Ok(self.upgrade_to_push(connection).await)
    }

    /// Retry the push transport for a pull-only connection, at most once per
    /// retry interval. The pull client is kept either way.
    async fn upgrade_to_push(&self, connection: Arc<ChainConnection>) -> Arc<ChainConnection> {
        let chain = connection.chain;
        {
            // Claim the attempt under the entry lock
            let mut last = self.push_failures.entry(chain).or_insert_with(Instant::now);
            if last.elapsed() < self.push_retry_interval {
                return connection;
            }
            *last = Instant::now();
        }

        match self.connector.connect_push(chain).await {
            Ok(subscriber) => {
                self.push_failures.remove(&chain);
                let upgraded = Arc::new(ChainConnection {
                    chain,
                    client: Arc::clone(&connection.client),
                    subscriber: Some(subscriber),
                });
                let cell = OnceCell::new_with(Some(Arc::clone(&upgraded)));
                self.cells.insert(chain, Arc::new(cell));
                info!(chain = %chain, "Push connection restored");
                upgraded
            }
            Err(e) => {
                warn!(chain = %chain, error = %e, "Push connection still unavailable");
                connection
            }
        }
    }

    /// Connection for `chain` if one is already established
    pub fn get(&self, chain: Chain) -> Option<Arc<ChainConnection>> {
        self.cells
            .get(&chain)
            .and_then(|cell| cell.get().cloned())
    }

    /// Insert a ready connection, bypassing establishment
    pub fn insert(&self, connection: ChainConnection) {
        let chain = connection.chain;
        let cell = OnceCell::new_with(Some(Arc::new(connection)));
        self.cells.insert(chain, Arc::new(cell));
    }

    /// Probe every established connection. No connections counts as healthy.
    pub async fn health_check(&self) -> HealthStatus {
        let connections: Vec<Arc<ChainConnection>> = self
            .cells
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();
        if connections.is_empty() {
            return HealthStatus::Healthy;
        }

        let mut failing = 0;
        for connection in &connections {
            if let Err(e) = connection.client.health_check().await {
                warn!(chain = %connection.chain, error = %e, "Chain health check failed");
                failing += 1;
            }
        }

        match failing {
            0 => HealthStatus::Healthy,
            n if n == connections.len() => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        }
    }

    #[instrument(skip(self), fields(chain = %chain))]
    async fn establish(&self, chain: Chain) -> Result<Arc<ChainConnection>, AppError> {
        let subscriber = match self.connector.connect_push(chain).await {
            Ok(subscriber) => Some(subscriber),
            Err(e) => {
                warn!(error = %e, "Push connection unavailable, falling back to polling");
                self.push_failures.insert(chain, Instant::now());
                None
            }
        };

        let client = match self.connector.connect_pull(chain).await {
            Ok(client) => client,
            Err(e) if subscriber.is_none() => return Err(both_failed(chain, &e)),
            Err(e) => return Err(e),
        };

        if let Err(e) = client.health_check().await {
            if subscriber.is_none() {
                return Err(both_failed(chain, &e));
            }
            warn!(error = %e, "Pull endpoint probe failed; continuing with push connection");
        }

        let connection = ChainConnection {
            chain,
            client,
            subscriber,
        };
        info!(
            push_capable = connection.is_push_capable(),
            "Chain connection established"
        );
        Ok(Arc::new(connection))
    }
}

fn both_failed(chain: Chain, pull_error: &AppError) -> AppError {
    AppError::Blockchain(BlockchainError::Connection(format!(
        "{}: push and pull endpoints unavailable ({})",
        chain, pull_error
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::{MockChainClient, MockLogSubscriber};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ScriptedConnector {
        push_ok: AtomicBool,
        pull_healthy: bool,
        push_attempts: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(push_ok: bool, pull_healthy: bool) -> Self {
            Self {
                push_ok: AtomicBool::new(push_ok),
                pull_healthy,
                push_attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainConnector for ScriptedConnector {
        async fn connect_push(&self, _chain: Chain) -> Result<Arc<dyn LogSubscriber>, AppError> {
            self.push_attempts.fetch_add(1, Ordering::SeqCst);
            if self.push_ok.load(Ordering::SeqCst) {
                Ok(Arc::new(MockLogSubscriber::new()))
            } else {
                Err(AppError::Blockchain(BlockchainError::Connection(
                    "ws refused".to_string(),
                )))
            }
        }

        async fn connect_pull(&self, _chain: Chain) -> Result<Arc<dyn ChainClient>, AppError> {
            let client = MockChainClient::new();
            client.set_healthy(self.pull_healthy);
            Ok(Arc::new(client))
        }
    }

    #[tokio::test]
    async fn test_prefers_push_when_available() {
        let manager = ConnectionManager::new(Arc::new(ScriptedConnector::new(true, true)));
        let connection = manager.acquire(Chain::Ethereum).await.unwrap();
        assert!(connection.is_push_capable());
    }

    #[tokio::test]
    async fn test_falls_back_to_pull() {
        let manager = ConnectionManager::new(Arc::new(ScriptedConnector::new(false, true)));
        let connection = manager.acquire(Chain::Polygon).await.unwrap();
        assert!(!connection.is_push_capable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_only_connection_upgrades_once_push_recovers() {
        let connector = Arc::new(ScriptedConnector::new(false, true));
        let manager = ConnectionManager::new(connector.clone())
            .with_push_retry_interval(Duration::from_secs(60));

        let first = manager.acquire(Chain::Ethereum).await.unwrap();
        assert!(!first.is_push_capable());

        // Within the retry interval the pull-only connection is reused as is
        connector.push_ok.store(true, Ordering::SeqCst);
        let again = manager.acquire(Chain::Ethereum).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(connector.push_attempts.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let upgraded = manager.acquire(Chain::Ethereum).await.unwrap();
        assert!(upgraded.is_push_capable());
        assert!(Arc::ptr_eq(&first.client, &upgraded.client));
        assert_eq!(connector.push_attempts.load(Ordering::SeqCst), 2);

        let cached = manager.get(Chain::Ethereum).unwrap();
        assert!(Arc::ptr_eq(&cached, &upgraded));
        manager.acquire(Chain::Ethereum).await.unwrap();
        assert_eq!(connector.push_attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_push_upgrade_keeps_pull_connection() {
        let connector = Arc::new(ScriptedConnector::new(false, true));
        let manager = ConnectionManager::new(connector.clone())
            .with_push_retry_interval(Duration::from_secs(60));

        let first = manager.acquire(Chain::Avalanche).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        let again = manager.acquire(Chain::Avalanche).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(connector.push_attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_both_failing_is_error_and_not_cached() {
        let connector = Arc::new(ScriptedConnector::new(false, false));
        let manager = ConnectionManager::new(connector.clone());

        let result = manager.acquire(Chain::Bsc).await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::Connection(_)))
        ));
        assert!(manager.get(Chain::Bsc).is_none());

        let _ = manager.acquire(Chain::Bsc).await;
        assert_eq!(connector.push_attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connection_is_shared() {
        let connector = Arc::new(ScriptedConnector::new(true, true));
        let manager = Arc::new(ConnectionManager::new(connector.clone()));

        let (a, b) = tokio::join!(
            manager.acquire(Chain::Arbitrum),
            manager.acquire(Chain::Arbitrum)
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(connector.push_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delegated_chains_have_no_direct_connection() {
        let manager = ConnectionManager::new(Arc::new(ScriptedConnector::new(true, true)));
        let result = manager.acquire(Chain::Tron).await;
        assert!(matches!(
            result,
            Err(AppError::Config(ConfigError::UnsupportedChain(_)))
        ));
    }

    #[tokio::test]
    async fn test_health_check_reports_failing_connections() {
        let manager = ConnectionManager::new(Arc::new(ScriptedConnector::new(true, true)));
        assert_eq!(manager.health_check().await, HealthStatus::Healthy);

        let client = MockChainClient::new();
        client.set_healthy(false);
        manager.insert(ChainConnection {
            chain: Chain::Ethereum,
            client: Arc::new(client),
            subscriber: None,
        });
        assert_eq!(manager.health_check().await, HealthStatus::Unhealthy);
    }
}
