//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::chain::{Chain, ChainFamily, DelegatedFamily};
use super::error::AppError;
use super::types::{
    ChainTransaction, LogEntry, LogFilter, PaginatedResponse, TokenMetadata, TransactionReceipt,
    TransactionRecord, TransactionStatus, UtxoEntry, Wallet,
};

/// Database client trait for persistence operations
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Look up a user's wallet for a currency within a chain family
    async fn find_wallet(
        &self,
        user_id: &str,
        currency: &str,
        family: ChainFamily,
    ) -> Result<Option<Wallet>, AppError>;

    /// Look up the wallet for `currency` that receives at `address` on a chain.
    /// EVM addresses may back several currency wallets, hence the currency.
    async fn find_wallet_by_address(
        &self,
        chain: Chain,
        address: &str,
        currency: &str,
    ) -> Result<Option<Wallet>, AppError>;

    /// Insert a transaction unless `(chain, tx_hash)` already exists.
    /// Returns `false` when the row was a duplicate.
    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<bool, AppError>;

    /// Get a transaction by its chain-native hash
    async fn get_transaction(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<Option<TransactionRecord>, AppError>;

    /// List a wallet's transactions with cursor-based pagination
    async fn list_wallet_transactions(
        &self,
        wallet_id: Uuid,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<TransactionRecord>, AppError>;

    /// Transactions not yet at a final status, least recently checked first
    async fn get_unfinalized_transactions(
        &self,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, AppError>;

    /// Update status and confirmation depth of a transaction
    async fn update_transaction_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        confirmations: i64,
        block_number: Option<i64>,
    ) -> Result<(), AppError>;

    /// Insert or refresh a UTXO entry keyed by `(chain, tx_hash, output_index)`
    async fn upsert_utxo(&self, entry: &UtxoEntry) -> Result<(), AppError>;
}

/// Pull-style chain endpoint (client-initiated queries)
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Check provider connectivity
    async fn health_check(&self) -> Result<(), AppError> {
        self.block_number().await.map(|_| ())
    }

    /// Current chain head height
    async fn block_number(&self) -> Result<u64, AppError>;

    /// Logs matching a filter over its block range
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, AppError>;

    /// Full transaction by hash
    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<ChainTransaction>, AppError>;

    /// Execution receipt by hash; `None` while the transaction is unmined
    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, AppError>;

    /// Recent transactions touching an address, oldest first
    async fn transaction_history(&self, address: &str) -> Result<Vec<ChainTransaction>, AppError> {
        let _ = address;
        Err(AppError::NotSupported(
            "transaction_history not implemented".to_string(),
        ))
    }
}

/// Push-style chain endpoint (server-initiated event delivery)
#[async_trait]
pub trait LogSubscriber: Send + Sync {
    /// Subscribe to logs matching `filter`. Dropping the returned handle
    /// unsubscribes.
    async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription, AppError>;
}

/// Externally owned watcher for a non-EVM chain family.
/// Multiplexes watched addresses and deduplicates internally.
#[async_trait]
pub trait DelegatedChainService: Send + Sync {
    fn family(&self) -> DelegatedFamily;

    /// Start (or keep) watching `address` for deposits into `wallet`
    async fn monitor(
        &self,
        wallet: &Wallet,
        address: &str,
        token: Option<&TokenMetadata>,
    ) -> Result<(), AppError>;

    /// Current confirmation depth of a transaction, if the service exposes it
    async fn confirmations(&self, chain: Chain, tx_hash: &str) -> Result<Option<u64>, AppError> {
        let _ = (chain, tx_hash);
        Err(AppError::NotSupported(
            "confirmations not implemented".to_string(),
        ))
    }
}

/// Token contract identity and precision lookup
#[async_trait]
pub trait TokenMetadataProvider: Send + Sync {
    async fn token(&self, chain: Chain, currency: &str) -> Result<Option<TokenMetadata>, AppError>;
}

/// Cancellable stream of logs for one subscription.
///
/// The sender side belongs to the transport; dropping this handle runs the
/// drop hook (the transport's unsubscribe) exactly once.
pub struct LogSubscription {
    id: String,
    receiver: mpsc::Receiver<LogEntry>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl LogSubscription {
    pub fn new(id: impl Into<String>, receiver: mpsc::Receiver<LogEntry>) -> Self {
        Self {
            id: id.into(),
            receiver,
            on_drop: None,
        }
    }

    #[must_use]
    pub fn with_drop_hook(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_drop = Some(Box::new(hook));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next log, or `None` once the transport closed the subscription
    pub async fn recv(&mut self) -> Option<LogEntry> {
        self.receiver.recv().await
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
