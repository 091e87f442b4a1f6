//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::app::{ChainMonitor, MonitorBuilder};
use crate::domain::{
    AppError, AttachRequest, BlockchainError, Chain, ChainClient, ChainFamily, ChainTransaction,
    ConfigError, DatabaseClient, DatabaseError, DelegatedChainService, DelegatedFamily,
    ExternalServiceError, LogEntry, LogFilter, LogSubscriber, LogSubscription, MonitorKind,
    MonitorState, PaginatedResponse, TokenMetadata, TransactionReceipt, TransactionRecord,
    TransactionStatus, UtxoEntry, ValidationError, Wallet, WatchTarget,
};
use crate::infra::ChainConnector;
use crate::infra::blockchain::erc20::address_topic;
use crate::infra::blockchain::TRANSFER_TOPIC;

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }

    fn message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| "Mock error".to_string())
    }
}

/// ERC-20 Transfer log paying `value` from `from` to `to`
pub fn transfer_log(
    contract: &str,
    from: &str,
    to: &str,
    value: u128,
    block_number: u64,
    tx_hash: &str,
) -> LogEntry {
    LogEntry {
        address: contract.to_ascii_lowercase(),
        topics: vec![
            TRANSFER_TOPIC.to_string(),
            address_topic(from),
            address_topic(to),
        ],
        data: format!("0x{:064x}", value),
        block_number: Some(block_number),
        transaction_hash: tx_hash.to_string(),
        log_index: Some(0),
        removed: false,
    }
}

fn log_matches(filter: &LogFilter, log: &LogEntry) -> bool {
    if !filter.address.eq_ignore_ascii_case(&log.address) {
        return false;
    }
    let topics_match = filter.topics.iter().enumerate().all(|(i, expected)| match expected {
        None => true,
        Some(topic) => log
            .topics
            .get(i)
            .is_some_and(|actual| actual.eq_ignore_ascii_case(topic)),
    });
    if !topics_match {
        return false;
    }
    match log.block_number {
        Some(block) => {
            filter.from_block.is_none_or(|from| block >= from)
                && filter.to_block.is_none_or(|to| block <= to)
        }
        None => filter.from_block.is_none() && filter.to_block.is_none(),
    }
}

// ============================================================================
// DATABASE
// ============================================================================

/// In-memory database with the same dedup and ordering rules as Postgres
pub struct MockDatabaseClient {
    wallets: Mutex<Vec<Wallet>>,
    transactions: Mutex<HashMap<(Chain, String), TransactionRecord>>,
    utxos: Mutex<HashMap<(Chain, String, u32), UtxoEntry>>,
    config: MockConfig,
    is_healthy: AtomicBool,
    insert_failures: AtomicUsize,
    utxo_failures: AtomicUsize,
}

impl MockDatabaseClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            wallets: Mutex::new(Vec::new()),
            transactions: Mutex::new(HashMap::new()),
            utxos: Mutex::new(HashMap::new()),
            config,
            is_healthy: AtomicBool::new(true),
            insert_failures: AtomicUsize::new(0),
            utxo_failures: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Make the next `count` transaction inserts fail
    pub fn fail_next_inserts(&self, count: usize) {
        self.insert_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` UTXO upserts fail
    pub fn fail_next_utxo_writes(&self, count: usize) {
        self.utxo_failures.store(count, Ordering::SeqCst);
    }

    /// Register a wallet with its receiving addresses
    pub fn seed_wallet(
        &self,
        user_id: &str,
        currency: &str,
        family: ChainFamily,
        addresses: &[(Chain, &str)],
    ) -> Wallet {
        let wallet = Wallet {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            currency: currency.to_ascii_uppercase(),
            family,
            addresses: addresses
                .iter()
                .map(|(chain, address)| (*chain, address.to_string()))
                .collect(),
            created_at: Utc::now(),
        };
        self.wallets.lock().unwrap().push(wallet.clone());
        wallet
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.transactions.lock().unwrap().values().cloned().collect()
    }

    pub fn utxos(&self) -> Vec<UtxoEntry> {
        self.utxos.lock().unwrap().values().cloned().collect()
    }

    fn take_failure(counter: &AtomicUsize, what: &str) -> Result<(), AppError> {
        let armed = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(AppError::Database(DatabaseError::Connection(format!(
                "transient {} failure",
                what
            ))));
        }
        Ok(())
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::Database(DatabaseError::Query(
                self.config.message(),
            )));
        }
        Ok(())
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Database unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn find_wallet(
        &self,
        user_id: &str,
        currency: &str,
        family: ChainFamily,
    ) -> Result<Option<Wallet>, AppError> {
        self.check_should_fail()?;
        let wallets = self.wallets.lock().unwrap();
        Ok(wallets
            .iter()
            .find(|w| {
                w.user_id == user_id && w.currency.eq_ignore_ascii_case(currency) && w.family == family
            })
            .cloned())
    }

    async fn find_wallet_by_address(
        &self,
        chain: Chain,
        address: &str,
        currency: &str,
    ) -> Result<Option<Wallet>, AppError> {
        self.check_should_fail()?;
        let wallets = self.wallets.lock().unwrap();
        Ok(wallets
            .iter()
            .find(|w| w.currency.eq_ignore_ascii_case(currency) && w.owns_address(chain, address))
            .cloned())
    }

    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<bool, AppError> {
        self.check_should_fail()?;
        Self::take_failure(&self.insert_failures, "insert")?;
        let mut transactions = self.transactions.lock().unwrap();
        let key = (record.chain, record.tx_hash.clone());
        if transactions.contains_key(&key) {
            return Ok(false);
        }
        transactions.insert(key, record.clone());
        Ok(true)
    }

    async fn get_transaction(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<Option<TransactionRecord>, AppError> {
        self.check_should_fail()?;
        let transactions = self.transactions.lock().unwrap();
        Ok(transactions.get(&(chain, tx_hash.to_string())).cloned())
    }

    async fn list_wallet_transactions(
        &self,
        wallet_id: Uuid,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<TransactionRecord>, AppError> {
        self.check_should_fail()?;
        let mut items: Vec<TransactionRecord> = self
            .transactions
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.wallet_id == wallet_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        if let Some(cursor) = cursor {
            let cursor_id = Uuid::parse_str(cursor).map_err(|_| {
                AppError::Validation(ValidationError::InvalidField {
                    field: "cursor".to_string(),
                    message: "Invalid cursor format".to_string(),
                })
            })?;
            if let Some(pos) = items.iter().position(|r| r.id == cursor_id) {
                items = items.split_off(pos + 1);
            }
        }

        let limit = usize::try_from(limit).unwrap_or(0);
        let has_more = items.len() > limit;
        items.truncate(limit);
        let next_cursor = if has_more {
            items.last().map(|r| r.id.to_string())
        } else {
            None
        };
        Ok(PaginatedResponse::new(items, next_cursor, has_more))
    }

    async fn get_unfinalized_transactions(
        &self,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        self.check_should_fail()?;
        let mut pending: Vec<TransactionRecord> = self
            .transactions
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == TransactionStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.updated_at);
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn update_transaction_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        confirmations: i64,
        block_number: Option<i64>,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut transactions = self.transactions.lock().unwrap();
        let record = transactions
            .values_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        record.status = status;
        record.confirmations = confirmations;
        if block_number.is_some() {
            record.block_number = block_number;
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_utxo(&self, entry: &UtxoEntry) -> Result<(), AppError> {
        self.check_should_fail()?;
        Self::take_failure(&self.utxo_failures, "utxo write")?;
        self.utxos.lock().unwrap().insert(
            (entry.chain, entry.tx_hash.clone(), entry.output_index),
            entry.clone(),
        );
        Ok(())
    }
}

// ============================================================================
// CHAIN TRANSPORTS
// ============================================================================

#[derive(Default)]
struct ChainState {
    head: u64,
    logs: Vec<LogEntry>,
    history: Vec<ChainTransaction>,
    transactions: HashMap<String, ChainTransaction>,
    receipts: HashMap<String, TransactionReceipt>,
}

/// Scriptable pull client
pub struct MockChainClient {
    state: Mutex<ChainState>,
    log_queries: Mutex<Vec<LogFilter>>,
    history_calls: AtomicUsize,
    failing: AtomicBool,
    history_unsupported: AtomicBool,
    is_healthy: AtomicBool,
}

impl MockChainClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState::default()),
            log_queries: Mutex::new(Vec::new()),
            history_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            history_unsupported: AtomicBool::new(false),
            is_healthy: AtomicBool::new(true),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Every query fails with a transient provider error while set
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Answer history queries as an endpoint without an explorer would
    pub fn set_history_unsupported(&self, unsupported: bool) {
        self.history_unsupported.store(unsupported, Ordering::Relaxed);
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn push_log(&self, log: LogEntry) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn set_history(&self, history: Vec<ChainTransaction>) {
        self.state.lock().unwrap().history = history;
    }

    pub fn set_transaction(&self, tx: ChainTransaction) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(tx.hash.clone(), tx);
    }

    pub fn set_receipt(&self, receipt: TransactionReceipt) {
        self.state
            .lock()
            .unwrap()
            .receipts
            .insert(receipt.transaction_hash.clone(), receipt);
    }

    /// Filters passed to `get_logs`, in call order
    pub fn log_queries(&self) -> Vec<LogFilter> {
        self.log_queries.lock().unwrap().clone()
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    fn check_failing(&self) -> Result<(), AppError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(AppError::Blockchain(BlockchainError::Timeout(
                "mock provider unavailable".to_string(),
            )));
        }
        Ok(())
    }
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Blockchain(BlockchainError::Connection(
                "Provider unhealthy".to_string(),
            )));
        }
        Ok(())
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        self.check_failing()?;
        Ok(self.state.lock().unwrap().head)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, AppError> {
        self.log_queries.lock().unwrap().push(filter.clone());
        self.check_failing()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .logs
            .iter()
            .filter(|log| log_matches(filter, log))
            .cloned()
            .collect())
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<ChainTransaction>, AppError> {
        self.check_failing()?;
        Ok(self.state.lock().unwrap().transactions.get(tx_hash).cloned())
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, AppError> {
        self.check_failing()?;
        Ok(self.state.lock().unwrap().receipts.get(tx_hash).cloned())
    }

    async fn transaction_history(&self, address: &str) -> Result<Vec<ChainTransaction>, AppError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.history_unsupported.load(Ordering::Relaxed) {
            return Err(AppError::NotSupported(
                "no explorer configured for address history".to_string(),
            ));
        }
        self.check_failing()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .history
            .iter()
            .filter(|tx| {
                tx.to
                    .as_deref()
                    .is_some_and(|to| to.eq_ignore_ascii_case(address))
                    || tx.from.eq_ignore_ascii_case(address)
            })
            .cloned()
            .collect())
    }
}

type Subscriptions = Arc<Mutex<HashMap<String, (LogFilter, mpsc::Sender<LogEntry>)>>>;

/// In-process push transport. Logs pushed here reach every live subscription
/// whose filter matches.
pub struct MockLogSubscriber {
    subscriptions: Subscriptions,
    next_id: AtomicU64,
    config: MockConfig,
}

impl MockLogSubscriber {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Deliver a log; returns how many subscriptions received it
    pub fn push_log(&self, log: &LogEntry) -> usize {
        let subscriptions = self.subscriptions.lock().unwrap();
        subscriptions
            .values()
            .filter(|(filter, _)| log_matches(filter, log))
            .filter(|(_, tx)| tx.try_send(log.clone()).is_ok())
            .count()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    /// Drop every sender, as a closed socket would
    pub fn close_all(&self) {
        self.subscriptions.lock().unwrap().clear();
    }
}

impl Default for MockLogSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogSubscriber for MockLogSubscriber {
    async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription, AppError> {
        if self.config.should_fail {
            return Err(AppError::Blockchain(BlockchainError::SubscriptionClosed(
                self.config.message(),
            )));
        }
        let id = format!("0x{:x}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(64);
        self.subscriptions
            .lock()
            .unwrap()
            .insert(id.clone(), (filter, tx));

        let subscriptions = Arc::clone(&self.subscriptions);
        let hook_id = id.clone();
        Ok(LogSubscription::new(id, rx).with_drop_hook(move || {
            subscriptions.lock().unwrap().remove(&hook_id);
        }))
    }
}

/// Connector handing out fixed transports; `None` makes that side fail
pub struct MockConnector {
    client: Option<Arc<dyn ChainClient>>,
    subscriber: Option<Arc<dyn LogSubscriber>>,
}

impl MockConnector {
    #[must_use]
    pub fn new(client: Arc<dyn ChainClient>, subscriber: Option<Arc<dyn LogSubscriber>>) -> Self {
        Self {
            client: Some(client),
            subscriber,
        }
    }

    /// Every connection attempt fails
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            client: None,
            subscriber: None,
        }
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    async fn connect_push(&self, chain: Chain) -> Result<Arc<dyn LogSubscriber>, AppError> {
        self.subscriber.clone().ok_or_else(|| {
            AppError::Blockchain(BlockchainError::Connection(format!(
                "no push endpoint for {}",
                chain
            )))
        })
    }

    async fn connect_pull(&self, chain: Chain) -> Result<Arc<dyn ChainClient>, AppError> {
        self.client.clone().ok_or_else(|| {
            AppError::Blockchain(BlockchainError::Connection(format!(
                "no rpc endpoint for {}",
                chain
            )))
        })
    }
}

// ============================================================================
// DELEGATED SERVICES
// ============================================================================

/// Records the addresses handed to it and serves scripted confirmation depths
pub struct MockDelegatedService {
    family: DelegatedFamily,
    monitored: Mutex<Vec<(Uuid, String)>>,
    confirmations: Mutex<HashMap<String, u64>>,
    config: MockConfig,
}

impl MockDelegatedService {
    #[must_use]
    pub fn new(family: DelegatedFamily) -> Self {
        Self::with_config(family, MockConfig::success())
    }

    #[must_use]
    pub fn with_config(family: DelegatedFamily, config: MockConfig) -> Self {
        Self {
            family,
            monitored: Mutex::new(Vec::new()),
            confirmations: Mutex::new(HashMap::new()),
            config,
        }
    }

    #[must_use]
    pub fn failing(family: DelegatedFamily, message: impl Into<String>) -> Self {
        Self::with_config(family, MockConfig::failure(message))
    }

    pub fn set_confirmations(&self, tx_hash: &str, confirmations: u64) {
        self.confirmations
            .lock()
            .unwrap()
            .insert(tx_hash.to_string(), confirmations);
    }

    /// `(wallet_id, address)` pairs passed to `monitor`
    pub fn monitored(&self) -> Vec<(Uuid, String)> {
        self.monitored.lock().unwrap().clone()
    }
}

#[async_trait]
impl DelegatedChainService for MockDelegatedService {
    fn family(&self) -> DelegatedFamily {
        self.family
    }

    async fn monitor(
        &self,
        wallet: &Wallet,
        address: &str,
        _token: Option<&TokenMetadata>,
    ) -> Result<(), AppError> {
        if self.config.should_fail {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                self.config.message(),
            )));
        }
        self.monitored
            .lock()
            .unwrap()
            .push((wallet.id, address.to_string()));
        Ok(())
    }

    async fn confirmations(&self, _chain: Chain, tx_hash: &str) -> Result<Option<u64>, AppError> {
        if self.config.should_fail {
            return Err(AppError::ExternalService(ExternalServiceError::Unavailable(
                self.config.message(),
            )));
        }
        Ok(self.confirmations.lock().unwrap().get(tx_hash).copied())
    }
}

// ============================================================================
// MONITORS
// ============================================================================

/// Monitor that only tracks its lifecycle calls
pub struct MockMonitor {
    target: WatchTarget,
    kind: MonitorKind,
    state: watch::Sender<MonitorState>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl MockMonitor {
    #[must_use]
    pub fn new(target: WatchTarget) -> Self {
        let kind = MonitorKind::select(target.chain.family(), target.contract, true);
        Self {
            target,
            kind,
            state: watch::Sender::new(MonitorState::Idle),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Force a state, e.g. to simulate a monitor that finished on its own
    pub fn set_state(&self, state: MonitorState) {
        self.state.send_replace(state);
    }
}

#[async_trait]
impl ChainMonitor for MockMonitor {
    fn kind(&self) -> MonitorKind {
        self.kind
    }

    fn target(&self) -> &WatchTarget {
        &self.target
    }

    fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    async fn start(&self) -> Result<(), AppError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(MonitorState::Watching);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = MonitorState::Stopped;
            true
        });
    }

    fn is_live(&self) -> bool {
        self.starts() > 0 && !self.state().is_terminal()
    }
}

/// Builder producing [`MockMonitor`]s straight from the request
pub struct MockMonitorBuilder {
    built: Mutex<Vec<Arc<MockMonitor>>>,
    failing: AtomicBool,
}

impl MockMonitorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            built: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every monitor built so far, oldest first
    pub fn built(&self) -> Vec<Arc<MockMonitor>> {
        self.built.lock().unwrap().clone()
    }
}

impl Default for MockMonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MonitorBuilder for MockMonitorBuilder {
    async fn build(
        &self,
        user_id: &str,
        request: &AttachRequest,
    ) -> Result<Arc<dyn ChainMonitor>, AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Config(ConfigError::WalletNotFound {
                user_id: user_id.to_string(),
                currency: request.currency.clone(),
                chain: request.chain.to_string(),
            }));
        }
        let currency = request.currency.trim().to_ascii_uppercase();
        let target = WatchTarget {
            user_id: user_id.to_string(),
            wallet_id: Uuid::new_v4(),
            chain: request.chain,
            contract: request.chain.contract_kind(&currency),
            currency,
            address: request.chain.normalize_address(&request.address),
            token: None,
        };
        let monitor = Arc::new(MockMonitor::new(target));
        self.built.lock().unwrap().push(Arc::clone(&monitor));
        Ok(monitor)
    }
}
