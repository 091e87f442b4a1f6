//! Domain types with validation support.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::chain::{Chain, ChainFamily, ContractKind, MonitorKind};
use super::error::ValidationError;

// ============================================================================
// WALLETS AND TOKENS
// ============================================================================

/// A user's wallet for one currency. Issued once per chain family, read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: String,
    pub currency: String,
    pub family: ChainFamily,
    /// Receiving address per chain
    pub addresses: HashMap<Chain, String>,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn address_on(&self, chain: Chain) -> Option<&str> {
        self.addresses.get(&chain).map(String::as_str)
    }

    /// Whether `address` is this wallet's receiving address on `chain`
    pub fn owns_address(&self, chain: Chain, address: &str) -> bool {
        self.address_on(chain)
            .map(|owned| chain.normalize_address(owned) == chain.normalize_address(address))
            .unwrap_or(false)
    }
}

/// Contract identity and precision of a token on one chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TokenMetadata {
    pub chain: Chain,
    #[schema(example = "USDT")]
    pub currency: String,
    #[schema(example = "0xdac17f958d2ee523a2206206994597c13d831ec7")]
    pub contract_address: String,
    #[schema(example = 6)]
    pub decimals: u8,
}

// ============================================================================
// CLIENT SESSION MESSAGES
// ============================================================================

/// Request to start watching an address
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema, PartialEq)]
pub struct AttachRequest {
    pub chain: Chain,
    #[validate(length(min = 1, max = 32, message = "Currency is required"))]
    #[schema(example = "USDT")]
    pub currency: String,
    #[validate(length(min = 1, max = 128, message = "Address is required"))]
    #[schema(example = "0x8ba1f109551bd432803012645ac136ddd64dba72")]
    pub address: String,
}

/// Inbound message on a client WebSocket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Attach(AttachRequest),
    /// Tear the watch down now rather than after the grace period
    Stop,
}

/// Everything a monitor needs to know about what it is watching
#[derive(Debug, Clone, PartialEq)]
pub struct WatchTarget {
    pub user_id: String,
    pub wallet_id: Uuid,
    pub chain: Chain,
    pub currency: String,
    /// Normalized receiving address
    pub address: String,
    pub contract: ContractKind,
    pub token: Option<TokenMetadata>,
}

impl WatchTarget {
    /// Precision of the watched asset
    pub fn decimals(&self) -> u8 {
        self.token
            .as_ref()
            .map(|t| t.decimals)
            .unwrap_or_else(|| self.chain.native_decimals())
    }

    /// Identity used to decide whether a reattach can reuse a live monitor
    pub fn key(&self) -> WatchKey {
        WatchKey {
            chain: self.chain,
            currency: self.currency.to_ascii_uppercase(),
            address: self.address.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub chain: Chain,
    pub currency: String,
    pub address: String,
}

/// Lifecycle of a single chain monitor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    #[default]
    Idle,
    Watching,
    Found,
    Stopped,
    Failed,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Watching => "watching",
            Self::Found => "found",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// No further detection will happen in this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbound event pushed to a client session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Attached {
        chain: Chain,
        currency: String,
        address: String,
        monitor: MonitorKind,
        /// True when an existing monitor was reused
        reused: bool,
        status: MonitorState,
    },
    Deposit(DepositNotification),
    /// A watch ended on an unrecoverable error
    Failed {
        chain: Chain,
        currency: String,
        address: String,
        reason: String,
        status: MonitorState,
    },
    /// A client message was rejected; existing watches are unaffected
    Error { message: String },
}

/// Deposit fields sent to the owning session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct DepositNotification {
    pub chain: Chain,
    #[schema(example = "USDT")]
    pub currency: String,
    #[schema(value_type = String, example = "100.5")]
    pub amount: Decimal,
    pub tx_hash: String,
    pub confirmations: i64,
    pub status: TransactionStatus,
}

impl From<&TransactionRecord> for DepositNotification {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            chain: record.chain,
            currency: record.currency.clone(),
            amount: record.amount,
            tx_hash: record.tx_hash.clone(),
            confirmations: record.confirmations,
            status: record.status,
        }
    }
}

// ============================================================================
// CHAIN OBSERVATIONS
// ============================================================================

/// Output of a UTXO transaction paying to a watched address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UtxoOutput {
    pub output_index: u32,
    pub address: String,
    /// Raw base units (satoshis)
    pub value: u128,
}

/// A transfer seen on chain, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedTransfer {
    pub chain: Chain,
    pub tx_hash: String,
    pub from_address: Option<String>,
    pub to_address: String,
    /// Raw base units
    pub value: u128,
    pub decimals: u8,
    pub block_number: Option<u64>,
    pub confirmations: u64,
    pub timestamp: Option<DateTime<Utc>>,
    /// UTXO outputs; empty for account-model chains
    pub outputs: Vec<UtxoOutput>,
}

/// Convert raw integer units to a decimal amount with the given precision
pub fn normalize_amount(value: u128, decimals: u8) -> Result<Decimal, ValidationError> {
    let signed = i128::try_from(value)
        .map_err(|_| ValidationError::AmountOutOfRange(value.to_string()))?;
    Decimal::try_from_i128_with_scale(signed, u32::from(decimals))
        .map(|d| d.normalize())
        .map_err(|_| ValidationError::AmountOutOfRange(value.to_string()))
}

/// Subset of an `eth_getLogs` / log subscription entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<u64>,
    pub transaction_hash: String,
    pub log_index: Option<u64>,
    pub removed: bool,
}

/// Log filter scoped to one contract and optional indexed topics
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LogFilter {
    pub address: String,
    pub topics: Vec<Option<String>>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl LogFilter {
    #[must_use]
    pub fn with_range(mut self, from_block: u64, to_block: u64) -> Self {
        self.from_block = Some(from_block);
        self.to_block = Some(to_block);
        self
    }
}

/// Transaction as reported by a chain provider or explorer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: u128,
    pub block_number: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    /// `None` while the receipt is unknown
    pub success: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: Option<u64>,
    pub success: bool,
}

// ============================================================================
// PERSISTED RECORDS
// ============================================================================

/// Finality status of a recorded transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Seen on chain, below the finality threshold
    #[default]
    Pending,
    /// Finality threshold reached
    Confirmed,
    /// Reverted or dropped
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Deposit,
    Withdrawal,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            _ => Err(format!("Invalid direction: {}", s)),
        }
    }
}

/// Normalized, persisted transfer. Unique on `(chain, tx_hash)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub user_id: String,
    pub chain: Chain,
    pub direction: Direction,
    #[schema(example = "USDT")]
    pub currency: String,
    #[schema(value_type = String, example = "100")]
    pub amount: Decimal,
    pub from_address: Option<String>,
    pub to_address: String,
    pub tx_hash: String,
    pub block_number: Option<i64>,
    pub confirmations: i64,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Spendable output derived from a UTXO deposit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtxoEntry {
    pub chain: Chain,
    pub tx_hash: String,
    pub output_index: u32,
    pub wallet_id: Uuid,
    pub address: String,
    pub amount: Decimal,
    pub spent: bool,
}

/// Result of handing a transfer to the recorder
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Accepted(TransactionRecord),
    /// Already recorded under the same `(chain, tx_hash)`; nothing changed
    Duplicate,
}

impl RecordOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Deposit reported by a delegated chain service
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct WebhookDeposit {
    #[validate(length(min = 1, message = "Transaction hash is required"))]
    pub tx_hash: String,
    pub from_address: Option<String>,
    #[validate(length(min = 1, message = "Receiving address is required"))]
    pub to_address: String,
    #[schema(example = "TRX")]
    pub currency: String,
    /// Raw base units as a decimal string
    #[schema(example = "1500000")]
    pub value: String,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub outputs: Vec<UtxoOutput>,
}

/// Per-batch result of a webhook delivery
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct WebhookSummary {
    pub received: usize,
    pub accepted: usize,
    /// Already recorded; not an error
    pub duplicate: usize,
    /// No wallet receives at the reported address
    pub unmatched: usize,
    /// Malformed entries
    pub rejected: usize,
}

// ============================================================================
// API SUPPORT TYPES
// ============================================================================

/// Snapshot of one live watch session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    pub user_id: String,
    pub chain: Chain,
    pub currency: String,
    pub address: String,
    pub monitor: MonitorKind,
    pub state: MonitorState,
    /// A disconnect teardown is scheduled
    pub teardown_pending: bool,
}

/// Pagination parameters for list requests
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaginationParams {
    /// Maximum number of items to return (1-100, default: 20)
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    #[serde(default = "default_limit")]
    #[schema(example = 20)]
    pub limit: i64,
    /// Cursor for pagination (ID to start after)
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            cursor: None,
        }
    }
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T: ToSchema> {
    pub items: Vec<T>,
    /// Cursor for next page (null if no more items)
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T: ToSchema> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>, has_more: bool) -> Self {
        Self {
            items,
            next_cursor,
            has_more,
        }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    /// Aggregate over established chain connections
    pub chains: HealthStatus,
    pub active_sessions: usize,
    pub timestamp: DateTime<Utc>,
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, chains: HealthStatus, active_sessions: usize) -> Self {
        let status = match (&database, &chains) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            chains,
            active_sessions,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "validation_error")]
    pub r#type: String,
    pub message: String,
}
