//! Error hierarchy shared by every layer.

use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("External service error: {0}")]
    ExternalService(#[from] ExternalServiceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl AppError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Only provider-side hiccups qualify; configuration and validation
    /// failures are terminal for the operation that raised them.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Blockchain(e) => e.is_transient(),
            AppError::ExternalService(e) => !matches!(e, ExternalServiceError::InvalidResponse(_)),
            AppError::Database(DatabaseError::Connection(_)) => true,
            _ => false,
        }
    }
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection(err.to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::Duplicate(db_err.message().to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

/// Chain provider failures
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),
}

impl BlockchainError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BlockchainError::Connection(_)
                | BlockchainError::Timeout(_)
                | BlockchainError::RateLimited(_)
                | BlockchainError::Rpc { .. }
        )
    }
}

/// Failures talking to delegated chain services
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Attach-time resolution and startup configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Wallet not found for user {user_id} ({currency} on {chain})")]
    WalletNotFound {
        user_id: String,
        currency: String,
        chain: String,
    },

    #[error("Address {address} is not a receiving address of this wallet on {chain}")]
    AddressNotFound { address: String, chain: String },

    #[error("Token {currency} is not configured on {chain}")]
    TokenNotFound { currency: String, chain: String },

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("No endpoint configured for {0}")]
    MissingEndpoint(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Inbound payload failures
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("{0}")]
    Multiple(String),

    #[error("Amount out of range: {0}")]
    AmountOutOfRange(String),
}
