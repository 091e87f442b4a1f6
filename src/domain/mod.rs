//! Domain layer containing core business types, traits, and error definitions.

pub mod chain;
pub mod error;
pub mod traits;
pub mod types;

pub use chain::{Chain, ChainFamily, ContractKind, DelegatedFamily, MonitorKind};
pub use error::{
    AppError, BlockchainError, ConfigError, DatabaseError, ExternalServiceError, ValidationError,
};
pub use traits::{
    ChainClient, DatabaseClient, DelegatedChainService, LogSubscriber, LogSubscription,
    TokenMetadataProvider,
};
pub use types::{
    AttachRequest, ChainTransaction, ClientMessage, DepositNotification, Direction, ErrorDetail,
    ErrorResponse, HealthResponse, HealthStatus, LogEntry, LogFilter, MonitorState,
    ObservedTransfer, PaginatedResponse, PaginationParams, RecordOutcome, SessionEvent,
    SessionInfo, TokenMetadata, TransactionReceipt, TransactionRecord, TransactionStatus,
    UtxoEntry, UtxoOutput, Wallet, WatchKey, WatchTarget, WebhookDeposit, WebhookSummary,
    normalize_amount,
};
