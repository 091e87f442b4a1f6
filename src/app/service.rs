//! Application service backing the HTTP surface.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::{
    AppError, Chain, ContractKind, DatabaseClient, HealthResponse, HealthStatus, ObservedTransfer,
    PaginatedResponse, RecordOutcome, SessionInfo, TokenMetadataProvider, TransactionRecord,
    ValidationError, WebhookDeposit, WebhookSummary,
};
use crate::infra::ConnectionManager;

use super::recorder::{DepositOwner, TransactionRecorder};
use super::registry::SessionRegistry;

/// Read paths and webhook intake; live watches go through the [`SessionRegistry`]
pub struct AppService {
    db_client: Arc<dyn DatabaseClient>,
    tokens: Arc<dyn TokenMetadataProvider>,
    connections: Arc<ConnectionManager>,
    registry: Arc<SessionRegistry>,
    recorder: Arc<TransactionRecorder>,
}

impl AppService {
    #[must_use]
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        tokens: Arc<dyn TokenMetadataProvider>,
        connections: Arc<ConnectionManager>,
        registry: Arc<SessionRegistry>,
        recorder: Arc<TransactionRecorder>,
    ) -> Self {
        Self {
            db_client,
            tokens,
            connections,
            registry,
            recorder,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    #[instrument(skip(self))]
    pub async fn list_wallet_transactions(
        &self,
        wallet_id: Uuid,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<TransactionRecord>, AppError> {
        let limit = limit.clamp(1, 100);
        self.db_client
            .list_wallet_transactions(wallet_id, limit, cursor)
            .await
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        self.registry.snapshot().await
    }

    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.db_client.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let chain_health = self.connections.health_check().await;
        HealthResponse::new(db_health, chain_health, self.registry.len())
    }

    /// Record deposits reported by a delegated chain service.
    ///
    /// Each entry is matched to a wallet by receiving address. Malformed and
    /// unmatched entries are counted and skipped; persistence failures abort
    /// the batch so the sender retries it, which the dedup key makes safe.
    #[instrument(skip(self, deposits), fields(chain = %chain, count = deposits.len()))]
    pub async fn process_webhook_deposits(
        &self,
        chain: Chain,
        deposits: Vec<WebhookDeposit>,
    ) -> Result<WebhookSummary, AppError> {
        let mut summary = WebhookSummary {
            received: deposits.len(),
            ..WebhookSummary::default()
        };

        for deposit in deposits {
            let transfer = match self.to_transfer(chain, &deposit).await {
                Ok(transfer) => transfer,
                Err(AppError::Validation(e)) => {
                    warn!(tx_hash = %deposit.tx_hash, error = %e, "Rejected webhook deposit");
                    summary.rejected += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let currency = deposit.currency.trim().to_ascii_uppercase();
            let Some(wallet) = self
                .db_client
                .find_wallet_by_address(chain, &transfer.to_address, &currency)
                .await?
            else {
                warn!(tx_hash = %transfer.tx_hash, address = %transfer.to_address, "No wallet for webhook deposit");
                summary.unmatched += 1;
                continue;
            };

            match self.recorder.record(&DepositOwner::from(&wallet), &transfer).await {
                Ok(RecordOutcome::Accepted(_)) => summary.accepted += 1,
                Ok(RecordOutcome::Duplicate) => summary.duplicate += 1,
                Err(AppError::Validation(e)) => {
                    warn!(tx_hash = %transfer.tx_hash, error = %e, "Rejected webhook deposit");
                    summary.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            accepted = summary.accepted,
            duplicate = summary.duplicate,
            unmatched = summary.unmatched,
            rejected = summary.rejected,
            "Webhook deposits processed"
        );
        Ok(summary)
    }

    async fn to_transfer(
        &self,
        chain: Chain,
        deposit: &WebhookDeposit,
    ) -> Result<ObservedTransfer, AppError> {
        deposit
            .validate()
            .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;

        let value = deposit.value.trim().parse::<u128>().map_err(|_| {
            AppError::Validation(ValidationError::InvalidField {
                field: "value".to_string(),
                message: format!("'{}' is not an integer amount in base units", deposit.value),
            })
        })?;

        let decimals = match chain.contract_kind(&deposit.currency) {
            ContractKind::Native => chain.native_decimals(),
            ContractKind::Token => self
                .tokens
                .token(chain, &deposit.currency)
                .await?
                .map(|t| t.decimals)
                .ok_or_else(|| {
                    AppError::Validation(ValidationError::InvalidField {
                        field: "currency".to_string(),
                        message: format!("{} is not configured on {}", deposit.currency, chain),
                    })
                })?,
        };

        Ok(ObservedTransfer {
            chain,
            tx_hash: deposit.tx_hash.trim().to_string(),
            from_address: deposit.from_address.clone(),
            to_address: chain.normalize_address(&deposit.to_address),
            value,
            decimals,
            block_number: deposit.block_number,
            confirmations: deposit.confirmations,
            timestamp: None,
            outputs: deposit.outputs.clone(),
        })
    }
}
