//! Normalization, deduplication and persistence of observed transfers.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    AppError, DatabaseClient, DepositNotification, Direction, ObservedTransfer, RecordOutcome,
    SessionEvent, TransactionRecord, TransactionStatus, UtxoEntry, Wallet, WatchTarget,
    normalize_amount,
};
use crate::infra::FinalityConfig;

use super::hub::NotificationHub;

/// Wallet and user a deposit is credited to
#[derive(Debug, Clone, PartialEq)]
pub struct DepositOwner {
    pub wallet_id: Uuid,
    pub user_id: String,
    pub currency: String,
}

impl From<&WatchTarget> for DepositOwner {
    fn from(target: &WatchTarget) -> Self {
        Self {
            wallet_id: target.wallet_id,
            user_id: target.user_id.clone(),
            currency: target.currency.clone(),
        }
    }
}

impl From<&Wallet> for DepositOwner {
    fn from(wallet: &Wallet) -> Self {
        Self {
            wallet_id: wallet.id,
            user_id: wallet.user_id.clone(),
            currency: wallet.currency.clone(),
        }
    }
}

/// Turns observed transfers into at most one persisted record each.
///
/// There is no in-process lock: the `(chain, tx_hash)` uniqueness constraint
/// decides which of several concurrent detections wins.
pub struct TransactionRecorder {
    db_client: Arc<dyn DatabaseClient>,
    hub: Arc<NotificationHub>,
    finality: FinalityConfig,
}

impl TransactionRecorder {
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        hub: Arc<NotificationHub>,
        finality: FinalityConfig,
    ) -> Self {
        Self {
            db_client,
            hub,
            finality,
        }
    }

    pub fn finality(&self) -> &FinalityConfig {
        &self.finality
    }

    #[instrument(
        skip(self, owner, transfer),
        fields(chain = %transfer.chain, tx_hash = %transfer.tx_hash, user_id = %owner.user_id)
    )]
    pub async fn record(
        &self,
        owner: &DepositOwner,
        transfer: &ObservedTransfer,
    ) -> Result<RecordOutcome, AppError> {
        let amount = normalize_amount(transfer.value, transfer.decimals)?;
        let chain = transfer.chain;
        let status = if transfer.confirmations >= self.finality.required(chain) {
            TransactionStatus::Confirmed
        } else {
            TransactionStatus::Pending
        };

        let now = Utc::now();
        let record = TransactionRecord {
            id: Uuid::new_v4(),
            wallet_id: owner.wallet_id,
            user_id: owner.user_id.clone(),
            chain,
            direction: Direction::Deposit,
            currency: owner.currency.to_ascii_uppercase(),
            amount,
            from_address: transfer.from_address.clone(),
            to_address: chain.normalize_address(&transfer.to_address),
            tx_hash: transfer.tx_hash.clone(),
            block_number: transfer.block_number.and_then(|b| i64::try_from(b).ok()),
            confirmations: i64::try_from(transfer.confirmations).unwrap_or(i64::MAX),
            status,
            created_at: now,
            updated_at: now,
        };

        let inserted = self.db_client.insert_transaction(&record).await?;
        if !inserted {
            debug!("Transfer already recorded");
            // Redelivery refreshes outputs a previous attempt may have missed
            self.record_outputs(owner, transfer).await;
            return Ok(RecordOutcome::Duplicate);
        }

        info!(
            amount = %record.amount,
            currency = %record.currency,
            status = %record.status,
            "Deposit recorded"
        );
        self.hub.send(
            &record.user_id,
            SessionEvent::Deposit(DepositNotification::from(&record)),
        );

        // Spend tracking is keyed per output, independent of the deposit dedup
        self.record_outputs(owner, transfer).await;
        Ok(RecordOutcome::Accepted(record))
    }

    /// Upsert outputs paying the watched address. A failed write is logged;
    /// the next delivery of the same transfer retries it.
    async fn record_outputs(&self, owner: &DepositOwner, transfer: &ObservedTransfer) {
        let chain = transfer.chain;
        let watched = chain.normalize_address(&transfer.to_address);

        for output in transfer
            .outputs
            .iter()
            .filter(|o| chain.normalize_address(&o.address) == watched)
        {
            let amount = match normalize_amount(output.value, transfer.decimals) {
                Ok(amount) => amount,
                Err(e) => {
                    warn!(output_index = output.output_index, error = %e, "Skipping UTXO output");
                    continue;
                }
            };
            let entry = UtxoEntry {
                chain,
                tx_hash: transfer.tx_hash.clone(),
                output_index: output.output_index,
                wallet_id: owner.wallet_id,
                address: output.address.clone(),
                amount,
                spent: false,
            };
            if let Err(e) = self.db_client.upsert_utxo(&entry).await {
                warn!(output_index = output.output_index, error = %e, "UTXO write failed");
            }
        }
    }
}
