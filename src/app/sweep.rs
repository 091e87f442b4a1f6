//! Background re-verification of deposits that have not reached finality.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AppError, DatabaseClient, DepositNotification, SessionEvent, TransactionRecord,
    TransactionStatus,
};
use crate::infra::{ConnectionManager, DelegatedServices, FinalityConfig};

use super::hub::NotificationHub;
use super::monitor::confirmations_at;

/// Sweep scheduling
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    /// Records re-checked per cycle
    pub batch_size: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(10),
            batch_size: 100,
        }
    }
}

impl SweepConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env::var("ENABLE_SWEEP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.enabled),
            poll_interval: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            batch_size: env::var("SWEEP_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),
        }
    }
}

/// Counters for one sweep cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub checked: usize,
    pub confirmed: usize,
    pub failed: usize,
    /// Depth changed without a status change
    pub progressed: usize,
    /// No confirmation source for the record's chain
    pub skipped: usize,
    pub errors: usize,
}

/// What the chain currently says about a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observation {
    /// Not mined or not yet known to the source
    Unknown,
    Reverted { block_number: Option<u64> },
    Mined { block_number: Option<u64>, confirmations: u64 },
    /// The source cannot report depth
    Unsupported,
}

/// Promotes pending deposits once their chain's finality threshold is met.
///
/// Runs independently of any client session, so deposits recorded while
/// nobody was connected still reach a final status.
pub struct VerificationSweep {
    db_client: Arc<dyn DatabaseClient>,
    connections: Arc<ConnectionManager>,
    delegated: DelegatedServices,
    hub: Arc<NotificationHub>,
    finality: FinalityConfig,
}

impl VerificationSweep {
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        connections: Arc<ConnectionManager>,
        delegated: DelegatedServices,
        hub: Arc<NotificationHub>,
        finality: FinalityConfig,
    ) -> Self {
        Self {
            db_client,
            connections,
            delegated,
            hub,
            finality,
        }
    }

    /// Re-check one batch of unfinalized records. A failure on one record
    /// never stops the rest of the batch.
    #[instrument(skip(self))]
    pub async fn run_once(&self, batch_size: i64) -> Result<SweepStats, AppError> {
        let records = self
            .db_client
            .get_unfinalized_transactions(batch_size)
            .await?;
        let mut stats = SweepStats::default();

        for record in records {
            stats.checked += 1;
            let observation = match self.observe(&record).await {
                Ok(observation) => observation,
                Err(e) => {
                    warn!(tx_hash = %record.tx_hash, chain = %record.chain, error = %e, "Verification failed");
                    stats.errors += 1;
                    continue;
                }
            };
            if let Err(e) = self.apply(&record, observation, &mut stats).await {
                error!(tx_hash = %record.tx_hash, error = %e, "Failed to update transaction status");
                stats.errors += 1;
            }
        }

        if stats.checked > 0 {
            debug!(?stats, "Sweep cycle complete");
        }
        Ok(stats)
    }

    async fn observe(&self, record: &TransactionRecord) -> Result<Observation, AppError> {
        let chain = record.chain;
        match chain.family().delegated() {
            None => {
                let connection = self.connections.acquire(chain).await?;
                let client = connection.client.as_ref();
                match client.get_transaction_receipt(&record.tx_hash).await? {
                    None => Ok(Observation::Unknown),
                    Some(receipt) if !receipt.success => Ok(Observation::Reverted {
                        block_number: receipt.block_number,
                    }),
                    Some(receipt) => Ok(Observation::Mined {
                        block_number: receipt.block_number,
                        confirmations: confirmations_at(client, receipt.block_number).await,
                    }),
                }
            }
            Some(family) => {
                let Some(service) = self.delegated.get(family) else {
                    return Ok(Observation::Unsupported);
                };
                match service.confirmations(chain, &record.tx_hash).await {
                    Ok(Some(confirmations)) => Ok(Observation::Mined {
                        block_number: None,
                        confirmations,
                    }),
                    Ok(None) => Ok(Observation::Unknown),
                    Err(AppError::NotSupported(_)) => Ok(Observation::Unsupported),
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn apply(
        &self,
        record: &TransactionRecord,
        observation: Observation,
        stats: &mut SweepStats,
    ) -> Result<(), AppError> {
        let (status, confirmations, block_number) = match observation {
            Observation::Unsupported => {
                stats.skipped += 1;
                return Ok(());
            }
            // Still touched so the batch rotates through older records
            Observation::Unknown => (record.status, record.confirmations, record.block_number),
            Observation::Reverted { block_number } => (
                TransactionStatus::Failed,
                record.confirmations,
                block_number.and_then(|b| i64::try_from(b).ok()).or(record.block_number),
            ),
            Observation::Mined {
                block_number,
                confirmations,
            } => {
                let status = if confirmations >= self.finality.required(record.chain) {
                    TransactionStatus::Confirmed
                } else {
                    TransactionStatus::Pending
                };
                (
                    status,
                    i64::try_from(confirmations).unwrap_or(i64::MAX),
                    block_number.and_then(|b| i64::try_from(b).ok()).or(record.block_number),
                )
            }
        };

        self.db_client
            .update_transaction_status(record.id, status, confirmations, block_number)
            .await?;

        if status == record.status {
            if confirmations != record.confirmations {
                stats.progressed += 1;
            }
            return Ok(());
        }

        match status {
            TransactionStatus::Confirmed => stats.confirmed += 1,
            TransactionStatus::Failed => stats.failed += 1,
            TransactionStatus::Pending => {}
        }
        info!(
            tx_hash = %record.tx_hash,
            chain = %record.chain,
            from = %record.status,
            to = %status,
            confirmations,
            "Deposit status changed"
        );

        let updated = TransactionRecord {
            status,
            confirmations,
            block_number,
            updated_at: Utc::now(),
            ..record.clone()
        };
        self.hub.send(
            &updated.user_id,
            SessionEvent::Deposit(DepositNotification::from(&updated)),
        );
        Ok(())
    }
}

/// Run the sweep every `poll_interval` until `true` is sent on the returned channel
pub fn spawn_sweep(
    sweep: Arc<VerificationSweep>,
    config: SweepConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(
            poll_interval_secs = config.poll_interval.as_secs(),
            batch_size = config.batch_size,
            "Verification sweep started"
        );
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Verification sweep shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(config.poll_interval) => {
                    match sweep.run_once(config.batch_size).await {
                        Ok(stats) if stats.confirmed + stats.failed > 0 => {
                            info!(confirmed = stats.confirmed, failed = stats.failed, "Sweep finalized deposits");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Sweep cycle failed"),
                    }
                }
            }
        }
    });

    (handle, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Chain, DelegatedFamily, Direction, TransactionReceipt};
    use crate::infra::ChainConnection;
    use crate::test_utils::mocks::{
        MockChainClient, MockConnector, MockDatabaseClient, MockDelegatedService,
    };
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn pending(chain: Chain, tx_hash: &str) -> TransactionRecord {
        TransactionRecord {
            id: Uuid::new_v4(),
            wallet_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            chain,
            direction: Direction::Deposit,
            currency: "USDT".to_string(),
            amount: Decimal::from(100),
            from_address: None,
            to_address: "0xabc".to_string(),
            tx_hash: tx_hash.to_string(),
            block_number: Some(100),
            confirmations: 1,
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct Fixture {
        db: Arc<MockDatabaseClient>,
        client: Arc<MockChainClient>,
        hub: Arc<NotificationHub>,
        sweep: VerificationSweep,
    }

    fn fixture(delegated: DelegatedServices) -> Fixture {
        let db = Arc::new(MockDatabaseClient::new());
        let client = Arc::new(MockChainClient::new());
        let connections = Arc::new(ConnectionManager::new(Arc::new(MockConnector::unreachable())));
        connections.insert(ChainConnection {
            chain: Chain::Ethereum,
            client: client.clone(),
            subscriber: None,
        });
        let hub = Arc::new(NotificationHub::new());
        let sweep = VerificationSweep::new(
            db.clone(),
            connections,
            delegated,
            Arc::clone(&hub),
            FinalityConfig::default().with(Chain::Ethereum, 12),
        );
        Fixture {
            db,
            client,
            hub,
            sweep,
        }
    }

    #[tokio::test]
    async fn test_promotes_once_threshold_is_met() {
        let fx = fixture(DelegatedServices::new());
        let (_, mut rx) = fx.hub.connect("user-1");
        let shallow = pending(Chain::Ethereum, "0xshallow");
        let deep = pending(Chain::Ethereum, "0xdeep");
        fx.db.insert_transaction(&shallow).await.unwrap();
        fx.db.insert_transaction(&deep).await.unwrap();

        fx.client.set_head(120);
        fx.client.set_receipt(TransactionReceipt {
            transaction_hash: "0xshallow".to_string(),
            block_number: Some(115),
            success: true,
        });
        fx.client.set_receipt(TransactionReceipt {
            transaction_hash: "0xdeep".to_string(),
            block_number: Some(100),
            success: true,
        });

        let stats = fx.sweep.run_once(10).await.unwrap();
        assert_eq!(stats.checked, 2);
        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.progressed, 1);

        let deep = fx.db.get_transaction(Chain::Ethereum, "0xdeep").await.unwrap().unwrap();
        assert_eq!(deep.status, TransactionStatus::Confirmed);
        assert_eq!(deep.confirmations, 21);
        let shallow = fx.db.get_transaction(Chain::Ethereum, "0xshallow").await.unwrap().unwrap();
        assert_eq!(shallow.status, TransactionStatus::Pending);
        assert_eq!(shallow.confirmations, 6);

        match rx.recv().await {
            Some(SessionEvent::Deposit(n)) => {
                assert_eq!(n.tx_hash, "0xdeep");
                assert_eq!(n.status, TransactionStatus::Confirmed);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reverted_receipt_marks_failed() {
        let fx = fixture(DelegatedServices::new());
        fx.db
            .insert_transaction(&pending(Chain::Ethereum, "0xreverted"))
            .await
            .unwrap();
        fx.client.set_head(120);
        fx.client.set_receipt(TransactionReceipt {
            transaction_hash: "0xreverted".to_string(),
            block_number: Some(110),
            success: false,
        });

        let stats = fx.sweep.run_once(10).await.unwrap();
        assert_eq!(stats.failed, 1);
        let record = fx.db.get_transaction(Chain::Ethereum, "0xreverted").await.unwrap().unwrap();
        assert_eq!(record.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_provider_error_does_not_abort_batch() {
        let fx = fixture(DelegatedServices::new());
        fx.db.insert_transaction(&pending(Chain::Polygon, "0xunreachable")).await.unwrap();
        fx.db.insert_transaction(&pending(Chain::Ethereum, "0xok")).await.unwrap();
        fx.client.set_head(200);
        fx.client.set_receipt(TransactionReceipt {
            transaction_hash: "0xok".to_string(),
            block_number: Some(100),
            success: true,
        });

        let stats = fx.sweep.run_once(10).await.unwrap();
        assert_eq!(stats.checked, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.confirmed, 1);
    }

    #[tokio::test]
    async fn test_delegated_confirmations() {
        let tron = Arc::new(MockDelegatedService::new(DelegatedFamily::Tron));
        tron.set_confirmations("tron-tx", 25);
        let fx = fixture(DelegatedServices::new().with(tron));
        fx.db.insert_transaction(&pending(Chain::Tron, "tron-tx")).await.unwrap();
        fx.db.insert_transaction(&pending(Chain::Solana, "sol-tx")).await.unwrap();

        let stats = fx.sweep.run_once(10).await.unwrap();
        assert_eq!(stats.confirmed, 1);
        // No Solana service configured
        assert_eq!(stats.skipped, 1);
        let record = fx.db.get_transaction(Chain::Tron, "tron-tx").await.unwrap().unwrap();
        assert_eq!(record.status, TransactionStatus::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweep_stops_on_signal() {
        let fx = fixture(DelegatedServices::new());
        let (handle, shutdown_tx) = spawn_sweep(Arc::new(fx.sweep), SweepConfig::default());
        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
