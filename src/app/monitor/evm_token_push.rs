//! Token deposits delivered by a Transfer-log subscription.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::OptionFuture;
use tokio::sync::watch;
use tokio::time::{Sleep, sleep};
use tracing::{debug, info, warn};

use crate::app::recorder::DepositOwner;
use crate::domain::{
    AppError, ConfigError, LogEntry, LogSubscription, MonitorKind, MonitorState,
    ObservedTransfer, RecordOutcome, TokenMetadata, WatchTarget,
};
use crate::infra::ChainConnection;
use crate::infra::blockchain::{decode_transfer, transfer_filter};

use super::{ChainMonitor, MonitorConfig, MonitorContext, MonitorCore, confirmations_at};

/// Subscribes to Transfer logs of the token contract whose recipient topic is
/// the watched address.
///
/// After the first accepted deposit the listener stays up for
/// `token_listener_grace` so that a burst of transfers is still caught, then
/// unsubscribes. Transport hiccups are absorbed by the connection; only the
/// subscription stream ending is fatal. Transfers that fail to record are
/// queued and retried with backoff while the listener runs.
pub struct EvmTokenPushMonitor {
    core: Arc<MonitorCore>,
    connection: Arc<ChainConnection>,
    ctx: MonitorContext,
}

impl EvmTokenPushMonitor {
    pub fn new(target: WatchTarget, connection: Arc<ChainConnection>, ctx: MonitorContext) -> Self {
        Self {
            core: MonitorCore::new(target, MonitorKind::EvmTokenPush, Arc::clone(&ctx.hub)),
            connection,
            ctx,
        }
    }

    async fn launch(&self) -> Result<(), AppError> {
        let target = self.core.target();

        let token = target.token.clone().ok_or_else(|| {
            AppError::Config(ConfigError::TokenNotFound {
                currency: target.currency.clone(),
                chain: target.chain.to_string(),
            })
        })?;
        let subscriber = self.connection.subscriber.clone().ok_or_else(|| {
            AppError::Config(ConfigError::MissingEndpoint(format!(
                "{} has no push endpoint",
                target.chain
            )))
        })?;

        let filter = transfer_filter(&token.contract_address, &target.address);
        let subscription = subscriber.subscribe_logs(filter).await?;
        info!(
            chain = %target.chain,
            address = %target.address,
            token = %token.contract_address,
            subscription = %subscription.id(),
            "Subscribed to token transfers"
        );

        self.core.set_state(MonitorState::Watching);
        self.core.spawn(run(
            Arc::clone(&self.core),
            Arc::clone(&self.connection),
            self.ctx.clone(),
            token,
            subscription,
        ));
        Ok(())
    }
}

/// Transfer carried by `log` if it pays the watched address
async fn observe(
    core: &MonitorCore,
    connection: &ChainConnection,
    token: &TokenMetadata,
    log: LogEntry,
) -> Option<ObservedTransfer> {
    let target = core.target();
    if log.removed {
        debug!(tx_hash = %log.transaction_hash, "Ignoring log removed by reorg");
        return None;
    }
    let event = match decode_transfer(&log) {
        Ok(event) => event,
        Err(e) => {
            warn!(tx_hash = %log.transaction_hash, error = %e, "Undecodable Transfer log");
            return None;
        }
    };
    if event.to != target.address {
        return None;
    }

    // Full context is best effort; the log alone is enough to credit
    let (block_number, timestamp) = match connection.client.get_transaction(&event.tx_hash).await {
        Ok(Some(tx)) => (tx.block_number.or(event.block_number), tx.timestamp),
        Ok(None) => (event.block_number, None),
        Err(e) => {
            debug!(tx_hash = %event.tx_hash, error = %e, "Transaction lookup failed");
            (event.block_number, None)
        }
    };

    Some(ObservedTransfer {
        chain: target.chain,
        tx_hash: event.tx_hash.clone(),
        from_address: Some(event.from),
        to_address: event.to,
        value: event.value,
        decimals: token.decimals,
        block_number,
        confirmations: confirmations_at(connection.client.as_ref(), block_number).await,
        timestamp,
        outputs: Vec::new(),
    })
}

/// Delay before the next attempt at transfers whose recording failed
fn retry_delay(config: &MonitorConfig, attempts: u32) -> Duration {
    config
        .token_poll_interval
        .saturating_mul(2u32.saturating_pow(attempts.min(config.max_backoff_attempts)))
}

/// Detection state owned by the listener task
struct Listener {
    core: Arc<MonitorCore>,
    ctx: MonitorContext,
    expiry: Option<Pin<Box<Sleep>>>,
    /// Transfers whose recording failed, oldest first
    retries: VecDeque<ObservedTransfer>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    retry_attempts: u32,
}

impl Listener {
    /// Record `transfer`; `false` means it failed and should be retried
    async fn record(&mut self, transfer: &ObservedTransfer) -> bool {
        let owner = DepositOwner::from(self.core.target());
        match self.ctx.recorder.record(&owner, transfer).await {
            Ok(RecordOutcome::Accepted(_)) => {
                if self.expiry.is_none() {
                    info!(
                        address = %self.core.target().address,
                        grace_secs = self.ctx.config.token_listener_grace.as_secs(),
                        "Token deposit found; listener expires after grace window"
                    );
                    self.core.set_state(MonitorState::Found);
                    self.expiry = Some(Box::pin(sleep(self.ctx.config.token_listener_grace)));
                }
                true
            }
            Ok(RecordOutcome::Duplicate) => true,
            // Malformed amounts never succeed; retrying cannot help
            Err(AppError::Validation(e)) => {
                warn!(tx_hash = %transfer.tx_hash, error = %e, "Rejected token deposit");
                true
            }
            Err(e) => {
                warn!(tx_hash = %transfer.tx_hash, error = %e, "Recording token deposit failed; will retry");
                false
            }
        }
    }

    fn schedule_retry(&mut self) {
        if self.retry_timer.is_none() {
            let delay = retry_delay(&self.ctx.config, self.retry_attempts);
            self.retry_timer = Some(Box::pin(sleep(delay)));
        }
    }

    /// Retry queued transfers in order, stopping at the first that fails again
    async fn drain_retries(&mut self) {
        while let Some(transfer) = self.retries.pop_front() {
            if self.core.is_done() {
                return;
            }
            if !self.record(&transfer).await {
                self.retries.push_front(transfer);
                self.retry_attempts = self.retry_attempts.saturating_add(1);
                self.schedule_retry();
                return;
            }
        }
        self.retry_attempts = 0;
    }
}

async fn run(
    core: Arc<MonitorCore>,
    connection: Arc<ChainConnection>,
    ctx: MonitorContext,
    token: TokenMetadata,
    mut subscription: LogSubscription,
) {
    let mut listener = Listener {
        core: Arc::clone(&core),
        ctx,
        expiry: None,
        retries: VecDeque::new(),
        retry_timer: None,
        retry_attempts: 0,
    };
    let mut grace_elapsed = false;

    loop {
        tokio::select! {
            log = subscription.recv() => {
                let Some(log) = log else {
                    core.fail("log subscription closed");
                    return;
                };
                if core.is_done() {
                    return;
                }
                let Some(transfer) = observe(&core, &connection, &token, log).await else {
                    continue;
                };
                if core.is_done() {
                    return;
                }
                if !listener.record(&transfer).await {
                    listener.retries.push_back(transfer);
                    listener.schedule_retry();
                }
            }
            Some(()) = OptionFuture::from(listener.retry_timer.as_mut()) => {
                listener.retry_timer = None;
                listener.drain_retries().await;
                if grace_elapsed && listener.retries.is_empty() {
                    core.finish(MonitorState::Found);
                    return;
                }
            }
            Some(()) = OptionFuture::from(listener.expiry.as_mut()) => {
                listener.expiry = None;
                if !listener.retries.is_empty() {
                    info!(
                        address = %core.target().address,
                        queued = listener.retries.len(),
                        "Listener grace window elapsed; finishing queued retries first"
                    );
                    grace_elapsed = true;
                    continue;
                }
                info!(address = %core.target().address, "Listener grace window elapsed");
                core.finish(MonitorState::Found);
                // The subscription handle drops here, which unsubscribes
                return;
            }
        }
    }
}

#[async_trait]
impl ChainMonitor for EvmTokenPushMonitor {
    fn kind(&self) -> MonitorKind {
        self.core.kind()
    }

    fn target(&self) -> &WatchTarget {
        self.core.target()
    }

    fn state(&self) -> MonitorState {
        self.core.state()
    }

    fn subscribe_state(&self) -> watch::Receiver<MonitorState> {
        self.core.subscribe_state()
    }

    async fn start(&self) -> Result<(), AppError> {
        self.core.begin()?;
        self.launch()
            .await
            .inspect_err(|_| self.core.finish(MonitorState::Failed))
    }

    fn stop(&self) {
        self.core.stop();
    }

    fn is_live(&self) -> bool {
        self.core.is_live()
    }
}
