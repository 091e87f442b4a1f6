//! Token deposits found by polling Transfer logs over bounded block ranges.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::app::recorder::DepositOwner;
use crate::domain::{
    AppError, ConfigError, LogFilter, MonitorKind, MonitorState, ObservedTransfer,
    RecordOutcome, TokenMetadata, WatchTarget,
};
use crate::infra::ChainConnection;
use crate::infra::blockchain::{decode_transfer, transfer_filter};

use super::{ChainMonitor, MonitorContext, MonitorCore};

/// `eth_getLogs` polling for chains without a push endpoint.
///
/// A cursor tracks the last block whose logs were fully recorded. It only
/// moves after a poll in which every step succeeded, so a failed poll is
/// retried over the same range. Consecutive failures back off exponentially
/// from `token_poll_interval`; once they exceed `max_backoff_attempts` the
/// watch is abandoned.
pub struct EvmTokenPollMonitor {
    core: Arc<MonitorCore>,
    connection: Arc<ChainConnection>,
    ctx: MonitorContext,
    last_processed_block: Arc<AtomicU64>,
}

impl EvmTokenPollMonitor {
    pub fn new(target: WatchTarget, connection: Arc<ChainConnection>, ctx: MonitorContext) -> Self {
        Self {
            core: MonitorCore::new(target, MonitorKind::EvmTokenPoll, Arc::clone(&ctx.hub)),
            connection,
            ctx,
            last_processed_block: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Highest block whose logs have been fully processed
    pub fn last_processed_block(&self) -> u64 {
        self.last_processed_block.load(Ordering::SeqCst)
    }

    async fn launch(&self) -> Result<(), AppError> {
        let target = self.core.target();
        let token = target.token.clone().ok_or_else(|| {
            AppError::Config(ConfigError::TokenNotFound {
                currency: target.currency.clone(),
                chain: target.chain.to_string(),
            })
        })?;

        // The current head is included in the first poll
        let head = self.connection.client.block_number().await?;
        self.last_processed_block
            .store(head.saturating_sub(1), Ordering::SeqCst);

        info!(
            chain = %target.chain,
            address = %target.address,
            token = %token.contract_address,
            from_block = head,
            "Polling token transfers"
        );

        self.core.set_state(MonitorState::Watching);
        self.core.spawn(run(
            Arc::clone(&self.core),
            Arc::clone(&self.connection),
            self.ctx.clone(),
            token,
            Arc::clone(&self.last_processed_block),
        ));
        Ok(())
    }
}

/// Delay before the next poll after `attempts` consecutive failures
fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    2u32.checked_pow(attempts)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

struct PollProgress {
    processed_to: u64,
    found: bool,
}

async fn poll_once(
    core: &MonitorCore,
    connection: &ChainConnection,
    ctx: &MonitorContext,
    token: &TokenMetadata,
    filter: &LogFilter,
    cursor: u64,
) -> Result<PollProgress, AppError> {
    let target = core.target();
    let head = connection.client.block_number().await?;
    if head <= cursor {
        return Ok(PollProgress {
            processed_to: cursor,
            found: false,
        });
    }

    let from = cursor + 1;
    let to = head.min(cursor.saturating_add(ctx.config.max_blocks_per_poll));
    let logs = connection
        .client
        .get_logs(&filter.clone().with_range(from, to))
        .await?;
    debug!(from, to, logs = logs.len(), "Polled Transfer logs");

    let owner = DepositOwner::from(target);
    let mut found = false;
    let mut processed_to = to;
    for log in logs {
        if log.removed {
            continue;
        }
        let event = match decode_transfer(&log) {
            Ok(event) => event,
            Err(e) => {
                warn!(tx_hash = %log.transaction_hash, error = %e, "Undecodable Transfer log");
                continue;
            }
        };
        if event.to != target.address {
            continue;
        }
        if core.is_done() {
            break;
        }

        let confirmations = event
            .block_number
            .filter(|b| *b <= head)
            .map_or(0, |b| head - b + 1);
        let transfer = ObservedTransfer {
            chain: target.chain,
            tx_hash: event.tx_hash,
            from_address: Some(event.from),
            to_address: event.to,
            value: event.value,
            decimals: token.decimals,
            block_number: event.block_number,
            confirmations,
            timestamp: None,
            outputs: Vec::new(),
        };

        // A recording failure fails the whole poll so the range is retried
        let block = transfer.block_number;
        if let RecordOutcome::Accepted(_) = ctx.recorder.record(&owner, &transfer).await? {
            found = true;
            if ctx.config.stop_on_first_deposit {
                // Later logs of the same block are unread
                if let Some(block) = block {
                    processed_to = block.saturating_sub(1).clamp(cursor, to);
                }
                break;
            }
        }
    }

    Ok(PollProgress {
        processed_to,
        found,
    })
}

async fn run(
    core: Arc<MonitorCore>,
    connection: Arc<ChainConnection>,
    ctx: MonitorContext,
    token: TokenMetadata,
    cursor: Arc<AtomicU64>,
) {
    let target = core.target().clone();
    let filter = transfer_filter(&token.contract_address, &target.address);
    let max_attempts = ctx.config.max_backoff_attempts;
    let mut attempts: u32 = 0;

    loop {
        tokio::time::sleep(backoff_delay(ctx.config.token_poll_interval, attempts)).await;
        if core.is_done() {
            return;
        }

        let from = cursor.load(Ordering::SeqCst);
        match poll_once(&core, &connection, &ctx, &token, &filter, from).await {
            Ok(progress) => {
                attempts = 0;
                cursor.store(progress.processed_to, Ordering::SeqCst);
                if !progress.found {
                    continue;
                }
                if ctx.config.stop_on_first_deposit {
                    info!(address = %target.address, "Token deposit found; polling stopped");
                    core.finish(MonitorState::Found);
                    return;
                }
                core.set_state(MonitorState::Found);
            }
            Err(e) => {
                attempts += 1;
                if attempts > max_attempts {
                    core.fail(format!(
                        "log polling failed {} times in a row: {}",
                        attempts, e
                    ));
                    return;
                }
                warn!(
                    address = %target.address,
                    cursor = from,
                    attempt = attempts,
                    max_attempts,
                    error = %e,
                    "Log poll failed; backing off"
                );
            }
        }
    }
}

#[async_trait]
impl ChainMonitor for EvmTokenPollMonitor {
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
