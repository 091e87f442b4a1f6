//! Native-asset deposits, found by polling address history.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::app::recorder::DepositOwner;
use crate::domain::{
    AppError, ChainTransaction, MonitorKind, MonitorState, ObservedTransfer, RecordOutcome,
    WatchTarget,
};
use crate::infra::ChainConnection;

use super::{ChainMonitor, MonitorContext, MonitorCore, confirmations_at};

/// Polls the explorer history of the watched address on a fixed interval.
/// The first successful incoming transfer made after the watch began is
/// recorded, and the watch then ends.
pub struct EvmNativeMonitor {
    core: Arc<MonitorCore>,
    connection: Arc<ChainConnection>,
    ctx: MonitorContext,
}

impl EvmNativeMonitor {
    pub fn new(target: WatchTarget, connection: Arc<ChainConnection>, ctx: MonitorContext) -> Self {
        Self {
            core: MonitorCore::new(target, MonitorKind::EvmNative, Arc::clone(&ctx.hub)),
            connection,
            ctx,
        }
    }
}

/// Whether `tx` is a successful payment to `address` no older than `since`
fn is_candidate(tx: &ChainTransaction, address: &str, since: DateTime<Utc>) -> bool {
    tx.to
        .as_deref()
        .is_some_and(|to| to.eq_ignore_ascii_case(address))
        && tx.timestamp.is_some_and(|t| t >= since)
        && tx.success == Some(true)
}

async fn run(
    core: Arc<MonitorCore>,
    connection: Arc<ChainConnection>,
    ctx: MonitorContext,
    since: DateTime<Utc>,
) {
    let target = core.target().clone();
    let owner = DepositOwner::from(&target);
    let mut seen: HashSet<String> = HashSet::new();
    let mut ticker = tokio::time::interval(ctx.config.native_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if core.is_done() {
            return;
        }

        let history = match connection.client.transaction_history(&target.address).await {
            Ok(history) => history,
            Err(AppError::NotSupported(reason)) => {
                core.fail(format!("address history unavailable: {}", reason));
                return;
            }
            Err(e) => {
                warn!(address = %target.address, error = %e, "History poll failed; retrying next tick");
                continue;
            }
        };

        for tx in history
            .iter()
            .filter(|tx| is_candidate(tx, &target.address, since))
        {
            if !seen.insert(tx.hash.clone()) {
                continue;
            }
            if core.is_done() {
                return;
            }

            let transfer = ObservedTransfer {
                chain: target.chain,
                tx_hash: tx.hash.clone(),
                from_address: Some(tx.from.clone()),
                to_address: target.address.clone(),
                value: tx.value,
                decimals: target.decimals(),
                block_number: tx.block_number,
                confirmations: confirmations_at(connection.client.as_ref(), tx.block_number)
                    .await,
                timestamp: tx.timestamp,
                outputs: Vec::new(),
            };

            match ctx.recorder.record(&owner, &transfer).await {
                Ok(RecordOutcome::Accepted(_)) => {
                    info!(address = %target.address, tx_hash = %tx.hash, "Native deposit found");
                    core.finish(MonitorState::Found);
                    return;
                }
                Ok(RecordOutcome::Duplicate) => {
                    debug!(tx_hash = %tx.hash, "Native transfer already credited");
                }
                Err(e) => {
                    // Retry the same hash next tick
                    seen.remove(&tx.hash);
                    warn!(tx_hash = %tx.hash, error = %e, "Recording native deposit failed");
                }
            }
        }
    }
}

#[async_trait]
impl ChainMonitor for EvmNativeMonitor {
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
        // Explorer timestamps have second precision
        let since = Utc::now().trunc_subsecs(0);
        self.core.set_state(MonitorState::Watching);
        self.core.spawn(run(
            Arc::clone(&self.core),
            Arc::clone(&self.connection),
            self.ctx.clone(),
            since,
        ));
        info!(
            chain = %self.core.target().chain,
            address = %self.core.target().address,
            "Watching native deposits"
        );
        Ok(())
    }

    fn stop(&self) {
        self.core.stop();
    }

    fn is_live(&self) -> bool {
        self.core.is_live()
    }
}
