//! Watches handed to an external per-family chain service.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::domain::{
    AppError, DelegatedChainService, DelegatedFamily, MonitorKind, MonitorState, Wallet,
    WatchTarget,
};

use super::{ChainMonitor, MonitorContext, MonitorCore};

/// Registers the address with the family's service, which multiplexes watched
/// addresses and reports deposits back through the webhook endpoint.
///
/// Nothing runs locally. `stop()` only ends this session's view of the watch;
/// the service keeps its registration, which is harmless since every deposit
/// it reports is deduplicated on record.
pub struct DelegatedMonitor {
    core: Arc<MonitorCore>,
    wallet: Wallet,
    service: Arc<dyn DelegatedChainService>,
}

impl DelegatedMonitor {
    pub fn new(
        target: WatchTarget,
        wallet: Wallet,
        service: Arc<dyn DelegatedChainService>,
        ctx: &MonitorContext,
    ) -> Self {
        let kind = MonitorKind::Delegated(service.family());
        Self {
            core: MonitorCore::new(target, kind, Arc::clone(&ctx.hub)),
            wallet,
            service,
        }
    }

    pub fn family(&self) -> DelegatedFamily {
        self.service.family()
    }

    async fn launch(&self) -> Result<(), AppError> {
        let target = self.core.target();
        self.service
            .monitor(&self.wallet, &target.address, target.token.as_ref())
            .await?;
        info!(
            chain = %target.chain,
            address = %target.address,
            service = self.service.family().as_str(),
            "Watch delegated"
        );
        self.core.set_state(MonitorState::Watching);
        Ok(())
    }
}

#[async_trait]
impl ChainMonitor for DelegatedMonitor {
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
