//! Attach resolution and monitor variant dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};
use validator::Validate;

use crate::domain::{
    AppError, AttachRequest, ConfigError, ContractKind, DatabaseClient, MonitorKind,
    TokenMetadataProvider, ValidationError, Wallet, WatchTarget,
};
use crate::infra::{ConnectionManager, DelegatedServices};

use super::monitor::{
    ChainMonitor, DelegatedMonitor, EvmNativeMonitor, EvmTokenPollMonitor, EvmTokenPushMonitor,
    MonitorContext,
};

/// Builds a ready-to-start monitor for an attach request
#[async_trait]
pub trait MonitorBuilder: Send + Sync {
    async fn build(
        &self,
        user_id: &str,
        request: &AttachRequest,
    ) -> Result<Arc<dyn ChainMonitor>, AppError>;
}

/// Resolves attach requests against wallets and token metadata, then picks
/// the monitor variant for the chain family and contract kind.
pub struct MonitorFactory {
    db_client: Arc<dyn DatabaseClient>,
    tokens: Arc<dyn TokenMetadataProvider>,
    connections: Arc<ConnectionManager>,
    delegated: DelegatedServices,
    ctx: MonitorContext,
}

impl MonitorFactory {
    pub fn new(
        db_client: Arc<dyn DatabaseClient>,
        tokens: Arc<dyn TokenMetadataProvider>,
        connections: Arc<ConnectionManager>,
        delegated: DelegatedServices,
        ctx: MonitorContext,
    ) -> Self {
        Self {
            db_client,
            tokens,
            connections,
            delegated,
            ctx,
        }
    }

    /// Turn a client request into a fully resolved watch target.
    /// Every failure here is terminal for the attach.
    pub async fn resolve(
        &self,
        user_id: &str,
        request: &AttachRequest,
    ) -> Result<(WatchTarget, Wallet), AppError> {
        request.validate().map_err(|e| {
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        let chain = request.chain;
        let currency = request.currency.trim().to_ascii_uppercase();
        let address = chain.normalize_address(&request.address);

        let wallet = self
            .db_client
            .find_wallet(user_id, &currency, chain.family())
            .await?
            .ok_or_else(|| {
                AppError::Config(ConfigError::WalletNotFound {
                    user_id: user_id.to_string(),
                    currency: currency.clone(),
                    chain: chain.to_string(),
                })
            })?;

        if !wallet.owns_address(chain, &address) {
            return Err(AppError::Config(ConfigError::AddressNotFound {
                address,
                chain: chain.to_string(),
            }));
        }

        let contract = chain.contract_kind(&currency);
        let token = match contract {
            ContractKind::Native => None,
            ContractKind::Token => Some(self.tokens.token(chain, &currency).await?.ok_or_else(
                || {
                    AppError::Config(ConfigError::TokenNotFound {
                        currency: currency.clone(),
                        chain: chain.to_string(),
                    })
                },
            )?),
        };

        let target = WatchTarget {
            user_id: user_id.to_string(),
            wallet_id: wallet.id,
            chain,
            currency,
            address,
            contract,
            token,
        };
        Ok((target, wallet))
    }
}

#[async_trait]
impl MonitorBuilder for MonitorFactory {
    #[instrument(skip(self, request), fields(chain = %request.chain, currency = %request.currency))]
    async fn build(
        &self,
        user_id: &str,
        request: &AttachRequest,
    ) -> Result<Arc<dyn ChainMonitor>, AppError> {
        let (target, wallet) = self.resolve(user_id, request).await?;
        let family = target.chain.family();

        // Only in-process families hold a chain connection
        let connection = match family.delegated() {
            None => Some(self.connections.acquire(target.chain).await?),
            Some(_) => None,
        };
        let push_capable = connection.as_ref().is_some_and(|c| c.is_push_capable());
        let kind = MonitorKind::select(family, target.contract, push_capable);
        debug!(monitor = %kind, address = %target.address, "Selected monitor");

        let ctx = self.ctx.clone();
        let monitor: Arc<dyn ChainMonitor> = match (kind, connection) {
            (MonitorKind::EvmNative, Some(connection)) => {
                Arc::new(EvmNativeMonitor::new(target, connection, ctx))
            }
            (MonitorKind::EvmTokenPush, Some(connection)) => {
                Arc::new(EvmTokenPushMonitor::new(target, connection, ctx))
            }
            (MonitorKind::EvmTokenPoll, Some(connection)) => {
                Arc::new(EvmTokenPollMonitor::new(target, connection, ctx))
            }
            (MonitorKind::Delegated(delegated), _) => {
                let service = self.delegated.get(delegated).ok_or_else(|| {
                    AppError::Config(ConfigError::MissingEndpoint(format!(
                        "{} service",
                        delegated.as_str()
                    )))
                })?;
                Arc::new(DelegatedMonitor::new(target, wallet, service, &ctx))
            }
            (kind, None) => {
                return Err(AppError::Internal(format!(
                    "{} monitor selected without a chain connection",
                    kind
                )));
            }
        };
        Ok(monitor)
    }
}
