//! Per-chain endpoint and finality configuration.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use secrecy::SecretString;

use crate::domain::{Chain, ChainFamily};

/// Network endpoints and finality settings for one chain
#[derive(Debug, Clone)]
pub struct ChainEndpoints {
    pub chain: Chain,
    /// JSON-RPC over HTTP (pull)
    pub rpc_url: String,
    /// JSON-RPC over WebSocket (push); chains without one are poll-only
    pub ws_url: Option<String>,
    /// Etherscan-compatible explorer API for address history
    pub explorer_url: Option<String>,
    pub explorer_api_key: Option<SecretString>,
    pub request_timeout: Duration,
}

impl ChainEndpoints {
    #[must_use]
    pub fn new(chain: Chain, rpc_url: impl Into<String>) -> Self {
        Self {
            chain,
            rpc_url: rpc_url.into(),
            ws_url: None,
            explorer_url: None,
            explorer_api_key: None,
            request_timeout: Duration::from_secs(15),
        }
    }

    #[must_use]
    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    #[must_use]
    pub fn with_explorer(mut self, url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        self.explorer_url = Some(url.into());
        self.explorer_api_key = api_key;
        self
    }

    /// Load endpoints for one EVM chain, e.g. `POLYGON_RPC_URL`, `POLYGON_WS_URL`.
    /// Returns `None` when the chain has no RPC URL configured.
    pub fn from_env(chain: Chain) -> Option<Self> {
        let prefix = chain.env_prefix();
        let var = |suffix: &str| {
            env::var(format!("{}_{}", prefix, suffix))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };

        let rpc_url = var("RPC_URL")?;
        let mut endpoints = Self::new(chain, rpc_url);
        endpoints.ws_url = var("WS_URL");
        endpoints.explorer_url = var("EXPLORER_URL");
        endpoints.explorer_api_key = var("EXPLORER_API_KEY").map(SecretString::from);
        if let Some(secs) = var("TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            endpoints.request_timeout = Duration::from_secs(secs);
        }
        Some(endpoints)
    }

    /// Endpoints for every EVM chain with an RPC URL in the environment
    pub fn all_from_env() -> HashMap<Chain, Self> {
        Chain::ALL
            .into_iter()
            .filter(|c| c.family() == ChainFamily::Evm)
            .filter_map(|c| Self::from_env(c).map(|e| (c, e)))
            .collect()
    }
}

/// Confirmation depth at which a transaction counts as final, per chain.
/// Chains without an override use [`Chain::default_confirmations`].
#[derive(Debug, Clone, Default)]
pub struct FinalityConfig {
    overrides: HashMap<Chain, u64>,
}

impl FinalityConfig {
    /// Overrides from `<CHAIN>_CONFIRMATIONS`, e.g. `BITCOIN_CONFIRMATIONS=2`
    pub fn from_env() -> Self {
        let overrides = Chain::ALL
            .into_iter()
            .filter_map(|chain| {
                env::var(format!("{}_CONFIRMATIONS", chain.env_prefix()))
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(|n| (chain, n))
            })
            .collect();
        Self { overrides }
    }

    #[must_use]
    pub fn with(mut self, chain: Chain, confirmations: u64) -> Self {
        self.overrides.insert(chain, confirmations);
        self
    }

    pub fn required(&self, chain: Chain) -> u64 {
        self.overrides
            .get(&chain)
            .copied()
            .unwrap_or_else(|| chain.default_confirmations())
            .max(1)
    }
}
