//! HTTP clients for the externally owned chain watchers.
//!
//! UTXO chains, Tron, Solana and TON are watched by singleton services that
//! multiplex addresses themselves. This module only registers addresses with
//! them and asks for confirmation depth; deposits come back through the
//! webhook endpoint.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::domain::{
    AppError, Chain, DelegatedChainService, DelegatedFamily, ExternalServiceError, TokenMetadata,
    Wallet,
};

/// Body of `POST {base}/monitor`
#[derive(Debug, Serialize)]
struct MonitorRequest<'a> {
    wallet_id: String,
    user_id: &'a str,
    currency: &'a str,
    chain: Option<Chain>,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a TokenMetadata>,
}

/// Body of `GET {base}/transactions/{chain}/{hash}`
#[derive(Debug, Deserialize)]
struct ConfirmationsResponse {
    confirmations: u64,
}

/// Client for one delegated family's watcher
#[derive(Debug, Clone)]
pub struct HttpDelegatedService {
    family: DelegatedFamily,
    http_client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpDelegatedService {
    pub fn new(
        family: DelegatedFamily,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            family,
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key.expose_secret())),
            None => request,
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> AppError {
        error!(family = self.family.as_str(), error = %err, "Delegated service request failed");
        if err.is_timeout() {
            AppError::ExternalService(ExternalServiceError::Timeout(err.to_string()))
        } else {
            AppError::ExternalService(ExternalServiceError::Unavailable(err.to_string()))
        }
    }

    async fn map_status(&self, response: reqwest::Response) -> Result<reqwest::Response, AppError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!(family = self.family.as_str(), status = %status, body = %body, "Delegated service returned error");
        Err(AppError::ExternalService(match status {
            StatusCode::TOO_MANY_REQUESTS => ExternalServiceError::RateLimited(body),
            s if s.is_server_error() => {
                ExternalServiceError::Unavailable(format!("{}: {}", s, body))
            }
            s => ExternalServiceError::InvalidResponse(format!("{}: {}", s, body)),
        }))
    }
}

#[async_trait]
impl DelegatedChainService for HttpDelegatedService {
    fn family(&self) -> DelegatedFamily {
        self.family
    }

    #[instrument(skip(self, wallet, token), fields(family = self.family.as_str(), wallet_id = %wallet.id))]
    async fn monitor(
        &self,
        wallet: &Wallet,
        address: &str,
        token: Option<&TokenMetadata>,
    ) -> Result<(), AppError> {
        let chain = wallet
            .addresses
            .iter()
            .find(|(chain, _)| wallet.owns_address(**chain, address))
            .map(|(chain, _)| *chain);

        let body = MonitorRequest {
            wallet_id: wallet.id.to_string(),
            user_id: &wallet.user_id,
            currency: &wallet.currency,
            chain,
            address,
            token,
        };

        let request = self
            .http_client
            .post(format!("{}/monitor", self.base_url))
            .json(&body);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.map_status(response).await?;

        info!(address = %address, "Address registered with delegated watcher");
        Ok(())
    }

    #[instrument(skip(self), fields(family = self.family.as_str()))]
    async fn confirmations(&self, chain: Chain, tx_hash: &str) -> Result<Option<u64>, AppError> {
        let request = self
            .http_client
            .get(format!("{}/transactions/{}/{}", self.base_url, chain, tx_hash));
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::NOT_IMPLEMENTED => {
                return Err(AppError::NotSupported(format!(
                    "{} watcher does not report confirmations",
                    self.family.as_str()
                )));
            }
            _ => {}
        }

        let parsed: ConfirmationsResponse = self
            .map_status(response)
            .await?
            .json()
            .await
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::InvalidResponse(e.to_string()))
            })?;
        debug!(tx_hash = %tx_hash, confirmations = parsed.confirmations, "Delegated confirmations");
        Ok(Some(parsed.confirmations))
    }
}

/// One service per delegated family, as configured
#[derive(Clone, Default)]
pub struct DelegatedServices {
    services: HashMap<DelegatedFamily, Arc<dyn DelegatedChainService>>,
}

impl DelegatedServices {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, service: Arc<dyn DelegatedChainService>) -> Self {
        self.services.insert(service.family(), service);
        self
    }

    pub fn get(&self, family: DelegatedFamily) -> Option<Arc<dyn DelegatedChainService>> {
        self.services.get(&family).cloned()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Build clients from `UTXO_SERVICE_URL`, `TRON_SERVICE_URL`,
    /// `SOLANA_SERVICE_URL` and `TON_SERVICE_URL`. An optional
    /// `DELEGATED_SERVICE_API_KEY` is sent as a bearer token.
    pub fn from_env() -> Result<Self, AppError> {
        let api_key = env::var("DELEGATED_SERVICE_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);

        let mut services = Self::new();
        for family in [
            DelegatedFamily::Utxo,
            DelegatedFamily::Tron,
            DelegatedFamily::Solana,
            DelegatedFamily::Ton,
        ] {
            let var = format!("{}_SERVICE_URL", family.as_str().to_ascii_uppercase());
            if let Some(url) = env::var(&var).ok().filter(|u| !u.is_empty()) {
                let service = HttpDelegatedService::new(family, url, api_key.clone())?;
                services = services.with(Arc::new(service));
            }
        }
        Ok(services)
    }
}

impl std::fmt::Debug for DelegatedServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.services.keys()).finish()
    }
}
