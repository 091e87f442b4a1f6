//! Token metadata hot cache.
//!
//! Token contracts and decimals are loaded once from the `tokens` table into
//! a concurrent map keyed by `(chain, CURRENCY)`. Monitors read from memory;
//! nothing here writes to the database.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::domain::{AppError, Chain, DatabaseError, TokenMetadata, TokenMetadataProvider};

/// Thread-safe registry of token metadata
#[derive(Debug, Default)]
pub struct TokenRegistry {
    store: DashMap<(Chain, String), TokenMetadata>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated from a fixed list
    pub fn from_entries(entries: impl IntoIterator<Item = TokenMetadata>) -> Self {
        let registry = Self::new();
        for entry in entries {
            registry.insert(entry);
        }
        registry
    }

    /// Load every row of the `tokens` table. Rows naming an unknown chain are
    /// skipped with a warning.
    pub async fn load(pool: &PgPool) -> Result<Self, AppError> {
        let rows = sqlx::query(
            "SELECT chain, currency, contract_address, decimals FROM tokens ORDER BY chain, currency",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        let registry = Self::new();
        for row in rows {
            let chain_name: String = row
                .try_get("chain")
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
            let Ok(chain) = chain_name.parse::<Chain>() else {
                warn!(chain = %chain_name, "Skipping token for unknown chain");
                continue;
            };
            let decimals: i16 = row
                .try_get("decimals")
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
            let Ok(decimals) = u8::try_from(decimals) else {
                warn!(chain = %chain, decimals, "Skipping token with invalid decimals");
                continue;
            };

            registry.insert(TokenMetadata {
                chain,
                currency: row
                    .try_get("currency")
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?,
                contract_address: row
                    .try_get("contract_address")
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?,
                decimals,
            });
        }

        info!(count = registry.len(), "TokenRegistry initialized from database");
        Ok(registry)
    }

    pub fn insert(&self, token: TokenMetadata) {
        let key = (token.chain, token.currency.to_ascii_uppercase());
        self.store.insert(key, token);
    }

    #[must_use]
    pub fn get(&self, chain: Chain, currency: &str) -> Option<TokenMetadata> {
        self.store
            .get(&(chain, currency.to_ascii_uppercase()))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl TokenMetadataProvider for TokenRegistry {
    async fn token(&self, chain: Chain, currency: &str) -> Result<Option<TokenMetadata>, AppError> {
        Ok(self.get(chain, currency))
    }
}
