//! PostgreSQL database client implementation.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    AppError, Chain, ChainFamily, DatabaseClient, DatabaseError, PaginatedResponse,
    TransactionRecord, TransactionStatus, UtxoEntry, ValidationError, Wallet,
};

const TRANSACTION_COLUMNS: &str = r#"
    id, wallet_id, user_id, chain, direction, currency, amount, from_address,
    to_address, tx_hash, block_number, confirmations, status, created_at, updated_at
"#;

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PostgresConfig {
    /// Pool sizing from `DATABASE_MAX_CONNECTIONS` / `DATABASE_MIN_CONNECTIONS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |name: &str| env::var(name).ok().and_then(|v| v.parse::<u32>().ok());
        Self {
            max_connections: read("DATABASE_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            min_connections: read("DATABASE_MIN_CONNECTIONS").unwrap_or(defaults.min_connections),
            ..defaults
        }
    }
}

/// PostgreSQL database client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<TransactionRecord, AppError> {
        let chain: String = row.get("chain");
        let direction: String = row.get("direction");
        let status: String = row.get("status");

        Ok(TransactionRecord {
            id: row.get("id"),
            wallet_id: row.get("wallet_id"),
            user_id: row.get("user_id"),
            chain: chain
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            direction: direction
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            currency: row.get("currency"),
            amount: row.get("amount"),
            from_address: row.get("from_address"),
            to_address: row.get("to_address"),
            tx_hash: row.get("tx_hash"),
            block_number: row.get("block_number"),
            confirmations: row.get("confirmations"),
            status: status.parse().unwrap_or(TransactionStatus::Pending),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn load_wallet(&self, row: &sqlx::postgres::PgRow) -> Result<Wallet, AppError> {
        let id: Uuid = row.get("id");
        let family: String = row.get("family");

        let address_rows =
            sqlx::query("SELECT chain, address FROM wallet_addresses WHERE wallet_id = $1")
                .bind(id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        let mut addresses = HashMap::new();
        for address_row in address_rows {
            let chain: String = address_row.get("chain");
            // Rows for chains this build does not know about are ignored
            if let Ok(chain) = chain.parse::<Chain>() {
                addresses.insert(chain, address_row.get("address"));
            }
        }

        Ok(Wallet {
            id,
            user_id: row.get("user_id"),
            currency: row.get("currency"),
            family: family
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            addresses,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_wallet(
        &self,
        user_id: &str,
        currency: &str,
        family: ChainFamily,
    ) -> Result<Option<Wallet>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, currency, family, created_at
            FROM wallets
            WHERE user_id = $1 AND UPPER(currency) = UPPER($2) AND family = $3
            "#,
        )
        .bind(user_id)
        .bind(currency)
        .bind(family.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match row {
            Some(row) => Ok(Some(self.load_wallet(&row).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn find_wallet_by_address(
        &self,
        chain: Chain,
        address: &str,
        currency: &str,
    ) -> Result<Option<Wallet>, AppError> {
        let case_insensitive = chain.family() == ChainFamily::Evm;
        let row = sqlx::query(
            r#"
            SELECT w.id, w.user_id, w.currency, w.family, w.created_at
            FROM wallets w
            JOIN wallet_addresses a ON a.wallet_id = w.id
            WHERE a.chain = $1
              AND (a.address = $2 OR ($3 AND LOWER(a.address) = LOWER($2)))
              AND UPPER(w.currency) = UPPER($4)
            LIMIT 1
            "#,
        )
        .bind(chain.as_str())
        .bind(address)
        .bind(case_insensitive)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match row {
            Some(row) => Ok(Some(self.load_wallet(&row).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, record), fields(chain = %record.chain, tx_hash = %record.tx_hash))]
    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<bool, AppError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO transactions (
                id, wallet_id, user_id, chain, direction, currency, amount, from_address,
                to_address, tx_hash, block_number, confirmations, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (chain, tx_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(record.wallet_id)
        .bind(&record.user_id)
        .bind(record.chain.as_str())
        .bind(record.direction.as_str())
        .bind(&record.currency)
        .bind(record.amount)
        .bind(&record.from_address)
        .bind(&record.to_address)
        .bind(&record.tx_hash)
        .bind(record.block_number)
        .bind(record.confirmations)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        if inserted.is_none() {
            debug!("Transaction already recorded");
        }
        Ok(inserted.is_some())
    }

    #[instrument(skip(self))]
    async fn get_transaction(
        &self,
        chain: Chain,
        tx_hash: &str,
    ) -> Result<Option<TransactionRecord>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE chain = $1 AND tx_hash = $2",
            TRANSACTION_COLUMNS
        ))
        .bind(chain.as_str())
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    #[instrument(skip(self))]
    async fn list_wallet_transactions(
        &self,
        wallet_id: Uuid,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<TransactionRecord>, AppError> {
        // Clamp limit to valid range
        let limit = limit.clamp(1, 100);
        // Fetch one extra to determine if there are more items
        let fetch_limit = limit + 1;

        let rows = match cursor {
            Some(cursor) => {
                let invalid_cursor = || {
                    AppError::Validation(ValidationError::InvalidField {
                        field: "cursor".to_string(),
                        message: "Invalid cursor".to_string(),
                    })
                };
                let cursor_id: Uuid = cursor.parse().map_err(|_| invalid_cursor())?;

                let cursor_row = sqlx::query(
                    "SELECT created_at FROM transactions WHERE id = $1 AND wallet_id = $2",
                )
                .bind(cursor_id)
                .bind(wallet_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

                let cursor_created_at: DateTime<Utc> = match cursor_row {
                    Some(row) => row.get("created_at"),
                    None => return Err(invalid_cursor()),
                };

                sqlx::query(&format!(
                    r#"
                    SELECT {}
                    FROM transactions
                    WHERE wallet_id = $1 AND (created_at, id) < ($2, $3)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $4
                    "#,
                    TRANSACTION_COLUMNS
                ))
                .bind(wallet_id)
                .bind(cursor_created_at)
                .bind(cursor_id)
                .bind(fetch_limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            }
            None => sqlx::query(&format!(
                r#"
                SELECT {}
                FROM transactions
                WHERE wallet_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
                "#,
                TRANSACTION_COLUMNS
            ))
            .bind(wallet_id)
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?,
        };

        let has_more = rows.len() > limit as usize;
        let records: Vec<TransactionRecord> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if has_more {
            records.last().map(|r| r.id.to_string())
        } else {
            None
        };

        Ok(PaginatedResponse::new(records, next_cursor, has_more))
    }

    #[instrument(skip(self))]
    async fn get_unfinalized_transactions(
        &self,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE status = 'pending'
            ORDER BY updated_at ASC
            LIMIT $1
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    #[instrument(skip(self))]
    async fn update_transaction_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        confirmations: i64,
        block_number: Option<i64>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET status = $1,
                confirmations = $2,
                block_number = COALESCE($3, block_number),
                updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(status.as_str())
        .bind(confirmations)
        .bind(block_number)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(())
    }

    #[instrument(skip(self, entry), fields(chain = %entry.chain, tx_hash = %entry.tx_hash, output_index = entry.output_index))]
    async fn upsert_utxo(&self, entry: &UtxoEntry) -> Result<(), AppError> {
        let output_index = i32::try_from(entry.output_index).map_err(|_| {
            AppError::Validation(ValidationError::InvalidField {
                field: "output_index".to_string(),
                message: format!("{} does not fit the schema", entry.output_index),
            })
        })?;

        sqlx::query(
            r#"
            INSERT INTO utxos (chain, tx_hash, output_index, wallet_id, address, amount, spent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (chain, tx_hash, output_index) DO UPDATE SET
                wallet_id = EXCLUDED.wallet_id,
                address = EXCLUDED.address,
                amount = EXCLUDED.amount,
                updated_at = NOW()
            "#,
        )
        .bind(entry.chain.as_str())
        .bind(&entry.tx_hash)
        .bind(output_index)
        .bind(entry.wallet_id)
        .bind(&entry.address)
        .bind(entry.amount)
        .bind(entry.spent)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        Ok(())
    }
}
