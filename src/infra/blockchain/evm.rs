//! EVM JSON-RPC client over HTTP, with Etherscan-compatible address history.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::domain::{
    AppError, BlockchainError, Chain, ChainClient, ChainTransaction, LogEntry, LogFilter,
    TransactionReceipt,
};

use super::config::ChainEndpoints;
use super::erc20::{parse_quantity, parse_quantity_u128, to_quantity};

/// Page size requested from the explorer history endpoint
const HISTORY_PAGE_SIZE: u32 = 50;

/// JSON-RPC error code some providers use for request-rate limits
const RATE_LIMIT_CODE: i64 = -32005;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub(crate) fn into_app_error(self) -> AppError {
        let lower = self.message.to_lowercase();
        if self.code == RATE_LIMIT_CODE || lower.contains("rate limit") || lower.contains("too many")
        {
            AppError::Blockchain(BlockchainError::RateLimited(self.message))
        } else {
            AppError::Blockchain(BlockchainError::Rpc {
                code: self.code,
                message: self.message,
            })
        }
    }
}

/// Log object as returned by `eth_getLogs` and log subscriptions
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    transaction_hash: Option<String>,
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

impl TryFrom<RpcLog> for LogEntry {
    type Error = AppError;

    fn try_from(log: RpcLog) -> Result<Self, Self::Error> {
        Ok(LogEntry {
            address: log.address.to_ascii_lowercase(),
            topics: log.topics,
            data: log.data,
            block_number: log.block_number.as_deref().map(parse_quantity).transpose()?,
            transaction_hash: log.transaction_hash.ok_or_else(|| {
                AppError::Blockchain(BlockchainError::InvalidResponse(
                    "log without transaction hash".to_string(),
                ))
            })?,
            log_index: log.log_index.as_deref().map(parse_quantity).transpose()?,
            removed: log.removed,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: String,
    from: String,
    to: Option<String>,
    value: String,
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlockHeader {
    timestamp: String,
}

/// Etherscan-style `{status, message, result}` envelope
#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerTransaction {
    hash: String,
    from: String,
    to: String,
    value: String,
    block_number: String,
    time_stamp: String,
    is_error: String,
    #[serde(rename = "txreceipt_status", default)]
    receipt_status: String,
}

impl TryFrom<ExplorerTransaction> for ChainTransaction {
    type Error = AppError;

    fn try_from(tx: ExplorerTransaction) -> Result<Self, Self::Error> {
        let invalid = |field: &str, value: &str| {
            AppError::Blockchain(BlockchainError::InvalidResponse(format!(
                "explorer field {} = {}",
                field, value
            )))
        };
        let value = tx
            .value
            .parse::<u128>()
            .map_err(|_| invalid("value", &tx.value))?;
        let block_number = tx
            .block_number
            .parse::<u64>()
            .map_err(|_| invalid("blockNumber", &tx.block_number))?;
        let seconds = tx
            .time_stamp
            .parse::<i64>()
            .map_err(|_| invalid("timeStamp", &tx.time_stamp))?;
        // Pre-Byzantium receipts have an empty status; fall back to isError
        let success = if tx.receipt_status.is_empty() {
            tx.is_error == "0"
        } else {
            tx.receipt_status == "1" && tx.is_error == "0"
        };

        Ok(ChainTransaction {
            hash: tx.hash,
            from: tx.from.to_ascii_lowercase(),
            to: Some(tx.to.to_ascii_lowercase()).filter(|t| !t.is_empty()),
            value,
            block_number: Some(block_number),
            timestamp: Utc.timestamp_opt(seconds, 0).single(),
            success: Some(success),
        })
    }
}

/// Map a reqwest transport failure onto the provider error taxonomy
pub(crate) fn map_transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Blockchain(BlockchainError::Timeout(err.to_string()))
    } else if err.is_decode() {
        AppError::Blockchain(BlockchainError::InvalidResponse(err.to_string()))
    } else {
        AppError::Blockchain(BlockchainError::Connection(err.to_string()))
    }
}

/// HTTP JSON-RPC client for one EVM chain
pub struct EvmRpcClient {
    chain: Chain,
    rpc_url: String,
    explorer_url: Option<String>,
    explorer_api_key: Option<SecretString>,
    http_client: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl EvmRpcClient {
    pub fn new(endpoints: &ChainEndpoints) -> Self {
        Self {
            chain: endpoints.chain,
            rpc_url: endpoints.rpc_url.clone(),
            explorer_url: endpoints.explorer_url.clone(),
            explorer_api_key: endpoints.explorer_api_key.clone(),
            http_client: reqwest::Client::new(),
            timeout: endpoints.request_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(chain = %self.chain, method, "RPC provider rate limited request");
            return Err(AppError::Blockchain(BlockchainError::RateLimited(format!(
                "{} returned 429",
                method
            ))));
        }
        if status.is_server_error() {
            return Err(AppError::Blockchain(BlockchainError::Connection(format!(
                "{} returned {}",
                method, status
            ))));
        }
        if !status.is_success() {
            return Err(AppError::Blockchain(BlockchainError::InvalidResponse(
                format!("{} returned {}", method, status),
            )));
        }

        let body: JsonRpcResponse<T> = response.json().await.map_err(map_transport_error)?;
        if let Some(error) = body.error {
            return Err(error.into_app_error());
        }
        Ok(body.result)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<chrono::DateTime<Utc>>, AppError> {
        let header: Option<RpcBlockHeader> = self
            .call(
                "eth_getBlockByNumber",
                serde_json::json!([to_quantity(block_number), false]),
            )
            .await?;
        match header {
            Some(h) => {
                let seconds = parse_quantity(&h.timestamp)? as i64;
                Ok(Utc.timestamp_opt(seconds, 0).single())
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ChainClient for EvmRpcClient {
    #[instrument(skip(self), fields(chain = %self.chain))]
    async fn block_number(&self) -> Result<u64, AppError> {
        let result: Option<String> = self.call("eth_blockNumber", serde_json::json!([])).await?;
        let hex = result.ok_or_else(|| {
            AppError::Blockchain(BlockchainError::InvalidResponse(
                "eth_blockNumber returned null".to_string(),
            ))
        })?;
        parse_quantity(&hex)
    }

    #[instrument(skip(self, filter), fields(chain = %self.chain, from = ?filter.from_block, to = ?filter.to_block))]
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, AppError> {
        let mut params = serde_json::json!({
            "address": filter.address,
            "topics": filter.topics,
        });
        if let Some(from) = filter.from_block {
            params["fromBlock"] = serde_json::json!(to_quantity(from));
        }
        if let Some(to) = filter.to_block {
            params["toBlock"] = serde_json::json!(to_quantity(to));
        }

        let logs: Option<Vec<RpcLog>> = self.call("eth_getLogs", serde_json::json!([params])).await?;
        let logs = logs
            .unwrap_or_default()
            .into_iter()
            .map(LogEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = logs.len(), "Fetched logs");
        Ok(logs)
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<ChainTransaction>, AppError> {
        let tx: Option<RpcTransaction> = self
            .call("eth_getTransactionByHash", serde_json::json!([tx_hash]))
            .await?;
        let Some(tx) = tx else {
            return Ok(None);
        };

        let block_number = tx.block_number.as_deref().map(parse_quantity).transpose()?;
        let timestamp = match block_number {
            Some(n) => self.block_timestamp(n).await?,
            None => None,
        };

        Ok(Some(ChainTransaction {
            hash: tx.hash,
            from: tx.from.to_ascii_lowercase(),
            to: tx.to.map(|t| t.to_ascii_lowercase()),
            value: parse_quantity_u128(&tx.value)?,
            block_number,
            timestamp,
            success: None,
        }))
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, AppError> {
        let receipt: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
            .await?;
        receipt
            .map(|r| {
                Ok(TransactionReceipt {
                    transaction_hash: r.transaction_hash,
                    block_number: r.block_number.as_deref().map(parse_quantity).transpose()?,
                    success: r.status.as_deref().map(parse_quantity).transpose()? != Some(0),
                })
            })
            .transpose()
    }

    #[instrument(skip(self), fields(chain = %self.chain))]
    async fn transaction_history(&self, address: &str) -> Result<Vec<ChainTransaction>, AppError> {
        let explorer_url = self.explorer_url.as_deref().ok_or_else(|| {
            AppError::NotSupported(format!("no explorer configured for {}", self.chain))
        })?;

        let page_size = HISTORY_PAGE_SIZE.to_string();
        let mut query = vec![
            ("module", "account"),
            ("action", "txlist"),
            ("address", address),
            ("page", "1"),
            ("offset", page_size.as_str()),
            ("sort", "desc"),
        ];
        if let Some(key) = &self.explorer_api_key {
            query.push(("apikey", key.expose_secret()));
        }

        let response = self
            .http_client
            .get(explorer_url)
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::Blockchain(BlockchainError::RateLimited(
                "explorer returned 429".to_string(),
            )));
        }
        if !response.status().is_success() {
            return Err(AppError::Blockchain(BlockchainError::Connection(format!(
                "explorer returned {}",
                response.status()
            ))));
        }

        let body: ExplorerResponse = response.json().await.map_err(map_transport_error)?;
        if body.status != "1" {
            // "No transactions found" comes back as status 0 with an empty list
            if body.result.as_array().is_some_and(|a| a.is_empty()) {
                return Ok(Vec::new());
            }
            let detail = body.result.as_str().unwrap_or(&body.message).to_string();
            if detail.to_lowercase().contains("rate limit") {
                return Err(AppError::Blockchain(BlockchainError::RateLimited(detail)));
            }
            return Err(AppError::Blockchain(BlockchainError::InvalidResponse(
                detail,
            )));
        }

        let transactions: Vec<ExplorerTransaction> = serde_json::from_value(body.result)
            .map_err(|e| AppError::Blockchain(BlockchainError::InvalidResponse(e.to_string())))?;
        let mut history = transactions
            .into_iter()
            .map(ChainTransaction::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        history.reverse();
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_classification() {
        let limited = RpcError {
            code: -32005,
            message: "limit exceeded".to_string(),
        }
        .into_app_error();
        assert!(matches!(
            limited,
            AppError::Blockchain(BlockchainError::RateLimited(_))
        ));

        let other = RpcError {
            code: -32000,
            message: "header not found".to_string(),
        }
        .into_app_error();
        assert!(matches!(
            other,
            AppError::Blockchain(BlockchainError::Rpc { code: -32000, .. })
        ));
    }

    #[test]
    fn test_rpc_log_conversion() {
        let log: RpcLog = serde_json::from_value(serde_json::json!({
            "address": "0xDAC17F958D2EE523A2206206994597C13D831EC7",
            "topics": ["0xddf2"],
            "data": "0x",
            "blockNumber": "0x10",
            "transactionHash": "0xabc",
            "logIndex": "0x2"
        }))
        .unwrap();
        let entry = LogEntry::try_from(log).unwrap();
        assert_eq!(entry.address, "0xdac17f958d2ee523a2206206994597c13d831ec7");
        assert_eq!(entry.block_number, Some(16));
        assert_eq!(entry.log_index, Some(2));
        assert!(!entry.removed);
    }

    #[test]
    fn test_explorer_transaction_conversion() {
        let tx: ExplorerTransaction = serde_json::from_value(serde_json::json!({
            "hash": "0xaaa",
            "from": "0xFROM",
            "to": "0xTO",
            "value": "1000000000000000000",
            "blockNumber": "19000000",
            "timeStamp": "1700000000",
            "isError": "0",
            "txreceipt_status": "1"
        }))
        .unwrap();
        let tx = ChainTransaction::try_from(tx).unwrap();
        assert_eq!(tx.to.as_deref(), Some("0xto"));
        assert_eq!(tx.value, 1_000_000_000_000_000_000);
        assert_eq!(tx.success, Some(true));
        assert_eq!(tx.timestamp.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_explorer_transaction_failed_status() {
        let tx: ExplorerTransaction = serde_json::from_value(serde_json::json!({
            "hash": "0xbbb",
            "from": "0xfrom",
            "to": "",
            "value": "0",
            "blockNumber": "1",
            "timeStamp": "1700000000",
            "isError": "1",
            "txreceipt_status": "0"
        }))
        .unwrap();
        let tx = ChainTransaction::try_from(tx).unwrap();
        assert_eq!(tx.to, None);
        assert_eq!(tx.success, Some(false));
    }
}
