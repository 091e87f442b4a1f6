//! HTTP-based integration tests for the EVM JSON-RPC client and the
//! delegated watcher client.
//!
//! Uses `wiremock` to stand in for RPC providers, explorers and watchers.

use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path, query_param},
};

// ============================================================================
// EVM JSON-RPC CLIENT TESTS
// ============================================================================

mod evm_rpc_tests {
    use super::*;
    use chain_deposit_monitor::domain::{
        AppError, BlockchainError, Chain, ChainClient,
    };
    use chain_deposit_monitor::infra::blockchain::{TRANSFER_TOPIC, transfer_filter};
    use chain_deposit_monitor::infra::{ChainEndpoints, EvmRpcClient};
    use serde_json::json;

    const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";
    const WATCHED: &str = "0x0000000000000000000000000000000000000abc";

    fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result
        }))
    }

    fn client(server: &MockServer) -> EvmRpcClient {
        EvmRpcClient::new(&ChainEndpoints::new(Chain::Ethereum, server.uri()))
    }

    #[tokio::test]
    async fn test_block_number_parses_hex_quantity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_blockNumber"})))
            .respond_with(rpc_result(json!("0x12a05f2")))
            .mount(&server)
            .await;

        assert_eq!(client(&server).block_number().await.unwrap(), 19_531_250);
    }

    #[tokio::test]
    async fn test_get_logs_sends_range_and_topics() {
        let server = MockServer::start().await;
        let filter = transfer_filter(USDT, WATCHED).with_range(256, 300);

        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getLogs",
                "params": [{
                    "address": USDT,
                    "fromBlock": "0x100",
                    "toBlock": "0x12c"
                }]
            })))
            .respond_with(rpc_result(json!([{
                "address": "0xDAC17F958D2EE523A2206206994597C13D831EC7",
                "topics": [
                    TRANSFER_TOPIC,
                    "0x0000000000000000000000001111111111111111111111111111111111111111",
                    "0x0000000000000000000000000000000000000000000000000000000000000abc"
                ],
                "data": "0x0000000000000000000000000000000000000000000000000000000005f5e100",
                "blockNumber": "0x101",
                "transactionHash": "0xfeed",
                "logIndex": "0x3",
                "removed": false
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let logs = client(&server).get_logs(&filter).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].address, USDT);
        assert_eq!(logs[0].block_number, Some(257));
        assert_eq!(logs[0].log_index, Some(3));
        assert_eq!(logs[0].transaction_hash, "0xfeed");
    }

    #[tokio::test]
    async fn test_receipt_status_maps_to_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getTransactionReceipt", "params": ["0xok"]})))
            .respond_with(rpc_result(json!({
                "transactionHash": "0xok",
                "blockNumber": "0x64",
                "status": "0x1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getTransactionReceipt", "params": ["0xbad"]})))
            .respond_with(rpc_result(json!({
                "transactionHash": "0xbad",
                "blockNumber": "0x65",
                "status": "0x0"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getTransactionReceipt", "params": ["0xpending"]})))
            .respond_with(rpc_result(json!(null)))
            .mount(&server)
            .await;

        let client = client(&server);
        let ok = client.get_transaction_receipt("0xok").await.unwrap().unwrap();
        assert!(ok.success);
        assert_eq!(ok.block_number, Some(100));

        let bad = client.get_transaction_receipt("0xbad").await.unwrap().unwrap();
        assert!(!bad.success);

        assert!(client.get_transaction_receipt("0xpending").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_transaction_includes_block_timestamp() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getTransactionByHash"})))
            .respond_with(rpc_result(json!({
                "hash": "0xtx",
                "from": "0x1111111111111111111111111111111111111111",
                "to": "0x0000000000000000000000000000000000000ABC",
                "value": "0xde0b6b3a7640000",
                "blockNumber": "0x64"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getBlockByNumber", "params": ["0x64", false]})))
            .respond_with(rpc_result(json!({"timestamp": "0x65f1a2b0"})))
            .mount(&server)
            .await;

        let tx = client(&server).get_transaction("0xtx").await.unwrap().unwrap();
        assert_eq!(tx.value, 1_000_000_000_000_000_000);
        assert_eq!(tx.to.as_deref(), Some(WATCHED));
        assert_eq!(tx.block_number, Some(100));
        assert_eq!(tx.timestamp.map(|t| t.timestamp()), Some(0x65f1a2b0));
    }

    #[tokio::test]
    async fn test_rate_limits_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_blockNumber"})))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getLogs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32005, "message": "query returned more than 10000 results"}
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let head = client.block_number().await;
        assert!(matches!(
            head,
            Err(AppError::Blockchain(BlockchainError::RateLimited(_)))
        ));

        let logs = client.get_logs(&transfer_filter(USDT, WATCHED)).await;
        match logs {
            Err(AppError::Blockchain(e @ BlockchainError::RateLimited(_))) => {
                assert!(e.is_transient())
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rpc_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32602, "message": "invalid params"}
            })))
            .mount(&server)
            .await;

        let result = client(&server).block_number().await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::Rpc { code: -32602, .. }))
        ));
    }

    #[tokio::test]
    async fn test_explorer_history_is_oldest_first() {
        let rpc = MockServer::start().await;
        let explorer = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("module", "account"))
            .and(query_param("action", "txlist"))
            .and(query_param("address", WATCHED))
            .and(query_param("apikey", "explorer-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1",
                "message": "OK",
                "result": [
                    {
                        "hash": "0xnewer",
                        "from": "0x1111111111111111111111111111111111111111",
                        "to": WATCHED,
                        "value": "2000",
                        "blockNumber": "101",
                        "timeStamp": "1710000100",
                        "isError": "0",
                        "txreceipt_status": "1"
                    },
                    {
                        "hash": "0xolder",
                        "from": "0x1111111111111111111111111111111111111111",
                        "to": WATCHED,
                        "value": "1000",
                        "blockNumber": "100",
                        "timeStamp": "1710000000",
                        "isError": "1",
                        "txreceipt_status": "0"
                    }
                ]
            })))
            .mount(&explorer)
            .await;

        let endpoints = ChainEndpoints::new(Chain::Ethereum, rpc.uri())
            .with_explorer(explorer.uri(), Some("explorer-key".to_string().into()));
        let history = EvmRpcClient::new(&endpoints)
            .transaction_history(WATCHED)
            .await
            .unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].hash, "0xolder");
        assert_eq!(history[0].success, Some(false));
        assert_eq!(history[1].hash, "0xnewer");
        assert_eq!(history[1].success, Some(true));
        assert_eq!(history[1].value, 2000);
    }

    #[tokio::test]
    async fn test_explorer_empty_history() {
        let rpc = MockServer::start().await;
        let explorer = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0",
                "message": "No transactions found",
                "result": []
            })))
            .mount(&explorer)
            .await;

        let endpoints =
            ChainEndpoints::new(Chain::Polygon, rpc.uri()).with_explorer(explorer.uri(), None);
        let history = EvmRpcClient::new(&endpoints)
            .transaction_history(WATCHED)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_history_without_explorer_is_not_supported() {
        let server = MockServer::start().await;
        let result = client(&server).transaction_history(WATCHED).await;
        assert!(matches!(result, Err(AppError::NotSupported(_))));
    }
}

// ============================================================================
// DELEGATED WATCHER CLIENT TESTS
// ============================================================================

mod delegated_service_tests {
    use super::*;
    use chain_deposit_monitor::domain::{
        AppError, Chain, ChainFamily, DelegatedChainService, DelegatedFamily,
        ExternalServiceError, Wallet,
    };
    use chain_deposit_monitor::infra::HttpDelegatedService;
    use chrono::Utc;
    use secrecy::SecretString;
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    const TRON_ADDRESS: &str = "TQrY8tryqsYVCYS3MFbtffiPp2ccyn4STm";

    fn tron_wallet() -> Wallet {
        Wallet {
            id: Uuid::new_v4(),
            user_id: "user-7".to_string(),
            currency: "TRX".to_string(),
            family: ChainFamily::Tron,
            addresses: HashMap::from([(Chain::Tron, TRON_ADDRESS.to_string())]),
            created_at: Utc::now(),
        }
    }

    fn service(server: &MockServer, api_key: Option<&str>) -> HttpDelegatedService {
        HttpDelegatedService::new(
            DelegatedFamily::Tron,
            format!("{}/", server.uri()),
            api_key.map(|k| SecretString::from(k.to_string())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_monitor_registers_address_with_bearer_token() {
        let server = MockServer::start().await;
        let wallet = tron_wallet();

        Mock::given(method("POST"))
            .and(path("/monitor"))
            .and(header("Authorization", "Bearer watcher-key"))
            .and(body_partial_json(json!({
                "wallet_id": wallet.id.to_string(),
                "user_id": "user-7",
                "currency": "TRX",
                "chain": "tron",
                "address": TRON_ADDRESS
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        service(&server, Some("watcher-key"))
            .monitor(&wallet, TRON_ADDRESS, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_monitor_error_statuses_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/monitor"))
            .respond_with(ResponseTemplate::new(503).set_body_string("draining"))
            .mount(&server)
            .await;

        let result = service(&server, None)
            .monitor(&tron_wallet(), TRON_ADDRESS, None)
            .await;
        assert!(matches!(
            result,
            Err(AppError::ExternalService(ExternalServiceError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_confirmations_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions/tron/known-tx"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"confirmations": 27})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transactions/tron/unknown-tx"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transactions/tron/limited-tx"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let service = service(&server, None);
        assert_eq!(
            service.confirmations(Chain::Tron, "known-tx").await.unwrap(),
            Some(27)
        );
        assert_eq!(
            service.confirmations(Chain::Tron, "unknown-tx").await.unwrap(),
            None
        );
        assert!(matches!(
            service.confirmations(Chain::Tron, "limited-tx").await,
            Err(AppError::ExternalService(ExternalServiceError::RateLimited(_)))
        ));
    }

    #[tokio::test]
    async fn test_confirmations_not_implemented_by_watcher() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(501))
            .mount(&server)
            .await;

        let result = service(&server, None).confirmations(Chain::Tron, "tx").await;
        assert!(matches!(result, Err(AppError::NotSupported(_))));
    }
}
