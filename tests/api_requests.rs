//! HTTP surface tests driven through the router with `oneshot`.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use chain_deposit_monitor::api::create_router;
use chain_deposit_monitor::app::{
    AppService, AppState, MonitorBuilder, NotificationHub, SessionConfig, SessionRegistry,
    TransactionRecorder,
};
use chain_deposit_monitor::domain::{
    AttachRequest, Chain, ChainFamily, ErrorResponse, HealthResponse, HealthStatus,
    PaginatedResponse, SessionInfo, TransactionRecord, Wallet, WebhookSummary,
};
use chain_deposit_monitor::infra::{ConnectionManager, FinalityConfig, TokenRegistry};
use chain_deposit_monitor::test_utils::{MockConnector, MockDatabaseClient, MockMonitorBuilder};

const SECRET: &str = "webhook-secret";
const TRON_ADDRESS: &str = "TQrY8tryqsYVCYS3MFbtffiPp2ccyn4STm";

struct TestApp {
    router: Router,
    db: Arc<MockDatabaseClient>,
    registry: Arc<SessionRegistry>,
}

fn test_app(secret: Option<&str>) -> TestApp {
    let db = Arc::new(MockDatabaseClient::new());
    let hub = Arc::new(NotificationHub::new());
    let recorder = Arc::new(TransactionRecorder::new(
        db.clone(),
        Arc::clone(&hub),
        FinalityConfig::default(),
    ));
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(MockMonitorBuilder::new()) as Arc<dyn MonitorBuilder>,
        SessionConfig::default(),
    ));
    let service = Arc::new(AppService::new(
        db.clone(),
        Arc::new(TokenRegistry::new()),
        Arc::new(ConnectionManager::new(Arc::new(MockConnector::unreachable()))),
        Arc::clone(&registry),
        recorder,
    ));
    let state = AppState::new(service, hub, db.clone())
        .with_webhook_secret(secret.map(str::to_string));

    TestApp {
        router: create_router(Arc::new(state)),
        db,
        registry,
    }
}

fn tron_wallet(app: &TestApp) -> Wallet {
    app.db
        .seed_wallet("user-7", "TRX", ChainFamily::Tron, &[(Chain::Tron, TRON_ADDRESS)])
}

fn deposit(tx_hash: &str, to: &str, value: &str) -> Value {
    json!({
        "tx_hash": tx_hash,
        "to_address": to,
        "currency": "trx",
        "value": value,
        "block_number": 60_000_000,
        "confirmations": 3
    })
}

fn webhook(chain: &str, secret: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/webhooks/{}/deposits", chain))
        .header("Content-Type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("Authorization", secret);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_webhook_records_and_deduplicates() {
    let app = test_app(Some(SECRET));
    let wallet = tron_wallet(&app);

    let batch = json!([
        deposit("tron-tx-1", TRON_ADDRESS, "2500000"),
        deposit("tron-tx-2", "TUnknownAddress111111111111111111", "1000000"),
        deposit("tron-tx-3", TRON_ADDRESS, "not-a-number"),
    ]);
    let response = app
        .router
        .clone()
        .oneshot(webhook("tron", Some(SECRET), &batch))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary: WebhookSummary = json_body(response).await;
    assert_eq!(
        summary,
        WebhookSummary {
            received: 3,
            accepted: 1,
            duplicate: 0,
            unmatched: 1,
            rejected: 1,
        }
    );

    // Redelivery of the same batch entry
    let response = app
        .router
        .clone()
        .oneshot(webhook(
            "trc20",
            Some(SECRET),
            &json!([deposit("tron-tx-1", TRON_ADDRESS, "2500000")]),
        ))
        .await
        .unwrap();
    let summary: WebhookSummary = json_body(response).await;
    assert_eq!(summary.accepted, 0);
    assert_eq!(summary.duplicate, 1);

    let records = app.db.transactions();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].wallet_id, wallet.id);
    assert_eq!(records[0].amount.to_string(), "2.5");
    assert_eq!(records[0].currency, "TRX");
}

#[tokio::test]
async fn test_webhook_requires_secret_when_configured() {
    let app = test_app(Some(SECRET));
    let body = json!([deposit("tron-tx-1", TRON_ADDRESS, "1")]);

    let missing = app
        .router
        .clone()
        .oneshot(webhook("tron", None, &body))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .router
        .clone()
        .oneshot(webhook("tron", Some("guess"), &body))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = json_body(wrong).await;
    assert_eq!(error.error.r#type, "authentication_error");
    assert!(app.db.transactions().is_empty());
}

#[tokio::test]
async fn test_webhook_open_without_secret() {
    let app = test_app(None);
    tron_wallet(&app);

    let response = app
        .router
        .clone()
        .oneshot(webhook("tron", None, &json!([deposit("tron-tx-9", TRON_ADDRESS, "1")])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.db.transactions().len(), 1);
}

#[tokio::test]
async fn test_webhook_unknown_chain_is_bad_request() {
    let app = test_app(None);
    let response = app
        .router
        .clone()
        .oneshot(webhook("dogechain", None, &json!([])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error.r#type, "validation_error");
}

#[tokio::test]
async fn test_wallet_transactions_paginate_newest_first() {
    let app = test_app(None);
    let wallet = tron_wallet(&app);

    for hash in ["tron-a", "tron-b", "tron-c"] {
        let response = app
            .router
            .clone()
            .oneshot(webhook("tron", None, &json!([deposit(hash, TRON_ADDRESS, "1000000")])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/wallets/{}/transactions?limit=2", wallet.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page: PaginatedResponse<TransactionRecord> = json_body(response).await;
    assert_eq!(page.items.len(), 2);
    assert!(page.has_more);
    assert_eq!(page.items[0].tx_hash, "tron-c");
    assert_eq!(page.items[1].tx_hash, "tron-b");

    let cursor = page.next_cursor.unwrap();
    let response = app
        .router
        .clone()
        .oneshot(get(&format!(
            "/wallets/{}/transactions?limit=2&cursor={}",
            wallet.id, cursor
        )))
        .await
        .unwrap();
    let page: PaginatedResponse<TransactionRecord> = json_body(response).await;
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].tx_hash, "tron-a");
    assert!(!page.has_more);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn test_wallet_transactions_rejects_bad_limit() {
    let app = test_app(None);
    let response = app
        .router
        .clone()
        .oneshot(get(&format!(
            "/wallets/{}/transactions?limit=500",
            uuid::Uuid::new_v4()
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sessions_lists_attached_watches() {
    let app = test_app(None);
    let empty: Vec<SessionInfo> = json_body(app.router.clone().oneshot(get("/sessions")).await.unwrap()).await;
    assert!(empty.is_empty());

    app.registry
        .attach(
            "user-1",
            &AttachRequest {
                chain: Chain::Polygon,
                currency: "usdc".to_string(),
                address: "0xABCDEF0000000000000000000000000000000001".to_string(),
            },
        )
        .await
        .unwrap();

    let sessions: Vec<SessionInfo> =
        json_body(app.router.clone().oneshot(get("/sessions")).await.unwrap()).await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].user_id, "user-1");
    assert_eq!(sessions[0].currency, "USDC");
    assert_eq!(sessions[0].address, "0xabcdef0000000000000000000000000000000001");
    assert!(!sessions[0].teardown_pending);
}

#[tokio::test]
async fn test_health_reports_database_state() {
    let app = test_app(None);

    let response = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = json_body(response).await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.active_sessions, 0);

    let live = app.router.clone().oneshot(get("/health/live")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    app.db.set_healthy(false);
    let ready = app.router.clone().oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = test_app(None);
    let response = app
        .router
        .clone()
        .oneshot(get("/api-docs/openapi.json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = json_body(response).await;
    assert!(doc["paths"]["/webhooks/{chain}/deposits"].is_object());
}
