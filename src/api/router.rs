//! Router construction.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::app::AppState;

use super::handlers::{
    ApiDoc, deposit_webhook_handler, health_check_handler, list_sessions_handler,
    list_wallet_transactions_handler, liveness_handler, readiness_handler,
};
use super::ws::ws_handler;

/// Webhook batches larger than this are rejected
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Create the application router
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/ws", get(ws_handler))
        .route(
            "/wallets/{wallet_id}/transactions",
            get(list_wallet_transactions_handler),
        )
        .route("/sessions", get(list_sessions_handler))
        .route("/webhooks/{chain}/deposits", post(deposit_webhook_handler))
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}
