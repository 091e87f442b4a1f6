//! HTTP request handlers with OpenAPI documentation.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::{error, info};
use utoipa::OpenApi;
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::domain::{
    AppError, BlockchainError, Chain, ConfigError, DatabaseError, DepositNotification,
    ErrorDetail, ErrorResponse, ExternalServiceError, HealthResponse, HealthStatus, MonitorKind,
    MonitorState, PaginatedResponse, PaginationParams, SessionEvent, SessionInfo,
    TransactionRecord, TransactionStatus, ValidationError, WebhookDeposit, WebhookSummary,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Chain Deposit Monitor API",
        version = "0.1.0",
        description = "Deposit detection across EVM and delegated chains, with live session notifications",
        license(
            name = "MIT"
        )
    ),
    paths(
        list_wallet_transactions_handler,
        list_sessions_handler,
        deposit_webhook_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            TransactionRecord,
            TransactionStatus,
            PaginationParams,
            PaginatedResponse<TransactionRecord>,
            SessionInfo,
            MonitorKind,
            MonitorState,
            SessionEvent,
            DepositNotification,
            WebhookDeposit,
            WebhookSummary,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    tags(
        (name = "deposits", description = "Recorded deposits and delegated-service intake"),
        (name = "sessions", description = "Live watch sessions"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// List a wallet's recorded transactions
///
/// Newest first, cursor-paginated.
#[utoipa::path(
    get,
    path = "/wallets/{wallet_id}/transactions",
    tag = "deposits",
    params(
        ("wallet_id" = Uuid, Path, description = "Wallet ID"),
        ("limit" = Option<i64>, Query, description = "Maximum items (1-100)"),
        ("cursor" = Option<String>, Query, description = "Cursor from a previous page")
    ),
    responses(
        (status = 200, description = "Page of transactions", body = PaginatedResponse<TransactionRecord>),
        (status = 400, description = "Invalid pagination parameters", body = ErrorResponse)
    )
)]
pub async fn list_wallet_transactions_handler(
    State(state): State<Arc<AppState>>,
    Path(wallet_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<TransactionRecord>>, AppError> {
    params
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    let page = state
        .service
        .list_wallet_transactions(wallet_id, params.limit, params.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

/// Active watch sessions
#[utoipa::path(
    get,
    path = "/sessions",
    tag = "sessions",
    responses(
        (status = 200, description = "One entry per user with a monitor", body = Vec<SessionInfo>)
    )
)]
pub async fn list_sessions_handler(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.service.list_sessions().await)
}

/// Deposits observed by a delegated chain service
///
/// Validates the Authorization header against `DEPOSIT_WEBHOOK_SECRET` when
/// one is configured. Redelivery is safe; already recorded transfers are
/// counted as duplicates.
#[utoipa::path(
    post,
    path = "/webhooks/{chain}/deposits",
    tag = "deposits",
    params(
        ("chain" = String, Path, description = "Chain identifier, e.g. bitcoin or tron")
    ),
    request_body = Vec<WebhookDeposit>,
    responses(
        (status = 200, description = "Batch processed", body = WebhookSummary),
        (status = 400, description = "Unknown chain", body = ErrorResponse),
        (status = 401, description = "Missing or invalid secret", body = ErrorResponse)
    )
)]
pub async fn deposit_webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(chain): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Vec<WebhookDeposit>>,
) -> Result<Json<WebhookSummary>, AppError> {
    if let Some(expected_secret) = &state.webhook_secret {
        let auth_header = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing Authorization header".to_string()))?;

        if auth_header != expected_secret {
            return Err(AppError::Authentication(
                "Invalid webhook secret".to_string(),
            ));
        }
    }

    let chain = Chain::from_str(&chain).map_err(|message| {
        AppError::Validation(ValidationError::InvalidField {
            field: "chain".to_string(),
            message,
        })
    })?;

    let received = payload.len();
    let summary = state
        .service
        .process_webhook_deposits(chain, payload)
        .await?;

    info!(
        chain = %chain,
        received = %received,
        accepted = %summary.accepted,
        "Deposit webhook processed"
    );
    Ok(Json(summary))
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Blockchain(bc_err) => match bc_err {
                BlockchainError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "blockchain_error",
                    self.to_string(),
                ),
                BlockchainError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                BlockchainError::RateLimited(_) => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    self.to_string(),
                ),
                _ => (
                    StatusCode::BAD_GATEWAY,
                    "blockchain_error",
                    self.to_string(),
                ),
            },
            AppError::ExternalService(ext_err) => match ext_err {
                ExternalServiceError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                ExternalServiceError::RateLimited(_) => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    self.to_string(),
                ),
                _ => (
                    StatusCode::BAD_GATEWAY,
                    "external_service_error",
                    self.to_string(),
                ),
            },
            AppError::Config(cfg_err) => match cfg_err {
                ConfigError::WalletNotFound { .. }
                | ConfigError::AddressNotFound { .. }
                | ConfigError::TokenNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                ConfigError::UnsupportedChain(_) => (
                    StatusCode::BAD_REQUEST,
                    "unsupported_chain",
                    self.to_string(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "configuration_error",
                    self.to_string(),
                ),
            },
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                self.to_string(),
            ),
            AppError::Serialization(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "serialization_error",
                self.to_string(),
            ),
            AppError::Deserialization(_) => (
                StatusCode::BAD_REQUEST,
                "deserialization_error",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
            AppError::NotSupported(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "not_supported",
                self.to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn error_body(err: AppError) -> (StatusCode, ErrorResponse) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_attach_resolution_errors_are_not_found() {
        let (status, body) = error_body(AppError::Config(ConfigError::TokenNotFound {
            currency: "USDT".to_string(),
            chain: "polygon".to_string(),
        }))
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error.r#type, "not_found");
    }

    #[tokio::test]
    async fn test_provider_rate_limit_maps_to_429() {
        let (status, body) =
            error_body(AppError::Blockchain(BlockchainError::RateLimited("slow down".into()))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body.error.r#type, "rate_limited");
    }
}
