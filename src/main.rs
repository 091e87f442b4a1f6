//! Application entry point.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use chain_deposit_monitor::api::create_router;
use chain_deposit_monitor::app::{
    AppService, AppState, MonitorConfig, MonitorContext, MonitorFactory, NotificationHub,
    SessionConfig, SessionRegistry, SweepConfig, TransactionRecorder, VerificationSweep,
    spawn_sweep,
};
use chain_deposit_monitor::infra::{
    ConnectionManager, DelegatedServices, FinalityConfig, PostgresClient, PostgresConfig,
    RpcConnector, TokenRegistry,
};

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    /// Shared secret expected in the Authorization header of deposit webhooks
    webhook_secret: Option<String>,
    monitor: MonitorConfig,
    session: SessionConfig,
    sweep: SweepConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let webhook_secret = env::var("DEPOSIT_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        Ok(Self {
            database_url,
            host,
            port,
            webhook_secret,
            monitor: MonitorConfig::from_env(),
            session: SessionConfig::from_env(),
            sweep: SweepConfig::from_env(),
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("🏗️  Chain Deposit Monitor v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("📦 Initializing infrastructure...");

    let postgres_client = PostgresClient::new(&config.database_url, PostgresConfig::from_env()).await?;
    postgres_client.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");

    let tokens = TokenRegistry::load(postgres_client.pool()).await?;
    info!("   ✓ Token registry loaded ({} contracts)", tokens.len());
    let tokens = Arc::new(tokens);
    let db_client = Arc::new(postgres_client);

    let connector = RpcConnector::from_env();
    let configured = connector.configured_chains();
    if configured.is_empty() {
        warn!("   ⚠ No EVM RPC endpoints configured - EVM watches will be rejected");
    } else {
        info!("   ✓ EVM endpoints configured: {:?}", configured);
    }
    let connections = Arc::new(ConnectionManager::new(Arc::new(connector)));

    let delegated = DelegatedServices::from_env()?;
    if delegated.is_empty() {
        info!("   ○ No delegated chain services configured");
    } else {
        info!("   ✓ Delegated services: {:?}", delegated);
    }

    let hub = Arc::new(NotificationHub::new());
    let finality = FinalityConfig::from_env();
    let recorder = Arc::new(TransactionRecorder::new(
        db_client.clone(),
        Arc::clone(&hub),
        finality.clone(),
    ));

    let factory = MonitorFactory::new(
        db_client.clone(),
        tokens.clone(),
        Arc::clone(&connections),
        delegated.clone(),
        MonitorContext {
            recorder: Arc::clone(&recorder),
            hub: Arc::clone(&hub),
            config: config.monitor.clone(),
        },
    );
    let registry = Arc::new(SessionRegistry::new(Arc::new(factory), config.session.clone()));
    info!(
        "   ✓ Session registry ready (grace period: {}s)",
        config.session.grace_period.as_secs()
    );

    let service = Arc::new(AppService::new(
        db_client.clone(),
        tokens,
        Arc::clone(&connections),
        Arc::clone(&registry),
        recorder,
    ));

    if config.webhook_secret.is_some() {
        info!("   ✓ Deposit webhook secret configured");
    } else {
        info!("   ○ Deposit webhook secret not configured (webhook auth disabled)");
    }
    let app_state = Arc::new(
        AppState::new(service, Arc::clone(&hub), db_client.clone())
            .with_webhook_secret(config.webhook_secret.clone()),
    );

    let sweep_shutdown_tx = if config.sweep.enabled {
        let sweep = Arc::new(VerificationSweep::new(
            db_client,
            Arc::clone(&connections),
            delegated,
            Arc::clone(&hub),
            finality,
        ));
        let (_sweep_handle, shutdown_tx) = spawn_sweep(sweep, config.sweep.clone());
        info!(
            "   ✓ Verification sweep started (poll: {}s, batch: {})",
            config.sweep.poll_interval.as_secs(),
            config.sweep.batch_size
        );
        Some(shutdown_tx)
    } else {
        info!("   ○ Verification sweep disabled");
        None
    };

    let router = create_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("🔌 Session socket at ws://{}/ws?user_id=<id>", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(tx) = sweep_shutdown_tx {
        let _ = tx.send(true);
    }
    registry.stop_all().await;

    info!("Server shutdown complete");
    Ok(())
}
