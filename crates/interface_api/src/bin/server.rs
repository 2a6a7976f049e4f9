//! Lending Core - API Server Binary
//!
//! This binary starts the HTTP API server and the overdue sweeper.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! cargo run --bin lending-api
//!
//! # Run with environment variables
//! API_PORT=8080 API_DATABASE_URL=postgres://... cargo run --bin lending-api
//! ```
//!
//! # Environment Variables
//!
//! * `API_HOST` - Server host (default: 0.0.0.0)
//! * `API_PORT` - Server port (default: 8080)
//! * `API_JWT_SECRET` - JWT signing secret (required in production)
//! * `API_DATABASE_URL` - PostgreSQL connection string
//! * `API_LOG_LEVEL` - Log level: trace, debug, info, warn, error (default: info)
//! * `API_GATEWAY_SECRET` / `API_GATEWAY_SALT_INDEX` / `API_GATEWAY_MERCHANT_ID` - Gateway signing
//! * `API_SWEEPER_INTERVAL_SECS` - Seconds between overdue sweeps (default: 21600)
//! * `API_GRACE_PERIOD_DAYS` - Days past due before an installment is overdue (default: 3)
//! * `API_LATE_FEE` - Fee added to each newly overdue installment (default: 0)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use core_kernel::HealthCheckable;
use domain_lending::spawn_sweeper;
use infra_db::{create_pool, run_migrations, PgLoanRequestStore, PgNotificationQueue, PgRepaymentStore};
use interface_api::{config::ApiConfig, create_router, Adapters, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let (config, config_error) = load_config();
    init_tracing(&config.log_level);
    if let Some(error) = config_error {
        tracing::warn!(%error, "Invalid API configuration, using defaults");
    }
    config.validate().context("validating configuration")?;

    tracing::info!(
        host = %config.host,
        port = %config.port,
        "Starting Lending Core API Server"
    );

    let pool = create_pool(config.database_config())
        .await
        .context("connecting to database")?;
    run_migrations(&pool).await.context("running migrations")?;

    let requests = Arc::new(PgLoanRequestStore::new(pool.clone()));
    let repayments = Arc::new(PgRepaymentStore::new(pool.clone()));
    let notifications = Arc::new(PgNotificationQueue::new(pool.clone()).with_policy(config.notification_retry_policy()));

    let adapters = Adapters {
        requests: requests.clone(),
        repayments: repayments.clone(),
        orders: repayments.clone(),
        notifications: notifications.clone(),
        health_checks: vec![
            requests as Arc<dyn HealthCheckable>,
            repayments as Arc<dyn HealthCheckable>,
            notifications as Arc<dyn HealthCheckable>,
        ],
    };
    let state = AppState::new(config.clone(), adapters);

    let sweeper = spawn_sweeper(Arc::new(state.overdue_sweeper()));
    let app = create_router(state);

    let addr: SocketAddr = config.server_addr().parse().context("parsing server address")?;
    tracing::info!(%addr, "Server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.stop().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Loads API configuration from environment variables
///
/// Falls back to defaults, keeping the database URL from `DATABASE_URL`
/// when the prefixed variable is absent. The load error is returned so it
/// can be logged once tracing is up.
fn load_config() -> (ApiConfig, Option<config::ConfigError>) {
    let (mut config, error) = match ApiConfig::from_env() {
        Ok(config) => (config, None),
        Err(error) => (ApiConfig::default(), Some(error)),
    };

    if std::env::var("API_DATABASE_URL").is_err() {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
    }
    (config, error)
}

/// Initializes the tracing subscriber for structured logging
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
