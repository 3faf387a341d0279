//! loan_ledger - Peer-to-peer loan ledger server
//!
//! Event-sourced loan lifecycle, funding and repayment ledger behind an
//! HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loan_ledger::config::LogFormat;
use loan_ledger::domain::SystemClock;
use loan_ledger::event_store::{EventStore, MemoryEventStore, PgEventStore};
use loan_ledger::gateway::SimulatedGateway;
use loan_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use loan_ledger::{api, db, AppState, Config};

/// Initialize tracing/logging
fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "loan_ledger=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(
        environment = %config.environment,
        currency = %config.ledger.currency,
        "Starting loan_ledger server"
    );

    let (store, pool): (Arc<dyn EventStore>, Option<PgPool>) = match &config.database_url {
        Some(url) => {
            let pool = db::connect(url, config.database_max_connections).await?;
            (Arc::new(PgEventStore::new(pool.clone())), Some(pool))
        }
        None => {
            if config.is_production() {
                return Err(anyhow::anyhow!("DATABASE_URL is required in production"));
            }
            tracing::warn!("DATABASE_URL not set, using the in-memory event store");
            (Arc::new(MemoryEventStore::new()), None)
        }
    };

    let state = AppState::new(
        store,
        Arc::new(SimulatedGateway),
        Arc::new(SystemClock),
        config.ledger.clone(),
    );
    state.balances.rebuild().await?;

    let jobs = JobScheduler::with_config(
        state.clone(),
        JobSchedulerConfig {
            late_fee_interval: config.late_fee_job_interval,
        },
    )
    .start();

    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    jobs.abort();
    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database connections closed");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
