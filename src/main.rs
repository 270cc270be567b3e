use escrow_ledger::api::{self, AppState};
use escrow_ledger::config::{AppConfig, LoggingConfig};
use escrow_ledger::escrow::EscrowEngine;
use escrow_ledger::health::HealthChecker;
use escrow_ledger::ledger::postgres::{init_pool, run_migrations};
use escrow_ledger::ledger::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use escrow_ledger::logging::init_tracing;
use escrow_ledger::payments::{PaymentGateway, PaystackGateway};
use escrow_ledger::services::notification::{BroadcastSink, FanoutSink, LoggingSink, Notifier};
use escrow_ledger::services::webhook_processor::WebhookProcessor;
use escrow_ledger::workers::payment_reconciler::PaymentReconcilerWorker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing(&LoggingConfig::from_env());

    let config = AppConfig::from_env().map_err(|e| {
        error!(error = %e, "❌ Failed to load configuration");
        e
    })?;
    config.validate().map_err(|e| {
        error!(error = %e, "❌ Invalid configuration");
        e
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting escrow ledger service"
    );

    // Ledger store
    let (store, db_pool): (Arc<dyn LedgerStore>, Option<sqlx::PgPool>) =
        match &config.database {
            None => {
                warn!("⏭️  Using in-memory ledger store (SKIP_EXTERNALS=true), balances are not durable");
                (Arc::new(InMemoryLedgerStore::new()), None)
            }
            Some(database) => {
                info!("📊 Initializing database connection pool...");
                let pool = init_pool(database).await.map_err(|e| {
                    error!("Failed to initialize database pool: {}", e);
                    e
                })?;
                if database.run_migrations {
                    run_migrations(&pool, &database.migrations_path).await?;
                }
                info!(
                    max_connections = pool.options().get_max_connections(),
                    "✅ Database connection pool initialized"
                );
                (Arc::new(PgLedgerStore::new(pool.clone())), Some(pool))
            }
        };

    // Gateway, engine and intake
    let gateway: Arc<dyn PaymentGateway> = Arc::new(PaystackGateway::new(config.paystack.clone())?);
    info!(provider = %gateway.name(), base_url = %config.paystack.base_url, "✅ Payment gateway configured");

    if config.escrow.platform_account_id.is_nil() {
        warn!("PLATFORM_ACCOUNT_ID is not set, commission is credited to the nil account");
    }

    // Every event is logged and offered to live subscribers of /api/wallet/events.
    let events = BroadcastSink::new(EVENT_CHANNEL_CAPACITY);
    let notifier = Notifier::new(Arc::new(FanoutSink::new(vec![
        Arc::new(LoggingSink),
        Arc::new(events.clone()),
    ])));

    let engine = Arc::new(EscrowEngine::new(
        store.clone(),
        gateway,
        notifier,
        config.escrow.clone(),
    ));
    let webhook_processor = Arc::new(WebhookProcessor::new(engine.clone()));

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let reconciler_handle = if config.reconciler.enabled {
        let worker =
            PaymentReconcilerWorker::new(engine.clone(), store.clone(), config.reconciler.clone());
        Some(tokio::spawn(worker.run(worker_shutdown_rx)))
    } else {
        info!("Payment reconciler worker disabled (RECONCILER_ENABLED=false)");
        None
    };

    let app = api::router(AppState {
        engine,
        webhook_processor,
        health_checker: HealthChecker::new(db_pool),
        events,
    });

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = reconciler_handle {
        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for reconciler worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
