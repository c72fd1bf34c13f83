use axum::http::HeaderValue;
use dotenv::dotenv;
use quickcart_backend::api::{self, AppState};
use quickcart_backend::config::AppConfig;
use quickcart_backend::database::memory::{
    InMemoryOrderStore, InMemoryPaymentEventStore, InMemoryProductCatalog,
};
use quickcart_backend::database::order_repository::{OrderStore, PgOrderRepository};
use quickcart_backend::database::payment_event_repository::{
    PaymentEventStore, PgPaymentEventRepository,
};
use quickcart_backend::database::product_repository::{
    PgProductRepository, Product, ProductCatalog,
};
use quickcart_backend::database::{connect, migrate};
use quickcart_backend::health::HealthChecker;
use quickcart_backend::logging::init_tracing;
use quickcart_backend::middleware::auth::JwtVerifier;
use quickcart_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use quickcart_backend::payments::{AccessTokenCache, PaymentRegistry};
use quickcart_backend::services::{
    OrchestratorConfig, OrderService, PaymentOrchestrator, TrackingService, WebhookProcessor,
};
use quickcart_backend::workers::webhook_retry::{WebhookRetryConfig, WebhookRetryWorker};
use sqlx::types::BigDecimal;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

/// A small catalog so the in-process mode can take orders
async fn seed_demo_catalog(catalog: &InMemoryProductCatalog) {
    let demo = [
        ("Wireless Headphones", "120.00", "99.99"),
        ("Smart Watch", "250.00", "199.00"),
        ("USB-C Charger", "25.00", "19.50"),
    ];
    for (name, price, offer) in demo {
        let (Ok(price), Ok(offer_price)) = (BigDecimal::from_str(price), BigDecimal::from_str(offer))
        else {
            continue;
        };
        let product = Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            price,
            offer_price,
            seller_id: None,
        };
        info!(product_id = %product.id, name = %product.name, "🧪 Seeded demo product");
        catalog.insert(product).await;
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting QuickCart backend service"
    );

    // Storage: Postgres, or the in-process store when externals are skipped
    let (db_pool, orders, products, events): (
        _,
        Arc<dyn OrderStore>,
        Arc<dyn ProductCatalog>,
        Arc<dyn PaymentEventStore>,
    ) = if config.database.url.is_some() {
        info!("📊 Initializing database connection pool...");
        let pool = connect(&config.database).await.map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
        info!(
            max_connections = pool.options().get_max_connections(),
            "✅ Database connection pool initialized"
        );
        if config.database.run_migrations {
            migrate(&pool).await?;
        }
        (
            Some(pool.clone()),
            Arc::new(PgOrderRepository::new(pool.clone())) as Arc<dyn OrderStore>,
            Arc::new(PgProductRepository::new(pool.clone())) as Arc<dyn ProductCatalog>,
            Arc::new(PgPaymentEventRepository::new(pool)) as Arc<dyn PaymentEventStore>,
        )
    } else {
        warn!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true), data is not persisted");
        let catalog = InMemoryProductCatalog::new();
        seed_demo_catalog(&catalog).await;
        (
            None,
            Arc::new(InMemoryOrderStore::new()) as Arc<dyn OrderStore>,
            Arc::new(catalog) as Arc<dyn ProductCatalog>,
            Arc::new(InMemoryPaymentEventStore::new()) as Arc<dyn PaymentEventStore>,
        )
    };

    // Payment providers share one token cache
    let registry =
        PaymentRegistry::from_config(&config.payments, Arc::new(AccessTokenCache::new()))?;

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        orders.clone(),
        events.clone(),
        registry.clone(),
        OrchestratorConfig {
            frontend_url: config.server.frontend_url.clone(),
            default_currency: config.payments.default_currency.clone(),
        },
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        orders.clone(),
        events,
        registry.clone(),
        config.payments.default_currency.clone(),
    ));

    let state = AppState {
        orders: Arc::new(OrderService::new(orders.clone(), products)),
        orchestrator,
        tracking: Arc::new(TrackingService::new(orders)),
        webhooks: webhooks.clone(),
        jwt: Arc::new(JwtVerifier::new(&config.auth.jwt_secret)),
        health_checker: HealthChecker::new(db_pool, registry),
    };

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let retry_handle = if config.workers.webhook_retry_enabled {
        let worker = WebhookRetryWorker::new(webhooks, WebhookRetryConfig::from(&config.workers));
        info!("✅ Webhook retry worker started");
        Some(tokio::spawn(worker.run(worker_shutdown_rx)))
    } else {
        info!("Webhook retry worker disabled (WEBHOOK_RETRY_ENABLED=false)");
        None
    };

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(cors_layer(&config.server.cors_allowed_origins)),
    );
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = retry_handle {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for webhook retry worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
