use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use orderflow_api as api;
use api::cache::{InMemoryCache, InMemorySessionStore, RedisSessionStore, SessionStore};
use api::integrations::{
    payment_gateway::HttpPaymentGateway, vendor::HttpVendorReadiness, PaymentGateway,
    VendorReadiness,
};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);
    api::handlers::health::init_start_time();

    // Init DB
    let db_pool = api::db::establish_connection(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Session bindings: Redis when configured, in-memory otherwise
    let sessions: Arc<dyn SessionStore> = if cfg.uses_redis_sessions() {
        info!("Using Redis session store");
        Arc::new(
            RedisSessionStore::redis(&cfg.redis_url, cfg.session_ttl())
                .context("invalid redis_url")?,
        )
    } else {
        warn!("redis_url not set, session bindings are kept in memory");
        let cache = InMemoryCache::new();
        cache.spawn_purge(SESSION_PURGE_INTERVAL);
        Arc::new(InMemorySessionStore::new(cache, cfg.session_ttl()))
    };

    // External collaborators
    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        HttpPaymentGateway::new(
            cfg.payment_gateway_url.clone(),
            cfg.payment_gateway_secret.clone(),
            cfg.payment_gateway_timeout(),
        )
        .context("failed to build payment gateway client")?,
    );
    let vendors: Arc<dyn VendorReadiness> = Arc::new(
        HttpVendorReadiness::new(cfg.vendor_service_url.clone(), cfg.payment_gateway_timeout())
            .context("failed to build vendor service client")?,
    );

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    let app_state = api::AppState::new(
        db_arc,
        cfg.clone(),
        event_sender,
        gateway,
        vendors,
        sessions,
    );
    let app = api::app_router(app_state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    info!(%addr, environment = %cfg.environment, "orderflow-api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
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
    info!("Shutdown signal received");
}
