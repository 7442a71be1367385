use keedrop::{
    config::{AppConfig, BackendKind, LogFormat},
    exchange::{ExchangePolicy, SecretExchange},
    store::{MemoryBackend, RedisBackend, SharedBackend},
    web,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();
    // Loaded before logging, since it picks the log format
    let config = AppConfig::load()?;

    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "keedrop=debug,tower_http=debug".into()),
    );
    match config.log.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!("Starting KeeDrop v{}", env!("CARGO_PKG_VERSION"));

    let backend = connect_backend(&config).await?;

    let policy = ExchangePolicy::from(&config.exchange);
    info!(
        "Secrets expire after {}s, mnemonics have {} characters",
        policy.lifetime.as_secs(),
        policy.mnemonic_len
    );
    let exchange = SecretExchange::new(backend, policy);

    let app = web::create_router(web::AppState { exchange }, &config);

    let web_addr = config.listen_addr();
    let listener = TcpListener::bind(&web_addr).await?;
    info!("Web server listening on http://{}", web_addr);
    info!("CORS origins: {}", config.cors_origins.join(", "));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Web server shut down");
    Ok(())
}

/// Build the configured backend and check that it answers.
async fn connect_backend(config: &AppConfig) -> anyhow::Result<SharedBackend> {
    match config.backend.kind {
        BackendKind::Redis => {
            let redis = RedisBackend::connect(&config.backend)?;
            match redis.ping().await {
                Ok(()) => info!("Redis reachable at {}", config.backend.redis_url),
                Err(e) => warn!(
                    "Redis not available: {}. \
                    Storing and retrieving secrets will fail until it is up.",
                    e
                ),
            }
            Ok(Arc::new(redis))
        }
        BackendKind::Memory => {
            warn!("Using the in-memory backend; secrets are lost on restart");
            let memory = Arc::new(MemoryBackend::new());
            spawn_purge_task(memory.clone());
            Ok(memory as SharedBackend)
        }
    }
}

/// Reclaim expired in-memory entries once a minute
fn spawn_purge_task(memory: Arc<MemoryBackend>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let purged = memory.purge_expired();
            if purged > 0 {
                info!("Purged {} expired secrets", purged);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
