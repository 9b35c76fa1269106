//! event_ledger - HTTP command surface
//!
//! Accepts account commands, records them in the event log, and serves
//! authoritative balances (cache or replay) and projected balances.

use std::net::SocketAddr;
use std::sync::Arc;

use event_ledger::api::{self, AppState};
use event_ledger::cache::RedisAccountCache;
use event_ledger::event_log::{BlobEventLog, FsBlobStore};
use event_ledger::handlers::{AccountService, ServiceConfig};
use event_ledger::projection::PgReadModel;
use event_ledger::transport::RedisStreamsTransport;
use event_ledger::{db, init_tracing, shutdown_signal, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting event_ledger server");

    let store = FsBlobStore::open(&config.event_log_dir).await?;
    let log = Arc::new(BlobEventLog::new(store));
    tracing::info!(dir = %config.event_log_dir, "Event log opened");

    let cache = Arc::new(RedisAccountCache::connect(&config.redis_url, &config.cache_key_prefix).await?);
    let publisher = Arc::new(
        RedisStreamsTransport::connect(
            &config.redis_url,
            &config.event_stream_key,
            &config.event_dlq_key,
        )
        .await?,
    );
    tracing::info!("Redis connected");

    let pool = db::connect(&config.database_url, config.database_max_connections).await?;
    db::verify_connection(&pool).await?;
    db::ensure_schema(&pool).await?;
    tracing::info!("Database connected successfully");

    let service = AccountService::new(
        log,
        cache,
        publisher,
        ServiceConfig {
            cache_ttl: config.cache_ttl,
            io_timeout: config.io_timeout,
        },
    );
    let state = AppState::new(Arc::new(service), Arc::new(PgReadModel::new(pool.clone())));
    let app = api::build_app(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}
