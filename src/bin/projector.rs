//! Projection consumer process
//!
//! Run with: cargo run --bin projector --release
//! Rebuild the read model from the event log instead: `-- --rebuild`

use std::sync::Arc;
use std::time::Duration;

use event_ledger::event_log::{BlobEventLog, FsBlobStore};
use event_ledger::jobs;
use event_ledger::projection::{ConsumerConfig, PgReadModel, ProjectionConsumer};
use event_ledger::transport::RedisStreamsTransport;
use event_ledger::{db, init_tracing, shutdown_signal, Config};

/// How long one XREADGROUP waits for new entries
const POLL_BLOCK: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let rebuild = args.iter().any(|a| a == "--rebuild");

    let config = Config::from_env()?;

    let pool = db::connect(&config.database_url, config.database_max_connections).await?;
    db::ensure_schema(&pool).await?;
    let read_model = Arc::new(PgReadModel::new(pool.clone()));

    if rebuild {
        // Stop the consumer first; a concurrent apply can be overwritten
        let log = BlobEventLog::new(FsBlobStore::open(&config.event_log_dir).await?);
        let report = jobs::rebuild_read_model(&log, read_model.as_ref()).await?;

        for error in &report.errors {
            tracing::warn!(error = %error, "Aggregate not rebuilt");
        }
        tracing::info!(
            accounts = report.accounts_rebuilt,
            events = report.events_replayed,
            "Rebuild finished"
        );

        pool.close().await;
        return Ok(());
    }

    let transport = RedisStreamsTransport::connect(
        &config.redis_url,
        &config.event_stream_key,
        &config.event_dlq_key,
    )
    .await?;
    let subscription = transport
        .subscribe(&config.projection_group, &config.projection_consumer, POLL_BLOCK)
        .await?;

    tracing::info!(
        stream = %config.event_stream_key,
        group = %config.projection_group,
        consumer = %config.projection_consumer,
        "Projection service started"
    );

    let consumer = ProjectionConsumer::new(
        subscription,
        read_model,
        ConsumerConfig {
            max_attempts: config.projection_max_attempts,
            ..ConsumerConfig::default()
        },
    );
    consumer.run(shutdown_signal()).await;

    pool.close().await;
    Ok(())
}
