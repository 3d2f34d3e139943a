//! Outbox relay daemon.
//!
//! Wires the Postgres-backed stores, registers the application's event
//! handlers behind idempotency guards, and runs the dispatcher on its
//! interval until the process is asked to stop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use convene_events::InProcessPublisher;
use convene_outbox::{
    DispatcherSchedule, IdempotencyStore, IdempotentHandler, OutboxDispatcher,
    PostgresIdempotencyStore, PostgresOutboxStore,
};

mod handlers;

#[derive(Debug)]
struct RelayConfig {
    database_url: String,
    poll_interval: Duration,
    batch_size: usize,
}

impl RelayConfig {
    fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;

        let poll_interval = match std::env::var("OUTBOX_POLL_INTERVAL_SECS") {
            Ok(v) => Duration::from_secs(
                v.parse()
                    .context("OUTBOX_POLL_INTERVAL_SECS must be an integer")?,
            ),
            Err(_) => DispatcherSchedule::default().interval,
        };

        let batch_size = match std::env::var("OUTBOX_BATCH_SIZE") {
            Ok(v) => v.parse().context("OUTBOX_BATCH_SIZE must be an integer")?,
            Err(_) => convene_outbox::DEFAULT_BATCH_SIZE,
        };

        Ok(Self {
            database_url,
            poll_interval,
            batch_size,
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // JSON logs + timestamps, configurable via RUST_LOG.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = RelayConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;

    let outbox = Arc::new(PostgresOutboxStore::new(pool.clone()));
    let idempotency: Arc<dyn IdempotencyStore> =
        Arc::new(PostgresIdempotencyStore::new(pool));

    let mut publisher = InProcessPublisher::new();
    for handler in handlers::all() {
        publisher.register(Arc::new(IdempotentHandler::new(
            handler,
            idempotency.clone(),
        )));
    }
    tracing::info!(handlers = publisher.handler_count(), "handlers registered");

    let dispatcher = Arc::new(
        OutboxDispatcher::new(outbox, Arc::new(publisher)).with_batch_size(config.batch_size),
    );

    let scheduler = convene_outbox::scheduler::spawn(
        dispatcher,
        DispatcherSchedule {
            interval: config.poll_interval,
        },
    );

    tracing::info!(
        poll_interval_secs = config.poll_interval.as_secs(),
        batch_size = config.batch_size,
        "outbox relay started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutdown requested; draining in-flight run");
    scheduler.shutdown();
    scheduler.join().await;

    Ok(())
}
