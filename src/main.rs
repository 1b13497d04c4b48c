use anyhow::Context;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reservation_system::{
    config::{Config, LogFormat},
    database::Database,
    redis_client::RedisClient,
    repository::{postgres::PgStore, Repositories},
    services::lock::{AllocationLock, LocalAllocationLock, RedisAllocationLock},
    services::notification::{BrevoClient, LogOnlySender, NotificationSender},
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;

    let json = config.app.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .init();

    info!(
        "Starting reservation service ({})",
        config.app.environment
    );

    // Connect to the database
    let db = Database::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    db.ping().await.context("database did not answer")?;
    db.run_migrations()
        .await
        .context("failed to run migrations")?;
    let repos = Repositories::from_store(Arc::new(PgStore::new(db)));

    // Allocation lock: Redis when shared between nodes, in-process otherwise
    let lock_wait = Duration::from_millis(config.redis.lock_wait_ms);
    let lock: Arc<dyn AllocationLock> = match &config.redis.url {
        Some(url) => {
            let redis = RedisClient::connect(url)
                .await
                .context("failed to connect to Redis")?;
            redis.ping().await.context("Redis did not answer PING")?;
            Arc::new(RedisAllocationLock::new(
                redis,
                Duration::from_millis(config.redis.lock_ttl_ms),
                lock_wait,
            ))
        }
        None => {
            warn!("REDIS_URL not set, allocation lock is local to this process");
            Arc::new(LocalAllocationLock::with_wait(lock_wait))
        }
    };

    let sender: Arc<dyn NotificationSender> =
        match BrevoClient::from_config(&config.notifications, &config.circuit_breaker)
            .context("failed to build email client")?
        {
            Some(client) => Arc::new(client),
            None => {
                warn!("BREVO_API_KEY or DEFAULT_SENDER_EMAIL not set, emails will only be logged");
                Arc::new(LogOnlySender)
            }
        };

    let sweep_every = Duration::from_secs(config.app.sweep_interval_secs.max(1));
    let (state, dispatcher) = AppState::new(config, repos, lock, sender);
    let dispatcher = dispatcher.spawn();

    // --- Periodic sweeps ---
    let mut ticker = tokio::time::interval(sweep_every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Local::now().naive_local();
                match state.cleanup.run_full_cleanup(now).await {
                    Ok(report) => info!(
                        "sweep done: {} expired, {} no-shows",
                        report.expired_pending, report.no_shows
                    ),
                    Err(e) if e.is_retryable() => warn!("sweep skipped, next tick retries: {}", e),
                    Err(e) => error!("sweep failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    // Dropping every queue handle lets the dispatcher drain and stop
    drop(state);
    if tokio::time::timeout(Duration::from_secs(30), dispatcher)
        .await
        .is_err()
    {
        warn!("notification dispatcher did not drain within 30s");
    }
    info!("Reservation service stopped");
    Ok(())
}
