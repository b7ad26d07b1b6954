use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bus_ticketing::{
    build_router,
    cache::CacheService,
    catalog::PgSeatCatalog,
    clock::SystemClock,
    config::Config,
    database::Database,
    redis_client::RedisClient,
    stores::PgBookingStore,
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.app.rust_log).unwrap_or_else(|_| EnvFilter::new("info"));
    let (json, text) = if config.json_logs() {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Invalid configuration")?;
    init_tracing(&config);

    info!("Starting Bus Ticketing API ({})", config.app.environment);

    // Connect to the database
    let db = Database::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    info!("Database connected");

    db.run_migrations().await.context("Failed to run migrations")?;

    // Connect to Redis
    let redis = RedisClient::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Redis connected");

    let catalog = Arc::new(CacheService::new(
        redis,
        PgSeatCatalog::new(db.pool.clone()),
        config.redis.seat_map_ttl_seconds,
    ));
    let bookings = Arc::new(PgBookingStore::new(db.pool.clone()));
    let app_state = AppState::new(config.clone(), catalog, bookings, Arc::new(SystemClock));

    // --- Start background tasks ---
    let sweeper = Arc::new(app_state.sweeper())
        .spawn(Duration::from_secs(config.seat_lock.sweep_interval_seconds));

    // --- Start the web server ---
    let app = build_router(app_state);

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("HOST/PORT do not form a socket address")?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server stopped");
    Ok(())
}
