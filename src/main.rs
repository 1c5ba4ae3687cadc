mod adapters;
mod cache;
mod config;
mod db;
mod detect;
mod error;
mod mapping;
mod scheduler;
mod scrape;
mod settings;
mod store;

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{warmup, OddsCache};
use crate::config::Config;
use crate::mapping::{MappingCache, UnmappedLogger};
use crate::scheduler::AppContext;
use crate::scrape::ProgressRegistry;
use crate::settings::Settings;
use crate::store::queue::AsyncWriteQueue;

const WRITE_QUEUE_DEPTH: usize = 50;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    dotenvy::dotenv().ok();

    info!("🚀 Starting odds comparison engine...");

    let config = Config::from_env();

    info!("🔌 Connecting to Postgres...");
    let pool = db::connect(&config.database_url).await?;
    info!("✅ Connected to Postgres");

    // Runs left in `running` by a previous process are failed before the
    // scheduler starts.
    db::recover_stale_runs_on_startup(&pool).await?;

    let settings = Settings::load_or_init(&pool).await?;

    let mappings = Arc::new(MappingCache::new());
    match mappings.load(&pool).await {
        Ok(count) => info!(count, "Market mappings loaded"),
        Err(e) => warn!(error = %e, "Mapping reload failed, using compiled-in mappings only"),
    }

    let cache = Arc::new(OddsCache::new());
    if let Err(e) = warmup::warm_cache_from_db(&cache, &pool).await {
        warn!(error = %e, "Cache warmup failed, starting cold");
    }

    let write_queue = AsyncWriteQueue::start(pool.clone(), WRITE_QUEUE_DEPTH);

    let ctx = Arc::new(AppContext {
        pool: pool.clone(),
        config,
        http: adapters::build_http_client(),
        cache,
        mappings,
        unmapped: Arc::new(UnmappedLogger::new()),
        write_queue: write_queue.clone(),
        registry: Arc::new(ProgressRegistry::new()),
    });

    tokio::spawn(scheduler::run_scheduler(ctx.clone()));
    tokio::spawn(scheduler::run_watchdog(ctx.clone()));
    tokio::spawn(scheduler::run_alert_sweep(ctx.clone()));

    info!(
        interval_minutes = settings.scrape_interval_minutes,
        platforms = ?settings.enabled_platforms,
        "✅ Odds comparison engine is ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining write queue...");
    write_queue.stop().await;
    info!("Bye");

    Ok(())
}
