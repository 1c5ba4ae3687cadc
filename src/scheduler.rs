//! Scheduling: the periodic cycle driver, the stale-run watchdog and the
//! risk-alert sweep. All three run as long-lived tasks spawned from the
//! application root.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::adapters::bet9ja::Bet9jaClient;
use crate::adapters::betpawa::BetPawaClient;
use crate::adapters::sportybet::SportyBetClient;
use crate::adapters::{BookmakerAdapter, Platform};
use crate::cache::OddsCache;
use crate::config::Config;
use crate::db;
use crate::mapping::{MappingCache, UnmappedLogger};
use crate::scrape::{CoordinatorConfig, EventCoordinator, ProgressRegistry};
use crate::settings::Settings;
use crate::store::queue::AsyncWriteQueue;

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(300);
const STALE_THRESHOLD_MINUTES: i64 = 10;
const ALERT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Events older than this fall out of the odds cache after each cycle.
const CACHE_RETENTION_HOURS: i64 = 2;

/// Handles owned by the application root and shared by the background
/// tasks. No file-scope state: everything is wired in explicitly.
pub struct AppContext {
    pub pool: PgPool,
    pub config: Config,
    pub http: reqwest::Client,
    pub cache: Arc<OddsCache>,
    pub mappings: Arc<MappingCache>,
    pub unmapped: Arc<UnmappedLogger>,
    pub write_queue: Arc<AsyncWriteQueue>,
    pub registry: Arc<ProgressRegistry>,
}

/// Build adapters for the platforms enabled in settings. Rebuilt each cycle
/// so settings edits (concurrency, pacing delay) apply on the next cycle.
fn build_adapters(ctx: &AppContext, settings: &Settings) -> Vec<Arc<dyn BookmakerAdapter>> {
    let mut adapters: Vec<Arc<dyn BookmakerAdapter>> = Vec::new();

    if settings.platform_enabled(Platform::Betpawa.slug()) {
        adapters.push(Arc::new(BetPawaClient::new(
            ctx.http.clone(),
            ctx.config.betpawa_base_url.clone(),
        )));
    }
    if settings.platform_enabled(Platform::Sportybet.slug()) {
        adapters.push(Arc::new(SportyBetClient::new(
            ctx.http.clone(),
            ctx.config.sportybet_base_url.clone(),
        )));
    }
    if settings.platform_enabled(Platform::Bet9ja.slug()) {
        adapters.push(Arc::new(Bet9jaClient::new(
            ctx.http.clone(),
            ctx.config.bet9ja_base_url.clone(),
            settings.bet9ja_delay_ms.max(0) as u64,
        )));
    }

    adapters
}

/// Run one full scrape cycle end-to-end, bookkeeping included.
pub async fn run_scrape_cycle(ctx: &AppContext, settings: &Settings, trigger: &str) {
    let run_id = match db::create_scrape_run(&ctx.pool, trigger).await {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "Could not create scrape run");
            return;
        }
    };
    info!(run_id, trigger, "Created scrape run");

    let broadcaster = ctx.registry.create(run_id);
    let adapters = build_adapters(ctx, settings);
    let mut coordinator = EventCoordinator::new(
        adapters,
        CoordinatorConfig::from_settings(settings),
        ctx.cache.clone(),
        ctx.mappings.clone(),
        ctx.unmapped.clone(),
        Some(ctx.write_queue.clone()),
    );

    match coordinator.run_full_cycle(&ctx.pool, run_id, &broadcaster).await {
        Ok(summary) => {
            let status = summary.run_status();
            let timings = serde_json::to_value(&summary.discovery_timings_ms).ok();
            if let Err(e) = db::complete_scrape_run(
                &ctx.pool,
                run_id,
                status,
                summary.events_scraped,
                summary.events_failed,
                timings,
            )
            .await
            {
                error!(run_id, error = %e, "Could not finalize scrape run");
            }
            info!(
                run_id,
                status,
                events_scraped = summary.events_scraped,
                events_failed = summary.events_failed,
                snapshots = summary.total_snapshots,
                total_ms = summary.total_timing_ms,
                "Scrape run finished"
            );
        }
        Err(e) => {
            error!(run_id, error = %e, "Scrape cycle failed");
            if let Err(db_err) = db::fail_scrape_run(&ctx.pool, run_id, &e.to_string()).await {
                error!(run_id, error = %db_err, "Could not mark scrape run failed");
            }
        }
    }

    broadcaster.close();
    ctx.registry.remove(run_id);

    ctx.cache
        .evict_before(Utc::now() - chrono::Duration::hours(CACHE_RETENTION_HOURS));
}

/// Fire a full cycle on the configured interval. The settings row is
/// re-read before every cycle, so interval and tuning edits apply without a
/// restart.
pub async fn run_scheduler(ctx: Arc<AppContext>) {
    info!("Scheduler started");
    loop {
        let settings = match Settings::load_or_init(&ctx.pool).await {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "Could not load settings, using defaults");
                Settings::default()
            }
        };

        let interval_minutes = settings.scrape_interval_minutes.clamp(1, 60) as u64;
        tokio::time::sleep(Duration::from_secs(interval_minutes * 60)).await;

        if !ctx.config.scraping_enabled {
            debug!("Scraping disabled, skipping cycle");
            continue;
        }

        run_scrape_cycle(&ctx, &settings, "scheduled").await;
    }
}

/// Watchdog: fail runs stuck in `running` with no recent activity and
/// release their broadcasters.
pub async fn run_watchdog(ctx: Arc<AppContext>) {
    let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
    loop {
        interval.tick().await;
        match db::fail_stale_runs(&ctx.pool, chrono::Duration::minutes(STALE_THRESHOLD_MINUTES))
            .await
        {
            Ok(run_ids) => {
                for run_id in run_ids {
                    if let Some(broadcaster) = ctx.registry.get(run_id) {
                        broadcaster.close();
                    }
                    ctx.registry.remove(run_id);
                }
            }
            Err(e) => error!(error = %e, "Stale run sweep failed"),
        }
    }
}

/// Flip alerts whose event has kicked off to `past` on a fixed tick.
pub async fn run_alert_sweep(ctx: Arc<AppContext>) {
    let mut interval = tokio::time::interval(ALERT_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        match db::sweep_past_alerts(&ctx.pool).await {
            Ok(0) => {}
            Ok(flipped) => debug!(flipped, "Moved kicked-off alerts to past"),
            Err(e) => error!(error = %e, "Alert sweep failed"),
        }
    }
}
