//! Event-centric scraping coordinator.
//!
//! Orchestrates one full cycle: parallel discovery across all platforms,
//! priority queue by kickoff urgency and coverage, bounded per-event fan-out
//! within batches, then the store path (change detection, availability
//! tracking, risk detection, coordinator-session persistence, cache update,
//! write-queue handoff).
//!
//! Failure containment: an adapter error becomes a per-platform failure on
//! the event's status row; an event with no successful platform is recorded
//! and skipped; a batch whose DB work fails is abandoned while the cycle
//! continues.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::adapters::{betpawa, BookmakerAdapter, EventPayload, Platform};
use crate::cache::{CachedMarket, CachedSnapshot, OddsCache};
use crate::db;
use crate::detect::availability;
use crate::detect::change::{self, Classification};
use crate::detect::market_key;
use crate::detect::risk::{
    self, AlertThresholds, AvailabilityInput, BetpawaInput, CompetitorInput,
};
use crate::mapping::{self, MappedMarket, MappingCache, MappingErrorKind, MappingView, UnmappedEntry, UnmappedLogger};
use crate::settings::Settings;
use crate::store::{
    queue::AsyncWriteQueue, writer, AvailabilityUpdate, CompetitorSnapshotWrite, MarketWrite,
    OutcomeOdds, SnapshotWrite, WriteBatch,
};

use super::broadcaster::ProgressBroadcaster;
use super::types::{EventTarget, ProgressEvent, ScrapeBatch, ScrapeStatus};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub batch_size: usize,
    pub platform_concurrency: HashMap<Platform, usize>,
    pub max_concurrent_events: usize,
    /// Upper bound for one platform fetch within a batch.
    pub platform_timeout: Duration,
    pub thresholds: AlertThresholds,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let mut platform_concurrency = HashMap::new();
        platform_concurrency.insert(Platform::Betpawa, 50);
        platform_concurrency.insert(Platform::Sportybet, 50);
        platform_concurrency.insert(Platform::Bet9ja, 15);

        Self {
            batch_size: 50,
            platform_concurrency,
            max_concurrent_events: 10,
            platform_timeout: Duration::from_secs(300),
            thresholds: AlertThresholds::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut platform_concurrency = HashMap::new();
        platform_concurrency.insert(Platform::Betpawa, settings.betpawa_concurrency.max(1) as usize);
        platform_concurrency.insert(
            Platform::Sportybet,
            settings.sportybet_concurrency.max(1) as usize,
        );
        platform_concurrency.insert(Platform::Bet9ja, settings.bet9ja_concurrency.max(1) as usize);

        Self {
            batch_size: settings.batch_size.max(1) as usize,
            platform_concurrency,
            max_concurrent_events: settings.max_concurrent_events.max(1) as usize,
            platform_timeout: Duration::from_secs(300),
            thresholds: AlertThresholds::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct StoreOutcome {
    pub events_stored: usize,
    pub snapshots_created: usize,
    pub errors: usize,
}

#[derive(Debug, Default)]
pub struct CycleSummary {
    pub total_events: usize,
    pub events_scraped: usize,
    pub events_failed: usize,
    pub total_snapshots: usize,
    pub batch_count: usize,
    pub total_timing_ms: u64,
    pub discovery_timings_ms: HashMap<String, u64>,
}

impl CycleSummary {
    /// completed: every event had at least one successful platform;
    /// partial: mixed; failed: nothing succeeded.
    pub fn run_status(&self) -> &'static str {
        if self.events_failed == 0 {
            "completed"
        } else if self.events_scraped > 0 {
            "partial"
        } else {
            "failed"
        }
    }
}

struct BetpawaParsed {
    event_id: i32,
    bookmaker_id: i32,
    markets: Vec<MarketWrite>,
}

struct CompetitorParsed {
    competitor_event_id: i32,
    /// Canonical event ID once matched; None until the BetPawa event exists.
    event_id: Option<i32>,
    source: Platform,
    markets: Vec<MarketWrite>,
}

pub struct EventCoordinator {
    adapters: HashMap<Platform, Arc<dyn BookmakerAdapter>>,
    config: CoordinatorConfig,
    cache: Arc<OddsCache>,
    mappings: Arc<MappingCache>,
    unmapped: Arc<UnmappedLogger>,
    write_queue: Option<Arc<AsyncWriteQueue>>,
    event_map: HashMap<String, EventTarget>,
    priority_queue: Vec<EventTarget>,
    discovery_timings_ms: HashMap<String, u64>,
    discovery_total_ms: u64,
}

impl EventCoordinator {
    pub fn new(
        adapters: Vec<Arc<dyn BookmakerAdapter>>,
        config: CoordinatorConfig,
        cache: Arc<OddsCache>,
        mappings: Arc<MappingCache>,
        unmapped: Arc<UnmappedLogger>,
        write_queue: Option<Arc<AsyncWriteQueue>>,
    ) -> Self {
        Self {
            adapters: adapters.into_iter().map(|a| (a.platform(), a)).collect(),
            config,
            cache,
            mappings,
            unmapped,
            write_queue,
            event_map: HashMap::new(),
            priority_queue: Vec::new(),
            discovery_timings_ms: HashMap::new(),
            discovery_total_ms: 0,
        }
    }

    // =====================================================================
    // Discovery
    // =====================================================================

    /// Discover events from every platform in parallel and merge them into
    /// the unified event map keyed by canonical ID.
    pub async fn discover_events(&mut self) -> usize {
        info!("Starting parallel event discovery");
        let wall_start = Instant::now();

        let adapters: Vec<(Platform, Arc<dyn BookmakerAdapter>)> = Platform::ALL
            .iter()
            .filter_map(|p| self.adapters.get(p).map(|a| (*p, a.clone())))
            .collect();

        let tasks = adapters.into_iter().map(|(platform, adapter)| async move {
            let started = Instant::now();
            let result = adapter.discover_events().await;
            (platform, result, started.elapsed().as_millis() as u64)
        });

        let mut discovery_counts: HashMap<String, usize> = HashMap::new();
        for (platform, result, elapsed_ms) in join_all(tasks).await {
            self.discovery_timings_ms
                .insert(platform.slug().to_string(), elapsed_ms);

            let events = match result {
                Ok(events) => events,
                Err(e) => {
                    error!(platform = %platform, error = %e, "Platform discovery failed");
                    discovery_counts.insert(platform.slug().to_string(), 0);
                    continue;
                }
            };
            discovery_counts.insert(platform.slug().to_string(), events.len());

            for discovered in events {
                let target = self
                    .event_map
                    .entry(discovered.sportradar_id.clone())
                    .or_insert_with(|| {
                        EventTarget::new(discovered.sportradar_id.clone(), discovered.kickoff)
                    });
                target.platforms.insert(platform);
                if !discovered.platform_id.is_empty() {
                    target.platform_ids.insert(platform, discovered.platform_id);
                }
            }
        }

        self.discovery_total_ms = wall_start.elapsed().as_millis() as u64;

        info!(
            merged = self.event_map.len(),
            total_ms = self.discovery_total_ms,
            ?discovery_counts,
            "Event discovery complete"
        );
        self.event_map.len()
    }

    pub fn discovery_counts(&self) -> HashMap<String, usize> {
        Platform::ALL
            .iter()
            .filter(|p| self.adapters.contains_key(p))
            .map(|p| {
                let count = self
                    .event_map
                    .values()
                    .filter(|e| e.platforms.contains(p))
                    .count();
                (p.slug().to_string(), count)
            })
            .collect()
    }

    // =====================================================================
    // Priority queue and batching
    // =====================================================================

    pub fn build_priority_queue(&mut self) -> usize {
        let now = Utc::now();
        let mut queue: Vec<EventTarget> = self.event_map.values().cloned().collect();
        queue.sort_by_key(|e| e.priority_key(now));
        self.priority_queue = queue;

        info!(total_events = self.priority_queue.len(), "Built priority queue");
        self.priority_queue.len()
    }

    pub fn next_batch(&mut self) -> Option<ScrapeBatch> {
        if self.priority_queue.is_empty() {
            return None;
        }
        let take = self.config.batch_size.min(self.priority_queue.len());
        let events: Vec<EventTarget> = self.priority_queue.drain(..take).collect();
        Some(ScrapeBatch::new(events))
    }

    pub fn clear(&mut self) {
        self.event_map.clear();
        self.priority_queue.clear();
        self.discovery_timings_ms.clear();
        self.discovery_total_ms = 0;
    }

    // =====================================================================
    // Batch scraping
    // =====================================================================

    /// Scrape every event in the batch: bounded event-level concurrency,
    /// per-platform gates, per-platform timeout. Progress events are
    /// published in completion order.
    async fn scrape_batch(
        &self,
        events: Vec<EventTarget>,
        run_id: i32,
        broadcaster: &ProgressBroadcaster,
    ) -> Vec<EventTarget> {
        let semaphores: HashMap<Platform, Arc<Semaphore>> = self
            .config
            .platform_concurrency
            .iter()
            .map(|(p, &limit)| (*p, Arc::new(Semaphore::new(limit))))
            .collect();
        let event_gate = Arc::new(Semaphore::new(self.config.max_concurrent_events));

        let semaphores = &semaphores;
        let event_gate = &event_gate;

        let tasks = events.into_iter().map(|mut event| async move {
            let _event_permit = event_gate.acquire().await.ok();
            event.status = ScrapeStatus::InProgress;

            broadcaster.publish(ProgressEvent::EventScraping {
                scrape_run_id: run_id,
                sportradar_id: event.sportradar_id.clone(),
                platforms_pending: event.platforms.iter().map(|p| p.slug().to_string()).collect(),
            });

            let started = Instant::now();
            let platforms: Vec<Platform> = event.platforms.iter().copied().collect();
            let platform_tasks = platforms.into_iter().filter_map(|platform| {
                let adapter = self.adapters.get(&platform)?.clone();
                let platform_id = event.platform_ids.get(&platform).cloned();
                let gate = semaphores.get(&platform).cloned();
                Some(async move {
                    let Some(platform_id) = platform_id else {
                        return (platform, Err("no platform id available".to_string()), 0u64);
                    };
                    let _permit = match &gate {
                        Some(g) => g.acquire().await.ok(),
                        None => None,
                    };
                    let fetch_start = Instant::now();
                    let outcome = match tokio::time::timeout(
                        self.config.platform_timeout,
                        adapter.fetch_event(&platform_id),
                    )
                    .await
                    {
                        Ok(Ok(payload)) => Ok(payload),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!(
                            "platform timed out after {}s",
                            self.config.platform_timeout.as_secs()
                        )),
                    };
                    (platform, outcome, fetch_start.elapsed().as_millis() as u64)
                })
            });

            let platform_results = join_all(platform_tasks).await;
            for (platform, outcome, elapsed_ms) in platform_results {
                event.platform_timings_ms.insert(platform, elapsed_ms);
                match outcome {
                    Ok(payload) => {
                        event.results.insert(platform, payload);
                    }
                    Err(message) => {
                        debug!(
                            platform = %platform,
                            sportradar_id = %event.sportradar_id,
                            error = %message,
                            "Platform scrape failed"
                        );
                        event.errors.insert(platform, message);
                    }
                }
            }

            event.timing_ms = started.elapsed().as_millis() as u64;
            event.status = if event.results.is_empty() {
                ScrapeStatus::Failed
            } else {
                ScrapeStatus::Completed
            };

            broadcaster.publish(ProgressEvent::EventScraped {
                scrape_run_id: run_id,
                sportradar_id: event.sportradar_id.clone(),
                platforms_scraped: event.results.keys().map(|p| p.slug().to_string()).collect(),
                platforms_failed: event.errors.keys().map(|p| p.slug().to_string()).collect(),
                timing_ms: event.timing_ms,
                platform_timings_ms: event
                    .platform_timings_ms
                    .iter()
                    .map(|(p, ms)| (p.slug().to_string(), *ms))
                    .collect(),
            });

            event
        });

        join_all(tasks).await
    }

    // =====================================================================
    // Storage
    // =====================================================================

    /// Persist one scraped batch.
    ///
    /// Coordinator-session rows (events, tournaments, links, status) commit
    /// here; snapshots, availability updates and alerts ride the write
    /// queue (or are written synchronously when no queue is wired in).
    pub async fn store_batch_results(
        &self,
        pool: &PgPool,
        batch: &ScrapeBatch,
        run_id: i32,
        batch_index: usize,
    ) -> Result<StoreOutcome, sqlx::Error> {
        let mut outcome = StoreOutcome::default();
        let view = self.mappings.view();

        let mut tx = pool.begin().await?;

        let bookmaker_ids = db::get_or_create_bookmakers(&mut tx).await?;
        let sr_ids: Vec<String> = batch
            .events
            .iter()
            .map(|e| e.sportradar_id.clone())
            .collect();
        let mut event_id_map = db::event_ids_by_sr(&mut tx, &sr_ids).await?;
        let mut competitor_event_map = db::competitor_event_ids_by_sr(&mut tx, &sr_ids).await?;
        let sport_id = db::get_or_create_football_sport(&mut tx).await?;

        let mut bp_parsed: Vec<BetpawaParsed> = Vec::new();
        let mut comp_parsed: Vec<CompetitorParsed> = Vec::new();

        for event in &batch.events {
            db::insert_event_scrape_status(&mut tx, run_id, event).await?;
            if event.results.is_empty() {
                outcome.errors += 1;
                continue;
            }

            // Reference platform first so competitor rows can link to the
            // canonical event created in the same batch.
            for platform in Platform::ALL {
                let Some(payload) = event.results.get(&platform) else {
                    continue;
                };
                let processed = self
                    .process_platform_result(
                        &mut tx,
                        &view,
                        event,
                        payload,
                        sport_id,
                        &bookmaker_ids,
                        &mut event_id_map,
                        &mut competitor_event_map,
                        &mut bp_parsed,
                        &mut comp_parsed,
                    )
                    .await;

                match processed {
                    Ok(()) => outcome.snapshots_created += 1,
                    Err(e) => {
                        warn!(
                            sportradar_id = %event.sportradar_id,
                            platform = %platform,
                            error = %e,
                            "Failed to process platform result"
                        );
                        outcome.errors += 1;
                    }
                }
            }

            outcome.events_stored += 1;
        }

        // Reconciliation: backfill canonical links and bookmaker rows for
        // competitor events processed before their BetPawa counterpart.
        db::link_competitor_events(&mut tx, &event_id_map).await?;
        for ((sr_id, source), _comp_id) in &competitor_event_map {
            let Some(&bp_event_id) = event_id_map.get(sr_id) else {
                continue;
            };
            let Some(&bookmaker_id) = bookmaker_ids.get(source) else {
                continue;
            };
            let external_id = batch
                .events
                .iter()
                .find(|e| &e.sportradar_id == sr_id)
                .and_then(|e| e.platform_ids.get(source).cloned())
                .unwrap_or_else(|| format!("sr:{sr_id}"));
            db::ensure_event_bookmaker(&mut tx, bp_event_id, bookmaker_id, &external_id).await?;
        }

        // Canonical event ID for every competitor row now that links exist.
        let comp_sr_by_id: HashMap<i32, String> = competitor_event_map
            .iter()
            .map(|((sr_id, _), id)| (*id, sr_id.clone()))
            .collect();
        for comp in &mut comp_parsed {
            if comp.event_id.is_none() {
                comp.event_id = comp_sr_by_id
                    .get(&comp.competitor_event_id)
                    .and_then(|sr| event_id_map.get(sr))
                    .copied();
            }
        }

        let now = Utc::now();
        let mut kickoffs: HashMap<i32, DateTime<Utc>> = HashMap::new();
        for event in &batch.events {
            if let Some(&event_id) = event_id_map.get(&event.sportradar_id) {
                kickoffs.insert(event_id, event.kickoff);
            }
        }

        // Change detection against the cache (previous state).
        let bp_entries: Vec<(BetpawaParsed, Classification)> = bp_parsed
            .into_iter()
            .map(|p| {
                let classification = change::classify_betpawa_snapshot(
                    &self.cache,
                    p.event_id,
                    p.bookmaker_id,
                    &p.markets,
                );
                (p, classification)
            })
            .collect();

        let comp_entries: Vec<(CompetitorParsed, Classification)> = comp_parsed
            .into_iter()
            .map(|p| {
                let classification = match p.event_id {
                    Some(event_id) => change::classify_competitor_snapshot(
                        &self.cache,
                        event_id,
                        p.source,
                        &p.markets,
                    ),
                    // Never matched to a canonical event: no cache baseline.
                    None => Classification::Changed,
                };
                (p, classification)
            })
            .collect();

        let changed_bp = bp_entries.iter().filter(|(_, c)| c.is_changed()).count();
        let changed_comp = comp_entries.iter().filter(|(_, c)| c.is_changed()).count();
        debug!(
            changed_bp,
            unchanged_bp = bp_entries.len() - changed_bp,
            changed_comp,
            unchanged_comp = comp_entries.len() - changed_comp,
            "Change detection complete"
        );

        // Availability flips against the cached state.
        let mut availability_bp: Vec<AvailabilityUpdate> = Vec::new();
        let mut availability_comp: Vec<AvailabilityUpdate> = Vec::new();
        let mut availability_inputs: Vec<AvailabilityInput> = Vec::new();
        let mut newly_unavailable: HashMap<(i32, Option<Platform>), Vec<CachedMarket>> =
            HashMap::new();

        for (p, _) in &bp_entries {
            let Some(prev) = self
                .cache
                .get_betpawa(p.event_id)
                .and_then(|m| m.get(&p.bookmaker_id).cloned())
            else {
                continue;
            };
            let changes = availability::detect_changes(&prev.markets, &p.markets, now);
            collect_availability(
                &changes,
                prev.snapshot_id,
                p.event_id,
                Platform::Betpawa,
                true,
                &mut availability_bp,
                &mut availability_inputs,
            );
            newly_unavailable.insert((p.event_id, None), changes.became_unavailable);
        }

        for (p, _) in &comp_entries {
            let Some(event_id) = p.event_id else { continue };
            let Some(prev) = self
                .cache
                .get_competitor(event_id)
                .and_then(|m| m.get(&p.source).cloned())
            else {
                continue;
            };
            let changes = availability::detect_changes(&prev.markets, &p.markets, now);
            collect_availability(
                &changes,
                prev.snapshot_id,
                event_id,
                p.source,
                false,
                &mut availability_comp,
                &mut availability_inputs,
            );
            newly_unavailable.insert((event_id, Some(p.source)), changes.became_unavailable);
        }

        // Risk detection while the cache still holds the previous state.
        let bp_inputs: Vec<BetpawaInput> = bp_entries
            .iter()
            .map(|(p, c)| BetpawaInput {
                event_id: p.event_id,
                bookmaker_id: p.bookmaker_id,
                changed: c.is_changed(),
                markets: &p.markets,
            })
            .collect();
        let comp_inputs: Vec<CompetitorInput> = comp_entries
            .iter()
            .filter_map(|(p, c)| {
                p.event_id.map(|event_id| CompetitorInput {
                    event_id,
                    source: p.source,
                    changed: c.is_changed(),
                    markets: &p.markets,
                })
            })
            .collect();

        let risk_alerts = risk::detect_risk_alerts(
            &self.cache,
            &bp_inputs,
            &comp_inputs,
            &availability_inputs,
            &kickoffs,
            &self.config.thresholds,
            now,
        );
        if !risk_alerts.is_empty() {
            info!(count = risk_alerts.len(), "Risk alerts detected");
        }

        // Commit coordinator-session rows before handing snapshots to the
        // write worker.
        tx.commit().await?;

        // Refresh the cache for every touched pair, changed and unchanged,
        // so the next cycle compares against the freshest state.
        for (p, classification) in &bp_entries {
            let prev = self
                .cache
                .get_betpawa(p.event_id)
                .and_then(|m| m.get(&p.bookmaker_id).cloned());
            let snapshot = build_cached_snapshot(
                classification,
                p.event_id,
                p.bookmaker_id,
                &p.markets,
                prev.as_deref(),
                newly_unavailable
                    .get(&(p.event_id, None))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
                now,
            );
            self.cache.put_betpawa(
                p.event_id,
                p.bookmaker_id,
                Arc::new(snapshot),
                kickoffs.get(&p.event_id).copied(),
            );
        }

        for (p, classification) in &comp_entries {
            let Some(event_id) = p.event_id else { continue };
            let prev = self
                .cache
                .get_competitor(event_id)
                .and_then(|m| m.get(&p.source).cloned());
            let snapshot = build_cached_snapshot(
                classification,
                event_id,
                0,
                &p.markets,
                prev.as_deref(),
                newly_unavailable
                    .get(&(event_id, Some(p.source)))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
                now,
            );
            self.cache.put_competitor(
                event_id,
                p.source,
                Arc::new(snapshot),
                kickoffs.get(&event_id).copied(),
            );
        }

        // Hand the snapshot work to the write queue, or fall back to a
        // synchronous write on this session's pool.
        let write_batch = WriteBatch {
            changed_betpawa: bp_entries
                .iter()
                .filter(|(_, c)| c.is_changed())
                .map(|(p, _)| SnapshotWrite {
                    event_id: p.event_id,
                    bookmaker_id: p.bookmaker_id,
                    scrape_run_id: Some(run_id),
                    markets: p.markets.clone(),
                })
                .collect(),
            changed_competitor: comp_entries
                .iter()
                .filter(|(_, c)| c.is_changed())
                .map(|(p, _)| CompetitorSnapshotWrite {
                    competitor_event_id: p.competitor_event_id,
                    scrape_run_id: Some(run_id),
                    markets: p.markets.clone(),
                })
                .collect(),
            unchanged_betpawa_ids: bp_entries
                .iter()
                .filter_map(|(_, c)| match c {
                    Classification::Unchanged { snapshot_id } => Some(*snapshot_id),
                    Classification::Changed => None,
                })
                .collect(),
            unchanged_competitor_ids: comp_entries
                .iter()
                .filter_map(|(_, c)| match c {
                    Classification::Unchanged { snapshot_id } => Some(*snapshot_id),
                    Classification::Changed => None,
                })
                .collect(),
            scrape_run_id: Some(run_id),
            batch_index,
            availability_betpawa: availability_bp,
            availability_competitor: availability_comp,
            risk_alerts,
        };

        if !write_batch.is_empty() {
            match &self.write_queue {
                Some(queue) => {
                    queue.enqueue(write_batch).await;
                }
                None => {
                    writer::handle_write_batch(pool, &write_batch).await?;
                }
            }
        }

        Ok(outcome)
    }

    /// Persist identity rows for one platform result and stage its parsed
    /// markets for the snapshot path.
    #[allow(clippy::too_many_arguments)]
    async fn process_platform_result(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        view: &MappingView,
        event: &EventTarget,
        payload: &EventPayload,
        sport_id: i32,
        bookmaker_ids: &HashMap<Platform, i32>,
        event_id_map: &mut HashMap<String, i32>,
        competitor_event_map: &mut HashMap<(String, Platform), i32>,
        bp_parsed: &mut Vec<BetpawaParsed>,
        comp_parsed: &mut Vec<CompetitorParsed>,
    ) -> Result<(), sqlx::Error> {
        match payload {
            EventPayload::Betpawa(raw) => {
                let Some(&bookmaker_id) = bookmaker_ids.get(&Platform::Betpawa) else {
                    return Ok(());
                };

                let event_id = match event_id_map.get(&event.sportradar_id) {
                    Some(&id) => id,
                    None => {
                        let competition = raw
                            .competition
                            .as_ref()
                            .and_then(|c| c.name.clone())
                            .unwrap_or_else(|| "Unknown".to_string());
                        let region = raw.region.as_ref().and_then(|r| r.name.clone());
                        let tournament_id = db::get_or_create_tournament(
                            tx,
                            sport_id,
                            &competition,
                            region.as_deref(),
                        )
                        .await?;

                        let name = raw
                            .name
                            .clone()
                            .unwrap_or_else(|| format!("{} - {}", raw.home_team(), raw.away_team()));
                        let kickoff = raw.kickoff().unwrap_or(event.kickoff);
                        let id = db::create_event(
                            tx,
                            &event.sportradar_id,
                            tournament_id,
                            &name,
                            raw.home_team(),
                            raw.away_team(),
                            kickoff,
                        )
                        .await?;

                        let platform_id = event
                            .platform_ids
                            .get(&Platform::Betpawa)
                            .cloned()
                            .or_else(|| raw.event_id())
                            .unwrap_or_default();
                        db::ensure_event_bookmaker(tx, id, bookmaker_id, &platform_id).await?;

                        event_id_map.insert(event.sportradar_id.clone(), id);
                        id
                    }
                };

                bp_parsed.push(BetpawaParsed {
                    event_id,
                    bookmaker_id,
                    markets: betpawa::parse_markets(raw),
                });
            }

            EventPayload::Sportybet(raw) => {
                let key = (event.sportradar_id.clone(), Platform::Sportybet);
                let competitor_event_id = match competitor_event_map.get(&key) {
                    Some(&id) => id,
                    None => {
                        let tournament_name = raw.tournament_name().unwrap_or("Unknown");
                        let tournament_external = raw
                            .tournament_id()
                            .map(str::to_string)
                            .unwrap_or_else(|| "discovered-sportybet".to_string());
                        let tournament_id = db::get_or_create_competitor_tournament(
                            tx,
                            Platform::Sportybet,
                            sport_id,
                            tournament_name,
                            &tournament_external,
                            raw.country(),
                        )
                        .await?;

                        let external_id = event
                            .platform_ids
                            .get(&Platform::Sportybet)
                            .cloned()
                            .unwrap_or_else(|| raw.event_id.clone());
                        let id = db::create_competitor_event(
                            tx,
                            Platform::Sportybet,
                            tournament_id,
                            &event.sportradar_id,
                            &external_id,
                            raw.home_team_name.as_deref().unwrap_or("Unknown"),
                            raw.away_team_name.as_deref().unwrap_or("Unknown"),
                            raw.kickoff().unwrap_or(event.kickoff),
                            event_id_map.get(&event.sportradar_id).copied(),
                        )
                        .await?;
                        competitor_event_map.insert(key, id);
                        id
                    }
                };

                comp_parsed.push(CompetitorParsed {
                    competitor_event_id,
                    event_id: event_id_map.get(&event.sportradar_id).copied(),
                    source: Platform::Sportybet,
                    markets: self.map_sportybet_markets(view, raw),
                });
            }

            EventPayload::Bet9ja(raw) => {
                let key = (event.sportradar_id.clone(), Platform::Bet9ja);
                let competitor_event_id = match competitor_event_map.get(&key) {
                    Some(&id) => id,
                    None => {
                        let tournament_name = raw.group_name.as_deref().unwrap_or("Unknown");
                        let tournament_external = raw
                            .group_id_string()
                            .unwrap_or_else(|| "discovered-bet9ja".to_string());
                        let tournament_id = db::get_or_create_competitor_tournament(
                            tx,
                            Platform::Bet9ja,
                            sport_id,
                            tournament_name,
                            &tournament_external,
                            raw.sport_group.as_deref(),
                        )
                        .await?;

                        let external_id = event
                            .platform_ids
                            .get(&Platform::Bet9ja)
                            .cloned()
                            .or_else(|| raw.event_id())
                            .unwrap_or_default();
                        let (home, away) = raw.teams();
                        let id = db::create_competitor_event(
                            tx,
                            Platform::Bet9ja,
                            tournament_id,
                            &event.sportradar_id,
                            &external_id,
                            &home,
                            &away,
                            raw.kickoff().unwrap_or(event.kickoff),
                            event_id_map.get(&event.sportradar_id).copied(),
                        )
                        .await?;
                        competitor_event_map.insert(key, id);
                        id
                    }
                };

                comp_parsed.push(CompetitorParsed {
                    competitor_event_id,
                    event_id: event_id_map.get(&event.sportradar_id).copied(),
                    source: Platform::Bet9ja,
                    markets: self.map_bet9ja_markets(view, raw),
                });
            }
        }

        Ok(())
    }

    fn map_sportybet_markets(
        &self,
        view: &MappingView,
        raw: &crate::adapters::sportybet::SportybetEventData,
    ) -> Vec<MarketWrite> {
        let mut writes = Vec::new();
        for market in &raw.markets {
            match mapping::sportybet::map_market(view, market) {
                Ok(mapped) => writes.push(market_write_from_mapped(&mapped)),
                Err(e) if e.kind == MappingErrorKind::UnknownMarket => {
                    let sample: Vec<_> = market
                        .outcomes
                        .iter()
                        .take(3)
                        .map(|o| serde_json::json!({"desc": o.desc, "odds": o.odds}))
                        .collect();
                    self.unmapped.log(UnmappedEntry {
                        source: Platform::Sportybet.slug().to_string(),
                        external_market_id: market.id.clone(),
                        market_name: market.desc.clone().or_else(|| market.name.clone()),
                        sample_outcomes: serde_json::to_value(sample).ok(),
                        seen_at: Utc::now(),
                    });
                }
                Err(e) => {
                    debug!(market_id = %market.id, error = %e, "SportyBet market dropped");
                }
            }
        }
        writes
    }

    fn map_bet9ja_markets(
        &self,
        view: &MappingView,
        raw: &crate::adapters::bet9ja::Bet9jaEvent,
    ) -> Vec<MarketWrite> {
        let odds = raw.odds_map();
        let (mapped, failures) = mapping::bet9ja::map_odds(view, &odds);

        for failure in failures {
            if failure.error.kind == MappingErrorKind::UnknownMarket {
                let sample: Vec<_> = failure
                    .sample_outcomes
                    .iter()
                    .map(|(suffix, odds)| serde_json::json!({"suffix": suffix, "odds": odds}))
                    .collect();
                self.unmapped.log(UnmappedEntry {
                    source: Platform::Bet9ja.slug().to_string(),
                    external_market_id: failure.market_key.clone(),
                    market_name: None,
                    sample_outcomes: serde_json::to_value(sample).ok(),
                    seen_at: Utc::now(),
                });
            } else {
                debug!(
                    market_key = %failure.market_key,
                    error = %failure.error,
                    "Bet9ja market dropped"
                );
            }
        }

        mapped.iter().map(market_write_from_mapped).collect()
    }

    // =====================================================================
    // Full cycle
    // =====================================================================

    pub async fn run_full_cycle(
        &mut self,
        pool: &PgPool,
        run_id: i32,
        broadcaster: &ProgressBroadcaster,
    ) -> Result<CycleSummary, sqlx::Error> {
        broadcaster.publish(ProgressEvent::CycleStart {
            scrape_run_id: run_id,
        });

        self.discover_events().await;
        broadcaster.publish(ProgressEvent::DiscoveryComplete {
            scrape_run_id: run_id,
            discovery_counts: self.discovery_counts(),
            total_events: self.event_map.len(),
            discovery_timings_ms: self.discovery_timings_ms.clone(),
            discovery_total_ms: self.discovery_total_ms,
        });

        let total_events = self.build_priority_queue();
        let batch_count = total_events.div_ceil(self.config.batch_size);
        broadcaster.publish(ProgressEvent::QueueBuilt {
            scrape_run_id: run_id,
            total_events,
            batch_count,
            batch_size: self.config.batch_size,
        });

        let mut summary = CycleSummary {
            total_events,
            ..Default::default()
        };
        let cycle_start = Instant::now();

        while let Some(mut batch) = self.next_batch() {
            let batch_index = summary.batch_count;
            broadcaster.publish(ProgressEvent::BatchStart {
                scrape_run_id: run_id,
                batch_id: batch.batch_id.clone(),
                batch_index,
                batch_count,
                event_count: batch.events.len(),
            });

            let scrape_start = Instant::now();
            batch.events = self
                .scrape_batch(std::mem::take(&mut batch.events), run_id, broadcaster)
                .await;
            let batch_scrape_ms = scrape_start.elapsed().as_millis() as u64;

            let store_start = Instant::now();
            let store_outcome = match self
                .store_batch_results(pool, &batch, run_id, batch_index)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The batch's DB work is lost but the cycle continues.
                    error!(batch_id = %batch.batch_id, error = %e, "Batch storage failed");
                    StoreOutcome {
                        errors: batch.events.len(),
                        ..Default::default()
                    }
                }
            };
            let batch_store_ms = store_start.elapsed().as_millis() as u64;

            let batch_success = batch
                .events
                .iter()
                .filter(|e| e.status == ScrapeStatus::Completed)
                .count();
            summary.events_scraped += batch_success;
            summary.events_failed += batch.events.len() - batch_success;
            summary.total_snapshots += store_outcome.snapshots_created;
            summary.batch_count += 1;

            broadcaster.publish(ProgressEvent::BatchComplete {
                scrape_run_id: run_id,
                batch_id: batch.batch_id.clone(),
                batch_index,
                events_stored: store_outcome.events_stored,
                snapshots_created: store_outcome.snapshots_created,
                errors: store_outcome.errors,
                batch_scrape_ms,
                batch_store_ms,
            });
        }

        if let Err(e) = self.unmapped.flush(pool).await {
            warn!(error = %e, "Unmapped market flush failed");
        }

        summary.total_timing_ms = cycle_start.elapsed().as_millis() as u64;
        summary.discovery_timings_ms = self.discovery_timings_ms.clone();
        broadcaster.publish(ProgressEvent::CycleComplete {
            scrape_run_id: run_id,
            total_events: summary.total_events,
            events_scraped: summary.events_scraped,
            events_failed: summary.events_failed,
            total_snapshots: summary.total_snapshots,
            batch_count: summary.batch_count,
            total_timing_ms: summary.total_timing_ms,
        });

        self.clear();
        Ok(summary)
    }
}

fn collect_availability(
    changes: &availability::AvailabilityChanges,
    snapshot_id: i64,
    event_id: i32,
    platform: Platform,
    is_reference: bool,
    updates: &mut Vec<AvailabilityUpdate>,
    inputs: &mut Vec<AvailabilityInput>,
) {
    for market in &changes.became_unavailable {
        if snapshot_id > 0 {
            updates.push(AvailabilityUpdate {
                snapshot_id,
                betpawa_market_id: market.betpawa_market_id.clone(),
                line: market.line,
                unavailable_at: market.unavailable_at,
            });
        }
        inputs.push(AvailabilityInput {
            event_id,
            bookmaker_slug: platform.slug().to_string(),
            market_id: market.betpawa_market_id.clone(),
            market_name: market.betpawa_market_name.clone(),
            line: market.line,
            suspended: true,
            is_reference,
        });
    }

    for market in &changes.became_available {
        if snapshot_id > 0 {
            updates.push(AvailabilityUpdate {
                snapshot_id,
                betpawa_market_id: market.betpawa_market_id.clone(),
                line: market.line,
                unavailable_at: None,
            });
        }
        inputs.push(AvailabilityInput {
            event_id,
            bookmaker_slug: platform.slug().to_string(),
            market_id: market.betpawa_market_id.clone(),
            market_name: market.betpawa_market_name.clone(),
            line: market.line,
            suspended: false,
            is_reference,
        });
    }
}

/// Rebuild the cached snapshot for one (event, bookmaker) after a scrape:
/// fresh markets, plus suspended markets carried forward so a later
/// reappearance can still be detected.
fn build_cached_snapshot(
    classification: &Classification,
    event_id: i32,
    bookmaker_id: i32,
    new_markets: &[MarketWrite],
    prev: Option<&CachedSnapshot>,
    newly_unavailable: &[CachedMarket],
    now: DateTime<Utc>,
) -> CachedSnapshot {
    let (snapshot_id, captured_at) = match classification {
        // Real ID assigned later by the write worker.
        Classification::Changed => (0, now),
        Classification::Unchanged { snapshot_id } => (
            *snapshot_id,
            prev.map(|p| p.captured_at).unwrap_or(now),
        ),
    };

    let mut markets = merge_cached_markets(new_markets, prev.map(|p| p.markets.as_slice()));
    markets.extend(newly_unavailable.iter().cloned());

    CachedSnapshot {
        snapshot_id,
        event_id,
        bookmaker_id,
        captured_at,
        last_confirmed_at: now,
        markets,
    }
}

/// Fresh markets plus previously suspended markets that are still absent.
fn merge_cached_markets(
    new_markets: &[MarketWrite],
    prev: Option<&[CachedMarket]>,
) -> Vec<CachedMarket> {
    let mut merged: Vec<CachedMarket> = new_markets.iter().map(CachedMarket::from_write).collect();

    if let Some(prev) = prev {
        let new_keys: HashSet<_> = new_markets
            .iter()
            .map(|m| market_key(&m.betpawa_market_id, m.line))
            .collect();
        for market in prev {
            if market.unavailable_at.is_some()
                && !new_keys.contains(&market_key(&market.betpawa_market_id, market.line))
            {
                merged.push(market.clone());
            }
        }
    }

    merged
}

fn market_write_from_mapped(mapped: &MappedMarket) -> MarketWrite {
    MarketWrite {
        betpawa_market_id: mapped.betpawa_market_id.clone(),
        betpawa_market_name: mapped.betpawa_market_name.clone(),
        // Handicap markets surface their home value as the line for lookups.
        line: mapped
            .line
            .or_else(|| mapped.handicap.as_ref().map(|h| h.home)),
        handicap_type: mapped.handicap.as_ref().map(|h| h.kind.clone()),
        handicap_home: mapped.handicap.as_ref().map(|h| h.home),
        handicap_away: mapped.handicap.as_ref().map(|h| h.away),
        outcomes: mapped
            .outcomes
            .iter()
            .map(|o| OutcomeOdds {
                name: o.betpawa_outcome_name.clone(),
                odds: o.odds,
                is_active: o.is_active,
            })
            .collect(),
        market_groups: None,
        unavailable_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::DiscoveredEvent;
    use crate::error::ScrapeError;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    struct StubAdapter {
        platform: Platform,
        events: Vec<DiscoveredEvent>,
        fail_discovery: bool,
    }

    #[async_trait]
    impl BookmakerAdapter for StubAdapter {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn discover_events(&self) -> Result<Vec<DiscoveredEvent>, ScrapeError> {
            if self.fail_discovery {
                return Err(ScrapeError::Network("discovery down".into()));
            }
            Ok(self.events.clone())
        }

        async fn fetch_event(&self, platform_id: &str) -> Result<EventPayload, ScrapeError> {
            Err(ScrapeError::InvalidEventId(platform_id.to_string()))
        }

        async fn check_health(&self) -> bool {
            true
        }
    }

    fn discovered(sr: &str, platform_id: &str, hours_out: i64) -> DiscoveredEvent {
        DiscoveredEvent {
            sportradar_id: sr.to_string(),
            kickoff: Utc::now() + ChronoDuration::hours(hours_out),
            platform_id: platform_id.to_string(),
        }
    }

    fn coordinator(adapters: Vec<Arc<dyn BookmakerAdapter>>, batch_size: usize) -> EventCoordinator {
        let config = CoordinatorConfig {
            batch_size,
            ..Default::default()
        };
        EventCoordinator::new(
            adapters,
            config,
            Arc::new(OddsCache::new()),
            Arc::new(MappingCache::new()),
            Arc::new(UnmappedLogger::new()),
            None,
        )
    }

    #[tokio::test]
    async fn discovery_merges_platforms_by_canonical_id() {
        let mut coord = coordinator(
            vec![
                Arc::new(StubAdapter {
                    platform: Platform::Betpawa,
                    events: vec![discovered("100", "bp-1", 3), discovered("200", "bp-2", 4)],
                    fail_discovery: false,
                }),
                Arc::new(StubAdapter {
                    platform: Platform::Sportybet,
                    events: vec![discovered("100", "sr:match:100", 3)],
                    fail_discovery: false,
                }),
                Arc::new(StubAdapter {
                    platform: Platform::Bet9ja,
                    events: vec![],
                    fail_discovery: true,
                }),
            ],
            50,
        );

        let merged = coord.discover_events().await;
        assert_eq!(merged, 2);

        let shared = &coord.event_map["100"];
        assert_eq!(shared.coverage_count(), 2);
        assert!(shared.has_betpawa());
        assert_eq!(shared.platform_ids[&Platform::Betpawa], "bp-1");
        assert_eq!(shared.platform_ids[&Platform::Sportybet], "sr:match:100");

        let counts = coord.discovery_counts();
        assert_eq!(counts["betpawa"], 2);
        assert_eq!(counts["sportybet"], 1);
        assert_eq!(counts["bet9ja"], 0);
    }

    #[tokio::test]
    async fn batches_drain_the_priority_queue_in_order() {
        let mut coord = coordinator(
            vec![Arc::new(StubAdapter {
                platform: Platform::Betpawa,
                events: vec![
                    discovered("late", "1", 10),
                    discovered("imminent", "2", 0),
                    discovered("soon", "3", 1),
                ],
                fail_discovery: false,
            })],
            2,
        );

        coord.discover_events().await;
        coord.build_priority_queue();

        let first = coord.next_batch().unwrap();
        assert_eq!(first.events.len(), 2);
        assert_eq!(first.events[0].sportradar_id, "imminent");
        assert_eq!(first.events[1].sportradar_id, "soon");

        let second = coord.next_batch().unwrap();
        assert_eq!(second.events.len(), 1);
        assert_eq!(second.events[0].sportradar_id, "late");

        assert!(coord.next_batch().is_none());
    }

    #[test]
    fn run_status_bands() {
        let completed = CycleSummary {
            total_events: 3,
            events_scraped: 3,
            ..Default::default()
        };
        assert_eq!(completed.run_status(), "completed");

        let partial = CycleSummary {
            total_events: 3,
            events_scraped: 2,
            events_failed: 1,
            ..Default::default()
        };
        assert_eq!(partial.run_status(), "partial");

        let failed = CycleSummary {
            total_events: 3,
            events_failed: 3,
            ..Default::default()
        };
        assert_eq!(failed.run_status(), "failed");
    }

    #[test]
    fn merge_keeps_suspended_markets_until_they_return() {
        let fresh = vec![MarketWrite {
            betpawa_market_id: "3743".to_string(),
            betpawa_market_name: "1X2 - Full Time".to_string(),
            line: None,
            handicap_type: None,
            handicap_home: None,
            handicap_away: None,
            outcomes: vec![OutcomeOdds {
                name: "1".to_string(),
                odds: 2.0,
                is_active: true,
            }],
            market_groups: None,
            unavailable_at: None,
        }];

        let mut suspended = CachedMarket::from_write(&fresh[0]);
        suspended.betpawa_market_id = "5000".to_string();
        suspended.line = Some(2.5);
        suspended.unavailable_at = Some(Utc::now());

        let prev = vec![CachedMarket::from_write(&fresh[0]), suspended];
        let merged = merge_cached_markets(&fresh, Some(&prev));

        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|m| m.betpawa_market_id == "5000"
            && m.unavailable_at.is_some()));
        // An available previous market is superseded by the fresh copy.
        assert_eq!(
            merged
                .iter()
                .filter(|m| m.betpawa_market_id == "3743")
                .count(),
            1
        );
    }

    #[test]
    fn mapped_handicap_surfaces_home_value_as_line() {
        let mapped = MappedMarket {
            betpawa_market_id: "5100".to_string(),
            betpawa_market_name: "Asian Handicap - Full Time".to_string(),
            line: None,
            handicap: Some(crate::mapping::MappedHandicap {
                kind: "asian".to_string(),
                home: -0.5,
                away: 0.5,
            }),
            outcomes: vec![],
        };
        let write = market_write_from_mapped(&mapped);
        assert_eq!(write.line, Some(-0.5));
        assert_eq!(write.handicap_type.as_deref(), Some("asian"));
        assert_eq!(write.handicap_away, Some(0.5));
    }
}
