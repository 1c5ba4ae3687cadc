//! Startup warmup: populate the odds cache from the database.
//!
//! Loads the latest snapshot per (event, bookmaker) and per (event, source)
//! for events with kickoff in the future or within the last two hours, so
//! the first cycle after a restart compares against real state instead of
//! re-inserting everything.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;

use super::{CachedMarket, CachedSnapshot, OddsCache};
use crate::adapters::Platform;
use crate::store::OutcomeOdds;

#[derive(Debug, Default)]
pub struct WarmupStats {
    pub events: usize,
    pub betpawa_snapshots: usize,
    pub competitor_snapshots: usize,
}

fn market_from_row(row: &PgRow) -> CachedMarket {
    let outcomes: Vec<OutcomeOdds> = row
        .try_get::<Value, _>("outcomes")
        .ok()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let market_groups: Option<Vec<String>> = row
        .try_get::<Option<Value>, _>("market_groups")
        .ok()
        .flatten()
        .and_then(|v| serde_json::from_value(v).ok());

    CachedMarket {
        betpawa_market_id: row.get("betpawa_market_id"),
        betpawa_market_name: row.get("betpawa_market_name"),
        line: row.get("line"),
        handicap_type: row.get("handicap_type"),
        handicap_home: row.get("handicap_home"),
        handicap_away: row.get("handicap_away"),
        outcomes,
        market_groups,
        unavailable_at: row.get("unavailable_at"),
    }
}

async fn load_markets_for(
    pool: &PgPool,
    table: &str,
    snapshot_ids: &[i64],
) -> Result<HashMap<i64, Vec<CachedMarket>>, sqlx::Error> {
    let mut by_snapshot: HashMap<i64, Vec<CachedMarket>> = HashMap::new();
    if snapshot_ids.is_empty() {
        return Ok(by_snapshot);
    }

    let sql = format!(
        r#"
        SELECT snapshot_id, betpawa_market_id, betpawa_market_name, line,
               handicap_type, handicap_home, handicap_away, outcomes,
               market_groups, unavailable_at
        FROM {table}
        WHERE snapshot_id = ANY($1)
        ORDER BY id
        "#
    );

    let rows = sqlx::query(&sql).bind(snapshot_ids).fetch_all(pool).await?;
    for row in rows {
        let snapshot_id: i64 = row.get("snapshot_id");
        by_snapshot
            .entry(snapshot_id)
            .or_default()
            .push(market_from_row(&row));
    }
    Ok(by_snapshot)
}

pub async fn warm_cache_from_db(
    cache: &OddsCache,
    pool: &PgPool,
) -> Result<WarmupStats, sqlx::Error> {
    let cutoff = Utc::now() - Duration::hours(2);

    // 1. Upcoming (or just-started) events and their kickoffs.
    let event_rows = sqlx::query("SELECT id, kickoff FROM events WHERE kickoff > $1")
        .bind(cutoff)
        .fetch_all(pool)
        .await?;

    let mut kickoff_map: HashMap<i32, DateTime<Utc>> = HashMap::new();
    for row in &event_rows {
        kickoff_map.insert(row.get("id"), row.get("kickoff"));
    }
    let event_ids: Vec<i32> = kickoff_map.keys().copied().collect();

    let mut stats = WarmupStats {
        events: event_ids.len(),
        ..Default::default()
    };

    if event_ids.is_empty() {
        info!(%cutoff, "Cache warmup found no upcoming events");
        return Ok(stats);
    }

    // 2. Latest BetPawa snapshot per (event, bookmaker).
    let bp_rows = sqlx::query(
        r#"
        SELECT DISTINCT ON (event_id, bookmaker_id)
               id, event_id, bookmaker_id, captured_at, last_confirmed_at
        FROM odds_snapshots
        WHERE event_id = ANY($1)
        ORDER BY event_id, bookmaker_id, id DESC
        "#,
    )
    .bind(&event_ids)
    .fetch_all(pool)
    .await?;

    let bp_snapshot_ids: Vec<i64> = bp_rows.iter().map(|r| r.get::<i64, _>("id")).collect();
    let mut bp_markets = load_markets_for(pool, "market_odds", &bp_snapshot_ids).await?;

    for row in bp_rows {
        let snapshot_id: i64 = row.get("id");
        let event_id: i32 = row.get("event_id");
        let bookmaker_id: i32 = row.get("bookmaker_id");
        let captured_at: DateTime<Utc> = row.get("captured_at");
        let last_confirmed_at: Option<DateTime<Utc>> = row.get("last_confirmed_at");

        let snapshot = Arc::new(CachedSnapshot {
            snapshot_id,
            event_id,
            bookmaker_id,
            captured_at,
            last_confirmed_at: last_confirmed_at.unwrap_or(captured_at),
            markets: bp_markets.remove(&snapshot_id).unwrap_or_default(),
        });
        cache.put_betpawa(event_id, bookmaker_id, snapshot, kickoff_map.get(&event_id).copied());
        stats.betpawa_snapshots += 1;
    }

    // 3. Competitor events linked to those events, then their latest snapshots.
    let comp_event_rows = sqlx::query(
        r#"
        SELECT id, source, betpawa_event_id
        FROM competitor_events
        WHERE betpawa_event_id = ANY($1)
        "#,
    )
    .bind(&event_ids)
    .fetch_all(pool)
    .await?;

    let mut comp_event_info: HashMap<i32, (Platform, i32)> = HashMap::new();
    for row in &comp_event_rows {
        let source: String = row.get("source");
        let Some(platform) = Platform::from_slug(&source) else {
            continue;
        };
        comp_event_info.insert(row.get("id"), (platform, row.get("betpawa_event_id")));
    }

    if !comp_event_info.is_empty() {
        let comp_event_ids: Vec<i32> = comp_event_info.keys().copied().collect();
        let comp_rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (competitor_event_id)
                   id, competitor_event_id, captured_at, last_confirmed_at
            FROM competitor_odds_snapshots
            WHERE competitor_event_id = ANY($1)
            ORDER BY competitor_event_id, id DESC
            "#,
        )
        .bind(&comp_event_ids)
        .fetch_all(pool)
        .await?;

        let comp_snapshot_ids: Vec<i64> = comp_rows.iter().map(|r| r.get::<i64, _>("id")).collect();
        let mut comp_markets =
            load_markets_for(pool, "competitor_market_odds", &comp_snapshot_ids).await?;

        for row in comp_rows {
            let snapshot_id: i64 = row.get("id");
            let competitor_event_id: i32 = row.get("competitor_event_id");
            let Some((platform, betpawa_event_id)) = comp_event_info.get(&competitor_event_id)
            else {
                continue;
            };
            let captured_at: DateTime<Utc> = row.get("captured_at");
            let last_confirmed_at: Option<DateTime<Utc>> = row.get("last_confirmed_at");

            let snapshot = Arc::new(CachedSnapshot {
                snapshot_id,
                event_id: *betpawa_event_id,
                bookmaker_id: 0,
                captured_at,
                last_confirmed_at: last_confirmed_at.unwrap_or(captured_at),
                markets: comp_markets.remove(&snapshot_id).unwrap_or_default(),
            });
            cache.put_competitor(
                *betpawa_event_id,
                *platform,
                snapshot,
                kickoff_map.get(betpawa_event_id).copied(),
            );
            stats.competitor_snapshots += 1;
        }
    }

    let cache_stats = cache.stats();
    info!(
        events = stats.events,
        betpawa_snapshots = stats.betpawa_snapshots,
        competitor_snapshots = stats.competitor_snapshots,
        total_markets = cache_stats.total_markets,
        "Cache warmup complete"
    );

    Ok(stats)
}
