//! Pool construction and the coordinator-session repository.
//!
//! These queries run on the coordinator's own transactions (events,
//! tournaments, links, run bookkeeping). Snapshot/market/alert writes live
//! in `store::writer` on the write worker's session; the two never share a
//! transaction.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, warn};

use crate::adapters::Platform;
use crate::scrape::types::EventTarget;

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600)) // 10 minutes
        .max_lifetime(Duration::from_secs(1800)) // 30 minutes
        .connect(database_url)
        .await
}

// ---------------------------------------------------------------------------
// Bookmakers / sports / tournaments
// ---------------------------------------------------------------------------

/// Get bookmaker IDs by slug, creating missing rows on first run.
pub async fn get_or_create_bookmakers(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<HashMap<Platform, i32>, sqlx::Error> {
    let rows = sqlx::query("SELECT id, slug FROM bookmakers")
        .fetch_all(&mut **tx)
        .await?;

    let mut by_platform: HashMap<Platform, i32> = HashMap::new();
    for row in rows {
        let slug: String = row.get("slug");
        if let Some(platform) = Platform::from_slug(&slug) {
            by_platform.insert(platform, row.get("id"));
        }
    }

    for platform in Platform::ALL {
        if by_platform.contains_key(&platform) {
            continue;
        }
        info!(slug = platform.slug(), "Creating missing bookmaker");
        let row = sqlx::query(
            "INSERT INTO bookmakers (name, slug, is_active) VALUES ($1, $2, true) RETURNING id",
        )
        .bind(platform.display_name())
        .bind(platform.slug())
        .fetch_one(&mut **tx)
        .await?;
        by_platform.insert(platform, row.get("id"));
    }

    Ok(by_platform)
}

pub async fn get_or_create_football_sport(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<i32, sqlx::Error> {
    let existing = sqlx::query("SELECT id FROM sports WHERE slug = 'football'")
        .fetch_optional(&mut **tx)
        .await?;
    if let Some(row) = existing {
        return Ok(row.get("id"));
    }

    let row = sqlx::query("INSERT INTO sports (name, slug) VALUES ('Football', 'football') RETURNING id")
        .fetch_one(&mut **tx)
        .await?;
    Ok(row.get("id"))
}

/// Find or create a tournament by (name, sport).
pub async fn get_or_create_tournament(
    tx: &mut Transaction<'_, Postgres>,
    sport_id: i32,
    name: &str,
    country: Option<&str>,
) -> Result<i32, sqlx::Error> {
    let existing = sqlx::query("SELECT id FROM tournaments WHERE name = $1 AND sport_id = $2")
        .bind(name)
        .bind(sport_id)
        .fetch_optional(&mut **tx)
        .await?;
    if let Some(row) = existing {
        return Ok(row.get("id"));
    }

    let row = sqlx::query(
        "INSERT INTO tournaments (sport_id, name, country) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(sport_id)
    .bind(name)
    .bind(country)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.get("id"))
}

/// Find or create a per-source tournament by (source, external_id).
pub async fn get_or_create_competitor_tournament(
    tx: &mut Transaction<'_, Postgres>,
    source: Platform,
    sport_id: i32,
    name: &str,
    external_id: &str,
    country_raw: Option<&str>,
) -> Result<i32, sqlx::Error> {
    let existing = sqlx::query(
        "SELECT id FROM competitor_tournaments WHERE source = $1 AND external_id = $2",
    )
    .bind(source.slug())
    .bind(external_id)
    .fetch_optional(&mut **tx)
    .await?;
    if let Some(row) = existing {
        return Ok(row.get("id"));
    }

    let row = sqlx::query(
        r#"
        INSERT INTO competitor_tournaments (source, sport_id, name, external_id, country_raw)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(source.slug())
    .bind(sport_id)
    .bind(name)
    .bind(external_id)
    .bind(country_raw)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.get("id"))
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub async fn event_ids_by_sr(
    tx: &mut Transaction<'_, Postgres>,
    sr_ids: &[String],
) -> Result<HashMap<String, i32>, sqlx::Error> {
    if sr_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query("SELECT id, sportradar_id FROM events WHERE sportradar_id = ANY($1)")
        .bind(sr_ids)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("sportradar_id"), row.get("id")))
        .collect())
}

pub async fn competitor_event_ids_by_sr(
    tx: &mut Transaction<'_, Postgres>,
    sr_ids: &[String],
) -> Result<HashMap<(String, Platform), i32>, sqlx::Error> {
    if sr_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query(
        "SELECT id, sportradar_id, source FROM competitor_events WHERE sportradar_id = ANY($1)",
    )
    .bind(sr_ids)
    .fetch_all(&mut **tx)
    .await?;

    let mut map = HashMap::new();
    for row in rows {
        let source: String = row.get("source");
        if let Some(platform) = Platform::from_slug(&source) {
            map.insert((row.get("sportradar_id"), platform), row.get("id"));
        }
    }
    Ok(map)
}

#[allow(clippy::too_many_arguments)]
pub async fn create_event(
    tx: &mut Transaction<'_, Postgres>,
    sr_id: &str,
    tournament_id: i32,
    name: &str,
    home_team: &str,
    away_team: &str,
    kickoff: DateTime<Utc>,
) -> Result<i32, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO events (tournament_id, name, home_team, away_team, kickoff, sportradar_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(tournament_id)
    .bind(name)
    .bind(home_team)
    .bind(away_team)
    .bind(kickoff)
    .bind(sr_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.get("id"))
}

#[allow(clippy::too_many_arguments)]
pub async fn create_competitor_event(
    tx: &mut Transaction<'_, Postgres>,
    source: Platform,
    tournament_id: i32,
    sr_id: &str,
    external_id: &str,
    home_team: &str,
    away_team: &str,
    kickoff: DateTime<Utc>,
    betpawa_event_id: Option<i32>,
) -> Result<i32, sqlx::Error> {
    let name = format!("{home_team} - {away_team}");
    let row = sqlx::query(
        r#"
        INSERT INTO competitor_events (
            source, tournament_id, sportradar_id, external_id, name,
            home_team, away_team, kickoff, betpawa_event_id
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(source.slug())
    .bind(tournament_id)
    .bind(sr_id)
    .bind(external_id)
    .bind(name)
    .bind(home_team)
    .bind(away_team)
    .bind(kickoff)
    .bind(betpawa_event_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.get("id"))
}

pub async fn ensure_event_bookmaker(
    tx: &mut Transaction<'_, Postgres>,
    event_id: i32,
    bookmaker_id: i32,
    external_event_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO event_bookmakers (event_id, bookmaker_id, external_event_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (event_id, bookmaker_id) DO NOTHING
        "#,
    )
    .bind(event_id)
    .bind(bookmaker_id)
    .bind(external_event_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Backfill `betpawa_event_id` on competitor events created before the
/// canonical event existed (competitor processed first within a batch).
pub async fn link_competitor_events(
    tx: &mut Transaction<'_, Postgres>,
    event_id_map: &HashMap<String, i32>,
) -> Result<(), sqlx::Error> {
    for (sr_id, event_id) in event_id_map {
        sqlx::query(
            r#"
            UPDATE competitor_events
            SET betpawa_event_id = $1
            WHERE sportradar_id = $2 AND betpawa_event_id IS NULL
            "#,
        )
        .bind(event_id)
        .bind(sr_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scrape runs and per-event status
// ---------------------------------------------------------------------------

pub async fn insert_event_scrape_status(
    tx: &mut Transaction<'_, Postgres>,
    scrape_run_id: i32,
    event: &EventTarget,
) -> Result<(), sqlx::Error> {
    let requested: Vec<&str> = event.platforms.iter().map(|p| p.slug()).collect();
    let scraped: Vec<&str> = event.results.keys().map(|p| p.slug()).collect();
    let failed: Vec<&str> = event.errors.keys().map(|p| p.slug()).collect();
    let error_details = if event.errors.is_empty() {
        None
    } else {
        let details: HashMap<&str, &str> = event
            .errors
            .iter()
            .map(|(p, e)| (p.slug(), e.as_str()))
            .collect();
        Some(serde_json::to_value(details).unwrap_or_default())
    };

    let status = if event.results.is_empty() { "failed" } else { "completed" };

    sqlx::query(
        r#"
        INSERT INTO event_scrape_status (
            scrape_run_id, sportradar_id, status,
            platforms_requested, platforms_scraped, platforms_failed,
            timing_ms, error_details
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(scrape_run_id)
    .bind(&event.sportradar_id)
    .bind(status)
    .bind(serde_json::to_value(requested).unwrap_or_default())
    .bind(serde_json::to_value(scraped).unwrap_or_default())
    .bind(serde_json::to_value(failed).unwrap_or_default())
    .bind(event.timing_ms as i64)
    .bind(error_details)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn create_scrape_run(pool: &PgPool, trigger: &str) -> Result<i32, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO scrape_runs (status, trigger) VALUES ('running', $1) RETURNING id",
    )
    .bind(trigger)
    .fetch_one(pool)
    .await?;
    Ok(row.get("id"))
}

pub async fn complete_scrape_run(
    pool: &PgPool,
    run_id: i32,
    status: &str,
    events_scraped: usize,
    events_failed: usize,
    platform_timings: Option<Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE scrape_runs
        SET status = $1, events_scraped = $2, events_failed = $3,
            platform_timings = $4, completed_at = NOW()
        WHERE id = $5
        "#,
    )
    .bind(status)
    .bind(events_scraped as i32)
    .bind(events_failed as i32)
    .bind(platform_timings)
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fail_scrape_run(pool: &PgPool, run_id: i32, message: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE scrape_runs SET status = 'failed', completed_at = NOW() WHERE id = $1")
        .bind(run_id)
        .execute(pool)
        .await?;
    sqlx::query(
        "INSERT INTO scrape_errors (scrape_run_id, error_type, error_message) VALUES ($1, $2, $3)",
    )
    .bind(run_id)
    .bind("coordinator")
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Any run still `running` at startup was orphaned by a previous process.
pub async fn recover_stale_runs_on_startup(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let rows = sqlx::query(
        "UPDATE scrape_runs SET status = 'failed', completed_at = NOW() WHERE status = 'running' RETURNING id",
    )
    .fetch_all(pool)
    .await?;

    for row in &rows {
        let run_id: i32 = row.get("id");
        sqlx::query(
            "INSERT INTO scrape_errors (scrape_run_id, error_type, error_message) VALUES ($1, 'stale', $2)",
        )
        .bind(run_id)
        .bind("Run recovered on startup: process restarted while scrape was in progress")
        .execute(pool)
        .await?;
    }

    if !rows.is_empty() {
        warn!(count = rows.len(), "Recovered stale scrape runs on startup");
    }
    Ok(rows.len() as u64)
}

/// Watchdog: fail runs stuck in `running` with no per-event activity for
/// longer than the threshold. Returns the run IDs flipped.
pub async fn fail_stale_runs(
    pool: &PgPool,
    stale_threshold: chrono::Duration,
) -> Result<Vec<i32>, sqlx::Error> {
    let cutoff = Utc::now() - stale_threshold;
    let rows = sqlx::query(
        r#"
        UPDATE scrape_runs r
        SET status = 'failed', completed_at = NOW()
        WHERE r.status = 'running'
          AND COALESCE(
                (SELECT MAX(s.created_at) FROM event_scrape_status s WHERE s.scrape_run_id = r.id),
                r.started_at
              ) < $1
        RETURNING r.id
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    let mut run_ids = Vec::with_capacity(rows.len());
    for row in rows {
        let run_id: i32 = row.get("id");
        sqlx::query(
            "INSERT INTO scrape_errors (scrape_run_id, error_type, error_message) VALUES ($1, 'stale', $2)",
        )
        .bind(run_id)
        .bind(format!(
            "Run stuck in running with no activity since {cutoff}"
        ))
        .execute(pool)
        .await?;
        run_ids.push(run_id);
    }

    if !run_ids.is_empty() {
        warn!(count = run_ids.len(), "Marked stale scrape runs as failed");
    }
    Ok(run_ids)
}

/// Flip alerts whose event has kicked off to `past`. Past alerts are
/// immutable, so acknowledged/new both transition.
pub async fn sweep_past_alerts(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE risk_alerts SET status = 'past' WHERE status <> 'past' AND event_kickoff <= NOW()",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
