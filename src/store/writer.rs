//! Write handler: performs the actual DB operations for one `WriteBatch`
//! inside a single transaction on the worker's own connection.
//!
//! Ordering within a batch: reference snapshots before competitor snapshots,
//! snapshots before their market rows, unchanged-confirmation updates before
//! alert inserts. Market rows are only written with snapshot IDs that the
//! same transaction has already obtained.

use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};

use super::queue::{MarketWrite, WriteBatch};

#[derive(Debug, Default)]
pub struct WriteStats {
    pub inserted_betpawa: usize,
    pub inserted_competitor: usize,
    pub confirmed_betpawa: usize,
    pub confirmed_competitor: usize,
    pub availability_updates: usize,
    pub alerts_inserted: usize,
}

/// True for duplicate-key/FK violations raised by a concurrent run. Those
/// batches are dropped with a warning instead of retried.
fn is_integrity_error(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505" || code == "23503")
        .unwrap_or(false)
}

pub async fn handle_write_batch(
    pool: &PgPool,
    batch: &WriteBatch,
) -> Result<WriteStats, sqlx::Error> {
    let mut tx = pool.begin().await?;

    match write_batch_in_tx(&mut tx, batch).await {
        Ok(stats) => {
            tx.commit().await?;
            debug!(batch_index = batch.batch_index, "Write batch committed");
            Ok(stats)
        }
        Err(e) if is_integrity_error(&e) => {
            // Duplicate keys from a concurrent run; skip the batch.
            let _ = tx.rollback().await;
            warn!(
                batch_index = batch.batch_index,
                error = %e,
                "Integrity error, dropping write batch"
            );
            Ok(WriteStats::default())
        }
        Err(e) => {
            let _ = tx.rollback().await;
            Err(e)
        }
    }
}

async fn write_batch_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    batch: &WriteBatch,
) -> Result<WriteStats, sqlx::Error> {
    let mut stats = WriteStats::default();
    let now = Utc::now();

    // 1. Changed BetPawa snapshots, then their market rows.
    for swd in &batch.changed_betpawa {
        let row = sqlx::query(
            r#"
            INSERT INTO odds_snapshots (event_id, bookmaker_id, scrape_run_id, captured_at, last_confirmed_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING id
            "#,
        )
        .bind(swd.event_id)
        .bind(swd.bookmaker_id)
        .bind(swd.scrape_run_id)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;

        let snapshot_id: i64 = row.get("id");
        for market in &swd.markets {
            insert_market_row(tx, "market_odds", snapshot_id, market).await?;
        }
        stats.inserted_betpawa += 1;
    }

    // 2. Changed competitor snapshots, then their market rows.
    for cswd in &batch.changed_competitor {
        let row = sqlx::query(
            r#"
            INSERT INTO competitor_odds_snapshots (competitor_event_id, scrape_run_id, captured_at, last_confirmed_at)
            VALUES ($1, $2, $3, $3)
            RETURNING id
            "#,
        )
        .bind(cswd.competitor_event_id)
        .bind(cswd.scrape_run_id)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;

        let snapshot_id: i64 = row.get("id");
        for market in &cswd.markets {
            insert_market_row(tx, "competitor_market_odds", snapshot_id, market).await?;
        }
        stats.inserted_competitor += 1;
    }

    // 3. Confirm unchanged snapshots: only last_confirmed_at moves.
    if !batch.unchanged_betpawa_ids.is_empty() {
        sqlx::query("UPDATE odds_snapshots SET last_confirmed_at = $1 WHERE id = ANY($2)")
            .bind(now)
            .bind(&batch.unchanged_betpawa_ids)
            .execute(&mut **tx)
            .await?;
        stats.confirmed_betpawa = batch.unchanged_betpawa_ids.len();
    }

    if !batch.unchanged_competitor_ids.is_empty() {
        sqlx::query(
            "UPDATE competitor_odds_snapshots SET last_confirmed_at = $1 WHERE id = ANY($2)",
        )
        .bind(now)
        .bind(&batch.unchanged_competitor_ids)
        .execute(&mut **tx)
        .await?;
        stats.confirmed_competitor = batch.unchanged_competitor_ids.len();
    }

    // 4. Availability flag updates on existing market rows.
    for update in &batch.availability_betpawa {
        sqlx::query(
            r#"
            UPDATE market_odds
            SET unavailable_at = $1
            WHERE snapshot_id = $2 AND betpawa_market_id = $3 AND line IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(update.unavailable_at)
        .bind(update.snapshot_id)
        .bind(&update.betpawa_market_id)
        .bind(update.line)
        .execute(&mut **tx)
        .await?;
        stats.availability_updates += 1;
    }

    for update in &batch.availability_competitor {
        sqlx::query(
            r#"
            UPDATE competitor_market_odds
            SET unavailable_at = $1
            WHERE snapshot_id = $2 AND betpawa_market_id = $3 AND line IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(update.unavailable_at)
        .bind(update.snapshot_id)
        .bind(&update.betpawa_market_id)
        .bind(update.line)
        .execute(&mut **tx)
        .await?;
        stats.availability_updates += 1;
    }

    // 5. Risk alerts.
    for alert in &batch.risk_alerts {
        sqlx::query(
            r#"
            INSERT INTO risk_alerts (
                event_id, bookmaker_slug, market_id, market_name, line, outcome_name,
                alert_type, severity, change_percent, old_value, new_value,
                competitor_old_value, competitor_new_value, competitor_direction,
                detected_at, status, event_kickoff
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, 'new', $16)
            "#,
        )
        .bind(alert.event_id)
        .bind(&alert.bookmaker_slug)
        .bind(&alert.market_id)
        .bind(&alert.market_name)
        .bind(alert.line)
        .bind(&alert.outcome_name)
        .bind(&alert.alert_type)
        .bind(&alert.severity)
        .bind(alert.change_percent)
        .bind(alert.old_value)
        .bind(alert.new_value)
        .bind(alert.competitor_old_value)
        .bind(alert.competitor_new_value)
        .bind(&alert.competitor_direction)
        .bind(alert.detected_at)
        .bind(alert.event_kickoff)
        .execute(&mut **tx)
        .await?;
        stats.alerts_inserted += 1;
    }

    Ok(stats)
}

async fn insert_market_row(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    snapshot_id: i64,
    market: &MarketWrite,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO {table} (
            snapshot_id, betpawa_market_id, betpawa_market_name, line,
            handicap_type, handicap_home, handicap_away, outcomes, market_groups, unavailable_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#
    );

    let outcomes = serde_json::to_value(&market.outcomes).unwrap_or_default();
    let market_groups = market
        .market_groups
        .as_ref()
        .map(|g| serde_json::to_value(g).unwrap_or_default());

    sqlx::query(&sql)
        .bind(snapshot_id)
        .bind(&market.betpawa_market_id)
        .bind(&market.betpawa_market_name)
        .bind(market.line)
        .bind(&market.handicap_type)
        .bind(market.handicap_home)
        .bind(market.handicap_away)
        .bind(outcomes)
        .bind(market_groups)
        .bind(market.unavailable_at)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
