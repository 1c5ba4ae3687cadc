//! Discovery log for markets with no mapping.
//!
//! Unknown markets seen while scraping are deduplicated in memory within a
//! cycle, then upserted into `unmapped_market_log` at cycle end so operators
//! can triage which mappings are worth adding.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct UnmappedEntry {
    pub source: String,
    pub external_market_id: String,
    pub market_name: Option<String>,
    /// First few outcomes, for reference when writing the mapping.
    pub sample_outcomes: Option<Value>,
    pub seen_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct UnmappedLogger {
    pending: DashMap<(String, String), UnmappedEntry>,
}

impl UnmappedLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an unmapped market. Deduplicates per (source, market id)
    /// within the cycle; returns true the first time the pair is seen.
    pub fn log(&self, entry: UnmappedEntry) -> bool {
        let key = (entry.source.clone(), entry.external_market_id.clone());
        let is_new = !self.pending.contains_key(&key);
        self.pending.insert(key, entry);
        is_new
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Upsert all pending entries. Existing rows get `occurrence_count`
    /// bumped and `last_seen_at` refreshed; fresh rows start at status
    /// `new`. Returns the number of newly discovered markets.
    pub async fn flush(&self, pool: &PgPool) -> Result<usize, sqlx::Error> {
        let entries: Vec<UnmappedEntry> = {
            let keys: Vec<(String, String)> =
                self.pending.iter().map(|e| e.key().clone()).collect();
            keys.iter()
                .filter_map(|k| self.pending.remove(k).map(|(_, v)| v))
                .collect()
        };

        if entries.is_empty() {
            return Ok(0);
        }

        let mut new_count = 0usize;
        let total = entries.len();

        for entry in entries {
            let result = sqlx::query(
                r#"
                INSERT INTO unmapped_market_log (
                    source, external_market_id, market_name, sample_outcomes,
                    first_seen_at, last_seen_at, occurrence_count, status
                ) VALUES ($1, $2, $3, $4, $5, $5, 1, 'new')
                ON CONFLICT (source, external_market_id) DO UPDATE SET
                    last_seen_at = EXCLUDED.last_seen_at,
                    occurrence_count = unmapped_market_log.occurrence_count + 1,
                    market_name = COALESCE(unmapped_market_log.market_name, EXCLUDED.market_name),
                    sample_outcomes = COALESCE(unmapped_market_log.sample_outcomes, EXCLUDED.sample_outcomes)
                RETURNING (occurrence_count = 1) AS inserted
                "#,
            )
            .bind(&entry.source)
            .bind(&entry.external_market_id)
            .bind(&entry.market_name)
            .bind(&entry.sample_outcomes)
            .bind(entry.seen_at)
            .fetch_one(pool)
            .await;

            match result {
                Ok(row) => {
                    if row.get::<bool, _>("inserted") {
                        new_count += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        source = %entry.source,
                        market_id = %entry.external_market_id,
                        error = %e,
                        "Failed to upsert unmapped market"
                    );
                }
            }
        }

        if new_count > 0 {
            info!(
                total_processed = total,
                new_markets = new_count,
                "Unmapped market log flushed"
            );
        }

        Ok(new_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, market_id: &str) -> UnmappedEntry {
        UnmappedEntry {
            source: source.to_string(),
            external_market_id: market_id.to_string(),
            market_name: None,
            sample_outcomes: None,
            seen_at: Utc::now(),
        }
    }

    #[test]
    fn deduplicates_within_cycle() {
        let logger = UnmappedLogger::new();
        assert!(logger.log(entry("bet9ja", "EXOTIC")));
        assert!(!logger.log(entry("bet9ja", "EXOTIC")));
        assert!(logger.log(entry("sportybet", "EXOTIC")));
        assert_eq!(logger.pending_count(), 2);
    }
}
