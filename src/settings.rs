use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::info;

/// Single-row runtime configuration (id = 1).
///
/// The scheduler re-reads this row before every cycle, so edits made through
/// the settings API take effect on the next cycle without a restart.
#[derive(Clone, Debug)]
pub struct Settings {
    pub scrape_interval_minutes: i32,
    pub enabled_platforms: Vec<String>,
    pub odds_retention_days: i32,
    pub match_retention_days: i32,
    pub cleanup_frequency_hours: i32,

    pub betpawa_concurrency: i32,
    pub sportybet_concurrency: i32,
    pub bet9ja_concurrency: i32,
    pub bet9ja_delay_ms: i32,
    pub batch_size: i32,
    pub max_concurrent_events: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scrape_interval_minutes: 5,
            enabled_platforms: vec![
                "betpawa".to_string(),
                "sportybet".to_string(),
                "bet9ja".to_string(),
            ],
            odds_retention_days: 30,
            match_retention_days: 30,
            cleanup_frequency_hours: 24,
            betpawa_concurrency: 50,
            sportybet_concurrency: 50,
            bet9ja_concurrency: 15,
            bet9ja_delay_ms: 25,
            batch_size: 50,
            max_concurrent_events: 10,
        }
    }
}

impl Settings {
    /// Load the settings row, inserting defaults on first run.
    pub async fn load_or_init(pool: &PgPool) -> Result<Settings, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT scrape_interval_minutes, enabled_platforms, odds_retention_days,
                   match_retention_days, cleanup_frequency_hours,
                   betpawa_concurrency, sportybet_concurrency, bet9ja_concurrency,
                   bet9ja_delay_ms, batch_size, max_concurrent_events
            FROM settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            let defaults = Settings::default();
            sqlx::query(
                r#"
                INSERT INTO settings (
                    id, scrape_interval_minutes, enabled_platforms, odds_retention_days,
                    match_retention_days, cleanup_frequency_hours,
                    betpawa_concurrency, sportybet_concurrency, bet9ja_concurrency,
                    bet9ja_delay_ms, batch_size, max_concurrent_events
                ) VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(defaults.scrape_interval_minutes)
            .bind(serde_json::json!(defaults.enabled_platforms))
            .bind(defaults.odds_retention_days)
            .bind(defaults.match_retention_days)
            .bind(defaults.cleanup_frequency_hours)
            .bind(defaults.betpawa_concurrency)
            .bind(defaults.sportybet_concurrency)
            .bind(defaults.bet9ja_concurrency)
            .bind(defaults.bet9ja_delay_ms)
            .bind(defaults.batch_size)
            .bind(defaults.max_concurrent_events)
            .execute(pool)
            .await?;

            info!("Inserted default settings row");
            return Ok(defaults);
        };

        let platforms: Value = row.get("enabled_platforms");
        let enabled_platforms = platforms
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_else(|| Settings::default().enabled_platforms);

        Ok(Settings {
            scrape_interval_minutes: row.get("scrape_interval_minutes"),
            enabled_platforms,
            odds_retention_days: row.get("odds_retention_days"),
            match_retention_days: row.get("match_retention_days"),
            cleanup_frequency_hours: row.get("cleanup_frequency_hours"),
            betpawa_concurrency: row.get("betpawa_concurrency"),
            sportybet_concurrency: row.get("sportybet_concurrency"),
            bet9ja_concurrency: row.get("bet9ja_concurrency"),
            bet9ja_delay_ms: row.get("bet9ja_delay_ms"),
            batch_size: row.get("batch_size"),
            max_concurrent_events: row.get("max_concurrent_events"),
        })
    }

    pub fn platform_enabled(&self, slug: &str) -> bool {
        self.enabled_platforms.iter().any(|p| p == slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_gates() {
        let s = Settings::default();
        assert_eq!(s.scrape_interval_minutes, 5);
        assert_eq!(s.betpawa_concurrency, 50);
        assert_eq!(s.sportybet_concurrency, 50);
        assert_eq!(s.bet9ja_concurrency, 15);
        assert_eq!(s.bet9ja_delay_ms, 25);
        assert_eq!(s.batch_size, 50);
        assert_eq!(s.max_concurrent_events, 10);
        assert!(s.platform_enabled("betpawa"));
        assert!(s.platform_enabled("bet9ja"));
        assert!(!s.platform_enabled("betking"));
    }
}
