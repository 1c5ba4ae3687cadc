//! Merged view of compiled-in and user-defined market mappings.
//!
//! The view is rebuilt on load/reload and swapped in atomically, so readers
//! always see a fully-formed index and never block on a reload.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::info;

use super::defaults::market_mappings;
use super::types::{MappingSource, MarketMapping, OutcomeMapping};

/// Immutable index over the merged mapping table.
pub struct MappingView {
    by_canonical: HashMap<String, Arc<MarketMapping>>,
    by_betpawa: HashMap<String, Arc<MarketMapping>>,
    by_sportybet: HashMap<String, Arc<MarketMapping>>,
    // Prefix-matched, longest prefix first so "S_1X2HND" never falls into
    // the "S_1X2" bucket.
    by_bet9ja: Vec<(String, Arc<MarketMapping>)>,
    pub code_count: usize,
    pub db_count: usize,
}

impl MappingView {
    pub fn find_by_canonical_id(&self, id: &str) -> Option<&Arc<MarketMapping>> {
        self.by_canonical.get(id)
    }

    pub fn find_by_betpawa_id(&self, id: &str) -> Option<&Arc<MarketMapping>> {
        self.by_betpawa.get(id)
    }

    pub fn find_by_sportybet_id(&self, id: &str) -> Option<&Arc<MarketMapping>> {
        self.by_sportybet.get(id)
    }

    /// Bet9ja keys are structured `S_<MARKET>[@<PARAM>]_<OUTCOME>`; only the
    /// `S_<MARKET>` prefix selects the mapping.
    pub fn find_by_bet9ja_key(&self, key: &str) -> Option<&Arc<MarketMapping>> {
        self.by_bet9ja
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, m)| m)
    }

    pub fn len(&self) -> usize {
        self.by_canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_canonical.is_empty()
    }
}

/// Merge code and DB mappings; DB wins on canonical-ID conflict.
pub fn build_view(code: Vec<MarketMapping>, db: Vec<MarketMapping>) -> MappingView {
    let code_count = code.len();
    let db_count = db.len();

    let mut merged: HashMap<String, Arc<MarketMapping>> = HashMap::new();
    for m in code {
        merged.insert(m.canonical_id.clone(), Arc::new(m));
    }
    for m in db {
        merged.insert(m.canonical_id.clone(), Arc::new(m));
    }

    let mut by_betpawa = HashMap::new();
    let mut by_sportybet = HashMap::new();
    let mut by_bet9ja: Vec<(String, Arc<MarketMapping>)> = Vec::new();

    for m in merged.values() {
        if let Some(id) = &m.betpawa_id {
            by_betpawa.insert(id.clone(), m.clone());
        }
        if let Some(id) = &m.sportybet_id {
            by_sportybet.insert(id.clone(), m.clone());
        }
        if let Some(key) = &m.bet9ja_key {
            by_bet9ja.push((key.clone(), m.clone()));
        }
    }
    by_bet9ja.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

    MappingView {
        by_canonical: merged,
        by_betpawa,
        by_sportybet,
        by_bet9ja,
        code_count,
        db_count,
    }
}

/// Thread-safe mapping cache with hot reload.
pub struct MappingCache {
    view: ArcSwap<MappingView>,
    loaded_at: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl MappingCache {
    /// Start with the compiled-in catalogue only; `load()` merges DB rows in.
    pub fn new() -> Self {
        Self {
            view: ArcSwap::from_pointee(build_view(market_mappings(), Vec::new())),
            loaded_at: std::sync::Mutex::new(None),
        }
    }

    /// Current merged view. The returned `Arc` stays valid across reloads,
    /// so it can be held over await points.
    pub fn view(&self) -> Arc<MappingView> {
        self.view.load_full()
    }

    /// Rebuild the merged view from code defaults plus active DB overrides
    /// and swap it in atomically.
    pub async fn load(&self, pool: &PgPool) -> Result<usize, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT canonical_id, name, betpawa_id, sportybet_id, bet9ja_key,
                   outcome_mapping, priority
            FROM user_market_mappings
            WHERE is_active = true
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut db_mappings = Vec::with_capacity(rows.len());
        for row in rows {
            let outcome_json: Value = row.get("outcome_mapping");
            let outcomes: Vec<OutcomeMapping> =
                serde_json::from_value(outcome_json).unwrap_or_default();

            db_mappings.push(MarketMapping {
                canonical_id: row.get("canonical_id"),
                name: row.get("name"),
                betpawa_id: row.get("betpawa_id"),
                sportybet_id: row.get("sportybet_id"),
                bet9ja_key: row.get("bet9ja_key"),
                outcomes,
                source: MappingSource::Db,
                priority: row.get("priority"),
            });
        }

        let view = build_view(market_mappings(), db_mappings);
        let total = view.len();
        info!(
            total,
            code = view.code_count,
            db = view.db_count,
            "Mapping cache loaded"
        );

        self.view.store(Arc::new(view));
        *self.loaded_at.lock().unwrap() = Some(Utc::now());
        Ok(total)
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        *self.loaded_at.lock().unwrap()
    }
}

impl Default for MappingCache {
    fn default() -> Self {
        Self::new()
    }
}
