//! Change detection for incremental upserts.
//!
//! Compares cached market data against a fresh scrape to decide whether a
//! snapshot must be inserted (odds changed) or merely confirmed (update
//! `last_confirmed_at` on the existing row). Most markets do not move
//! between five-minute cycles, so this removes the bulk of the write load.

use std::collections::HashMap;

use crate::adapters::Platform;
use crate::cache::{CachedMarket, OddsCache};
use crate::store::{MarketWrite, OutcomeOdds};

use super::{market_key, MarketKey};

/// Result of comparing one scraped snapshot against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Changed,
    /// Identical to the cached snapshot; only confirm this row ID.
    Unchanged { snapshot_id: i64 },
}

impl Classification {
    pub fn is_changed(&self) -> bool {
        matches!(self, Classification::Changed)
    }
}

/// Outcomes normalized to a sorted list so ordering differences between
/// scrapes never register as changes.
fn normalize_outcomes(outcomes: &[OutcomeOdds]) -> Vec<(&str, f64, bool)> {
    let mut normalized: Vec<(&str, f64, bool)> = outcomes
        .iter()
        .map(|o| (o.name.as_str(), o.odds, o.is_active))
        .collect();
    normalized.sort_by(|a, b| {
        a.0.cmp(b.0)
            .then_with(|| a.1.total_cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });
    normalized
}

/// Compare cached markets against a fresh scrape.
///
/// Markets already stamped `unavailable_at` are kept in the cache only so a
/// later reappearance can be detected; they are excluded here, otherwise a
/// suspended market would force a new snapshot every cycle through the
/// count check.
pub fn markets_changed(cached: Option<&[CachedMarket]>, new_markets: &[MarketWrite]) -> bool {
    let Some(cached) = cached else {
        // First scrape or cache miss.
        return true;
    };

    let available: Vec<&CachedMarket> = cached
        .iter()
        .filter(|m| m.unavailable_at.is_none())
        .collect();

    if available.len() != new_markets.len() {
        return true;
    }

    let cached_lookup: HashMap<MarketKey, &CachedMarket> = available
        .iter()
        .map(|m| (market_key(&m.betpawa_market_id, m.line), *m))
        .collect();

    for market in new_markets {
        let key = market_key(&market.betpawa_market_id, market.line);
        let Some(cached_market) = cached_lookup.get(&key) else {
            return true;
        };
        if normalize_outcomes(&cached_market.outcomes) != normalize_outcomes(&market.outcomes) {
            return true;
        }
    }

    false
}

pub fn classify_betpawa_snapshot(
    cache: &OddsCache,
    event_id: i32,
    bookmaker_id: i32,
    markets: &[MarketWrite],
) -> Classification {
    let cached_snap = cache
        .get_betpawa(event_id)
        .and_then(|by_bookmaker| by_bookmaker.get(&bookmaker_id).cloned());

    match cached_snap {
        Some(snap) if !markets_changed(Some(&snap.markets), markets) => Classification::Unchanged {
            snapshot_id: snap.snapshot_id,
        },
        _ => Classification::Changed,
    }
}

pub fn classify_competitor_snapshot(
    cache: &OddsCache,
    event_id: i32,
    source: Platform,
    markets: &[MarketWrite],
) -> Classification {
    let cached_snap = cache
        .get_competitor(event_id)
        .and_then(|by_source| by_source.get(&source).cloned());

    match cached_snap {
        Some(snap) if !markets_changed(Some(&snap.markets), markets) => Classification::Unchanged {
            snapshot_id: snap.snapshot_id,
        },
        _ => Classification::Changed,
    }
}
