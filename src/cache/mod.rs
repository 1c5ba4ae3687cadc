//! In-memory cache of the latest odds snapshot per (event, bookmaker).
//!
//! Snapshots are immutable records behind `Arc`: an update replaces the
//! whole snapshot with an atomic pointer swap, so readers never observe a
//! half-written record. The cache is the comparison baseline for change
//! detection and the freshness source for read-side consumers.

pub mod warmup;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use crate::adapters::Platform;
use crate::store::{MarketWrite, OutcomeOdds};

/// Immutable market data inside a cached snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMarket {
    pub betpawa_market_id: String,
    pub betpawa_market_name: String,
    pub line: Option<f64>,
    pub handicap_type: Option<String>,
    pub handicap_home: Option<f64>,
    pub handicap_away: Option<f64>,
    pub outcomes: Vec<OutcomeOdds>,
    pub market_groups: Option<Vec<String>>,
    /// Set while the market is missing from scrapes; cleared on return.
    pub unavailable_at: Option<DateTime<Utc>>,
}

impl CachedMarket {
    pub fn from_write(market: &MarketWrite) -> Self {
        Self {
            betpawa_market_id: market.betpawa_market_id.clone(),
            betpawa_market_name: market.betpawa_market_name.clone(),
            line: market.line,
            handicap_type: market.handicap_type.clone(),
            handicap_home: market.handicap_home,
            handicap_away: market.handicap_away,
            outcomes: market.outcomes.clone(),
            market_groups: market.market_groups.clone(),
            unavailable_at: market.unavailable_at,
        }
    }
}

/// Immutable odds snapshot; replaced wholesale on update.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    /// Row ID; 0 for changed snapshots whose real ID is not yet assigned by
    /// the write worker.
    pub snapshot_id: i64,
    pub event_id: i32,
    /// 0 for competitor snapshots (keyed by source instead).
    pub bookmaker_id: i32,
    pub captured_at: DateTime<Utc>,
    pub last_confirmed_at: DateTime<Utc>,
    pub markets: Vec<CachedMarket>,
}

impl CachedSnapshot {
    pub fn from_writes(
        snapshot_id: i64,
        event_id: i32,
        bookmaker_id: i32,
        captured_at: DateTime<Utc>,
        last_confirmed_at: DateTime<Utc>,
        markets: &[MarketWrite],
    ) -> Self {
        Self {
            snapshot_id,
            event_id,
            bookmaker_id,
            captured_at,
            last_confirmed_at,
            markets: markets.iter().map(CachedMarket::from_write).collect(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub betpawa_events: usize,
    pub competitor_events: usize,
    pub total_snapshots: usize,
    pub total_markets: usize,
}

/// Latest-snapshot cache keyed by canonical event ID.
#[derive(Default)]
pub struct OddsCache {
    betpawa: DashMap<i32, HashMap<i32, Arc<CachedSnapshot>>>,
    competitor: DashMap<i32, HashMap<Platform, Arc<CachedSnapshot>>>,
    kickoffs: DashMap<i32, DateTime<Utc>>,
}

impl OddsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_betpawa(&self, event_id: i32) -> Option<HashMap<i32, Arc<CachedSnapshot>>> {
        self.betpawa.get(&event_id).map(|e| e.value().clone())
    }

    pub fn get_competitor(&self, event_id: i32) -> Option<HashMap<Platform, Arc<CachedSnapshot>>> {
        self.competitor.get(&event_id).map(|e| e.value().clone())
    }

    pub fn put_betpawa(
        &self,
        event_id: i32,
        bookmaker_id: i32,
        snapshot: Arc<CachedSnapshot>,
        kickoff: Option<DateTime<Utc>>,
    ) {
        self.betpawa
            .entry(event_id)
            .or_default()
            .insert(bookmaker_id, snapshot);
        if let Some(kickoff) = kickoff {
            self.kickoffs.insert(event_id, kickoff);
        }
    }

    pub fn put_competitor(
        &self,
        event_id: i32,
        source: Platform,
        snapshot: Arc<CachedSnapshot>,
        kickoff: Option<DateTime<Utc>>,
    ) {
        self.competitor
            .entry(event_id)
            .or_default()
            .insert(source, snapshot);
        if let Some(kickoff) = kickoff {
            self.kickoffs.insert(event_id, kickoff);
        }
    }

    /// Drop events whose kickoff is before `cutoff`. Returns the count.
    pub fn evict_before(&self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<i32> = self
            .kickoffs
            .iter()
            .filter(|e| *e.value() < cutoff)
            .map(|e| *e.key())
            .collect();

        for event_id in &expired {
            self.betpawa.remove(event_id);
            self.competitor.remove(event_id);
            self.kickoffs.remove(event_id);
        }

        if !expired.is_empty() {
            info!(evicted = expired.len(), %cutoff, "Evicted expired events from odds cache");
        }
        expired.len()
    }

    pub fn clear(&self) {
        self.betpawa.clear();
        self.competitor.clear();
        self.kickoffs.clear();
        info!("Odds cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            betpawa_events: self.betpawa.len(),
            competitor_events: self.competitor.len(),
            ..Default::default()
        };
        for entry in self.betpawa.iter() {
            for snap in entry.value().values() {
                stats.total_snapshots += 1;
                stats.total_markets += snap.markets.len();
            }
        }
        for entry in self.competitor.iter() {
            for snap in entry.value().values() {
                stats.total_snapshots += 1;
                stats.total_markets += snap.markets.len();
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(event_id: i32, bookmaker_id: i32, snapshot_id: i64) -> Arc<CachedSnapshot> {
        let now = Utc::now();
        Arc::new(CachedSnapshot {
            snapshot_id,
            event_id,
            bookmaker_id,
            captured_at: now,
            last_confirmed_at: now,
            markets: vec![CachedMarket {
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
            }],
        })
    }

    #[test]
    fn put_replaces_previous_snapshot() {
        let cache = OddsCache::new();
        cache.put_betpawa(1, 1, snapshot(1, 1, 10), None);
        cache.put_betpawa(1, 1, snapshot(1, 1, 11), None);

        let by_bookmaker = cache.get_betpawa(1).unwrap();
        assert_eq!(by_bookmaker.len(), 1);
        assert_eq!(by_bookmaker[&1].snapshot_id, 11);
    }

    #[test]
    fn betpawa_and_competitor_sides_are_independent() {
        let cache = OddsCache::new();
        cache.put_betpawa(1, 1, snapshot(1, 1, 10), None);
        cache.put_competitor(1, Platform::Sportybet, snapshot(1, 0, 20), None);

        assert!(cache.get_betpawa(1).is_some());
        assert_eq!(
            cache.get_competitor(1).unwrap()[&Platform::Sportybet].snapshot_id,
            20
        );
        assert!(cache.get_competitor(2).is_none());
    }

    #[test]
    fn evicts_past_events_only() {
        let cache = OddsCache::new();
        let past = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap();
        cache.put_betpawa(1, 1, snapshot(1, 1, 10), Some(past));
        cache.put_betpawa(2, 1, snapshot(2, 1, 11), Some(future));
        cache.put_competitor(1, Platform::Bet9ja, snapshot(1, 0, 12), Some(past));

        let cutoff = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        assert_eq!(cache.evict_before(cutoff), 1);
        assert!(cache.get_betpawa(1).is_none());
        assert!(cache.get_competitor(1).is_none());
        assert!(cache.get_betpawa(2).is_some());
    }

    #[test]
    fn stats_count_snapshots_and_markets() {
        let cache = OddsCache::new();
        cache.put_betpawa(1, 1, snapshot(1, 1, 10), None);
        cache.put_competitor(1, Platform::Sportybet, snapshot(1, 0, 20), None);

        let stats = cache.stats();
        assert_eq!(stats.betpawa_events, 1);
        assert_eq!(stats.competitor_events, 1);
        assert_eq!(stats.total_snapshots, 2);
        assert_eq!(stats.total_markets, 2);
    }
}
