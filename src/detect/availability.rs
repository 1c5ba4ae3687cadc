//! Availability tracking: markets that disappear from a bookmaker, and
//! markets that come back after a suspension.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::cache::CachedMarket;
use crate::store::MarketWrite;

use super::{market_key, MarketKey};

#[derive(Debug, Default)]
pub struct AvailabilityChanges {
    /// Previously available markets missing from the new scrape, returned
    /// with `unavailable_at` stamped.
    pub became_unavailable: Vec<CachedMarket>,
    /// Previously suspended markets present again, returned with the stamp
    /// cleared.
    pub became_available: Vec<CachedMarket>,
}

/// Compare the cached market set against a fresh scrape.
pub fn detect_changes(
    previous: &[CachedMarket],
    new_markets: &[MarketWrite],
    timestamp: DateTime<Utc>,
) -> AvailabilityChanges {
    let new_keys: HashSet<MarketKey> = new_markets
        .iter()
        .map(|m| market_key(&m.betpawa_market_id, m.line))
        .collect();

    let mut changes = AvailabilityChanges::default();

    for prev in previous {
        let key = market_key(&prev.betpawa_market_id, prev.line);
        let present = new_keys.contains(&key);

        if !present && prev.unavailable_at.is_none() {
            let mut suspended = prev.clone();
            suspended.unavailable_at = Some(timestamp);
            changes.became_unavailable.push(suspended);
        } else if present && prev.unavailable_at.is_some() {
            let mut returned = prev.clone();
            returned.unavailable_at = None;
            changes.became_available.push(returned);
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OutcomeOdds;

    fn cached(market_id: &str, line: Option<f64>, unavailable: bool) -> CachedMarket {
        CachedMarket {
            betpawa_market_id: market_id.to_string(),
            betpawa_market_name: "test".to_string(),
            line,
            handicap_type: None,
            handicap_home: None,
            handicap_away: None,
            outcomes: vec![OutcomeOdds {
                name: "1".to_string(),
                odds: 2.0,
                is_active: true,
            }],
            market_groups: None,
            unavailable_at: unavailable.then(Utc::now),
        }
    }

    fn scraped(market_id: &str, line: Option<f64>) -> MarketWrite {
        MarketWrite {
            betpawa_market_id: market_id.to_string(),
            betpawa_market_name: "test".to_string(),
            line,
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
        }
    }

    #[test]
    fn disappeared_market_is_stamped() {
        let now = Utc::now();
        let previous = vec![cached("3743", None, false), cached("5000", Some(2.5), false)];
        let fresh = vec![scraped("3743", None)];

        let changes = detect_changes(&previous, &fresh, now);
        assert_eq!(changes.became_unavailable.len(), 1);
        assert_eq!(changes.became_unavailable[0].betpawa_market_id, "5000");
        assert_eq!(changes.became_unavailable[0].unavailable_at, Some(now));
        assert!(changes.became_available.is_empty());
    }

    #[test]
    fn already_suspended_market_is_not_restamped() {
        let previous = vec![cached("5000", Some(2.5), true)];
        let changes = detect_changes(&previous, &[], Utc::now());
        assert!(changes.became_unavailable.is_empty());
        assert!(changes.became_available.is_empty());
    }

    #[test]
    fn returned_market_clears_the_stamp() {
        let previous = vec![cached("5000", Some(2.5), true)];
        let fresh = vec![scraped("5000", Some(2.5))];

        let changes = detect_changes(&previous, &fresh, Utc::now());
        assert!(changes.became_unavailable.is_empty());
        assert_eq!(changes.became_available.len(), 1);
        assert!(changes.became_available[0].unavailable_at.is_none());
    }

    #[test]
    fn line_participates_in_identity() {
        // The 2.5 line vanished even though a 3.5 line appeared.
        let previous = vec![cached("5000", Some(2.5), false)];
        let fresh = vec![scraped("5000", Some(3.5))];

        let changes = detect_changes(&previous, &fresh, Utc::now());
        assert_eq!(changes.became_unavailable.len(), 1);
    }
}
