//! Risk detection: significant price moves, direction disagreements between
//! BetPawa and competitors, and market availability changes.
//!
//! Runs after change detection, before the cache is updated, so the cache
//! still holds the previous state for comparison. BetPawa alerts are only
//! emitted for markets that a competitor also carries in this batch, so
//! every alert has a comparable counterpart.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::adapters::Platform;
use crate::cache::{CachedMarket, OddsCache};
use crate::store::{MarketWrite, RiskAlertWrite};

use super::{market_key, MarketKey};

/// Odds moves below this are noise, not direction signals.
const DIRECTION_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    PriceChange,
    DirectionDisagreement,
    Availability,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::PriceChange => "price_change",
            AlertType::DirectionDisagreement => "direction_disagreement",
            AlertType::Availability => "availability",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Warning,
    Elevated,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Elevated => "elevated",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// Severity thresholds as absolute percentage change.
#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    pub warning: f64,
    pub elevated: f64,
    pub critical: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            warning: 7.0,
            elevated: 10.0,
            critical: 15.0,
        }
    }
}

/// `((new - old) / old) * 100`; positive for drifts out, negative for cuts.
pub fn change_percent(old_odds: f64, new_odds: f64) -> f64 {
    if old_odds == 0.0 {
        return 0.0;
    }
    ((new_odds - old_odds) / old_odds) * 100.0
}

pub fn classify_severity(change_pct: f64, thresholds: &AlertThresholds) -> Option<AlertSeverity> {
    let abs = change_pct.abs();
    if abs >= thresholds.critical {
        Some(AlertSeverity::Critical)
    } else if abs >= thresholds.elevated {
        Some(AlertSeverity::Elevated)
    } else if abs >= thresholds.warning {
        Some(AlertSeverity::Warning)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

pub fn movement_direction(old_odds: f64, new_odds: f64) -> Option<Direction> {
    if old_odds == 0.0 || new_odds == 0.0 {
        return None;
    }
    let diff = new_odds - old_odds;
    if diff.abs() < DIRECTION_EPSILON {
        return None;
    }
    Some(if diff > 0.0 { Direction::Up } else { Direction::Down })
}

// ---------------------------------------------------------------------------
// Detector inputs
// ---------------------------------------------------------------------------

/// One scraped BetPawa snapshot within the batch.
pub struct BetpawaInput<'a> {
    pub event_id: i32,
    pub bookmaker_id: i32,
    pub changed: bool,
    pub markets: &'a [MarketWrite],
}

/// One scraped competitor snapshot within the batch.
pub struct CompetitorInput<'a> {
    pub event_id: i32,
    pub source: Platform,
    pub changed: bool,
    pub markets: &'a [MarketWrite],
}

/// One availability flip, already resolved to its event and market identity.
pub struct AvailabilityInput {
    pub event_id: i32,
    pub bookmaker_slug: String,
    pub market_id: String,
    pub market_name: String,
    pub line: Option<f64>,
    /// True when the market vanished, false when it returned.
    pub suspended: bool,
    /// Reference-side flips are filtered to matched markets.
    pub is_reference: bool,
}

fn outcome_odds_by_name(market: &CachedMarket) -> HashMap<&str, f64> {
    market
        .outcomes
        .iter()
        .map(|o| (o.name.as_str(), o.odds))
        .collect()
}

fn cached_markets_by_key(markets: &[CachedMarket]) -> HashMap<MarketKey, &CachedMarket> {
    markets
        .iter()
        .map(|m| (market_key(&m.betpawa_market_id, m.line), m))
        .collect()
}

fn price_change_alerts(
    cached_markets: &HashMap<MarketKey, &CachedMarket>,
    new_markets: &[MarketWrite],
    event_id: i32,
    bookmaker_slug: &str,
    event_kickoff: DateTime<Utc>,
    thresholds: &AlertThresholds,
    now: DateTime<Utc>,
) -> Vec<RiskAlertWrite> {
    let mut alerts = Vec::new();

    for market in new_markets {
        let key = market_key(&market.betpawa_market_id, market.line);
        let Some(cached) = cached_markets.get(&key) else {
            // New market, nothing to compare against.
            continue;
        };
        let cached_outcomes = outcome_odds_by_name(cached);

        for outcome in &market.outcomes {
            let Some(&old_odds) = cached_outcomes.get(outcome.name.as_str()) else {
                continue;
            };
            let change_pct = change_percent(old_odds, outcome.odds);
            let Some(severity) = classify_severity(change_pct, thresholds) else {
                continue;
            };

            alerts.push(RiskAlertWrite {
                event_id,
                bookmaker_slug: bookmaker_slug.to_string(),
                market_id: market.betpawa_market_id.clone(),
                market_name: market.betpawa_market_name.clone(),
                line: market.line,
                outcome_name: Some(outcome.name.clone()),
                alert_type: AlertType::PriceChange.as_str().to_string(),
                severity: severity.as_str().to_string(),
                change_percent: change_pct,
                old_value: Some(old_odds),
                new_value: Some(outcome.odds),
                competitor_old_value: None,
                competitor_new_value: None,
                competitor_direction: None,
                detected_at: now,
                event_kickoff,
            });
        }
    }

    alerts
}

/// Run all three detection algorithms over one batch.
pub fn detect_risk_alerts(
    cache: &OddsCache,
    betpawa: &[BetpawaInput<'_>],
    competitors: &[CompetitorInput<'_>],
    availability: &[AvailabilityInput],
    kickoffs: &HashMap<i32, DateTime<Utc>>,
    thresholds: &AlertThresholds,
    now: DateTime<Utc>,
) -> Vec<RiskAlertWrite> {
    let mut alerts: Vec<RiskAlertWrite> = Vec::new();

    // Markets with competitor coverage per event; BetPawa alerts are only
    // interesting when there is a counterpart to compare against.
    let mut matched: HashMap<i32, HashSet<MarketKey>> = HashMap::new();
    for comp in competitors {
        let entry = matched.entry(comp.event_id).or_default();
        for market in comp.markets {
            entry.insert(market_key(&market.betpawa_market_id, market.line));
        }
    }

    // 1. BetPawa price changes, filtered to matched markets.
    for input in betpawa.iter().filter(|i| i.changed) {
        let Some(kickoff) = kickoffs.get(&input.event_id).copied() else {
            continue;
        };
        let Some(by_bookmaker) = cache.get_betpawa(input.event_id) else {
            continue;
        };
        let Some(cached_snap) = by_bookmaker.get(&input.bookmaker_id) else {
            continue;
        };
        let cached = cached_markets_by_key(&cached_snap.markets);
        let matched_keys = matched.get(&input.event_id);

        let event_alerts = price_change_alerts(
            &cached,
            input.markets,
            input.event_id,
            Platform::Betpawa.slug(),
            kickoff,
            thresholds,
            now,
        );
        alerts.extend(event_alerts.into_iter().filter(|a| {
            matched_keys.is_some_and(|keys| keys.contains(&market_key(&a.market_id, a.line)))
        }));
    }

    // 2. Competitor price changes (inherently matched).
    for input in competitors.iter().filter(|i| i.changed) {
        let Some(kickoff) = kickoffs.get(&input.event_id).copied() else {
            continue;
        };
        let Some(by_source) = cache.get_competitor(input.event_id) else {
            continue;
        };
        let Some(cached_snap) = by_source.get(&input.source) else {
            continue;
        };
        let cached = cached_markets_by_key(&cached_snap.markets);

        alerts.extend(price_change_alerts(
            &cached,
            input.markets,
            input.event_id,
            input.source.slug(),
            kickoff,
            thresholds,
            now,
        ));
    }

    // 3. Direction disagreements: BetPawa moved one way, a competitor moved
    //    the other way on the same outcome in the same batch.
    for bp in betpawa.iter().filter(|i| i.changed) {
        let Some(kickoff) = kickoffs.get(&bp.event_id).copied() else {
            continue;
        };
        let Some(by_bookmaker) = cache.get_betpawa(bp.event_id) else {
            continue;
        };
        let Some(bp_cached_snap) = by_bookmaker.get(&bp.bookmaker_id) else {
            continue;
        };
        let bp_cached = cached_markets_by_key(&bp_cached_snap.markets);

        for bp_market in bp.markets {
            let key = market_key(&bp_market.betpawa_market_id, bp_market.line);
            let Some(bp_cached_market) = bp_cached.get(&key) else {
                continue;
            };
            let bp_old = outcome_odds_by_name(bp_cached_market);

            for bp_outcome in &bp_market.outcomes {
                let Some(&bp_old_odds) = bp_old.get(bp_outcome.name.as_str()) else {
                    continue;
                };
                let Some(bp_direction) = movement_direction(bp_old_odds, bp_outcome.odds) else {
                    continue;
                };

                for comp in competitors.iter().filter(|c| c.event_id == bp.event_id) {
                    let Some(comp_cached_snap) = cache
                        .get_competitor(comp.event_id)
                        .and_then(|by_source| by_source.get(&comp.source).cloned())
                    else {
                        continue;
                    };
                    let comp_cached = cached_markets_by_key(&comp_cached_snap.markets);
                    let Some(comp_cached_market) = comp_cached.get(&key) else {
                        continue;
                    };
                    let Some(comp_market) = comp.markets.iter().find(|m| {
                        market_key(&m.betpawa_market_id, m.line) == key
                    }) else {
                        continue;
                    };
                    let Some(comp_outcome) = comp_market
                        .outcomes
                        .iter()
                        .find(|o| o.name == bp_outcome.name)
                    else {
                        continue;
                    };
                    let Some(&comp_old_odds) =
                        outcome_odds_by_name(comp_cached_market).get(bp_outcome.name.as_str())
                    else {
                        continue;
                    };
                    let Some(comp_direction) =
                        movement_direction(comp_old_odds, comp_outcome.odds)
                    else {
                        continue;
                    };

                    if bp_direction != comp_direction {
                        let gap_pct =
                            change_percent(bp_outcome.odds, comp_outcome.odds).abs();
                        alerts.push(RiskAlertWrite {
                            event_id: bp.event_id,
                            bookmaker_slug: Platform::Betpawa.slug().to_string(),
                            market_id: bp_market.betpawa_market_id.clone(),
                            market_name: bp_market.betpawa_market_name.clone(),
                            line: bp_market.line,
                            outcome_name: Some(bp_outcome.name.clone()),
                            alert_type: AlertType::DirectionDisagreement.as_str().to_string(),
                            severity: AlertSeverity::Elevated.as_str().to_string(),
                            change_percent: gap_pct,
                            old_value: Some(bp_old_odds),
                            new_value: Some(bp_outcome.odds),
                            competitor_old_value: Some(comp_old_odds),
                            competitor_new_value: Some(comp_outcome.odds),
                            competitor_direction: Some(format!(
                                "{}:{}",
                                comp.source.slug(),
                                comp_direction.as_str()
                            )),
                            detected_at: now,
                            event_kickoff: kickoff,
                        });
                    }
                }
            }
        }
    }

    // 4. Availability flips; reference-side ones only for matched markets.
    for input in availability {
        let Some(kickoff) = kickoffs.get(&input.event_id).copied() else {
            continue;
        };
        if input.is_reference {
            let is_matched = matched
                .get(&input.event_id)
                .is_some_and(|keys| keys.contains(&market_key(&input.market_id, input.line)));
            if !is_matched {
                continue;
            }
        }

        alerts.push(RiskAlertWrite {
            event_id: input.event_id,
            bookmaker_slug: input.bookmaker_slug.clone(),
            market_id: input.market_id.clone(),
            market_name: input.market_name.clone(),
            line: input.line,
            outcome_name: None,
            alert_type: AlertType::Availability.as_str().to_string(),
            severity: AlertSeverity::Warning.as_str().to_string(),
            change_percent: 0.0,
            old_value: None,
            new_value: None,
            competitor_old_value: None,
            competitor_new_value: None,
            competitor_direction: Some(
                if input.suspended { "suspended" } else { "returned" }.to_string(),
            ),
            detected_at: now,
            event_kickoff: kickoff,
        });
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedSnapshot;
    use crate::store::OutcomeOdds;
    use std::sync::Arc;

    fn outcome(name: &str, odds: f64) -> OutcomeOdds {
        OutcomeOdds {
            name: name.to_string(),
            odds,
            is_active: true,
        }
    }

    fn write(market_id: &str, line: Option<f64>, outcomes: Vec<OutcomeOdds>) -> MarketWrite {
        MarketWrite {
            betpawa_market_id: market_id.to_string(),
            betpawa_market_name: "1X2 - Full Time".to_string(),
            line,
            handicap_type: None,
            handicap_home: None,
            handicap_away: None,
            outcomes,
            market_groups: None,
            unavailable_at: None,
        }
    }

    fn seed_cache(
        cache: &OddsCache,
        event_id: i32,
        bp_markets: &[MarketWrite],
        comp_markets: &[(Platform, Vec<MarketWrite>)],
    ) {
        let now = Utc::now();
        cache.put_betpawa(
            event_id,
            1,
            Arc::new(CachedSnapshot::from_writes(1, event_id, 1, now, now, bp_markets)),
            None,
        );
        for (source, markets) in comp_markets {
            cache.put_competitor(
                event_id,
                *source,
                Arc::new(CachedSnapshot::from_writes(2, event_id, 0, now, now, markets)),
                None,
            );
        }
    }

    fn kickoffs(event_id: i32) -> HashMap<i32, DateTime<Utc>> {
        let mut map = HashMap::new();
        map.insert(event_id, Utc::now() + chrono::Duration::hours(3));
        map
    }

    #[test]
    fn severity_bands() {
        let t = AlertThresholds::default();
        assert_eq!(classify_severity(5.0, &t), None);
        assert_eq!(classify_severity(7.0, &t), Some(AlertSeverity::Warning));
        assert_eq!(classify_severity(-8.0, &t), Some(AlertSeverity::Warning));
        assert_eq!(classify_severity(10.0, &t), Some(AlertSeverity::Elevated));
        assert_eq!(classify_severity(-20.0, &t), Some(AlertSeverity::Critical));
    }

    #[test]
    fn change_percent_is_signed() {
        assert!((change_percent(2.0, 2.2) - 10.0).abs() < 1e-9);
        assert!((change_percent(2.0, 1.8) + 10.0).abs() < 1e-9);
        assert_eq!(change_percent(0.0, 2.0), 0.0);
    }

    #[test]
    fn direction_requires_epsilon() {
        assert_eq!(movement_direction(2.0, 2.2), Some(Direction::Up));
        assert_eq!(movement_direction(2.0, 1.85), Some(Direction::Down));
        assert_eq!(movement_direction(2.0, 2.005), None);
        assert_eq!(movement_direction(0.0, 2.0), None);
    }

    // Ten percent move on the reference with a matching competitor market
    // produces exactly one elevated price-change alert.
    #[test]
    fn betpawa_price_move_with_coverage_alerts() {
        let cache = OddsCache::new();
        let old_bp = vec![write("3743", None, vec![outcome("1", 2.0), outcome("X", 3.2)])];
        let comp = vec![write("3743", None, vec![outcome("1", 2.05)])];
        seed_cache(&cache, 1, &old_bp, &[(Platform::Sportybet, comp.clone())]);

        let new_bp = vec![write("3743", None, vec![outcome("1", 2.2), outcome("X", 3.2)])];
        let alerts = detect_risk_alerts(
            &cache,
            &[BetpawaInput {
                event_id: 1,
                bookmaker_id: 1,
                changed: true,
                markets: &new_bp,
            }],
            &[CompetitorInput {
                event_id: 1,
                source: Platform::Sportybet,
                changed: false,
                markets: &comp,
            }],
            &[],
            &kickoffs(1),
            &AlertThresholds::default(),
            Utc::now(),
        );

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.alert_type, "price_change");
        assert_eq!(alert.bookmaker_slug, "betpawa");
        assert_eq!(alert.severity, "elevated");
        assert_eq!(alert.outcome_name.as_deref(), Some("1"));
        assert!((alert.change_percent - 10.0).abs() < 1e-9);
        assert_eq!(alert.old_value, Some(2.0));
        assert_eq!(alert.new_value, Some(2.2));
    }

    // Without competitor coverage the same move stays silent.
    #[test]
    fn betpawa_price_move_without_coverage_is_suppressed() {
        let cache = OddsCache::new();
        let old_bp = vec![write("3743", None, vec![outcome("1", 2.0)])];
        seed_cache(&cache, 1, &old_bp, &[]);

        let new_bp = vec![write("3743", None, vec![outcome("1", 2.2)])];
        let alerts = detect_risk_alerts(
            &cache,
            &[BetpawaInput {
                event_id: 1,
                bookmaker_id: 1,
                changed: true,
                markets: &new_bp,
            }],
            &[],
            &[],
            &kickoffs(1),
            &AlertThresholds::default(),
            Utc::now(),
        );
        assert!(alerts.is_empty());
    }

    #[test]
    fn unchanged_outcomes_emit_nothing() {
        let cache = OddsCache::new();
        let markets = vec![write("3743", None, vec![outcome("1", 2.0)])];
        seed_cache(&cache, 1, &markets, &[(Platform::Sportybet, markets.clone())]);

        let alerts = detect_risk_alerts(
            &cache,
            &[BetpawaInput {
                event_id: 1,
                bookmaker_id: 1,
                changed: false,
                markets: &markets,
            }],
            &[CompetitorInput {
                event_id: 1,
                source: Platform::Sportybet,
                changed: false,
                markets: &markets,
            }],
            &[],
            &kickoffs(1),
            &AlertThresholds::default(),
            Utc::now(),
        );
        assert!(alerts.is_empty());
    }

    // BetPawa up, SportyBet down on the same outcome: a price-change alert
    // plus one direction-disagreement alert annotated "sportybet:down".
    #[test]
    fn direction_disagreement() {
        let cache = OddsCache::new();
        let old = vec![write("3743", None, vec![outcome("1", 2.0)])];
        seed_cache(&cache, 1, &old, &[(Platform::Sportybet, old.clone())]);

        let new_bp = vec![write("3743", None, vec![outcome("1", 2.2)])];
        let new_comp = vec![write("3743", None, vec![outcome("1", 1.85)])];

        let alerts = detect_risk_alerts(
            &cache,
            &[BetpawaInput {
                event_id: 1,
                bookmaker_id: 1,
                changed: true,
                markets: &new_bp,
            }],
            &[CompetitorInput {
                event_id: 1,
                source: Platform::Sportybet,
                changed: true,
                markets: &new_comp,
            }],
            &[],
            &kickoffs(1),
            &AlertThresholds::default(),
            Utc::now(),
        );

        let disagreement: Vec<_> = alerts
            .iter()
            .filter(|a| a.alert_type == "direction_disagreement")
            .collect();
        assert_eq!(disagreement.len(), 1);
        let alert = disagreement[0];
        assert_eq!(alert.bookmaker_slug, "betpawa");
        assert_eq!(alert.severity, "elevated");
        assert_eq!(alert.competitor_direction.as_deref(), Some("sportybet:down"));
        assert_eq!(alert.competitor_new_value, Some(1.85));

        // The betpawa move itself also alerts (matched market, +10%).
        assert!(alerts.iter().any(|a| a.alert_type == "price_change"));
    }

    #[test]
    fn same_direction_moves_do_not_disagree() {
        let cache = OddsCache::new();
        let old = vec![write("3743", None, vec![outcome("1", 2.0)])];
        seed_cache(&cache, 1, &old, &[(Platform::Bet9ja, old.clone())]);

        let new_bp = vec![write("3743", None, vec![outcome("1", 2.2)])];
        let new_comp = vec![write("3743", None, vec![outcome("1", 2.3)])];

        let alerts = detect_risk_alerts(
            &cache,
            &[BetpawaInput {
                event_id: 1,
                bookmaker_id: 1,
                changed: true,
                markets: &new_bp,
            }],
            &[CompetitorInput {
                event_id: 1,
                source: Platform::Bet9ja,
                changed: true,
                markets: &new_comp,
            }],
            &[],
            &kickoffs(1),
            &AlertThresholds::default(),
            Utc::now(),
        );
        assert!(alerts.iter().all(|a| a.alert_type != "direction_disagreement"));
    }

    #[test]
    fn availability_flips_become_warning_alerts() {
        let cache = OddsCache::new();
        let comp_markets = vec![write("3743", None, vec![outcome("1", 2.0)])];
        seed_cache(&cache, 1, &[], &[(Platform::Sportybet, comp_markets.clone())]);

        let alerts = detect_risk_alerts(
            &cache,
            &[],
            &[CompetitorInput {
                event_id: 1,
                source: Platform::Sportybet,
                changed: false,
                markets: &comp_markets,
            }],
            &[
                AvailabilityInput {
                    event_id: 1,
                    bookmaker_slug: "betpawa".to_string(),
                    market_id: "3743".to_string(),
                    market_name: "1X2 - Full Time".to_string(),
                    line: None,
                    suspended: true,
                    is_reference: true,
                },
                AvailabilityInput {
                    event_id: 1,
                    bookmaker_slug: "bet9ja".to_string(),
                    market_id: "5000".to_string(),
                    market_name: "Over/Under Total Goals - Full Time".to_string(),
                    line: Some(2.5),
                    suspended: false,
                    is_reference: false,
                },
            ],
            &kickoffs(1),
            &AlertThresholds::default(),
            Utc::now(),
        );

        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.severity == "warning"));
        assert!(alerts.iter().all(|a| a.change_percent == 0.0));
        assert_eq!(
            alerts[0].competitor_direction.as_deref(),
            Some("suspended")
        );
        assert_eq!(alerts[1].competitor_direction.as_deref(), Some("returned"));
    }

    #[test]
    fn reference_availability_without_coverage_is_suppressed() {
        let cache = OddsCache::new();
        let alerts = detect_risk_alerts(
            &cache,
            &[],
            &[],
            &[AvailabilityInput {
                event_id: 1,
                bookmaker_slug: "betpawa".to_string(),
                market_id: "3743".to_string(),
                market_name: "1X2 - Full Time".to_string(),
                line: None,
                suspended: true,
                is_reference: true,
            }],
            &kickoffs(1),
            &AlertThresholds::default(),
            Utc::now(),
        );
        assert!(alerts.is_empty());
    }
}
