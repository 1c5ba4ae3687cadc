//! SportyBet -> BetPawa market mapper.
//!
//! Translates SportyBet markets into BetPawa's IDs and naming so downstream
//! storage and comparison see one vocabulary. Parameterized markets are
//! routed by specifier: `total=<line>` is over/under, `hcp=<v>` is an asian
//! handicap, `hcp=<h>:<a>` a european (3-way) one. Time-range specifiers
//! (`from=..|to=..`) describe a window that is implicit in the market, so
//! those map as simple markets.

use super::cache::MappingView;
use super::types::{
    MappedHandicap, MappedMarket, MappedOutcome, MappingError, MappingErrorKind, MarketMapping,
};
use crate::adapters::sportybet::SportybetMarket;

/// Market IDs whose specifier is a time range, not a parameter.
const TIME_BASED_MARKET_IDS: &[&str] = &["105"];

#[derive(Debug, PartialEq)]
enum Param {
    None,
    Total(f64),
    Handicap(MappedHandicap),
}

fn parse_param(market_id: &str, specifier: Option<&str>) -> Result<Param, MappingError> {
    let Some(spec) = specifier.filter(|s| !s.is_empty()) else {
        return Ok(Param::None);
    };

    if TIME_BASED_MARKET_IDS.contains(&market_id) || spec.starts_with("from=") {
        return Ok(Param::None);
    }

    if let Some(raw) = spec.strip_prefix("total=") {
        let line: f64 = raw.parse().map_err(|_| {
            MappingError::new(
                MappingErrorKind::InvalidSpecifier,
                format!("could not parse total from specifier {spec:?}"),
            )
        })?;
        return Ok(Param::Total(line));
    }

    if let Some(raw) = spec.strip_prefix("hcp=") {
        // "h:a" is the 3-way european form, a bare value the asian one.
        if let Some((h, a)) = raw.split_once(':') {
            let (h, a): (f64, f64) = match (h.parse(), a.parse()) {
                (Ok(h), Ok(a)) => (h, a),
                _ => {
                    return Err(MappingError::new(
                        MappingErrorKind::InvalidSpecifier,
                        format!("could not parse european handicap from specifier {spec:?}"),
                    ))
                }
            };
            let home = h - a;
            return Ok(Param::Handicap(MappedHandicap {
                kind: "european".to_string(),
                home,
                away: -home,
            }));
        }

        let value: f64 = raw.parse().map_err(|_| {
            MappingError::new(
                MappingErrorKind::InvalidSpecifier,
                format!("could not parse asian handicap from specifier {spec:?}"),
            )
        })?;
        return Ok(Param::Handicap(MappedHandicap {
            kind: "asian".to_string(),
            home: value,
            away: -value,
        }));
    }

    Err(MappingError::new(
        MappingErrorKind::UnknownParamMarket,
        format!("unrecognized specifier {spec:?} for market {market_id}"),
    ))
}

fn map_outcomes(
    market: &SportybetMarket,
    mapping: &MarketMapping,
) -> Result<Vec<MappedOutcome>, MappingError> {
    let mut mapped = Vec::new();

    for (position, outcome) in market.outcomes.iter().enumerate() {
        let Some(betpawa_name) =
            mapping.resolve_sportybet_outcome(&outcome.desc, position as i32)
        else {
            continue;
        };

        let odds: f64 = outcome.odds.parse().map_err(|_| {
            MappingError::new(
                MappingErrorKind::InvalidOdds,
                format!("could not parse odds value {:?}", outcome.odds),
            )
        })?;

        mapped.push(MappedOutcome {
            betpawa_outcome_name: betpawa_name.to_string(),
            source_outcome_desc: Some(outcome.desc.clone()),
            odds,
            is_active: outcome.is_active == 1,
        });
    }

    if mapped.is_empty() {
        return Err(MappingError::new(
            MappingErrorKind::NoMatchingOutcomes,
            format!("no outcomes could be mapped for market \"{}\"", mapping.name),
        ));
    }

    Ok(mapped)
}

pub fn map_market(
    view: &MappingView,
    market: &SportybetMarket,
) -> Result<MappedMarket, MappingError> {
    let mapping = view.find_by_sportybet_id(&market.id).ok_or_else(|| {
        MappingError::new(
            MappingErrorKind::UnknownMarket,
            format!("no mapping found for sportybet market id {}", market.id),
        )
    })?;

    let Some(betpawa_id) = mapping.betpawa_id.clone() else {
        return Err(MappingError::new(
            MappingErrorKind::UnsupportedPlatform,
            format!("market \"{}\" is not available on betpawa", mapping.name),
        ));
    };

    let param = parse_param(&market.id, market.specifier.as_deref())?;
    let outcomes = map_outcomes(market, mapping)?;

    let (line, handicap) = match param {
        Param::None => (None, None),
        Param::Total(line) => (Some(line), None),
        Param::Handicap(h) => (None, Some(h)),
    };

    Ok(MappedMarket {
        betpawa_market_id: betpawa_id,
        betpawa_market_name: mapping.name.clone(),
        line,
        handicap,
        outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::cache::build_view;
    use crate::mapping::defaults::market_mappings;

    fn view() -> MappingView {
        build_view(market_mappings(), Vec::new())
    }

    fn market(id: &str, specifier: Option<&str>, outcomes: &[(&str, &str, i32)]) -> SportybetMarket {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "desc": "test market",
            "specifier": specifier,
            "outcomes": outcomes.iter().map(|(desc, odds, active)| serde_json::json!({
                "id": "1",
                "desc": desc,
                "odds": odds,
                "isActive": active,
            })).collect::<Vec<_>>()
        }))
        .unwrap()
    }

    #[test]
    fn maps_simple_1x2_by_desc() {
        let m = market(
            "1",
            None,
            &[("Home", "2.05", 1), ("Draw", "3.40", 1), ("Away", "3.60", 0)],
        );
        let mapped = map_market(&view(), &m).unwrap();
        assert_eq!(mapped.betpawa_market_id, "3743");
        assert_eq!(mapped.outcomes.len(), 3);
        assert_eq!(mapped.outcomes[0].betpawa_outcome_name, "1");
        assert_eq!(mapped.outcomes[1].betpawa_outcome_name, "X");
        assert!(!mapped.outcomes[2].is_active);
        assert_eq!(mapped.line, None);
    }

    #[test]
    fn desc_matching_is_case_insensitive_with_position_fallback() {
        let m = market("1", None, &[("HOME", "2.0", 1), ("unknown label", "3.3", 1)]);
        let mapped = map_market(&view(), &m).unwrap();
        // "HOME" matches by desc; "unknown label" falls back to position 1 -> Draw.
        assert_eq!(mapped.outcomes[0].betpawa_outcome_name, "1");
        assert_eq!(mapped.outcomes[1].betpawa_outcome_name, "X");
    }

    #[test]
    fn maps_over_under_with_total_specifier() {
        let m = market("18", Some("total=2.5"), &[("Over", "1.90", 1), ("Under", "1.95", 1)]);
        let mapped = map_market(&view(), &m).unwrap();
        assert_eq!(mapped.betpawa_market_id, "5000");
        assert_eq!(mapped.line, Some(2.5));
        assert!(mapped.handicap.is_none());
    }

    #[test]
    fn maps_asian_handicap_specifier() {
        let m = market("16", Some("hcp=-1.5"), &[("Home", "2.10", 1), ("Away", "1.75", 1)]);
        let mapped = map_market(&view(), &m).unwrap();
        let hcp = mapped.handicap.unwrap();
        assert_eq!(hcp.kind, "asian");
        assert_eq!(hcp.home, -1.5);
        assert_eq!(hcp.away, 1.5);
        assert_eq!(mapped.line, None);
    }

    #[test]
    fn maps_european_handicap_specifier() {
        let m = market(
            "14",
            Some("hcp=1:0"),
            &[("Home", "3.5", 1), ("Draw", "3.9", 1), ("Away", "1.9", 1)],
        );
        let mapped = map_market(&view(), &m).unwrap();
        let hcp = mapped.handicap.unwrap();
        assert_eq!(hcp.kind, "european");
        assert_eq!(hcp.home, 1.0);
        assert_eq!(hcp.away, -1.0);
    }

    #[test]
    fn time_based_specifier_is_treated_as_simple() {
        let m = market(
            "105",
            Some("from=1|to=10"),
            &[("Home", "3.1", 1), ("Draw", "2.0", 1), ("Away", "4.2", 1)],
        );
        let mapped = map_market(&view(), &m).unwrap();
        assert_eq!(mapped.line, None);
        assert!(mapped.handicap.is_none());
    }

    #[test]
    fn unknown_market_id() {
        let m = market("424242", None, &[("Yes", "1.5", 1)]);
        let err = map_market(&view(), &m).unwrap_err();
        assert_eq!(err.kind, MappingErrorKind::UnknownMarket);
    }

    #[test]
    fn invalid_total_specifier() {
        let m = market("18", Some("total=abc"), &[("Over", "1.9", 1)]);
        let err = map_market(&view(), &m).unwrap_err();
        assert_eq!(err.kind, MappingErrorKind::InvalidSpecifier);
    }

    #[test]
    fn unrecognized_specifier_kind() {
        let m = market("18", Some("corners=5"), &[("Over", "1.9", 1)]);
        let err = map_market(&view(), &m).unwrap_err();
        assert_eq!(err.kind, MappingErrorKind::UnknownParamMarket);
    }

    #[test]
    fn invalid_odds_value() {
        let m = market("1", None, &[("Home", "not-a-number", 1)]);
        let err = map_market(&view(), &m).unwrap_err();
        assert_eq!(err.kind, MappingErrorKind::InvalidOdds);
    }

    #[test]
    fn no_matching_outcomes() {
        let m = market("1", None, &[("Mystery", "1.5", 1)]);
        // Position 0 still resolves via fallback; force a miss with an
        // out-of-range position by using several unknown outcomes beyond the
        // mapping size.
        let mut m = m;
        m.outcomes = Vec::new();
        let err = map_market(&view(), &m).unwrap_err();
        assert_eq!(err.kind, MappingErrorKind::NoMatchingOutcomes);
    }
}
