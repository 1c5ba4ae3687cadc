//! Bet9ja -> BetPawa market mapper.
//!
//! Bet9ja publishes odds as a flattened key-value map:
//!
//! ```text
//! {"S_1X2_1": "1.50", "S_1X2_X": "3.20", "S_OU@2.5_O": "1.80"}
//! ```
//!
//! Keys are parsed into (market, param, outcome suffix), grouped per market,
//! then each group is translated into BetPawa vocabulary. The combined
//! home/away over-under markets are split into the two separate BetPawa
//! team-total markets at mapping time.

use std::collections::{BTreeMap, HashMap};

use super::cache::MappingView;
use super::types::{
    MappedHandicap, MappedMarket, MappedOutcome, MappingError, MappingErrorKind, MarketMapping,
};

/// Market keys whose param is an over/under line: `S_{KEY}@{line}_{O|U}`.
const OVER_UNDER_KEYS: &[&str] = &[
    "OU", "OU1T", "OU2T", "HAOU", "HA1HOU", "HA2HOU", "OUCORNERS", "OUCORNERS1T",
    "CORNERSHOMEOU", "CORNERSAWAYOU", "OUBOOK", "OUBOOK1T", "OUBOOKHOME", "OUBOOKAWAY", "HTFTOU",
];

/// Market keys whose param is a handicap value. Asian markets are 2-way
/// (`1`/`2` suffixes), the `1X2HND` family is the 3-way european form.
const HANDICAP_KEYS: &[&str] = &[
    "AH", "AH1T", "AH2T", "1X2HND", "1X2HNDHT", "1X2HND2TN", "AHCORNERS", "AHCORNERS1T",
];

/// Combined home/away O/U markets that split into two BetPawa markets.
const HAOU_COMBINED_KEYS: &[&str] = &["HAOU", "HA1HOU", "HA2HOU"];

/// Split targets for the combined markets:
/// (home market id, home name, away market id, away name).
fn haou_split_config(market_key: &str) -> Option<(&'static str, &'static str, &'static str, &'static str)> {
    match market_key {
        "HAOU" => Some((
            "5006",
            "Home Team Over/Under - Full Time",
            "5003",
            "Away Team Over/Under - Full Time",
        )),
        "HA1HOU" => Some((
            "5024",
            "Home Team Over/Under - First Half",
            "5021",
            "Away Team Over/Under - First Half",
        )),
        "HA2HOU" => Some((
            "5027",
            "Home Team Over/Under - Second Half",
            "5030",
            "Away Team Over/Under - Second Half",
        )),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedKey {
    pub market: String,
    pub param: Option<String>,
    pub outcome: String,
}

/// Parse `S_<MARKET>[@<PARAM>]_<OUTCOME>`.
pub fn parse_key(key: &str) -> Result<ParsedKey, MappingError> {
    let invalid = || {
        MappingError::new(
            MappingErrorKind::InvalidKeyFormat,
            format!("invalid bet9ja odds key {key:?}"),
        )
    };

    let rest = key.strip_prefix("S_").ok_or_else(invalid)?;
    let (head, outcome) = rest.rsplit_once('_').ok_or_else(invalid)?;
    if head.is_empty() || outcome.is_empty() {
        return Err(invalid());
    }

    let (market, param) = match head.split_once('@') {
        Some((market, param)) if !market.is_empty() && !param.is_empty() => {
            (market.to_string(), Some(param.to_string()))
        }
        Some(_) => return Err(invalid()),
        None => (head.to_string(), None),
    };

    Ok(ParsedKey {
        market,
        param,
        outcome: outcome.to_string(),
    })
}

/// Outcomes of one market/param group. BTreeMap keeps suffix order stable.
#[derive(Debug, Clone)]
pub struct GroupedMarket {
    pub market_key: String,
    pub param: Option<String>,
    pub outcomes: BTreeMap<String, String>,
}

/// Group a flat odds map by (market, param). Keys that do not parse are
/// dropped here; they carry no mappable information.
pub fn group_by_market(odds: &HashMap<String, String>) -> Vec<GroupedMarket> {
    let mut groups: BTreeMap<(String, Option<String>), BTreeMap<String, String>> = BTreeMap::new();

    for (key, odds_str) in odds {
        let Ok(parsed) = parse_key(key) else {
            continue;
        };
        groups
            .entry((parsed.market, parsed.param))
            .or_default()
            .insert(parsed.outcome, odds_str.clone());
    }

    groups
        .into_iter()
        .map(|((market_key, param), outcomes)| GroupedMarket {
            market_key,
            param,
            outcomes,
        })
        .collect()
}

/// A market group that could not be translated; unknown markets among these
/// feed the unmapped-market log.
#[derive(Debug, Clone)]
pub struct Bet9jaMappingFailure {
    pub market_key: String,
    pub param: Option<String>,
    pub sample_outcomes: Vec<(String, String)>,
    pub error: MappingError,
}

fn parse_param_value(
    grouped: &GroupedMarket,
    what: &str,
) -> Result<f64, MappingError> {
    let Some(param) = grouped.param.as_deref() else {
        return Err(MappingError::new(
            MappingErrorKind::InvalidSpecifier,
            format!("{} market {} missing parameter", what, grouped.market_key),
        ));
    };
    param.parse().map_err(|_| {
        MappingError::new(
            MappingErrorKind::InvalidSpecifier,
            format!(
                "could not parse {} value from param {:?} for market {}",
                what, param, grouped.market_key
            ),
        )
    })
}

fn map_group_outcomes(
    grouped: &GroupedMarket,
    mapping: &MarketMapping,
) -> Result<Vec<MappedOutcome>, MappingError> {
    let mut mapped = Vec::new();

    for (suffix, odds_str) in &grouped.outcomes {
        let Some(betpawa_name) = mapping.resolve_bet9ja_outcome(suffix) else {
            continue;
        };
        let Ok(odds) = odds_str.parse::<f64>() else {
            continue;
        };
        mapped.push(MappedOutcome {
            betpawa_outcome_name: betpawa_name.to_string(),
            source_outcome_desc: Some(suffix.clone()),
            odds,
            // Bet9ja delists suspended outcomes instead of flagging them.
            is_active: true,
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

fn map_simple(grouped: &GroupedMarket, mapping: &MarketMapping) -> Result<MappedMarket, MappingError> {
    Ok(MappedMarket {
        betpawa_market_id: mapping.betpawa_id.clone().unwrap_or_default(),
        betpawa_market_name: mapping.name.clone(),
        line: None,
        handicap: None,
        outcomes: map_group_outcomes(grouped, mapping)?,
    })
}

fn map_over_under(
    grouped: &GroupedMarket,
    mapping: &MarketMapping,
) -> Result<MappedMarket, MappingError> {
    let line = parse_param_value(grouped, "over/under")?;
    Ok(MappedMarket {
        betpawa_market_id: mapping.betpawa_id.clone().unwrap_or_default(),
        betpawa_market_name: mapping.name.clone(),
        line: Some(line),
        handicap: None,
        outcomes: map_group_outcomes(grouped, mapping)?,
    })
}

fn map_handicap(
    grouped: &GroupedMarket,
    mapping: &MarketMapping,
) -> Result<MappedMarket, MappingError> {
    let value = parse_param_value(grouped, "handicap")?;
    let is_european = grouped.market_key.contains("1X2HND");

    Ok(MappedMarket {
        betpawa_market_id: mapping.betpawa_id.clone().unwrap_or_default(),
        betpawa_market_name: mapping.name.clone(),
        line: None,
        handicap: Some(MappedHandicap {
            kind: if is_european { "european" } else { "asian" }.to_string(),
            home: value,
            away: -value,
        }),
        outcomes: map_group_outcomes(grouped, mapping)?,
    })
}

/// Split a combined home/away O/U group into separate team-total markets.
///
/// Suffixes are inconsistent upstream: full time uses OH/UH/OA/UA, the half
/// markets use HO/HU/AO/AU. Both spellings are accepted.
fn map_haou_combined(grouped: &GroupedMarket) -> Vec<MappedMarket> {
    let Some((home_id, home_name, away_id, away_name)) = haou_split_config(&grouped.market_key)
    else {
        return Vec::new();
    };
    let Some(line) = grouped.param.as_deref().and_then(|p| p.parse::<f64>().ok()) else {
        return Vec::new();
    };

    let pick = |keys: [&str; 2]| -> Option<f64> {
        keys.iter()
            .find_map(|k| grouped.outcomes.get(*k))
            .and_then(|odds| odds.parse().ok())
    };

    let side = |over: Option<f64>, under: Option<f64>, id: &str, name: &str| -> Option<MappedMarket> {
        let mut outcomes = Vec::new();
        if let Some(odds) = over {
            outcomes.push(MappedOutcome {
                betpawa_outcome_name: "Over".to_string(),
                source_outcome_desc: None,
                odds,
                is_active: true,
            });
        }
        if let Some(odds) = under {
            outcomes.push(MappedOutcome {
                betpawa_outcome_name: "Under".to_string(),
                source_outcome_desc: None,
                odds,
                is_active: true,
            });
        }
        if outcomes.is_empty() {
            return None;
        }
        Some(MappedMarket {
            betpawa_market_id: id.to_string(),
            betpawa_market_name: name.to_string(),
            line: Some(line),
            handicap: None,
            outcomes,
        })
    };

    let mut results = Vec::new();
    if let Some(m) = side(pick(["HO", "OH"]), pick(["HU", "UH"]), home_id, home_name) {
        results.push(m);
    }
    if let Some(m) = side(pick(["AO", "OA"]), pick(["AU", "UA"]), away_id, away_name) {
        results.push(m);
    }
    results
}

/// Translate one grouped market.
pub fn map_market(
    view: &MappingView,
    grouped: &GroupedMarket,
) -> Result<MappedMarket, MappingError> {
    let lookup_key = format!("S_{}", grouped.market_key);
    let mapping = view.find_by_bet9ja_key(&lookup_key).ok_or_else(|| {
        MappingError::new(
            MappingErrorKind::UnknownMarket,
            format!("no mapping found for bet9ja market key {}", grouped.market_key),
        )
    })?;

    if mapping.bet9ja_key.is_none() {
        return Err(MappingError::new(
            MappingErrorKind::UnknownMarket,
            format!("market \"{}\" has no bet9ja key mapping", mapping.name),
        ));
    }
    if mapping.betpawa_id.is_none() {
        return Err(MappingError::new(
            MappingErrorKind::UnsupportedPlatform,
            format!("market \"{}\" is not available on betpawa", mapping.name),
        ));
    }

    if OVER_UNDER_KEYS.contains(&grouped.market_key.as_str()) {
        return map_over_under(grouped, mapping);
    }
    if HANDICAP_KEYS.contains(&grouped.market_key.as_str()) {
        return map_handicap(grouped, mapping);
    }
    if grouped.param.is_some() {
        return Err(MappingError::new(
            MappingErrorKind::UnknownParamMarket,
            format!("unrecognized parameterized market type {}", grouped.market_key),
        ));
    }
    map_simple(grouped, mapping)
}

/// Translate a full odds map. Returns the successfully mapped markets plus
/// the failed groups so the caller can route unknown markets to the
/// unmapped-market log.
pub fn map_odds(
    view: &MappingView,
    odds: &HashMap<String, String>,
) -> (Vec<MappedMarket>, Vec<Bet9jaMappingFailure>) {
    let mut mapped = Vec::new();
    let mut failures = Vec::new();

    for grouped in group_by_market(odds) {
        if HAOU_COMBINED_KEYS.contains(&grouped.market_key.as_str()) {
            mapped.extend(map_haou_combined(&grouped));
            continue;
        }

        match map_market(view, &grouped) {
            Ok(market) => mapped.push(market),
            Err(error) => failures.push(Bet9jaMappingFailure {
                market_key: grouped.market_key.clone(),
                param: grouped.param.clone(),
                sample_outcomes: grouped
                    .outcomes
                    .iter()
                    .take(3)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                error,
            }),
        }
    }

    (mapped, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::cache::build_view;
    use crate::mapping::defaults::market_mappings;

    fn view() -> MappingView {
        build_view(market_mappings(), Vec::new())
    }

    fn odds(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn key_parsing() {
        assert_eq!(
            parse_key("S_1X2_1").unwrap(),
            ParsedKey {
                market: "1X2".to_string(),
                param: None,
                outcome: "1".to_string()
            }
        );
        assert_eq!(
            parse_key("S_OU@2.5_O").unwrap(),
            ParsedKey {
                market: "OU".to_string(),
                param: Some("2.5".to_string()),
                outcome: "O".to_string()
            }
        );
        assert_eq!(
            parse_key("S_1X2HND@-1_1H").unwrap(),
            ParsedKey {
                market: "1X2HND".to_string(),
                param: Some("-1".to_string()),
                outcome: "1H".to_string()
            }
        );
        assert_eq!(
            parse_key("bogus").unwrap_err().kind,
            MappingErrorKind::InvalidKeyFormat
        );
        assert_eq!(
            parse_key("S_").unwrap_err().kind,
            MappingErrorKind::InvalidKeyFormat
        );
    }

    #[test]
    fn maps_simple_1x2() {
        let (mapped, failures) = map_odds(
            &view(),
            &odds(&[("S_1X2_1", "1.50"), ("S_1X2_X", "3.20"), ("S_1X2_2", "2.10")]),
        );
        assert!(failures.is_empty());
        assert_eq!(mapped.len(), 1);
        let m = &mapped[0];
        assert_eq!(m.betpawa_market_id, "3743");
        assert_eq!(m.outcomes.len(), 3);
        assert!(m.outcomes.iter().all(|o| o.is_active));
    }

    #[test]
    fn maps_over_under_with_line() {
        let (mapped, failures) = map_odds(
            &view(),
            &odds(&[("S_OU@2.5_O", "1.80"), ("S_OU@2.5_U", "2.00")]),
        );
        assert!(failures.is_empty());
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].line, Some(2.5));
        assert_eq!(mapped[0].betpawa_market_id, "5000");
    }

    #[test]
    fn distinct_lines_stay_distinct_markets() {
        let (mapped, _) = map_odds(
            &view(),
            &odds(&[
                ("S_OU@2.5_O", "1.80"),
                ("S_OU@2.5_U", "2.00"),
                ("S_OU@3.5_O", "2.90"),
                ("S_OU@3.5_U", "1.40"),
            ]),
        );
        assert_eq!(mapped.len(), 2);
        let mut lines: Vec<_> = mapped.iter().filter_map(|m| m.line).collect();
        lines.sort_by(f64::total_cmp);
        assert_eq!(lines, vec![2.5, 3.5]);
    }

    #[test]
    fn maps_asian_handicap() {
        let (mapped, failures) = map_odds(
            &view(),
            &odds(&[("S_AH@-0.5_1", "1.95"), ("S_AH@-0.5_2", "1.85")]),
        );
        assert!(failures.is_empty());
        let hcp = mapped[0].handicap.as_ref().unwrap();
        assert_eq!(hcp.kind, "asian");
        assert_eq!(hcp.home, -0.5);
        assert_eq!(hcp.away, 0.5);
    }

    #[test]
    fn maps_european_handicap_three_way() {
        let (mapped, failures) = map_odds(
            &view(),
            &odds(&[
                ("S_1X2HND@-1_1H", "2.75"),
                ("S_1X2HND@-1_XH", "3.50"),
                ("S_1X2HND@-1_2H", "2.30"),
            ]),
        );
        assert!(failures.is_empty());
        assert_eq!(mapped.len(), 1);
        let m = &mapped[0];
        assert_eq!(m.betpawa_market_id, "5110");
        assert_eq!(m.outcomes.len(), 3);
        assert_eq!(m.handicap.as_ref().unwrap().kind, "european");
    }

    #[test]
    fn splits_combined_home_away_over_under() {
        let (mapped, failures) = map_odds(
            &view(),
            &odds(&[
                ("S_HAOU@1.5_OH", "1.90"),
                ("S_HAOU@1.5_UH", "1.80"),
                ("S_HAOU@1.5_OA", "2.50"),
                ("S_HAOU@1.5_UA", "1.45"),
            ]),
        );
        assert!(failures.is_empty());
        assert_eq!(mapped.len(), 2);

        let home = mapped.iter().find(|m| m.betpawa_market_id == "5006").unwrap();
        assert_eq!(home.line, Some(1.5));
        assert_eq!(home.outcomes.len(), 2);
        assert_eq!(home.outcomes[0].betpawa_outcome_name, "Over");
        assert_eq!(home.outcomes[0].odds, 1.9);

        let away = mapped.iter().find(|m| m.betpawa_market_id == "5003").unwrap();
        assert_eq!(away.outcomes[1].odds, 1.45);
    }

    #[test]
    fn half_time_combined_uses_swapped_suffixes() {
        let (mapped, _) = map_odds(
            &view(),
            &odds(&[("S_HA1HOU@0.5_HO", "2.10"), ("S_HA1HOU@0.5_HU", "1.65")]),
        );
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].betpawa_market_id, "5024");
    }

    #[test]
    fn unknown_market_is_reported_not_dropped_silently() {
        let (mapped, failures) = map_odds(&view(), &odds(&[("S_EXOTIC_1", "1.50")]));
        assert!(mapped.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].market_key, "EXOTIC");
        assert_eq!(failures[0].error.kind, MappingErrorKind::UnknownMarket);
        assert_eq!(failures[0].sample_outcomes.len(), 1);
    }

    #[test]
    fn unparseable_keys_are_skipped() {
        let (mapped, failures) = map_odds(
            &view(),
            &odds(&[("garbage", "1.0"), ("S_1X2_1", "1.5"), ("S_1X2_2", "2.5")]),
        );
        assert!(failures.is_empty());
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].outcomes.len(), 2);
    }

    #[test]
    fn invalid_param_reports_invalid_specifier() {
        let (mapped, failures) = map_odds(&view(), &odds(&[("S_OU@abc_O", "1.8")]));
        assert!(mapped.is_empty());
        assert_eq!(failures[0].error.kind, MappingErrorKind::InvalidSpecifier);
    }
}
