//! Compiled-in market mapping catalogue.
//!
//! Covers the core football markets shared by all three platforms. Rows here
//! are the baseline; active `user_market_mappings` rows override them by
//! canonical ID when the merged view is built.

use super::types::{MappingSource, MarketMapping, OutcomeMapping};

fn outcome(
    canonical_id: &str,
    betpawa: Option<&str>,
    sportybet: Option<&str>,
    bet9ja: Option<&str>,
    position: i32,
) -> OutcomeMapping {
    OutcomeMapping {
        canonical_id: canonical_id.to_string(),
        betpawa_name: betpawa.map(str::to_string),
        sportybet_desc: sportybet.map(str::to_string),
        bet9ja_suffix: bet9ja.map(str::to_string),
        position,
    }
}

fn mapping(
    canonical_id: &str,
    name: &str,
    betpawa_id: Option<&str>,
    sportybet_id: Option<&str>,
    bet9ja_key: Option<&str>,
    outcomes: Vec<OutcomeMapping>,
) -> MarketMapping {
    MarketMapping {
        canonical_id: canonical_id.to_string(),
        name: name.to_string(),
        betpawa_id: betpawa_id.map(str::to_string),
        sportybet_id: sportybet_id.map(str::to_string),
        bet9ja_key: bet9ja_key.map(str::to_string),
        outcomes,
        source: MappingSource::Code,
        priority: 0,
    }
}

pub fn market_mappings() -> Vec<MarketMapping> {
    vec![
        mapping(
            "1x2_ft",
            "1X2 - Full Time",
            Some("3743"),
            Some("1"),
            Some("S_1X2"),
            vec![
                outcome("home", Some("1"), Some("Home"), Some("1"), 0),
                outcome("draw", Some("X"), Some("Draw"), Some("X"), 1),
                outcome("away", Some("2"), Some("Away"), Some("2"), 2),
            ],
        ),
        mapping(
            "1x2_1h",
            "1X2 - First Half",
            Some("3746"),
            Some("60"),
            Some("S_1X2HT"),
            vec![
                outcome("home", Some("1"), Some("Home"), Some("1T1"), 0),
                outcome("draw", Some("X"), Some("Draw"), Some("1TX"), 1),
                outcome("away", Some("2"), Some("Away"), Some("1T2"), 2),
            ],
        ),
        mapping(
            "1x2_2h",
            "1X2 - Second Half",
            Some("3749"),
            Some("83"),
            Some("S_1X22T"),
            vec![
                outcome("home", Some("1"), Some("Home"), Some("2T1"), 0),
                outcome("draw", Some("X"), Some("Draw"), Some("2TX"), 1),
                outcome("away", Some("2"), Some("Away"), Some("2T2"), 2),
            ],
        ),
        mapping(
            "double_chance_ft",
            "Double Chance - Full Time",
            Some("3755"),
            Some("10"),
            Some("S_DC"),
            vec![
                outcome("home_draw", Some("1X"), Some("Home or Draw"), Some("1X"), 0),
                outcome("home_away", Some("12"), Some("Home or Away"), Some("12"), 1),
                outcome("draw_away", Some("X2"), Some("Draw or Away"), Some("X2"), 2),
            ],
        ),
        mapping(
            "draw_no_bet_ft",
            "Draw No Bet - Full Time",
            Some("3758"),
            Some("11"),
            Some("S_DNB"),
            vec![
                outcome("home", Some("1"), Some("Home"), Some("1"), 0),
                outcome("away", Some("2"), Some("Away"), Some("2"), 1),
            ],
        ),
        mapping(
            "btts_ft",
            "Both Teams To Score - Full Time",
            Some("3962"),
            Some("29"),
            Some("S_GGNG"),
            vec![
                outcome("yes", Some("Yes"), Some("Yes"), Some("GG"), 0),
                outcome("no", Some("No"), Some("No"), Some("NG"), 1),
            ],
        ),
        mapping(
            "odd_even_ft",
            "Odd/Even Total Goals - Full Time",
            Some("3965"),
            Some("26"),
            Some("S_ODDEVEN"),
            vec![
                outcome("odd", Some("Odd"), Some("Odd"), Some("ODD"), 0),
                outcome("even", Some("Even"), Some("Even"), Some("EVEN"), 1),
            ],
        ),
        mapping(
            "over_under_ft",
            "Over/Under Total Goals - Full Time",
            Some("5000"),
            Some("18"),
            Some("S_OU"),
            vec![
                outcome("over", Some("Over"), Some("Over"), Some("O"), 0),
                outcome("under", Some("Under"), Some("Under"), Some("U"), 1),
            ],
        ),
        mapping(
            "over_under_1h",
            "Over/Under Total Goals - First Half",
            Some("5018"),
            Some("68"),
            Some("S_OU1T"),
            vec![
                outcome("over", Some("Over"), Some("Over"), Some("O"), 0),
                outcome("under", Some("Under"), Some("Under"), Some("U"), 1),
            ],
        ),
        mapping(
            "over_under_2h",
            "Over/Under Total Goals - Second Half",
            Some("5015"),
            Some("90"),
            Some("S_OU2T"),
            vec![
                outcome("over", Some("Over"), Some("Over"), Some("O"), 0),
                outcome("under", Some("Under"), Some("Under"), Some("U"), 1),
            ],
        ),
        mapping(
            "home_over_under_ft",
            "Home Team Over/Under - Full Time",
            Some("5006"),
            Some("19"),
            None,
            vec![
                outcome("over", Some("Over"), Some("Over"), None, 0),
                outcome("under", Some("Under"), Some("Under"), None, 1),
            ],
        ),
        mapping(
            "away_over_under_ft",
            "Away Team Over/Under - Full Time",
            Some("5003"),
            Some("20"),
            None,
            vec![
                outcome("over", Some("Over"), Some("Over"), None, 0),
                outcome("under", Some("Under"), Some("Under"), None, 1),
            ],
        ),
        mapping(
            "home_over_under_1h",
            "Home Team Over/Under - First Half",
            Some("5024"),
            None,
            None,
            vec![
                outcome("over", Some("Over"), None, None, 0),
                outcome("under", Some("Under"), None, None, 1),
            ],
        ),
        mapping(
            "away_over_under_1h",
            "Away Team Over/Under - First Half",
            Some("5021"),
            None,
            None,
            vec![
                outcome("over", Some("Over"), None, None, 0),
                outcome("under", Some("Under"), None, None, 1),
            ],
        ),
        mapping(
            "home_over_under_2h",
            "Home Team Over/Under - Second Half",
            Some("5027"),
            None,
            None,
            vec![
                outcome("over", Some("Over"), None, None, 0),
                outcome("under", Some("Under"), None, None, 1),
            ],
        ),
        mapping(
            "away_over_under_2h",
            "Away Team Over/Under - Second Half",
            Some("5030"),
            None,
            None,
            vec![
                outcome("over", Some("Over"), None, None, 0),
                outcome("under", Some("Under"), None, None, 1),
            ],
        ),
        mapping(
            "asian_handicap_ft",
            "Asian Handicap - Full Time",
            Some("5100"),
            Some("16"),
            Some("S_AH"),
            vec![
                outcome("home", Some("1"), Some("Home"), Some("1"), 0),
                outcome("away", Some("2"), Some("Away"), Some("2"), 1),
            ],
        ),
        mapping(
            "asian_handicap_1h",
            "Asian Handicap - First Half",
            Some("5103"),
            Some("66"),
            Some("S_AH1T"),
            vec![
                outcome("home", Some("1"), Some("Home"), Some("1"), 0),
                outcome("away", Some("2"), Some("Away"), Some("2"), 1),
            ],
        ),
        mapping(
            "european_handicap_ft",
            "3-Way Handicap - Full Time",
            Some("5110"),
            Some("14"),
            Some("S_1X2HND"),
            vec![
                outcome("home", Some("1"), Some("Home"), Some("1H"), 0),
                outcome("draw", Some("X"), Some("Draw"), Some("XH"), 1),
                outcome("away", Some("2"), Some("Away"), Some("2H"), 2),
            ],
        ),
        mapping(
            "ht_ft",
            "Half Time/Full Time",
            Some("3968"),
            Some("47"),
            Some("S_HTFT"),
            vec![
                outcome("home_home", Some("1/1"), Some("Home/Home"), Some("11"), 0),
                outcome("home_draw", Some("1/X"), Some("Home/Draw"), Some("1X"), 1),
                outcome("home_away", Some("1/2"), Some("Home/Away"), Some("12"), 2),
                outcome("draw_home", Some("X/1"), Some("Draw/Home"), Some("X1"), 3),
                outcome("draw_draw", Some("X/X"), Some("Draw/Draw"), Some("XX"), 4),
                outcome("draw_away", Some("X/2"), Some("Draw/Away"), Some("X2"), 5),
                outcome("away_home", Some("2/1"), Some("Away/Home"), Some("21"), 6),
                outcome("away_draw", Some("2/X"), Some("Away/Draw"), Some("2X"), 7),
                outcome("away_away", Some("2/2"), Some("Away/Away"), Some("22"), 8),
            ],
        ),
        // 10-minute interval 1X2; the from/to specifier is implicit in the
        // market so it maps like a simple market.
        mapping(
            "1x2_10min",
            "10 Minutes 1X2",
            Some("4100"),
            Some("105"),
            None,
            vec![
                outcome("home", Some("1"), Some("Home"), None, 0),
                outcome("draw", Some("X"), Some("Draw"), None, 1),
                outcome("away", Some("2"), Some("Away"), None, 2),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn canonical_ids_are_unique() {
        let mappings = market_mappings();
        let ids: HashSet<_> = mappings.iter().map(|m| m.canonical_id.clone()).collect();
        assert_eq!(ids.len(), mappings.len());
    }

    #[test]
    fn platform_ids_are_unique_within_platform() {
        let mappings = market_mappings();
        for getter in [
            (|m: &MarketMapping| m.betpawa_id.clone()) as fn(&MarketMapping) -> Option<String>,
            |m| m.sportybet_id.clone(),
            |m| m.bet9ja_key.clone(),
        ] {
            let ids: Vec<_> = mappings.iter().filter_map(getter).collect();
            let unique: HashSet<_> = ids.iter().cloned().collect();
            assert_eq!(ids.len(), unique.len());
        }
    }
}
