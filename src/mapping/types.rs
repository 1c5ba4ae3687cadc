use thiserror::Error;

/// Why a raw market could not be translated into the BetPawa taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// No mapping exists for the market ID/key.
    UnknownMarket,
    /// Mapping exists but the market is not offered on BetPawa.
    UnsupportedPlatform,
    /// Specifier/parameter present but unparseable.
    InvalidSpecifier,
    /// Parameterized market type not recognized.
    UnknownParamMarket,
    /// All outcomes failed to resolve.
    NoMatchingOutcomes,
    /// Odds value could not be parsed.
    InvalidOdds,
    /// Bet9ja key format invalid.
    InvalidKeyFormat,
}

#[derive(Debug, Clone, Error)]
#[error("[{kind:?}] {message}")]
pub struct MappingError {
    pub kind: MappingErrorKind,
    pub message: String,
}

impl MappingError {
    pub fn new(kind: MappingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Handicap parameters of a translated market.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedHandicap {
    /// "asian" (2-way) or "european" (3-way).
    pub kind: String,
    pub home: f64,
    pub away: f64,
}

/// One outcome of a translated market, in BetPawa vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedOutcome {
    pub betpawa_outcome_name: String,
    /// The source platform's own label for this outcome.
    pub source_outcome_desc: Option<String>,
    pub odds: f64,
    pub is_active: bool,
}

/// A competitor market translated into the BetPawa taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedMarket {
    pub betpawa_market_id: String,
    pub betpawa_market_name: String,
    pub line: Option<f64>,
    pub handicap: Option<MappedHandicap>,
    pub outcomes: Vec<MappedOutcome>,
}

/// Outcome row inside a market mapping.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OutcomeMapping {
    pub canonical_id: String,
    #[serde(default)]
    pub betpawa_name: Option<String>,
    #[serde(default)]
    pub sportybet_desc: Option<String>,
    #[serde(default)]
    pub bet9ja_suffix: Option<String>,
    #[serde(default)]
    pub position: i32,
}

/// Where a mapping came from when the merged view was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingSource {
    Code,
    Db,
}

/// One entry of the merged mapping table.
#[derive(Debug, Clone)]
pub struct MarketMapping {
    pub canonical_id: String,
    pub name: String,
    pub betpawa_id: Option<String>,
    pub sportybet_id: Option<String>,
    pub bet9ja_key: Option<String>,
    pub outcomes: Vec<OutcomeMapping>,
    pub source: MappingSource,
    pub priority: i32,
}

impl MarketMapping {
    /// Resolve an outcome by source descriptor (case-insensitive) with a
    /// positional fallback. Returns the BetPawa outcome name.
    pub fn resolve_sportybet_outcome(&self, desc: &str, position: i32) -> Option<&str> {
        let lowered = desc.to_lowercase();
        let by_desc = self.outcomes.iter().find(|o| {
            o.sportybet_desc
                .as_deref()
                .is_some_and(|d| d.to_lowercase() == lowered)
        });
        by_desc
            .or_else(|| self.outcomes.iter().find(|o| o.position == position))
            .and_then(|o| o.betpawa_name.as_deref())
    }

    /// Resolve an outcome by Bet9ja key suffix (exact, keys are uppercase).
    pub fn resolve_bet9ja_outcome(&self, suffix: &str) -> Option<&str> {
        self.outcomes
            .iter()
            .find(|o| o.bet9ja_suffix.as_deref() == Some(suffix))
            .and_then(|o| o.betpawa_name.as_deref())
    }
}
