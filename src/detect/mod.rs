//! Change, availability and risk detection over scraped snapshots.

pub mod availability;
pub mod change;
pub mod risk;

/// Market identity used for lookups: canonical market ID plus the line.
///
/// Lines are compared at 0.01 resolution so `f64` values can participate in
/// hash keys; upstream lines are quarter-goal multiples, far coarser than
/// that.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarketKey {
    pub market_id: String,
    line_centi: Option<i64>,
}

pub fn market_key(market_id: &str, line: Option<f64>) -> MarketKey {
    MarketKey {
        market_id: market_id.to_string(),
        line_centi: line.map(|l| (l * 100.0).round() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_resolution_is_centi() {
        assert_eq!(market_key("5000", Some(2.5)), market_key("5000", Some(2.5)));
        assert_ne!(market_key("5000", Some(2.5)), market_key("5000", Some(3.5)));
        assert_ne!(market_key("5000", Some(2.5)), market_key("5000", None));
        assert_ne!(market_key("5000", None), market_key("3743", None));
    }
}
