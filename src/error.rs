use std::time::Duration;

use thiserror::Error;

/// Errors raised by the bookmaker adapters.
///
/// `Network` and `RateLimited` are retryable within the adapter policy;
/// `InvalidEventId` and `Api` are recorded as per-event failures and never
/// retried.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid or unknown event id: {0}")]
    InvalidEventId(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected api response: {0}")]
    Api(String),

    #[error("rate limited by upstream")]
    RateLimited,
}

impl ScrapeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::Network(_) | ScrapeError::RateLimited)
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ScrapeError::Network(err.to_string())
        } else if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            ScrapeError::RateLimited
        } else if err.is_decode() {
            ScrapeError::Api(err.to_string())
        } else {
            ScrapeError::Network(err.to_string())
        }
    }
}

// Adapter retry policy: 3 attempts with exponential backoff clamped to 1-10s.
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_MIN_WAIT: Duration = Duration::from_secs(1);
pub const RETRY_MAX_WAIT: Duration = Duration::from_secs(10);

/// Backoff for the given 1-based attempt number: 1s, 2s, 4s... capped at 10s.
pub fn retry_backoff(attempt: u32) -> Duration {
    let backoff = RETRY_MIN_WAIT * 2u32.saturating_pow(attempt.saturating_sub(1));
    backoff.min(RETRY_MAX_WAIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(1), Duration::from_secs(1));
        assert_eq!(retry_backoff(2), Duration::from_secs(2));
        assert_eq!(retry_backoff(3), Duration::from_secs(4));
        assert_eq!(retry_backoff(5), Duration::from_secs(10));
    }

    #[test]
    fn retryable_classification() {
        assert!(ScrapeError::Network("timeout".into()).is_retryable());
        assert!(ScrapeError::RateLimited.is_retryable());
        assert!(!ScrapeError::InvalidEventId("1".into()).is_retryable());
        assert!(!ScrapeError::Api("bad shape".into()).is_retryable());
    }
}
