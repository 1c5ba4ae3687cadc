//! Bookmaker adapters.
//!
//! Each adapter encapsulates one upstream platform: base URL, required
//! headers, retry policy and payload parsing. Adapters discover upcoming
//! events and fetch per-event odds; translating competitor markets into the
//! BetPawa taxonomy is the mapping layer's job, not theirs.

pub mod bet9ja;
pub mod betpawa;
pub mod sportybet;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{retry_backoff, ScrapeError, MAX_RETRIES};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/144.0.0.0 Safari/537.36";

/// The closed set of supported platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Betpawa,
    Sportybet,
    Bet9ja,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Betpawa, Platform::Sportybet, Platform::Bet9ja];

    pub fn slug(&self) -> &'static str {
        match self {
            Platform::Betpawa => "betpawa",
            Platform::Sportybet => "sportybet",
            Platform::Bet9ja => "bet9ja",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Betpawa => "BetPawa",
            Platform::Sportybet => "SportyBet",
            Platform::Bet9ja => "Bet9ja",
        }
    }

    /// BetPawa's taxonomy is the canonical one; competitors map into it.
    pub fn is_reference(&self) -> bool {
        matches!(self, Platform::Betpawa)
    }

    pub fn from_slug(slug: &str) -> Option<Platform> {
        match slug {
            "betpawa" => Some(Platform::Betpawa),
            "sportybet" => Some(Platform::Sportybet),
            "bet9ja" => Some(Platform::Bet9ja),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// One upcoming event found during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredEvent {
    /// Canonical cross-platform ID (SportRadar match ID).
    pub sportradar_id: String,
    pub kickoff: DateTime<Utc>,
    /// Platform-native event ID used for the per-event fetch.
    pub platform_id: String,
}

/// Raw event payload from one platform, parsed into that platform's types.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Betpawa(betpawa::BetpawaEvent),
    Sportybet(sportybet::SportybetEventData),
    Bet9ja(bet9ja::Bet9jaEvent),
}

#[async_trait]
pub trait BookmakerAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// All upcoming events in the adapter's root category (football).
    /// Events whose kickoff is already in the past are excluded.
    async fn discover_events(&self) -> Result<Vec<DiscoveredEvent>, ScrapeError>;

    /// Full event payload with odds for one platform-native event ID.
    async fn fetch_event(&self, platform_id: &str) -> Result<EventPayload, ScrapeError>;

    /// Fast liveness probe.
    async fn check_health(&self) -> bool;
}

/// Shared HTTP client for all adapters.
pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .gzip(true)
        .brotli(true)
        .build()
        .unwrap_or_default()
}

/// Run an adapter request with the shared retry policy: up to 3 attempts with
/// exponential backoff on retryable errors (network, rate limit). Invalid
/// event IDs and malformed responses fail immediately.
pub async fn with_retry<T, F, Fut>(context: &str, mut op: F) -> Result<T, ScrapeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScrapeError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                let backoff = retry_backoff(attempt);
                debug!(
                    context,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Paused clock: the backoff sleeps auto-advance instead of waiting.
    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ScrapeError::Network("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_retry_for_invalid_event_id() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ScrapeError::InvalidEventId("42".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn platform_slug_round_trip() {
        for p in Platform::ALL {
            assert_eq!(Platform::from_slug(p.slug()), Some(p));
        }
        assert_eq!(Platform::from_slug("betking"), None);
    }
}
