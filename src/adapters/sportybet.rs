//! SportyBet adapter (competitor).
//!
//! SportyBet's native event ID embeds the canonical ID directly
//! (`sr:match:<id>`), so discovery needs no per-event fetch. The event
//! endpoint signals success through `bizCode == 10000`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::{
    with_retry, BookmakerAdapter, DiscoveredEvent, EventPayload, Platform, HEALTH_CHECK_TIMEOUT,
    USER_AGENT,
};
use crate::error::ScrapeError;

const FOOTBALL_SPORT_ID: &str = "sr:sport:1";
const PREMATCH_PRODUCT_ID: &str = "3";
const TOURNAMENT_CONCURRENCY: usize = 10;
const BIZ_CODE_OK: i64 = 10000;

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SportybetEventData {
    pub event_id: String,
    pub estimate_start_time: Option<i64>,
    pub home_team_name: Option<String>,
    pub away_team_name: Option<String>,
    pub sport: Option<SportybetSport>,
    #[serde(default)]
    pub markets: Vec<SportybetMarket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SportybetSport {
    pub id: Option<String>,
    pub name: Option<String>,
    pub category: Option<SportybetCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SportybetCategory {
    pub id: Option<String>,
    pub name: Option<String>,
    pub tournament: Option<SportybetTournament>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SportybetTournament {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SportybetMarket {
    pub id: String,
    pub desc: Option<String>,
    pub name: Option<String>,
    pub specifier: Option<String>,
    pub status: Option<i32>,
    #[serde(default)]
    pub outcomes: Vec<SportybetOutcome>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SportybetOutcome {
    pub id: Option<String>,
    /// Decimal odds as a string; parsed during mapping.
    pub odds: String,
    /// 1 = active, 0 = suspended.
    #[serde(default = "default_active")]
    pub is_active: i32,
    pub desc: String,
}

fn default_active() -> i32 {
    1
}

impl SportybetEventData {
    pub fn kickoff(&self) -> Option<DateTime<Utc>> {
        self.estimate_start_time
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    pub fn tournament_name(&self) -> Option<&str> {
        self.sport
            .as_ref()?
            .category
            .as_ref()?
            .tournament
            .as_ref()?
            .name
            .as_deref()
    }

    pub fn tournament_id(&self) -> Option<&str> {
        self.sport
            .as_ref()?
            .category
            .as_ref()?
            .tournament
            .as_ref()?
            .id
            .as_deref()
    }

    pub fn country(&self) -> Option<&str> {
        self.sport.as_ref()?.category.as_ref()?.name.as_deref()
    }
}

/// Unwrap the factsCenter envelope: `bizCode == 10000` then `data`.
pub fn parse_event_response(body: Value, event_id: &str) -> Result<SportybetEventData, ScrapeError> {
    let biz_code = body.get("bizCode").and_then(|c| c.as_i64()).unwrap_or(-1);
    if biz_code != BIZ_CODE_OK {
        let message = body
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error");
        return Err(ScrapeError::InvalidEventId(format!(
            "{event_id} (bizCode={biz_code}: {message})"
        )));
    }

    let Some(data) = body.get("data") else {
        return Err(ScrapeError::Api(format!(
            "sportybet event {event_id}: response missing 'data'"
        )));
    };

    serde_json::from_value(data.clone())
        .map_err(|e| ScrapeError::Api(format!("sportybet event {event_id}: {e}")))
}

/// Parse one event row from a tournament listing into a discovery record.
/// The native `eventId` doubles as the platform ID; the numeric part is the
/// canonical ID. Started events are dropped.
pub fn parse_listed_event(event: &Value, now: DateTime<Utc>) -> Option<DiscoveredEvent> {
    let event_id = event.get("eventId").and_then(|e| e.as_str())?;
    let sr_id = event_id.strip_prefix("sr:match:")?;
    if sr_id.is_empty() {
        return None;
    }

    let start_ms = event.get("estimateStartTime").and_then(|t| t.as_i64())?;
    let kickoff = Utc.timestamp_millis_opt(start_ms).single()?;
    if kickoff <= now {
        return None;
    }

    Some(DiscoveredEvent {
        sportradar_id: sr_id.to_string(),
        kickoff,
        platform_id: event_id.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SportyBetClient {
    client: reqwest::Client,
    base_url: String,
}

impl SportyBetClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("accept", "*/*")
            .header("accept-language", "en")
            .header("clientid", "web")
            .header("operid", "2")
            .header("platform", "web")
            .header("user-agent", USER_AGENT)
    }

    async fn fetch_event_raw(&self, event_id: &str) -> Result<SportybetEventData, ScrapeError> {
        let url = format!("{}/api/ng/factsCenter/event", self.base_url);
        with_retry("sportybet.fetch_event", || async {
            let cache_buster = Utc::now().timestamp_millis().to_string();
            let response = self
                .request(&url)
                .query(&[
                    ("eventId", event_id),
                    ("productId", PREMATCH_PRODUCT_ID),
                    ("_t", cache_buster.as_str()),
                ])
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ScrapeError::RateLimited);
            }
            if !response.status().is_success() {
                return Err(ScrapeError::Api(format!(
                    "sportybet event {event_id}: status {}",
                    response.status()
                )));
            }

            let body: Value = response.json().await?;
            parse_event_response(body, event_id)
        })
        .await
    }

    async fn fetch_sport_list(&self) -> Result<Value, ScrapeError> {
        let url = format!("{}/api/ng/factsCenter/sportList", self.base_url);
        with_retry("sportybet.fetch_sport_list", || async {
            let response = self
                .request(&url)
                .query(&[("productId", PREMATCH_PRODUCT_ID)])
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(ScrapeError::Api(format!(
                    "sportybet sport list: status {}",
                    response.status()
                )));
            }
            Ok(response.json::<Value>().await?)
        })
        .await
    }

    async fn fetch_tournament_events(&self, tournament_id: &str) -> Result<Vec<Value>, ScrapeError> {
        let url = format!("{}/api/ng/factsCenter/eventsByTournament", self.base_url);
        with_retry("sportybet.fetch_tournament_events", || async {
            let response = self
                .request(&url)
                .query(&[
                    ("tournamentId", tournament_id),
                    ("productId", PREMATCH_PRODUCT_ID),
                ])
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(ScrapeError::Api(format!(
                    "sportybet tournament {tournament_id}: status {}",
                    response.status()
                )));
            }

            let body: Value = response.json().await?;
            let events = body
                .get("data")
                .and_then(|d| d.get("events"))
                .and_then(|e| e.as_array())
                .cloned()
                .unwrap_or_default();
            Ok(events)
        })
        .await
    }

    async fn discover(&self) -> Result<Vec<DiscoveredEvent>, ScrapeError> {
        let now = Utc::now();
        let data = self.fetch_sport_list().await?;

        // Football tournaments out of data.sportList[].categories[].tournaments[].
        let mut tournament_ids: Vec<String> = Vec::new();
        if let Some(sports) = data
            .get("data")
            .and_then(|d| d.get("sportList"))
            .and_then(|s| s.as_array())
        {
            for sport in sports {
                if sport.get("id").and_then(|i| i.as_str()) != Some(FOOTBALL_SPORT_ID) {
                    continue;
                }
                if let Some(categories) = sport.get("categories").and_then(|c| c.as_array()) {
                    for category in categories {
                        if let Some(tournaments) =
                            category.get("tournaments").and_then(|t| t.as_array())
                        {
                            for tournament in tournaments {
                                if let Some(id) = tournament.get("id").and_then(|i| i.as_str()) {
                                    tournament_ids.push(id.to_string());
                                }
                            }
                        }
                    }
                }
            }
        }

        debug!(count = tournament_ids.len(), "Found SportyBet tournaments");

        let gate = Arc::new(Semaphore::new(TOURNAMENT_CONCURRENCY));
        let tasks = tournament_ids.iter().map(|t_id| {
            let gate = gate.clone();
            async move {
                let _permit = gate.acquire().await.ok()?;
                match self.fetch_tournament_events(t_id).await {
                    Ok(events) => Some(
                        events
                            .iter()
                            .filter_map(|e| parse_listed_event(e, now))
                            .collect::<Vec<_>>(),
                    ),
                    Err(e) => {
                        debug!(tournament_id = %t_id, error = %e, "SportyBet tournament fetch failed");
                        None
                    }
                }
            }
        });

        let events: Vec<DiscoveredEvent> = join_all(tasks)
            .await
            .into_iter()
            .flatten()
            .flatten()
            .collect();

        info!(count = events.len(), "Discovered SportyBet events");
        Ok(events)
    }

    pub async fn health(&self) -> bool {
        let url = format!("{}/api/ng/factsCenter/event", self.base_url);
        match self
            .request(&url)
            .query(&[("eventId", "sr:match:1"), ("productId", PREMATCH_PRODUCT_ID)])
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            // Any response, even an error for the dummy ID, means reachable.
            Ok(resp) => matches!(resp.status().as_u16(), 200 | 400 | 404),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl BookmakerAdapter for SportyBetClient {
    fn platform(&self) -> Platform {
        Platform::Sportybet
    }

    async fn discover_events(&self) -> Result<Vec<DiscoveredEvent>, ScrapeError> {
        self.discover().await
    }

    async fn fetch_event(&self, platform_id: &str) -> Result<EventPayload, ScrapeError> {
        Ok(EventPayload::Sportybet(
            self.fetch_event_raw(platform_id).await?,
        ))
    }

    async fn check_health(&self) -> bool {
        self.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_rejects_bad_biz_code() {
        let body = serde_json::json!({"bizCode": 19000, "message": "not found"});
        let err = parse_event_response(body, "sr:match:42").unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidEventId(_)));
    }

    #[test]
    fn envelope_requires_data() {
        let body = serde_json::json!({"bizCode": 10000, "message": "ok"});
        let err = parse_event_response(body, "sr:match:42").unwrap_err();
        assert!(matches!(err, ScrapeError::Api(_)));
    }

    #[test]
    fn envelope_parses_event_data() {
        let body = serde_json::json!({
            "bizCode": 10000,
            "message": "",
            "data": {
                "eventId": "sr:match:61300947",
                "estimateStartTime": 1754146800000i64,
                "homeTeamName": "Arsenal",
                "awayTeamName": "Chelsea",
                "sport": {
                    "id": "sr:sport:1",
                    "name": "Football",
                    "category": {
                        "id": "sr:category:1",
                        "name": "England",
                        "tournament": {"id": "sr:tournament:17", "name": "Premier League"}
                    }
                },
                "markets": [{
                    "id": "1",
                    "desc": "1X2",
                    "outcomes": [
                        {"id": "1", "odds": "2.05", "isActive": 1, "desc": "Home"}
                    ]
                }]
            }
        });

        let data = parse_event_response(body, "sr:match:61300947").unwrap();
        assert_eq!(data.event_id, "sr:match:61300947");
        assert_eq!(data.tournament_name(), Some("Premier League"));
        assert_eq!(data.country(), Some("England"));
        assert_eq!(data.markets.len(), 1);
        assert_eq!(data.markets[0].outcomes[0].odds, "2.05");
    }

    #[test]
    fn listed_event_extracts_canonical_id_and_filters_past() {
        let now = Utc.timestamp_millis_opt(1_754_000_000_000).single().unwrap();

        let upcoming = serde_json::json!({
            "eventId": "sr:match:61300947",
            "estimateStartTime": 1_754_100_000_000i64
        });
        let parsed = parse_listed_event(&upcoming, now).unwrap();
        assert_eq!(parsed.sportradar_id, "61300947");
        assert_eq!(parsed.platform_id, "sr:match:61300947");

        let started = serde_json::json!({
            "eventId": "sr:match:61300948",
            "estimateStartTime": 1_753_900_000_000i64
        });
        assert!(parse_listed_event(&started, now).is_none());

        let foreign = serde_json::json!({
            "eventId": "other:123",
            "estimateStartTime": 1_754_100_000_000i64
        });
        assert!(parse_listed_event(&foreign, now).is_none());
    }
}
