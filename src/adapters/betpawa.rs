//! BetPawa adapter (reference bookmaker).
//!
//! BetPawa's market taxonomy is the canonical one, so its payloads pass
//! through without translation. Discovery walks the football category tree
//! (regions -> competitions -> event lists); the canonical SportRadar ID is
//! read off the SPORTRADAR widget, with a per-event fetch as fallback when a
//! list row does not expose it inline.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{
    with_retry, BookmakerAdapter, DiscoveredEvent, EventPayload, Platform, HEALTH_CHECK_TIMEOUT,
    USER_AGENT,
};
use crate::error::ScrapeError;
use crate::store::{MarketWrite, OutcomeOdds};

const FOOTBALL_CATEGORY_ID: &str = "2";
const COMPETITION_CONCURRENCY: usize = 5;
const EVENT_FETCH_CONCURRENCY: usize = 10;
const EVENTS_PAGE_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetpawaEvent {
    pub id: Value,
    pub name: Option<String>,
    pub start_time: Option<String>,
    #[serde(default)]
    pub participants: Vec<BetpawaParticipant>,
    pub competition: Option<BetpawaCompetition>,
    pub region: Option<BetpawaRegion>,
    #[serde(default)]
    pub widgets: Vec<BetpawaWidget>,
    #[serde(default)]
    pub markets: Vec<BetpawaMarket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BetpawaParticipant {
    pub name: Option<String>,
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BetpawaCompetition {
    pub id: Option<Value>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BetpawaRegion {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BetpawaWidget {
    #[serde(rename = "type")]
    pub widget_type: Option<String>,
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetpawaMarket {
    pub market_type: BetpawaMarketType,
    #[serde(default)]
    pub row: Vec<BetpawaMarketRow>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetpawaMarketType {
    pub id: Option<Value>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub tabs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetpawaMarketRow {
    pub formatted_handicap: Option<String>,
    #[serde(default)]
    pub prices: Vec<BetpawaPrice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BetpawaPrice {
    pub name: Option<String>,
    pub price: Option<f64>,
    #[serde(default)]
    pub suspended: bool,
    pub handicap: Option<Value>,
}

/// Upstream IDs arrive as either numbers or strings.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl BetpawaEvent {
    pub fn event_id(&self) -> Option<String> {
        id_string(&self.id)
    }

    /// The SPORTRADAR widget carries the canonical cross-platform ID.
    pub fn sportradar_id(&self) -> Option<String> {
        sportradar_widget_id(&self.widgets)
    }

    pub fn kickoff(&self) -> Option<DateTime<Utc>> {
        parse_start_time(self.start_time.as_deref()?)
    }

    pub fn home_team(&self) -> &str {
        self.participant_at(1)
    }

    pub fn away_team(&self) -> &str {
        self.participant_at(2)
    }

    fn participant_at(&self, position: i32) -> &str {
        self.participants
            .iter()
            .find(|p| p.position == Some(position))
            .and_then(|p| p.name.as_deref())
            .unwrap_or("Unknown")
    }
}

pub fn sportradar_widget_id(widgets: &[BetpawaWidget]) -> Option<String> {
    widgets
        .iter()
        .find(|w| w.widget_type.as_deref() == Some("SPORTRADAR"))
        .and_then(|w| w.id.as_ref())
        .and_then(id_string)
}

fn parse_start_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Market parsing (canonical passthrough)
// ---------------------------------------------------------------------------

/// Extract market rows from a BetPawa event payload. No mapping needed:
/// these IDs and names are already the canonical vocabulary.
pub fn parse_markets(event: &BetpawaEvent) -> Vec<MarketWrite> {
    let mut markets = Vec::new();

    for market in &event.markets {
        let Some(market_id) = market.market_type.id.as_ref().and_then(id_string) else {
            continue;
        };
        let market_name = market
            .market_type
            .display_name
            .clone()
            .unwrap_or_default();

        // Tabs drive the UI category chips; "all" is implicit on everything.
        let mut market_groups: Vec<String> = market
            .market_type
            .tabs
            .iter()
            .filter(|t| t.as_str() != "all")
            .cloned()
            .collect();
        if market_groups.is_empty() {
            market_groups.push("other".to_string());
        }

        for row in &market.row {
            let mut line = row
                .formatted_handicap
                .as_deref()
                .and_then(|h| h.parse::<f64>().ok());
            if line.is_none() {
                line = row
                    .prices
                    .first()
                    .and_then(|p| p.handicap.as_ref())
                    .and_then(|h| match h {
                        Value::String(s) => s.parse::<f64>().ok(),
                        Value::Number(n) => n.as_f64(),
                        _ => None,
                    });
            }

            let outcomes: Vec<OutcomeOdds> = row
                .prices
                .iter()
                .filter_map(|p| {
                    let name = p.name.clone()?;
                    let odds = p.price?;
                    Some(OutcomeOdds {
                        name,
                        odds,
                        is_active: !p.suspended,
                    })
                })
                .collect();

            if outcomes.is_empty() {
                continue;
            }

            markets.push(MarketWrite {
                betpawa_market_id: market_id.clone(),
                betpawa_market_name: market_name.clone(),
                line,
                handicap_type: None,
                handicap_home: None,
                handicap_away: None,
                outcomes,
                market_groups: Some(market_groups.clone()),
                unavailable_at: None,
            });
        }
    }

    markets
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BetPawaClient {
    client: reqwest::Client,
    base_url: String,
}

impl BetPawaClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("accept", "*/*")
            .header("accept-language", "en-GB,en-US;q=0.9,en;q=0.8")
            .header("devicetype", "web")
            .header("user-agent", USER_AGENT)
            .header("x-pawa-brand", "betpawa-nigeria")
    }

    async fn fetch_event_raw(&self, event_id: &str) -> Result<BetpawaEvent, ScrapeError> {
        let url = format!("{}/api/sportsbook/v3/events/{}", self.base_url, event_id);
        with_retry("betpawa.fetch_event", || async {
            let response = self.request(&url).send().await?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(ScrapeError::InvalidEventId(event_id.to_string()));
            }
            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ScrapeError::RateLimited);
            }
            if !response.status().is_success() {
                return Err(ScrapeError::Api(format!(
                    "betpawa event {event_id}: status {}",
                    response.status()
                )));
            }

            let data: Value = response.json().await?;
            if data.get("id").is_none() {
                return Err(ScrapeError::Api(format!(
                    "betpawa event {event_id}: response missing 'id'"
                )));
            }

            serde_json::from_value(data)
                .map_err(|e| ScrapeError::Api(format!("betpawa event {event_id}: {e}")))
        })
        .await
    }

    async fn fetch_categories(&self) -> Result<Value, ScrapeError> {
        let url = format!(
            "{}/api/sportsbook/v3/categories/list/{}",
            self.base_url, FOOTBALL_CATEGORY_ID
        );
        with_retry("betpawa.fetch_categories", || async {
            let response = self.request(&url).send().await?;
            if !response.status().is_success() {
                return Err(ScrapeError::Api(format!(
                    "betpawa categories: status {}",
                    response.status()
                )));
            }
            Ok(response.json::<Value>().await?)
        })
        .await
    }

    async fn fetch_event_list(&self, competition_id: &str) -> Result<Value, ScrapeError> {
        let query = serde_json::json!({
            "queries": [{
                "query": {
                    "eventType": "UPCOMING",
                    "categories": [FOOTBALL_CATEGORY_ID],
                    "zones": {"competitions": [competition_id]},
                    "hasOdds": true,
                },
                "view": {},
                "skip": 0,
                "take": EVENTS_PAGE_SIZE,
            }]
        });
        let url = format!(
            "{}/api/sportsbook/v3/events/lists/by-queries",
            self.base_url
        );

        with_retry("betpawa.fetch_event_list", || async {
            let response = self
                .request(&url)
                .query(&[("q", query.to_string())])
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(ScrapeError::Api(format!(
                    "betpawa events for competition {competition_id}: status {}",
                    response.status()
                )));
            }
            Ok(response.json::<Value>().await?)
        })
        .await
    }

    async fn discover(&self) -> Result<Vec<DiscoveredEvent>, ScrapeError> {
        let now = Utc::now();
        let categories = self.fetch_categories().await?;
        let competition_ids = extract_competition_ids(&categories);
        info!(count = competition_ids.len(), "Found BetPawa competitions");

        let comp_gate = Arc::new(Semaphore::new(COMPETITION_CONCURRENCY));
        let event_gate = Arc::new(Semaphore::new(EVENT_FETCH_CONCURRENCY));

        let tasks = competition_ids.iter().map(|comp_id| {
            let comp_gate = comp_gate.clone();
            let event_gate = event_gate.clone();
            async move {
                let _permit = comp_gate.acquire().await.ok()?;
                match self.discover_competition(comp_id, now, &event_gate).await {
                    Ok(events) => Some(events),
                    Err(e) => {
                        debug!(competition_id = %comp_id, error = %e, "BetPawa competition fetch failed");
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

        info!(count = events.len(), "Discovered BetPawa events");
        Ok(events)
    }

    async fn discover_competition(
        &self,
        competition_id: &str,
        now: DateTime<Utc>,
        event_gate: &Semaphore,
    ) -> Result<Vec<DiscoveredEvent>, ScrapeError> {
        let data = self.fetch_event_list(competition_id).await?;
        let (mut events, need_full_fetch) = parse_event_list(&data, now);

        // List rows without the SPORTRADAR widget need a per-event fetch.
        let fetches = need_full_fetch.into_iter().map(|(event_id, kickoff)| async move {
            let _permit = event_gate.acquire().await.ok()?;
            match self.fetch_event_raw(&event_id).await {
                Ok(full) => full.sportradar_id().map(|sr_id| DiscoveredEvent {
                    sportradar_id: sr_id,
                    kickoff,
                    platform_id: event_id,
                }),
                Err(e) => {
                    debug!(event_id = %event_id, error = %e, "BetPawa event fetch failed during discovery");
                    None
                }
            }
        });

        events.extend(join_all(fetches).await.into_iter().flatten());
        Ok(events)
    }

    pub async fn health(&self) -> bool {
        let url = format!(
            "{}/api/sportsbook/v3/categories/list/{}",
            self.base_url, FOOTBALL_CATEGORY_ID
        );
        match self
            .request(&url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Competition IDs out of the category tree:
/// `withRegions[0].regions[].competitions[].competition.id`.
pub fn extract_competition_ids(categories: &Value) -> Vec<String> {
    let mut ids = Vec::new();
    let regions = categories
        .get("withRegions")
        .and_then(|w| w.as_array())
        .and_then(|w| w.first())
        .and_then(|first| first.get("regions"))
        .and_then(|r| r.as_array());

    if let Some(regions) = regions {
        for region in regions {
            if let Some(competitions) = region.get("competitions").and_then(|c| c.as_array()) {
                for comp in competitions {
                    if let Some(id) = comp
                        .get("competition")
                        .and_then(|c| c.get("id"))
                        .and_then(id_string)
                    {
                        ids.push(id);
                    }
                }
            }
        }
    }
    ids
}

/// Parse an event-list response into discovered events (SR ID inline) plus
/// `(event_id, kickoff)` pairs that need a full fetch. Events already kicked
/// off are dropped.
pub fn parse_event_list(
    data: &Value,
    now: DateTime<Utc>,
) -> (Vec<DiscoveredEvent>, Vec<(String, DateTime<Utc>)>) {
    let mut from_list = Vec::new();
    let mut need_full_fetch = Vec::new();

    let rows = data
        .get("responses")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
        .and_then(|first| first.get("responses"))
        .and_then(|r| r.as_array());

    let Some(rows) = rows else {
        return (from_list, need_full_fetch);
    };

    for row in rows {
        let Some(event_id) = row.get("id").and_then(id_string) else {
            continue;
        };
        let Some(kickoff) = row
            .get("startTime")
            .and_then(|s| s.as_str())
            .and_then(parse_start_time)
        else {
            continue;
        };
        if kickoff <= now {
            continue;
        }

        let widgets: Vec<BetpawaWidget> = row
            .get("widgets")
            .and_then(|w| serde_json::from_value(w.clone()).ok())
            .unwrap_or_default();

        match sportradar_widget_id(&widgets) {
            Some(sr_id) => from_list.push(DiscoveredEvent {
                sportradar_id: sr_id,
                kickoff,
                platform_id: event_id,
            }),
            None => need_full_fetch.push((event_id, kickoff)),
        }
    }

    (from_list, need_full_fetch)
}

#[async_trait]
impl BookmakerAdapter for BetPawaClient {
    fn platform(&self) -> Platform {
        Platform::Betpawa
    }

    async fn discover_events(&self) -> Result<Vec<DiscoveredEvent>, ScrapeError> {
        self.discover().await
    }

    async fn fetch_event(&self, platform_id: &str) -> Result<EventPayload, ScrapeError> {
        let event = self.fetch_event_raw(platform_id).await?;
        if event.event_id().is_none() {
            warn!(platform_id, "BetPawa event payload missing id");
        }
        Ok(EventPayload::Betpawa(event))
    }

    async fn check_health(&self) -> bool {
        self.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> BetpawaEvent {
        serde_json::from_value(serde_json::json!({
            "id": 32299257,
            "name": "Arsenal - Chelsea",
            "startTime": "2026-08-02T15:00:00Z",
            "participants": [
                {"name": "Arsenal", "position": 1},
                {"name": "Chelsea", "position": 2}
            ],
            "competition": {"id": 11965, "name": "Premier League"},
            "region": {"name": "England"},
            "widgets": [{"type": "SPORTRADAR", "id": 61300947}],
            "markets": [
                {
                    "marketType": {"id": 3743, "displayName": "1X2 - Full Time", "tabs": ["all", "popular"]},
                    "row": [{
                        "prices": [
                            {"name": "1", "price": 2.0, "suspended": false},
                            {"name": "X", "price": 3.2, "suspended": false},
                            {"name": "2", "price": 3.5, "suspended": false}
                        ]
                    }]
                },
                {
                    "marketType": {"id": 5000, "displayName": "Over/Under Total Goals - Full Time", "tabs": ["all", "goals"]},
                    "row": [{
                        "formattedHandicap": "2.5",
                        "prices": [
                            {"name": "Over", "price": 1.9, "suspended": false},
                            {"name": "Under", "price": 1.95, "suspended": true}
                        ]
                    }]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn event_accessors() {
        let event = sample_event();
        assert_eq!(event.event_id().as_deref(), Some("32299257"));
        assert_eq!(event.sportradar_id().as_deref(), Some("61300947"));
        assert_eq!(event.home_team(), "Arsenal");
        assert_eq!(event.away_team(), "Chelsea");
        assert_eq!(
            event.kickoff().unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 2, 15, 0, 0).unwrap()
        );
    }

    #[test]
    fn parse_markets_passthrough() {
        let markets = parse_markets(&sample_event());
        assert_eq!(markets.len(), 2);

        let m1 = &markets[0];
        assert_eq!(m1.betpawa_market_id, "3743");
        assert_eq!(m1.line, None);
        assert_eq!(m1.outcomes.len(), 3);
        assert!(m1.outcomes.iter().all(|o| o.is_active));
        assert_eq!(m1.market_groups.as_deref(), Some(&["popular".to_string()][..]));

        let m2 = &markets[1];
        assert_eq!(m2.line, Some(2.5));
        assert!(!m2.outcomes[1].is_active);
    }

    #[test]
    fn market_without_priced_outcomes_is_dropped() {
        let mut event = sample_event();
        event.markets[0].row[0].prices.clear();
        let markets = parse_markets(&event);
        assert_eq!(markets.len(), 1);
    }

    #[test]
    fn event_list_splits_inline_and_full_fetch() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let data = serde_json::json!({
            "responses": [{"responses": [
                {
                    "id": 1,
                    "startTime": "2026-08-01T15:00:00Z",
                    "widgets": [{"type": "SPORTRADAR", "id": 111}]
                },
                {"id": 2, "startTime": "2026-08-01T16:00:00Z", "widgets": []},
                // Already kicked off; must be excluded.
                {"id": 3, "startTime": "2026-08-01T11:00:00Z",
                 "widgets": [{"type": "SPORTRADAR", "id": 333}]}
            ]}]
        });

        let (inline, full) = parse_event_list(&data, now);
        assert_eq!(inline.len(), 1);
        assert_eq!(inline[0].sportradar_id, "111");
        assert_eq!(inline[0].platform_id, "1");
        assert_eq!(full, vec![("2".to_string(), Utc.with_ymd_and_hms(2026, 8, 1, 16, 0, 0).unwrap())]);
    }

    #[test]
    fn competition_ids_from_category_tree() {
        let categories = serde_json::json!({
            "withRegions": [{
                "regions": [
                    {"competitions": [{"competition": {"id": 11965}}, {"competition": {"id": "12000"}}]},
                    {"competitions": []}
                ]
            }]
        });
        assert_eq!(extract_competition_ids(&categories), vec!["11965", "12000"]);
    }
}
