//! Bet9ja adapter (competitor).
//!
//! Bet9ja is the rate-sensitive platform: its gate is 15 concurrent requests
//! and every request is followed by a fixed pacing delay (default 25 ms).
//! The delay is pacing, not retry backoff. Responses use a result-code
//! envelope: `R` of "OK"/"D" is success, "E" is per-event not-found; the
//! payload sits under `D`, odds under `D.O` as a flat key -> odds-string map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
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

const CACHE_VERSION: &str = "1.301.2.225";
const GROUP_CONCURRENCY: usize = 15;
const SOCCER_SPORT_KEY: &str = "1";

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// The `D` payload of a GetEvent response.
#[derive(Debug, Clone, Deserialize)]
pub struct Bet9jaEvent {
    #[serde(rename = "ID")]
    pub id: Option<Value>,
    /// "Home Team - Away Team".
    #[serde(rename = "DS")]
    pub display: Option<String>,
    /// "YYYY-MM-DD HH:MM:SS", UTC.
    #[serde(rename = "STARTDATE")]
    pub start_date: Option<String>,
    /// SportRadar ID for cross-platform matching.
    #[serde(rename = "EXTID")]
    pub external_id: Option<String>,
    /// Group (tournament) display name.
    #[serde(rename = "GN")]
    pub group_name: Option<String>,
    #[serde(rename = "GID")]
    pub group_id: Option<Value>,
    /// Sport group, which carries the country.
    #[serde(rename = "SG")]
    pub sport_group: Option<String>,
    /// Flat odds map, e.g. `{"S_1X2_1": "1.50", "S_OU@2.5_O": "1.80"}`.
    #[serde(rename = "O", default)]
    pub odds: HashMap<String, Value>,
}

impl Bet9jaEvent {
    pub fn event_id(&self) -> Option<String> {
        self.id.as_ref().and_then(value_to_string)
    }

    pub fn group_id_string(&self) -> Option<String> {
        self.group_id.as_ref().and_then(value_to_string)
    }

    pub fn kickoff(&self) -> Option<DateTime<Utc>> {
        parse_start_date(self.start_date.as_deref()?)
    }

    /// Split "Home Team - Away Team" into the pair.
    pub fn teams(&self) -> (String, String) {
        split_display_name(self.display.as_deref().unwrap_or(""))
    }

    /// Odds values normalized to strings (upstream mixes strings and numbers).
    pub fn odds_map(&self) -> HashMap<String, String> {
        self.odds
            .iter()
            .filter_map(|(k, v)| value_to_string(v).map(|s| (k.clone(), s)))
            .collect()
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn split_display_name(display: &str) -> (String, String) {
    match display.split_once(" - ") {
        Some((home, away)) => (home.trim().to_string(), away.trim().to_string()),
        None => (display.trim().to_string(), "Unknown".to_string()),
    }
}

fn parse_start_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Unwrap the result-code envelope. `event_context` selects the stricter
/// per-event handling where `R == "E"` means the event does not exist.
pub fn parse_envelope(body: Value, context: &str, event_context: bool) -> Result<Value, ScrapeError> {
    let Some(obj) = body.as_object() else {
        return Err(ScrapeError::Api(format!(
            "bet9ja {context}: expected object response"
        )));
    };

    let code = obj.get("R").and_then(|r| r.as_str()).unwrap_or("");
    match code {
        "OK" | "D" => {}
        "E" if event_context => {
            return Err(ScrapeError::InvalidEventId(context.to_string()));
        }
        other => {
            return Err(ScrapeError::Api(format!(
                "bet9ja {context}: R='{other}', expected 'OK'"
            )));
        }
    }

    match obj.get("D") {
        Some(d) if d.is_object() => Ok(d.clone()),
        _ => Err(ScrapeError::Api(format!(
            "bet9ja {context}: 'D' payload missing or not an object"
        ))),
    }
}

/// Parse one event row from a group listing. `EXTID` is the canonical ID,
/// `ID` is the native one. Started events are dropped.
pub fn parse_group_event(event: &Value, now: DateTime<Utc>) -> Option<DiscoveredEvent> {
    let sr_id = event.get("EXTID").and_then(value_to_string)?;
    let platform_id = event.get("ID").and_then(value_to_string)?;

    let kickoff = event
        .get("STARTDATE")
        .and_then(|s| s.as_str())
        .and_then(parse_start_date)?;
    if kickoff <= now {
        return None;
    }

    Some(DiscoveredEvent {
        sportradar_id: sr_id,
        kickoff,
        platform_id,
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct Bet9jaClient {
    client: reqwest::Client,
    base_url: String,
    /// Minimum gap after each request; damps the request rate.
    request_delay: Duration,
}

impl Bet9jaClient {
    pub fn new(client: reqwest::Client, base_url: String, delay_ms: u64) -> Self {
        Self {
            client,
            base_url,
            request_delay: Duration::from_millis(delay_ms),
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("accept", "*/*")
            .header("accept-language", "en-GB,en-US;q=0.9,en;q=0.8")
            .header("user-agent", USER_AGENT)
    }

    async fn pace(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }

    async fn fetch_event_raw(&self, event_id: &str) -> Result<Bet9jaEvent, ScrapeError> {
        let result = with_retry("bet9ja.fetch_event", || async {
            let response = self
                .request("/desktop/feapi/PalimpsestAjax/GetEvent")
                .query(&[("EVENTID", event_id), ("v_cache_version", CACHE_VERSION)])
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ScrapeError::RateLimited);
            }
            if !response.status().is_success() {
                return Err(ScrapeError::Api(format!(
                    "bet9ja event {event_id}: status {}",
                    response.status()
                )));
            }

            let body: Value = response.json().await?;
            let payload = parse_envelope(body, &format!("event {event_id}"), true)?;
            serde_json::from_value(payload)
                .map_err(|e| ScrapeError::Api(format!("bet9ja event {event_id}: {e}")))
        })
        .await;

        self.pace().await;
        result
    }

    async fn fetch_group_events(&self, group_id: &str) -> Result<Vec<Value>, ScrapeError> {
        let result = with_retry("bet9ja.fetch_group_events", || async {
            let response = self
                .request("/desktop/feapi/PalimpsestAjax/GetEventsInGroupV2")
                .query(&[
                    ("GROUPID", group_id),
                    ("DISP", "0"),
                    ("GROUPMARKETID", "1"),
                    ("v_cache_version", CACHE_VERSION),
                ])
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(ScrapeError::Api(format!(
                    "bet9ja group {group_id}: status {}",
                    response.status()
                )));
            }

            let body: Value = response.json().await?;
            let payload = parse_envelope(body, &format!("group {group_id}"), false)?;
            let events = payload
                .get("E")
                .and_then(|e| e.as_array())
                .cloned()
                .unwrap_or_default();
            Ok(events)
        })
        .await;

        self.pace().await;
        result
    }

    async fn fetch_sports(&self) -> Result<Value, ScrapeError> {
        let result = with_retry("bet9ja.fetch_sports", || async {
            let response = self
                .request("/desktop/feapi/PalimpsestAjax/GetSports")
                .query(&[("DISP", "0"), ("v_cache_version", CACHE_VERSION)])
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(ScrapeError::Api(format!(
                    "bet9ja sports: status {}",
                    response.status()
                )));
            }

            let body: Value = response.json().await?;
            parse_envelope(body, "sports", false)
        })
        .await;

        self.pace().await;
        result
    }

    async fn discover(&self) -> Result<Vec<DiscoveredEvent>, ScrapeError> {
        let now = Utc::now();
        let payload = self.fetch_sports().await?;

        // Group IDs out of D.PAL.1.SG.<sg_id>.G.<group_id>.
        let mut group_ids: Vec<String> = Vec::new();
        if let Some(sport_groups) = payload
            .get("PAL")
            .and_then(|p| p.get(SOCCER_SPORT_KEY))
            .and_then(|s| s.get("SG"))
            .and_then(|sg| sg.as_object())
        {
            for sg_data in sport_groups.values() {
                if let Some(groups) = sg_data.get("G").and_then(|g| g.as_object()) {
                    group_ids.extend(groups.keys().cloned());
                }
            }
        }

        debug!(count = group_ids.len(), "Found Bet9ja groups");

        let gate = Arc::new(Semaphore::new(GROUP_CONCURRENCY));
        let tasks = group_ids.iter().map(|g_id| {
            let gate = gate.clone();
            async move {
                let _permit = gate.acquire().await.ok()?;
                match self.fetch_group_events(g_id).await {
                    Ok(events) => Some(
                        events
                            .iter()
                            .filter_map(|e| parse_group_event(e, now))
                            .collect::<Vec<_>>(),
                    ),
                    Err(e) => {
                        debug!(group_id = %g_id, error = %e, "Bet9ja group fetch failed");
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

        info!(count = events.len(), "Discovered Bet9ja events");
        Ok(events)
    }

    pub async fn health(&self) -> bool {
        match self
            .request("/desktop/feapi/PalimpsestAjax/GetSports")
            .query(&[("DISP", "0"), ("v_cache_version", CACHE_VERSION)])
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl BookmakerAdapter for Bet9jaClient {
    fn platform(&self) -> Platform {
        Platform::Bet9ja
    }

    async fn discover_events(&self) -> Result<Vec<DiscoveredEvent>, ScrapeError> {
        self.discover().await
    }

    async fn fetch_event(&self, platform_id: &str) -> Result<EventPayload, ScrapeError> {
        Ok(EventPayload::Bet9ja(self.fetch_event_raw(platform_id).await?))
    }

    async fn check_health(&self) -> bool {
        self.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn envelope_accepts_ok_and_d_codes() {
        for code in ["OK", "D"] {
            let body = serde_json::json!({"R": code, "D": {"ID": 1}});
            assert!(parse_envelope(body, "event 1", true).is_ok());
        }
    }

    #[test]
    fn envelope_maps_e_code_to_invalid_event() {
        let body = serde_json::json!({"R": "E"});
        let err = parse_envelope(body, "event 707096003", true).unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidEventId(_)));
    }

    #[test]
    fn envelope_rejects_unknown_codes_outside_event_context() {
        let body = serde_json::json!({"R": "E", "D": {}});
        let err = parse_envelope(body, "sports", false).unwrap_err();
        assert!(matches!(err, ScrapeError::Api(_)));
    }

    #[test]
    fn event_payload_accessors() {
        let event: Bet9jaEvent = serde_json::from_value(serde_json::json!({
            "ID": 707096003,
            "DS": "Arsenal FC - Chelsea FC",
            "STARTDATE": "2026-08-02 15:00:00",
            "EXTID": "61300947",
            "GN": "England Premier League",
            "GID": 170880,
            "SG": "England",
            "O": {"S_1X2_1": "1.50", "S_1X2_X": 3.20}
        }))
        .unwrap();

        assert_eq!(event.event_id().as_deref(), Some("707096003"));
        let (home, away) = event.teams();
        assert_eq!(home, "Arsenal FC");
        assert_eq!(away, "Chelsea FC");
        assert_eq!(
            event.kickoff().unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 2, 15, 0, 0).unwrap()
        );

        let odds = event.odds_map();
        assert_eq!(odds.get("S_1X2_1").map(String::as_str), Some("1.50"));
        assert_eq!(odds.get("S_1X2_X").map(String::as_str), Some("3.2"));
    }

    #[test]
    fn group_event_parse_filters_started() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();

        let upcoming = serde_json::json!({
            "ID": 707096003,
            "EXTID": "61300947",
            "STARTDATE": "2026-08-01 15:00:00"
        });
        let parsed = parse_group_event(&upcoming, now).unwrap();
        assert_eq!(parsed.sportradar_id, "61300947");
        assert_eq!(parsed.platform_id, "707096003");

        let started = serde_json::json!({
            "ID": 707096004,
            "EXTID": "61300948",
            "STARTDATE": "2026-08-01 11:00:00"
        });
        assert!(parse_group_event(&started, now).is_none());

        // No EXTID -> cannot be matched across platforms, skipped.
        let no_ext = serde_json::json!({
            "ID": 707096005,
            "STARTDATE": "2026-08-01 15:00:00"
        });
        assert!(parse_group_event(&no_ext, now).is_none());
    }
}
