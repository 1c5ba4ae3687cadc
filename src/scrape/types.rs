//! Core value types for the event-centric scraping pipeline.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::{EventPayload, Platform};

/// Status of one event within a scrape cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Pending => "pending",
            ScrapeStatus::InProgress => "in_progress",
            ScrapeStatus::Completed => "completed",
            ScrapeStatus::Failed => "failed",
        }
    }
}

/// One event to scrape across platforms, merged from discovery.
#[derive(Debug, Clone)]
pub struct EventTarget {
    /// Canonical cross-platform ID.
    pub sportradar_id: String,
    pub kickoff: DateTime<Utc>,
    /// Platforms where this event was discovered.
    pub platforms: HashSet<Platform>,
    /// Platform-native event IDs for the per-event fetches.
    pub platform_ids: HashMap<Platform, String>,
    pub status: ScrapeStatus,
    pub results: HashMap<Platform, EventPayload>,
    pub errors: HashMap<Platform, String>,
    pub timing_ms: u64,
    pub platform_timings_ms: HashMap<Platform, u64>,
}

impl EventTarget {
    pub fn new(sportradar_id: String, kickoff: DateTime<Utc>) -> Self {
        Self {
            sportradar_id,
            kickoff,
            platforms: HashSet::new(),
            platform_ids: HashMap::new(),
            status: ScrapeStatus::Pending,
            results: HashMap::new(),
            errors: HashMap::new(),
            timing_ms: 0,
            platform_timings_ms: HashMap::new(),
        }
    }

    pub fn coverage_count(&self) -> usize {
        self.platforms.len()
    }

    pub fn has_betpawa(&self) -> bool {
        self.platforms.contains(&Platform::Betpawa)
    }

    /// Comparable priority tuple; lower sorts first.
    ///
    /// Ordering: urgency tier by kickoff proximity, then earlier kickoff,
    /// then broader coverage, then reference-bookmaker presence.
    pub fn priority_key(&self, now: DateTime<Utc>) -> (u8, i64, i64, bool) {
        let minutes_until = (self.kickoff - now).num_seconds() as f64 / 60.0;
        let urgency = if minutes_until < 30.0 {
            0
        } else if minutes_until < 120.0 {
            1
        } else {
            2
        };

        (
            urgency,
            self.kickoff.timestamp_millis(),
            -(self.coverage_count() as i64),
            !self.has_betpawa(),
        )
    }
}

/// A chunk of up to `batch_size` events processed together.
#[derive(Debug)]
pub struct ScrapeBatch {
    pub batch_id: String,
    pub events: Vec<EventTarget>,
    pub created_at: DateTime<Utc>,
}

impl ScrapeBatch {
    pub fn new(events: Vec<EventTarget>) -> Self {
        Self {
            batch_id: format!("batch_{}", &Uuid::new_v4().simple().to_string()[..8]),
            events,
            created_at: Utc::now(),
        }
    }
}

/// Structured progress events published through the run's broadcaster.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressEvent {
    CycleStart {
        scrape_run_id: i32,
    },
    DiscoveryComplete {
        scrape_run_id: i32,
        discovery_counts: HashMap<String, usize>,
        total_events: usize,
        discovery_timings_ms: HashMap<String, u64>,
        discovery_total_ms: u64,
    },
    QueueBuilt {
        scrape_run_id: i32,
        total_events: usize,
        batch_count: usize,
        batch_size: usize,
    },
    BatchStart {
        scrape_run_id: i32,
        batch_id: String,
        batch_index: usize,
        batch_count: usize,
        event_count: usize,
    },
    EventScraping {
        scrape_run_id: i32,
        sportradar_id: String,
        platforms_pending: Vec<String>,
    },
    EventScraped {
        scrape_run_id: i32,
        sportradar_id: String,
        platforms_scraped: Vec<String>,
        platforms_failed: Vec<String>,
        timing_ms: u64,
        platform_timings_ms: HashMap<String, u64>,
    },
    BatchComplete {
        scrape_run_id: i32,
        batch_id: String,
        batch_index: usize,
        events_stored: usize,
        snapshots_created: usize,
        errors: usize,
        batch_scrape_ms: u64,
        batch_store_ms: u64,
    },
    CycleComplete {
        scrape_run_id: i32,
        total_events: usize,
        events_scraped: usize,
        events_failed: usize,
        total_snapshots: usize,
        batch_count: usize,
        total_timing_ms: u64,
    },
    /// Terminal sentinel published when a run's broadcaster closes.
    RunClosed {
        scrape_run_id: i32,
    },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::CycleComplete { .. } | ProgressEvent::RunClosed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    fn target(sr: &str, minutes_out: i64, platforms: &[Platform]) -> EventTarget {
        let mut t = EventTarget::new(sr.to_string(), base() + Duration::minutes(minutes_out));
        t.platforms = platforms.iter().copied().collect();
        t
    }

    #[test]
    fn urgency_tiers_around_boundaries() {
        let now = base();
        assert_eq!(target("a", 10, &[]).priority_key(now).0, 0);
        assert_eq!(target("b", 29, &[]).priority_key(now).0, 0);
        // Exactly 30 minutes is no longer imminent.
        assert_eq!(target("c", 30, &[]).priority_key(now).0, 1);
        assert_eq!(target("d", 119, &[]).priority_key(now).0, 1);
        // Exactly two hours is the future tier.
        assert_eq!(target("e", 120, &[]).priority_key(now).0, 2);
        assert_eq!(target("f", 600, &[]).priority_key(now).0, 2);
    }

    #[test]
    fn priority_orders_urgency_kickoff_coverage_reference() {
        let now = base();
        let imminent = target("imminent", 10, &[Platform::Bet9ja]);
        let soon = target("soon", 60, &[Platform::Betpawa, Platform::Sportybet, Platform::Bet9ja]);
        let early_future = target("early", 180, &[Platform::Betpawa]);
        let late_future = target("late", 240, &[Platform::Betpawa]);
        let wide = target("wide", 180, &[Platform::Betpawa, Platform::Sportybet]);
        let no_ref = target("noref", 180, &[Platform::Sportybet]);

        let mut queue = vec![
            late_future,
            no_ref,
            early_future,
            soon,
            wide,
            imminent,
        ];
        queue.sort_by_key(|e| e.priority_key(now));

        let order: Vec<&str> = queue.iter().map(|e| e.sportradar_id.as_str()).collect();
        // Imminent first, then the soon tier, then futures by kickoff with
        // broader coverage and reference presence breaking ties.
        assert_eq!(order, vec!["imminent", "soon", "wide", "early", "noref", "late"]);
    }

    #[test]
    fn progress_event_serializes_with_event_type_tag() {
        let event = ProgressEvent::CycleStart { scrape_run_id: 7 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "CYCLE_START");
        assert_eq!(json["scrape_run_id"], 7);
        assert!(!event.is_terminal());
        assert!(ProgressEvent::RunClosed { scrape_run_id: 7 }.is_terminal());
    }
}
