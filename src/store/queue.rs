//! Bounded single-consumer write queue.
//!
//! The coordinator enqueues immutable `WriteBatch` values; one background
//! worker persists them in order. `enqueue` blocks when the queue is full,
//! which paces scraping to the storage layer's actual throughput.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::writer;
use crate::error::retry_backoff;

const WRITE_MAX_ATTEMPTS: u32 = 3;

/// One outcome inside a market payload: `[{name, odds, is_active}, ...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeOdds {
    pub name: String,
    pub odds: f64,
    pub is_active: bool,
}

/// Plain data for one market row within a snapshot.
#[derive(Debug, Clone)]
pub struct MarketWrite {
    pub betpawa_market_id: String,
    pub betpawa_market_name: String,
    pub line: Option<f64>,
    pub handicap_type: Option<String>,
    pub handicap_home: Option<f64>,
    pub handicap_away: Option<f64>,
    pub outcomes: Vec<OutcomeOdds>,
    pub market_groups: Option<Vec<String>>,
    pub unavailable_at: Option<DateTime<Utc>>,
}

/// Plain data for one BetPawa snapshot insert.
#[derive(Debug, Clone)]
pub struct SnapshotWrite {
    pub event_id: i32,
    pub bookmaker_id: i32,
    pub scrape_run_id: Option<i32>,
    pub markets: Vec<MarketWrite>,
}

/// Plain data for one competitor snapshot insert.
#[derive(Debug, Clone)]
pub struct CompetitorSnapshotWrite {
    pub competitor_event_id: i32,
    pub scrape_run_id: Option<i32>,
    pub markets: Vec<MarketWrite>,
}

/// A market whose availability flag changed; UPDATE on an existing row.
/// `unavailable_at = None` clears the flag when a market returns.
#[derive(Debug, Clone)]
pub struct AvailabilityUpdate {
    pub snapshot_id: i64,
    pub betpawa_market_id: String,
    pub line: Option<f64>,
    pub unavailable_at: Option<DateTime<Utc>>,
}

/// One risk alert row to insert.
#[derive(Debug, Clone)]
pub struct RiskAlertWrite {
    pub event_id: i32,
    pub bookmaker_slug: String,
    pub market_id: String,
    pub market_name: String,
    pub line: Option<f64>,
    pub outcome_name: Option<String>,
    pub alert_type: String,
    pub severity: String,
    pub change_percent: f64,
    pub old_value: Option<f64>,
    pub new_value: Option<f64>,
    pub competitor_old_value: Option<f64>,
    pub competitor_new_value: Option<f64>,
    pub competitor_direction: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub event_kickoff: DateTime<Utc>,
}

/// A complete batch of writes, with the changed/unchanged split already made
/// by the change detector.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub changed_betpawa: Vec<SnapshotWrite>,
    pub changed_competitor: Vec<CompetitorSnapshotWrite>,
    pub unchanged_betpawa_ids: Vec<i64>,
    pub unchanged_competitor_ids: Vec<i64>,
    pub scrape_run_id: Option<i32>,
    pub batch_index: usize,
    pub availability_betpawa: Vec<AvailabilityUpdate>,
    pub availability_competitor: Vec<AvailabilityUpdate>,
    pub risk_alerts: Vec<RiskAlertWrite>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.changed_betpawa.is_empty()
            && self.changed_competitor.is_empty()
            && self.unchanged_betpawa_ids.is_empty()
            && self.unchanged_competitor_ids.is_empty()
            && self.availability_betpawa.is_empty()
            && self.availability_competitor.is_empty()
            && self.risk_alerts.is_empty()
    }
}

pub struct AsyncWriteQueue {
    tx: std::sync::Mutex<Option<mpsc::Sender<WriteBatch>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AsyncWriteQueue {
    /// Spawn the background worker and return the queue handle.
    pub fn start(pool: PgPool, maxsize: usize) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<WriteBatch>(maxsize);

        let handle = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                process_with_retry(&pool, batch).await;
            }
            info!("Write queue worker drained and stopped");
        });

        info!(maxsize, "Write queue started");
        Arc::new(Self {
            tx: std::sync::Mutex::new(Some(tx)),
            worker: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    /// Enqueue a batch; blocks while the queue is full (backpressure).
    /// Returns false if the queue has been stopped.
    pub async fn enqueue(&self, batch: WriteBatch) -> bool {
        let sender = self.tx.lock().unwrap().clone();
        let Some(sender) = sender else {
            warn!("Write queue stopped; dropping batch");
            return false;
        };
        match sender.send(batch).await {
            Ok(()) => true,
            Err(_) => {
                warn!("Write queue closed; dropping batch");
                false
            }
        }
    }

    /// Stop accepting new batches, drain what is queued, then wait for the
    /// worker to exit.
    pub async fn stop(&self) {
        // Dropping the sender lets the worker drain the channel and finish.
        self.tx.lock().unwrap().take();
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Write queue worker panicked");
            }
        }
        info!("Write queue stopped");
    }
}

/// Persist one batch with retry and exponential backoff. On final failure the
/// batch shape is logged and the batch dropped; it is never re-enqueued, so
/// commit order is preserved for everything behind it.
async fn process_with_retry(pool: &PgPool, batch: WriteBatch) {
    let mut last_err: Option<sqlx::Error> = None;

    for attempt in 1..=WRITE_MAX_ATTEMPTS {
        let started = std::time::Instant::now();
        match writer::handle_write_batch(pool, &batch).await {
            Ok(stats) => {
                info!(
                    batch_index = batch.batch_index,
                    attempt,
                    inserted_bp = stats.inserted_betpawa,
                    inserted_comp = stats.inserted_competitor,
                    confirmed_bp = stats.confirmed_betpawa,
                    confirmed_comp = stats.confirmed_competitor,
                    alerts = stats.alerts_inserted,
                    write_ms = started.elapsed().as_millis() as u64,
                    "Write batch processed"
                );
                return;
            }
            Err(e) => {
                if attempt < WRITE_MAX_ATTEMPTS {
                    let backoff = retry_backoff(attempt);
                    warn!(
                        batch_index = batch.batch_index,
                        attempt,
                        backoff_s = backoff.as_secs(),
                        error = %e,
                        "Write batch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                last_err = Some(e);
            }
        }
    }

    error!(
        batch_index = batch.batch_index,
        attempts = WRITE_MAX_ATTEMPTS,
        changed_bp = batch.changed_betpawa.len(),
        changed_comp = batch.changed_competitor.len(),
        unchanged_bp = batch.unchanged_betpawa_ids.len(),
        unchanged_comp = batch.unchanged_competitor_ids.len(),
        error = %last_err.map(|e| e.to_string()).unwrap_or_default(),
        "Write batch dropped after exhausting retries"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_detection() {
        let batch = WriteBatch::default();
        assert!(batch.is_empty());

        let batch = WriteBatch {
            unchanged_betpawa_ids: vec![7],
            ..Default::default()
        };
        assert!(!batch.is_empty());
    }

    #[test]
    fn outcome_serializes_to_snapshot_payload_shape() {
        let outcome = OutcomeOdds {
            name: "Over".to_string(),
            odds: 1.9,
            is_active: true,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "Over", "odds": 1.9, "is_active": true})
        );
    }
}
