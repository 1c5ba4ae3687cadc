//! Per-run progress fan-out.
//!
//! One broadcaster per scrape run; the coordinator publishes, any number of
//! subscribers follow. A new subscriber first receives the latest cached
//! event so it can catch up mid-run. Slow subscribers observe `Lagged` on
//! the broadcast channel, which drops their oldest pending events rather
//! than blocking the producer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::types::ProgressEvent;

const SUBSCRIBER_BUFFER: usize = 64;

pub struct ProgressBroadcaster {
    run_id: i32,
    tx: broadcast::Sender<ProgressEvent>,
    latest: Mutex<Option<ProgressEvent>>,
    completed: AtomicBool,
}

impl ProgressBroadcaster {
    pub fn new(run_id: i32) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            run_id,
            tx,
            latest: Mutex::new(None),
            completed: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> i32 {
        self.run_id
    }

    /// Deliver an event to every subscriber. Never blocks; a send with no
    /// subscribers is fine.
    pub fn publish(&self, event: ProgressEvent) {
        if event.is_terminal() {
            self.completed.store(true, Ordering::SeqCst);
        }
        *self.latest.lock().unwrap() = Some(event.clone());
        let _ = self.tx.send(event);
    }

    /// Subscribe to live updates. Returns the latest cached event (if any)
    /// for catch-up plus the live receiver. The stream ends at a terminal
    /// event (`CYCLE_COMPLETE` / `RUN_CLOSED`).
    pub fn subscribe(&self) -> (Option<ProgressEvent>, broadcast::Receiver<ProgressEvent>) {
        (self.latest.lock().unwrap().clone(), self.tx.subscribe())
    }

    /// Mark the run complete and signal every subscriber to end.
    pub fn close(&self) {
        if !self.completed.swap(true, Ordering::SeqCst) {
            let event = ProgressEvent::RunClosed {
                scrape_run_id: self.run_id,
            };
            *self.latest.lock().unwrap() = Some(event.clone());
            let _ = self.tx.send(event);
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Registry of active broadcasters so the read side can locate a run's
/// stream by ID.
#[derive(Default)]
pub struct ProgressRegistry {
    broadcasters: DashMap<i32, Arc<ProgressBroadcaster>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, run_id: i32) -> Arc<ProgressBroadcaster> {
        let broadcaster = Arc::new(ProgressBroadcaster::new(run_id));
        self.broadcasters.insert(run_id, broadcaster.clone());
        broadcaster
    }

    pub fn get(&self, run_id: i32) -> Option<Arc<ProgressBroadcaster>> {
        self.broadcasters.get(&run_id).map(|b| b.clone())
    }

    pub fn remove(&self, run_id: i32) {
        self.broadcasters.remove(&run_id);
    }

    pub fn active_run_ids(&self) -> Vec<i32> {
        self.broadcasters
            .iter()
            .filter(|e| !e.value().is_completed())
            .map(|e| *e.key())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let broadcaster = ProgressBroadcaster::new(1);
        let (latest, mut rx) = broadcaster.subscribe();
        assert!(latest.is_none());

        broadcaster.publish(ProgressEvent::CycleStart { scrape_run_id: 1 });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ProgressEvent::CycleStart { scrape_run_id: 1 }));
    }

    #[tokio::test]
    async fn late_subscriber_catches_up_from_latest() {
        let broadcaster = ProgressBroadcaster::new(1);
        broadcaster.publish(ProgressEvent::QueueBuilt {
            scrape_run_id: 1,
            total_events: 5,
            batch_count: 1,
            batch_size: 50,
        });

        let (latest, _rx) = broadcaster.subscribe();
        assert!(matches!(latest, Some(ProgressEvent::QueueBuilt { total_events: 5, .. })));
    }

    #[tokio::test]
    async fn close_signals_subscribers_once() {
        let broadcaster = ProgressBroadcaster::new(9);
        let (_, mut rx) = broadcaster.subscribe();

        broadcaster.close();
        broadcaster.close();
        assert!(broadcaster.is_completed());

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ProgressEvent::RunClosed { scrape_run_id: 9 }));
        // Second close published nothing further.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn registry_tracks_active_runs() {
        let registry = ProgressRegistry::new();
        let b1 = registry.create(1);
        registry.create(2);

        assert_eq!(registry.active_run_ids().len(), 2);
        b1.close();
        assert_eq!(registry.active_run_ids(), vec![2]);

        registry.remove(2);
        assert!(registry.get(2).is_none());
        assert!(registry.get(1).is_some());
    }
}
