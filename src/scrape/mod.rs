//! The scraping pipeline: coordinator, batch/queue types and per-run
//! progress broadcasting.

pub mod broadcaster;
pub mod coordinator;
pub mod types;

pub use broadcaster::{ProgressBroadcaster, ProgressRegistry};
pub use coordinator::{CoordinatorConfig, CycleSummary, EventCoordinator};
pub use types::{EventTarget, ProgressEvent, ScrapeBatch, ScrapeStatus};
