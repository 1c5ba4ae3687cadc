//! Background persistence: write-batch DTOs, the bounded async write queue,
//! and the per-batch write handler.
//!
//! The write worker owns its own connections and never shares a transaction
//! with the coordinator session; the two touch disjoint row sets.

pub mod queue;
pub mod writer;

pub use queue::{
    AsyncWriteQueue, AvailabilityUpdate, CompetitorSnapshotWrite, MarketWrite, OutcomeOdds,
    RiskAlertWrite, SnapshotWrite, WriteBatch,
};
