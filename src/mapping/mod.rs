//! Market-mapping translation layer.
//!
//! Translates each competitor's market taxonomy into BetPawa's so storage
//! and comparison work against one vocabulary. The merged mapping table
//! (compiled-in defaults + DB overrides) lives in [`cache::MappingCache`];
//! per-source mappers are in [`sportybet`] and [`bet9ja`]; markets with no
//! mapping feed [`unmapped::UnmappedLogger`].

pub mod bet9ja;
pub mod cache;
pub mod defaults;
pub mod sportybet;
pub mod types;
pub mod unmapped;

pub use cache::{MappingCache, MappingView};
pub use types::{
    MappedHandicap, MappedMarket, MappedOutcome, MappingError, MappingErrorKind, MarketMapping,
};
pub use unmapped::{UnmappedEntry, UnmappedLogger};
