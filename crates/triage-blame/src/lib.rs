//! Blame lookups and their persistent LRU cache.
//!
//! - [`BlameProvider`] wraps VCS access (external; may be slow or fail).
//! - [`BlameCache`] is a write-through cache in the triage store with a
//!   hard entry cap and least-recently-touched eviction.

mod cache;
mod provider;

pub use cache::{BlameCache, CacheStats, DEFAULT_MAX_ENTRIES, LookupOutcome};
pub use provider::{BlameError, BlameProvider};
