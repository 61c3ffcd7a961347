//! Write-through blame cache with least-recently-touched eviction.
//!
//! Every read and write goes to the store; this type keeps no entries in
//! memory. Hits refresh `last_touched` inside the same transaction as the
//! read, and eviction counts and deletes inside the same transaction as the
//! insert, so a concurrent toucher and evictor are ordered by SQLite.
//!
//! A lookup may carry a time budget. The provider call then runs on a
//! worker thread; when the budget runs out the lookup reports
//! [`BlameError::TimedOut`] as "no blame" and the worker's late answer is
//! discarded.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use triage_error::{Result, TriageError};
use triage_store::Database;
use triage_types::{BlameKey, Clock, CommitId};

use crate::provider::{BlameError, BlameProvider};

/// Reference capacity of the cache.
pub const DEFAULT_MAX_ENTRIES: u64 = 500_000;

/// How a lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Hit,
    MissInserted,
    MissNoBlame,
    MissProviderFailed,
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub provider_failures: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    provider_failures: AtomicU64,
    evictions: AtomicU64,
}

pub struct BlameCache {
    db: Database,
    provider: Arc<dyn BlameProvider>,
    clock: Arc<dyn Clock>,
    max_entries: u64,
    counters: Counters,
}

impl fmt::Debug for BlameCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlameCache")
            .field("db", &self.db)
            .field("max_entries", &self.max_entries)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl BlameCache {
    /// Build a cache over `db`. Constructed once per process and shared.
    pub fn new(
        db: Database,
        provider: Arc<dyn BlameProvider>,
        clock: Arc<dyn Clock>,
        max_entries: u64,
    ) -> Result<Self> {
        if max_entries == 0 {
            return Err(TriageError::InvalidConfig {
                detail: "blame cache max_entries must be > 0".to_owned(),
            });
        }
        Ok(Self {
            db,
            provider,
            clock,
            max_entries,
            counters: Counters::default(),
        })
    }

    #[must_use]
    pub const fn max_entries(&self) -> u64 {
        self.max_entries
    }

    /// The commit that last touched `key`, or `None` when no blame exists or
    /// the provider failed. Storage errors propagate.
    pub fn lookup(&self, key: &BlameKey) -> Result<Option<CommitId>> {
        self.lookup_with_outcome(key, None).map(|(commit, _)| commit)
    }

    /// Like [`Self::lookup`], but a provider call that outlives `budget` is
    /// abandoned and treated as "no blame".
    pub fn lookup_within(&self, key: &BlameKey, budget: Duration) -> Result<Option<CommitId>> {
        self.lookup_with_outcome(key, Some(budget))
            .map(|(commit, _)| commit)
    }

    pub fn lookup_with_outcome(
        &self,
        key: &BlameKey,
        budget: Option<Duration>,
    ) -> Result<(Option<CommitId>, LookupOutcome)> {
        let now = self.clock.now();
        if let Some(commit) = self.db.immediate(|tx| tx.touch_blame_entry(key, now))? {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(file = %key.file, line = key.line, commit = %commit.short(), "blame cache hit");
            return Ok((Some(commit), LookupOutcome::Hit));
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let blamed = match self.call_provider(key, budget) {
            Ok(Some(commit)) => commit,
            Ok(None) => {
                debug!(file = %key.file, line = key.line, "no blame available");
                return Ok((None, LookupOutcome::MissNoBlame));
            }
            Err(err) => {
                self.counters
                    .provider_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    repository = %key.repository,
                    revision = %key.revision.short(),
                    file = %key.file,
                    line = key.line,
                    error = %err,
                    "blame provider failed; treating as no blame"
                );
                return Ok((None, LookupOutcome::MissProviderFailed));
            }
        };

        let inserted_at = self.clock.now();
        let evicted = self.db.immediate(|tx| {
            // Another worker may have cached the key since our miss.
            if tx.refresh_blame_entry(key, &blamed, inserted_at)? {
                return Ok(0);
            }
            let count = tx.count_blame_entries()?;
            let evicted = if count >= self.max_entries {
                tx.evict_oldest_blame_entries(count + 1 - self.max_entries)?
            } else {
                0
            };
            tx.insert_blame_entry(key, &blamed, inserted_at)?;
            Ok(evicted)
        })?;
        if evicted > 0 {
            self.counters
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, max_entries = self.max_entries, "blame cache evicted oldest entries");
        }
        debug!(file = %key.file, line = key.line, commit = %blamed.short(), "blame cached");
        Ok((Some(blamed), LookupOutcome::MissInserted))
    }

    fn call_provider(
        &self,
        key: &BlameKey,
        budget: Option<Duration>,
    ) -> std::result::Result<Option<CommitId>, BlameError> {
        let Some(budget) = budget else {
            return self.provider.blame(key);
        };
        let millis = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        if budget.is_zero() {
            return Err(BlameError::TimedOut { millis });
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        let provider = Arc::clone(&self.provider);
        let owned = key.clone();
        thread::Builder::new()
            .name("triage-blame".to_owned())
            .spawn(move || {
                // The receiver is gone once the budget expired.
                let _ = sender.send(provider.blame(&owned));
            })
            .map_err(|err| BlameError::Unavailable(format!("blame worker: {err}")))?;
        match receiver.recv_timeout(budget) {
            Ok(answer) => answer,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(BlameError::TimedOut { millis }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(BlameError::Unavailable(
                "blame worker exited without an answer".to_owned(),
            )),
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            provider_failures: self.counters.provider_failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Entries currently stored.
    pub fn len(&self) -> Result<u64> {
        self.db.read(|tx| tx.count_blame_entries())
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }
}
