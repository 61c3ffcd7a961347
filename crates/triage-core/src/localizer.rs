//! Fault localization: which backtrace line most likely introduced the
//! error.
//!
//! Candidate frames are the faulted thread's project source frames. Each is
//! blamed through the [`BlameCache`] and scored by two terms: how close it
//! sits to the top of the stack, and how recently its blamed commit landed
//! relative to the other candidates. The best score wins; ties go to the
//! frame nearer the top.
//!
//! Blame shares one time budget per localization: the configured blame
//! timeout, capped at half of whatever the ingest deadline leaves so the
//! persist step still fits. Frames not blamed in time count as unblamed.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use triage_blame::BlameCache;
use triage_error::Result;
use triage_types::{
    BacktraceThread, BlameKey, Commit, CommitId, Frame, Project, Timestamp, faulted_thread,
};

use crate::classify::{PathClass, PathClassifier};
use crate::context::IngestContext;
use crate::resolver::CommitResolver;

/// File used when a frame's location cannot be rendered at all.
pub const UNKNOWN_FILE: &str = "(unknown)";

/// Where a fault was localized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizedFault {
    pub file: String,
    pub line: u32,
    pub blamed_revision: Option<CommitId>,
    /// The location is not literal project source.
    pub special: bool,
}

impl LocalizedFault {
    fn source(file: &str, line: u32) -> Self {
        Self {
            file: file.to_owned(),
            line,
            blamed_revision: None,
            special: false,
        }
    }

    fn unknown() -> Self {
        Self {
            file: UNKNOWN_FILE.to_owned(),
            line: 1,
            blamed_revision: None,
            special: true,
        }
    }

    /// Render any frame as a location, with no blame.
    #[must_use]
    pub fn from_frame(frame: &Frame) -> Self {
        match frame {
            Frame::Source { file, line, .. } => Self::source(file, line.unwrap_or(1)),
            Frame::Obfuscated { file, line, .. } => Self {
                file: file.clone(),
                line: u32::try_from(line.unsigned_abs()).unwrap_or(u32::MAX),
                blamed_revision: None,
                special: true,
            },
            Frame::Minified { url, line, .. } => Self {
                file: url.clone(),
                line: line.unwrap_or(1),
                blamed_revision: None,
                special: true,
            },
            Frame::Address { address } => Self {
                file: format!("0x{address:08X}"),
                line: 1,
                blamed_revision: None,
                special: true,
            },
            Frame::Unrecognized => Self::unknown(),
        }
    }

    /// The topmost frame of `thread`, whatever its kind.
    fn topmost(thread: Option<&BacktraceThread>) -> Self {
        thread
            .and_then(|thread| thread.frames.first())
            .map_or_else(Self::unknown, Self::from_frame)
    }
}

/// Score candidates ordered top of stack first.
///
/// `dates[i]` is the commit date blamed for candidate `i`; `reference` is
/// the date of the revision the occurrence ran. Returns one score per
/// candidate: `0.5 * h^2 + 0.5 * r` with height `h = (n - i) / n` and
/// recency `r` normalized over `[earliest, max(latest, reference)]`.
#[must_use]
pub fn score_frames(dates: &[Timestamp], reference: Timestamp) -> Vec<f64> {
    let (Some(earliest), Some(latest)) = (dates.iter().min(), dates.iter().max()) else {
        return Vec::new();
    };
    let latest = (*latest).max(reference);
    let span = latest.millis_since(*earliest);
    let n = dates.len() as f64;

    dates
        .iter()
        .enumerate()
        .map(|(i, date)| {
            let height = (n - i as f64) / n;
            let recency = if span == 0 {
                0.0
            } else {
                1.0 - latest.millis_since(*date) as f64 / span as f64
            };
            0.5 * height * height + 0.5 * recency
        })
        .collect()
}

/// Index of the first maximal score.
fn best_index(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, score) in scores.iter().copied().enumerate() {
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index)
}

struct Candidate<'a> {
    file: &'a str,
    line: u32,
    commit: CommitId,
    committed_at: Timestamp,
}

/// Faulted-thread source frames with a known line that classify as project
/// code, top of stack first.
fn project_frames<'a>(
    thread: Option<&'a BacktraceThread>,
    classifier: &dyn PathClassifier,
) -> Vec<(&'a str, u32)> {
    thread
        .map(|thread| {
            thread
                .frames
                .iter()
                .filter_map(Frame::known_source_line)
                .filter(|(file, _)| classifier.classify(file) == PathClass::Project)
                .collect()
        })
        .unwrap_or_default()
}

pub struct FaultLocalizer {
    cache: Arc<BlameCache>,
    resolver: Arc<dyn CommitResolver>,
    blame_timeout: Duration,
}

impl fmt::Debug for FaultLocalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultLocalizer")
            .field("cache", &self.cache)
            .field("blame_timeout", &self.blame_timeout)
            .finish_non_exhaustive()
    }
}

impl FaultLocalizer {
    #[must_use]
    pub fn new(
        cache: Arc<BlameCache>,
        resolver: Arc<dyn CommitResolver>,
        blame_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            resolver,
            blame_timeout,
        }
    }

    /// Time blame may take in this localization.
    fn blame_budget(&self, cx: &IngestContext) -> Duration {
        cx.remaining()
            .map_or(self.blame_timeout, |left| self.blame_timeout.min(left / 2))
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<BlameCache> {
        &self.cache
    }

    /// The topmost project frame, falling back to the topmost frame of the
    /// faulted thread. Never blames.
    #[must_use]
    pub fn topmost_project_frame(
        backtraces: &[BacktraceThread],
        classifier: &dyn PathClassifier,
    ) -> LocalizedFault {
        let thread = faulted_thread(backtraces);
        match project_frames(thread, classifier).first() {
            Some((file, line)) => LocalizedFault::source(file, *line),
            None => LocalizedFault::topmost(thread),
        }
    }

    /// Full blame-and-score localization against `reference`, the commit the
    /// occurrence was running.
    ///
    /// Blame provider trouble never fails this call; it only narrows the
    /// candidates. Storage errors from the cache propagate.
    pub fn localize(
        &self,
        cx: &IngestContext,
        project: &Project,
        backtraces: &[BacktraceThread],
        reference: &Commit,
        classifier: &dyn PathClassifier,
    ) -> Result<LocalizedFault> {
        let thread = faulted_thread(backtraces);
        let frames = project_frames(thread, classifier);
        let Some(&(top_file, top_line)) = frames.first() else {
            debug!(project = %project.name, "no project frames; using topmost frame");
            return Ok(LocalizedFault::topmost(thread));
        };

        let blame_deadline = Instant::now() + self.blame_budget(cx);
        let mut dates: HashMap<CommitId, Option<Timestamp>> = HashMap::new();
        let mut candidates = Vec::with_capacity(frames.len());
        for (file, line) in frames {
            cx.checkpoint("blame")?;
            let budget = blame_deadline.saturating_duration_since(Instant::now());
            if budget.is_zero() {
                warn!(
                    project = %project.name,
                    file,
                    line,
                    "blame budget spent; remaining frames unblamed"
                );
                break;
            }
            let key = BlameKey {
                repository: project.repository.clone(),
                revision: reference.id.clone(),
                file: file.to_owned(),
                line,
            };
            let Some(commit) = self.cache.lookup_within(&key, budget)? else {
                continue;
            };
            let committed_at = match dates.entry(commit.clone()) {
                Entry::Occupied(known) => *known.get(),
                Entry::Vacant(slot) => *slot.insert(self.commit_date(project, &commit)),
            };
            if let Some(committed_at) = committed_at {
                candidates.push(Candidate {
                    file,
                    line,
                    commit,
                    committed_at,
                });
            }
        }

        let stamps: Vec<Timestamp> = candidates.iter().map(|c| c.committed_at).collect();
        let scores = score_frames(&stamps, reference.committed_at);
        let Some(best) = best_index(&scores).map(|index| &candidates[index]) else {
            debug!(
                project = %project.name,
                file = top_file,
                line = top_line,
                "no frame could be blamed; using topmost project frame"
            );
            return Ok(LocalizedFault::source(top_file, top_line));
        };

        debug!(
            project = %project.name,
            file = best.file,
            line = best.line,
            commit = %best.commit.short(),
            candidates = candidates.len(),
            "fault localized"
        );
        Ok(LocalizedFault {
            file: best.file.to_owned(),
            line: best.line,
            blamed_revision: Some(best.commit.clone()),
            special: false,
        })
    }

    fn commit_date(&self, project: &Project, commit: &CommitId) -> Option<Timestamp> {
        match self.resolver.resolve(project, commit.as_str()) {
            Ok(Some(resolved)) => Some(resolved.committed_at),
            Ok(None) => {
                debug!(commit = %commit.short(), "blamed commit unknown to resolver");
                None
            }
            Err(err) => {
                warn!(commit = %commit.short(), error = %err, "could not date blamed commit");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ProjectPathClassifier;
    use proptest::prelude::*;

    fn ts(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn test_obfuscated_line_is_made_positive() {
        let fault = LocalizedFault::from_frame(&Frame::Obfuscated {
            file: "com/shop/Cart.java".to_owned(),
            line: -15,
            symbol: None,
            class_name: None,
        });
        assert_eq!(fault.file, "com/shop/Cart.java");
        assert_eq!(fault.line, 15);
        assert!(fault.special);
    }

    #[test]
    fn test_special_frames_render() {
        let address = LocalizedFault::from_frame(&Frame::Address { address: 0x1f2e });
        assert_eq!((address.file.as_str(), address.line), ("0x00001F2E", 1));
        assert!(address.special);

        let minified = LocalizedFault::from_frame(&Frame::Minified {
            url: "https://cdn.example.com/app.min.js".to_owned(),
            line: Some(1),
            column: Some(4022),
            symbol: None,
        });
        assert_eq!(minified.file, "https://cdn.example.com/app.min.js");
        assert!(minified.special);

        let unknown = LocalizedFault::from_frame(&Frame::Unrecognized);
        assert_eq!((unknown.file.as_str(), unknown.line), (UNKNOWN_FILE, 1));
        assert!(unknown.special);
    }

    #[test]
    fn test_source_fallback_without_line() {
        let fault = LocalizedFault::from_frame(&Frame::Source {
            file: "lib/a.rb".to_owned(),
            line: None,
            symbol: None,
        });
        assert_eq!(fault, LocalizedFault::source("lib/a.rb", 1));
    }

    #[test]
    fn test_empty_thread_is_unknown() {
        let thread = BacktraceThread::faulted(Vec::new());
        let fault = FaultLocalizer::topmost_project_frame(
            std::slice::from_ref(&thread),
            &ProjectPathClassifier::default(),
        );
        assert_eq!(fault.file, UNKNOWN_FILE);
        assert!(fault.special);
    }

    #[test]
    fn test_topmost_project_frame_skips_libraries() {
        let thread = BacktraceThread::faulted(vec![
            Frame::source("vendor/gems/rack/lib/rack.rb", 10, "call"),
            Frame::Source {
                file: "lib/unknown_line.rb".to_owned(),
                line: None,
                symbol: None,
            },
            Frame::source("app/models/user.rb", 22, "save"),
        ]);
        let fault = FaultLocalizer::topmost_project_frame(
            std::slice::from_ref(&thread),
            &ProjectPathClassifier::default(),
        );
        assert_eq!(fault, LocalizedFault::source("app/models/user.rb", 22));
    }

    #[test]
    fn test_equal_dates_score_by_height_only() {
        let scores = score_frames(&[ts(100), ts(100), ts(100)], ts(100));
        let expected = [0.5, 0.5 * 4.0 / 9.0, 0.5 / 9.0];
        for (score, want) in scores.iter().zip(expected) {
            assert!((score - want).abs() < 1e-12, "{scores:?}");
        }
        assert_eq!(best_index(&scores), Some(0));
    }

    #[test]
    fn test_recent_commit_lower_in_stack_can_win() {
        // Frame 0 blamed on an old commit, frame 1 on the reference commit.
        let scores = score_frames(&[ts(0), ts(1_000)], ts(1_000));
        // h0 = 1, r0 = 0 -> 0.5; h1 = 0.5, r1 = 1 -> 0.625.
        assert_eq!(best_index(&scores), Some(1));
    }

    #[test]
    fn test_ties_go_to_the_top() {
        assert_eq!(best_index(&[0.25, 0.5, 0.5]), Some(1));
        assert_eq!(best_index(&[]), None);
    }

    proptest! {
        #[test]
        fn prop_higher_or_newer_never_scores_lower(
            dates in proptest::collection::vec(0_i64..10_000, 1..12),
            reference in 0_i64..12_000,
        ) {
            let stamps: Vec<Timestamp> = dates.iter().copied().map(ts).collect();
            let scores = score_frames(&stamps, ts(reference));
            prop_assert_eq!(scores.len(), stamps.len());
            for i in 0..stamps.len() {
                for j in (i + 1)..stamps.len() {
                    if stamps[i] >= stamps[j] {
                        prop_assert!(scores[i] >= scores[j], "i={} j={} {:?}", i, j, scores);
                    }
                }
            }
        }

        #[test]
        fn prop_newer_commit_at_same_height_never_scores_lower(
            dates in proptest::collection::vec(0_i64..10_000, 2..12),
            slot in 0_usize..12,
            bump in 1_i64..500,
        ) {
            let slot = slot % dates.len();
            let older: Vec<Timestamp> = dates.iter().copied().map(ts).collect();
            let mut newer = older.clone();
            newer[slot] = ts(dates[slot] + bump);
            // Keep the normalization window fixed so only the one date moves.
            let window_top = ts(12_000 + 500);
            let before = score_frames(&older, window_top);
            let after = score_frames(&newer, window_top);
            let floor = older.iter().min().copied();
            prop_assume!(floor == newer.iter().min().copied());
            prop_assert!(after[slot] >= before[slot]);
        }
    }
}
