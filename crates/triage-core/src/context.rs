//! Per-ingestion cancellation and deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;
use triage_error::{Result, TriageError};

/// Carried through one [`Pipeline::ingest_with`](crate::Pipeline::ingest_with)
/// call. Clones share the cancel flag, so a caller can keep one clone and
/// cancel from another thread.
#[derive(Debug, Clone, Default)]
pub struct IngestContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl IngestContext {
    /// No deadline, not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::default(),
        }
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail if the caller cancelled or the deadline has passed. `stage`
    /// names the step about to run.
    pub fn checkpoint(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            debug!(stage, "ingestion cancelled");
            return Err(TriageError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            debug!(stage, "ingestion deadline exceeded");
            return Err(TriageError::DeadlineExceeded { stage });
        }
        Ok(())
    }

    /// Time left before the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_passes_checkpoints() {
        let cx = IngestContext::new();
        cx.checkpoint("validate").expect("fresh context should pass");
        assert!(cx.remaining().is_none());
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let cx = IngestContext::new();
        let handle = cx.clone();
        handle.cancel();
        assert!(matches!(
            cx.checkpoint("localize"),
            Err(TriageError::Cancelled)
        ));
    }

    #[test]
    fn test_expired_deadline_names_stage() {
        let cx = IngestContext::with_deadline(Instant::now());
        match cx.checkpoint("persist") {
            Err(TriageError::DeadlineExceeded { stage }) => assert_eq!(stage, "persist"),
            other => panic!("expected deadline error, got {other:?}"),
        }
        assert_eq!(cx.remaining(), Some(Duration::ZERO));
    }
}
