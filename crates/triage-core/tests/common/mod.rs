//! Shared fixtures: a scripted VCS and a pipeline over a temp database.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use triage_blame::{BlameCache, BlameError, BlameProvider};
use triage_core::{CommitResolver, Pipeline, TriageConfig};
use triage_store::{Database, NewProject};
use triage_types::{
    BacktraceThread, BlameKey, Bug, BugId, Clock, Commit, CommitId, Frame, MILLIS_PER_DAY,
    ManualClock, Project, RawReport, Timestamp,
};

pub const API_KEY: &str = "shop-key";
pub const START: Timestamp = Timestamp::from_millis(400 * MILLIS_PER_DAY);

pub fn rev(c: char) -> CommitId {
    CommitId::parse(&c.to_string().repeat(40)).expect("valid commit")
}

/// In-memory repository: known commits with dates, and blame answers per
/// `file:line` (the same for every revision).
#[derive(Debug, Default)]
pub struct FakeVcs {
    commits: Mutex<HashMap<CommitId, Timestamp>>,
    blames: Mutex<HashMap<(String, u32), CommitId>>,
    blame_down: AtomicBool,
    blame_delay: Mutex<Option<Duration>>,
    blame_calls: AtomicUsize,
}

impl FakeVcs {
    pub fn commit(&self, id: &CommitId, committed_at: Timestamp) {
        self.commits.lock().insert(id.clone(), committed_at);
    }

    pub fn blame_line(&self, file: &str, line: u32, id: &CommitId) {
        self.blames.lock().insert((file.to_owned(), line), id.clone());
    }

    pub fn set_blame_down(&self, down: bool) {
        self.blame_down.store(down, Ordering::SeqCst);
    }

    /// Make every blame stall for `delay` before answering.
    pub fn set_blame_delay(&self, delay: Duration) {
        *self.blame_delay.lock() = Some(delay);
    }

    pub fn blame_calls(&self) -> usize {
        self.blame_calls.load(Ordering::SeqCst)
    }
}

impl BlameProvider for FakeVcs {
    fn blame(&self, key: &BlameKey) -> Result<Option<CommitId>, BlameError> {
        self.blame_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.blame_delay.lock();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if self.blame_down.load(Ordering::SeqCst) {
            return Err(BlameError::TimedOut { millis: 5_000 });
        }
        Ok(self
            .blames
            .lock()
            .get(&(key.file.clone(), key.line))
            .cloned())
    }
}

impl CommitResolver for FakeVcs {
    fn resolve(&self, _project: &Project, revision: &str) -> Result<Option<Commit>, BlameError> {
        let wanted = revision.to_ascii_lowercase();
        Ok(self
            .commits
            .lock()
            .iter()
            .find(|(id, _)| id.as_str().starts_with(&wanted))
            .map(|(id, at)| Commit {
                id: id.clone(),
                committed_at: *at,
            }))
    }
}

pub struct Harness {
    _dir: TempDir,
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub vcs: Arc<FakeVcs>,
    pub cache: Arc<BlameCache>,
    pub pipeline: Pipeline,
    pub project: Project,
}

pub fn harness() -> Harness {
    harness_with(TriageConfig::default(), |_| {})
}

/// Harness with `config`; `customize` adjusts the seeded project.
pub fn harness_with(config: TriageConfig, customize: impl FnOnce(&mut NewProject)) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let db = Database::open(dir.path().join("triage.db"), config.store.options())
        .expect("database should open");
    let clock = Arc::new(ManualClock::new(START));
    let vcs = Arc::new(FakeVcs::default());
    vcs.commit(&rev('a'), START.minus_days(30));
    vcs.commit(&rev('b'), START.minus_days(2));

    let cache = Arc::new(
        BlameCache::new(
            db.clone(),
            vcs.clone(),
            clock.clone(),
            config.blame_cache.max_entries,
        )
        .expect("cache should build"),
    );
    let pipeline = Pipeline::builder(db.clone(), Arc::clone(&cache), vcs.clone())
        .config(config)
        .clock(clock.clone())
        .build()
        .expect("pipeline should build");

    let mut new_project = NewProject::new("shop", API_KEY, "git@example.com:shop.git");
    customize(&mut new_project);
    let project = db
        .immediate(|tx| tx.insert_project(&new_project))
        .expect("project should insert");

    Harness {
        _dir: dir,
        db,
        clock,
        vcs,
        cache,
        pipeline,
        project,
    }
}

impl Harness {
    /// A hosted-project report at revision `b` with the given frames.
    pub fn report(&self, frames: Vec<Frame>) -> RawReport {
        RawReport {
            api_key: API_KEY.to_owned(),
            environment: "production".to_owned(),
            class_name: Some("ArgumentError".to_owned()),
            message: Some("wrong number of arguments (given 1, expected 2)".to_owned()),
            backtraces: Some(vec![BacktraceThread::faulted(frames)]),
            occurred_at: Some(self.clock.now()),
            client: Some("rails".to_owned()),
            revision: Some(rev('b').to_string()),
            build: None,
            hostname: Some("web-1".to_owned()),
            extra: BTreeMap::new(),
        }
    }

    pub fn bug(&self, id: BugId) -> Bug {
        self.db
            .read(|tx| tx.bug(id))
            .expect("read should succeed")
            .expect("bug should exist")
    }

    pub fn event_kinds(&self, id: BugId) -> Vec<String> {
        self.db
            .read(|tx| tx.events_of_bug(id))
            .expect("events should load")
            .into_iter()
            .map(|event| event.kind)
            .collect()
    }

    pub fn occurrence_total(&self) -> u64 {
        self.db
            .read(|tx| tx.count_occurrences())
            .expect("count should succeed")
    }
}

pub fn source(file: &str, line: u32) -> Frame {
    Frame::source(file, line, "call")
}
