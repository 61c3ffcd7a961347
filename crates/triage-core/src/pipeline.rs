//! Ingestion pipeline: one raw report in, one persisted occurrence out.
//!
//! Steps run strictly in order: validate, resolve project and environment,
//! resolve commit/build context, localize the fault, redact and normalize,
//! then match the bug, persist the occurrence and apply the lifecycle rules
//! in a single write transaction. A storage conflict anywhere retries the
//! whole unit, up to a bounded number of attempts.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use triage_blame::BlameCache;
use triage_error::{Result, TriageError};
use triage_store::Database;
use triage_types::{
    Bug, BugState, Clock, Commit, Deploy, DeployId, Environment, EnvironmentId, NewBug,
    NewOccurrence, Occurrence, Project, RawReport, RevisionContext, SystemClock, ValidReport,
};

use crate::blamer::{CriteriaInput, Located, SearchStrategy};
use crate::classify::{PathClassifier, ProjectPathClassifier};
use crate::config::TriageConfig;
use crate::context::IngestContext;
use crate::filters::{MessageFilter, PiiRedactor, Redactor, TemplateMessageFilter};
use crate::lifecycle::{LifecyclePolicy, reopen_if_necessary};
use crate::localizer::FaultLocalizer;
use crate::matcher::{find_or_create_bug, record_match_events};
use crate::resolver::CommitResolver;

/// What one successful ingestion did.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub occurrence: Occurrence,
    /// The bug as committed, after bookkeeping and any reopen.
    pub bug: Bug,
    /// This ingestion created the bug.
    pub created: bool,
    /// State the bug was reopened from, if it was.
    pub reopened: Option<BugState>,
    /// Attempts used, counting the successful one.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

/// Deploy context of one report.
#[derive(Debug, Clone)]
enum DeployRef {
    /// Revision only: hosted project.
    None,
    /// Build only, looked up before the write transaction.
    Existing(Deploy),
    /// Revision and build: found or created inside the write transaction.
    Declared(String),
}

/// Everything resolved before the write transaction.
struct Prepared {
    environment: Environment,
    commit: Commit,
    deploy: DeployRef,
    located: Located,
    message: String,
    template: String,
}

pub struct Pipeline {
    db: Database,
    localizer: FaultLocalizer,
    resolver: Arc<dyn CommitResolver>,
    message_filter: Arc<dyn MessageFilter>,
    redactor: Arc<dyn Redactor>,
    classifier: Option<Arc<dyn PathClassifier>>,
    clock: Arc<dyn Clock>,
    lifecycle: LifecyclePolicy,
    retry: RetryPolicy,
    deadline: Option<Duration>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("db", &self.db)
            .field("localizer", &self.localizer)
            .field("lifecycle", &self.lifecycle)
            .field("retry", &self.retry)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[must_use]
    pub fn builder(
        db: Database,
        cache: Arc<BlameCache>,
        resolver: Arc<dyn CommitResolver>,
    ) -> PipelineBuilder {
        PipelineBuilder::new(db, cache, resolver)
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Ingest with the configured deadline and no external cancellation.
    pub fn ingest(&self, raw: &RawReport) -> Result<IngestOutcome> {
        let cx = self
            .deadline
            .map_or_else(IngestContext::new, IngestContext::with_timeout);
        self.ingest_with(&cx, raw)
    }

    /// Ingest under `cx`. Cancellation and deadline are checked between
    /// steps and never retried; only storage conflicts are.
    pub fn ingest_with(&self, cx: &IngestContext, raw: &RawReport) -> Result<IngestOutcome> {
        cx.checkpoint("validate")?;
        let report = raw.validate()?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(cx, &report) {
                Ok(mut outcome) => {
                    outcome.attempts = attempt;
                    info!(
                        bug_id = %outcome.bug.id,
                        occurrence_id = %outcome.occurrence.id,
                        created = outcome.created,
                        reopened = ?outcome.reopened.map(BugState::as_str),
                        attempts = attempt,
                        "occurrence ingested"
                    );
                    return Ok(outcome);
                }
                Err(err) if err.is_transient() => {
                    if attempt >= self.retry.max_attempts {
                        warn!(attempts = attempt, error = %err, "ingestion retries exhausted");
                        return Err(TriageError::RetriesExhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        });
                    }
                    let pause = self.retry.backoff * attempt;
                    let pause = cx.remaining().map_or(pause, |left| pause.min(left));
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        backoff_ms = (pause.as_millis() as u64),
                        error = %err,
                        "storage conflict; retrying ingestion"
                    );
                    thread::sleep(pause);
                }
                Err(err) => {
                    debug!(
                        attempt,
                        error = %err,
                        code = (err.error_code() as u16),
                        "ingestion failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    fn attempt(&self, cx: &IngestContext, report: &ValidReport) -> Result<IngestOutcome> {
        let (project, prepared) = self.prepare(cx, report)?;
        cx.checkpoint("persist")?;
        self.persist(&project, report, prepared)
    }

    fn prepare(&self, cx: &IngestContext, report: &ValidReport) -> Result<(Project, Prepared)> {
        cx.checkpoint("project")?;
        let (project, environment) = self.db.immediate(|tx| {
            let project = tx
                .project_by_api_key(&report.api_key)?
                .ok_or(TriageError::UnknownProject)?;
            let environment = tx.find_or_create_environment(project.id, &report.environment)?;
            Ok((project, environment))
        })?;

        cx.checkpoint("resolve")?;
        let (commit, deploy) = self.resolve_context(&project, environment.id, &report.context)?;

        let message = self.redactor.redact(&report.message);
        let template = self.message_filter.filter(&report.class_name, &message);

        cx.checkpoint("localize")?;
        let fallback;
        let classifier: &dyn PathClassifier = if let Some(custom) = &self.classifier {
            custom.as_ref()
        } else {
            fallback = ProjectPathClassifier::for_project(&project);
            &fallback
        };
        let located = project.blamer.compute_search_criteria(
            cx,
            &self.localizer,
            &CriteriaInput {
                project: &project,
                class_name: &report.class_name,
                backtraces: &report.backtraces,
                reference: &commit,
                message_template: &template,
                classifier,
            },
        )?;
        debug!(
            project = %project.name,
            blamer = %project.blamer,
            file = %located.criteria.file,
            line = located.criteria.line,
            special = located.fault.special,
            "search criteria computed"
        );

        Ok((
            project,
            Prepared {
                environment,
                commit,
                deploy,
                located,
                message,
                template,
            },
        ))
    }

    fn resolve_context(
        &self,
        project: &Project,
        environment: EnvironmentId,
        context: &RevisionContext,
    ) -> Result<(Commit, DeployRef)> {
        match context {
            RevisionContext::Revision(revision) => {
                Ok((self.resolve_commit(project, revision)?, DeployRef::None))
            }
            RevisionContext::Both { revision, build } => Ok((
                self.resolve_commit(project, revision)?,
                DeployRef::Declared(build.clone()),
            )),
            RevisionContext::Build(build) => {
                let deploy = self
                    .db
                    .read(|tx| tx.deploy_by_build(environment, build))?
                    .ok_or_else(|| TriageError::UnknownDeploy {
                        build: build.clone(),
                    })?;
                let commit = self.resolve_commit(project, deploy.revision.as_str())?;
                Ok((commit, DeployRef::Existing(deploy)))
            }
        }
    }

    fn resolve_commit(&self, project: &Project, revision: &str) -> Result<Commit> {
        match self.resolver.resolve(project, revision) {
            Ok(Some(commit)) => Ok(commit),
            Ok(None) => Err(TriageError::UnresolvableCommit {
                revision: revision.to_owned(),
            }),
            Err(err) => {
                warn!(project = %project.name, revision, error = %err, "commit resolver failed");
                Err(TriageError::UnresolvableCommit {
                    revision: revision.to_owned(),
                })
            }
        }
    }

    fn persist(
        &self,
        project: &Project,
        report: &ValidReport,
        prepared: Prepared,
    ) -> Result<IngestOutcome> {
        let Prepared {
            environment,
            commit,
            deploy,
            located,
            message,
            template,
        } = prepared;
        let extra = report
            .extra
            .iter()
            .map(|(key, value)| (key.clone(), self.redactor.redact_value(value)))
            .collect();
        let data = NewOccurrence {
            class_name: report.class_name.clone(),
            message,
            backtraces: report.backtraces.clone(),
            revision: commit.id.clone(),
            build: report.context.build().map(str::to_owned),
            client: report.client.clone(),
            hostname: report.hostname.clone(),
            occurred_at: report.occurred_at,
            extra,
        };
        let now = self.clock.now();

        self.db.immediate(|tx| {
            let deploy_id: Option<DeployId> = match &deploy {
                DeployRef::None => None,
                DeployRef::Existing(deploy) => Some(deploy.id),
                DeployRef::Declared(build) => {
                    Some(tx.find_or_create_deploy(environment.id, &commit.id, build, now)?.id)
                }
            };
            let matched = find_or_create_bug(
                tx,
                &NewBug {
                    environment_id: environment.id,
                    deploy_id,
                    criteria: located.criteria.clone(),
                    message_template: template.clone(),
                    special_file: located.fault.special,
                    first_occurrence_at: report.occurred_at,
                },
            )?;
            let occurrence = tx.insert_occurrence(matched.bug.id, &data)?;
            tx.record_bug_occurrence(matched.bug.id, report.occurred_at)?;
            record_match_events(tx, &matched, occurrence.id, now)?;
            let reopened = reopen_if_necessary(tx, self.lifecycle, &matched.bug, &occurrence, now)?;
            let bug = tx.bug(matched.bug.id)?.ok_or_else(|| {
                TriageError::Internal(format!("bug {} vanished after linking", matched.bug.id))
            })?;
            debug!(
                project = %project.name,
                bug_id = %bug.id,
                deploy_id = ?deploy_id.map(DeployId::get),
                "occurrence persisted"
            );
            Ok(IngestOutcome {
                occurrence,
                bug,
                created: matched.created,
                reopened,
                attempts: 0,
            })
        })
    }
}

/// Assembles a [`Pipeline`]. Collaborators not supplied get the default
/// implementations; the configuration defaults to [`TriageConfig::default`].
pub struct PipelineBuilder {
    db: Database,
    cache: Arc<BlameCache>,
    resolver: Arc<dyn CommitResolver>,
    config: TriageConfig,
    clock: Option<Arc<dyn Clock>>,
    message_filter: Option<Arc<dyn MessageFilter>>,
    redactor: Option<Arc<dyn Redactor>>,
    classifier: Option<Arc<dyn PathClassifier>>,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("db", &self.db)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    #[must_use]
    pub fn new(db: Database, cache: Arc<BlameCache>, resolver: Arc<dyn CommitResolver>) -> Self {
        Self {
            db,
            cache,
            resolver,
            config: TriageConfig::default(),
            clock: None,
            message_filter: None,
            redactor: None,
            classifier: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: TriageConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn message_filter(mut self, filter: Arc<dyn MessageFilter>) -> Self {
        self.message_filter = Some(filter);
        self
    }

    #[must_use]
    pub fn redactor(mut self, redactor: Arc<dyn Redactor>) -> Self {
        self.redactor = Some(redactor);
        self
    }

    /// Use one classifier for every project instead of each project's
    /// filter and whitelist paths.
    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn PathClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        let redactor = match self.redactor {
            Some(redactor) => redactor,
            None => Arc::new(PiiRedactor::from_config(&self.config.filters)?),
        };
        Ok(Pipeline {
            localizer: FaultLocalizer::new(
                self.cache,
                Arc::clone(&self.resolver),
                self.config.blame_cache.timeout(),
            ),
            db: self.db,
            resolver: self.resolver,
            message_filter: self
                .message_filter
                .unwrap_or_else(|| Arc::new(TemplateMessageFilter)),
            redactor,
            classifier: self.classifier,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            lifecycle: LifecyclePolicy::from(&self.config.lifecycle),
            retry: RetryPolicy {
                max_attempts: self.config.ingest.max_attempts,
                backoff: Duration::from_millis(self.config.ingest.retry_backoff_ms),
            },
            deadline: self.config.deadline(),
        })
    }
}
