//! Interval scheduler for memory maintenance jobs.
//!
//! Each task runs at most once at a time, is capped by a timeout, and records its
//! last success and last failure in a JSON state file.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::memory::consolidation::consolidator::ConsolidationOptions;
use crate::memory::core::config::SchedulerConfig;
use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::engine::core::MemoryEngine;
use crate::memory::storage::atomic::write_json_atomic;

/// Boxed future returned by [`MaintenanceJob::run`]; resolves to a short summary.
pub type JobFuture<'a> = Pin<Box<dyn Future<Output = MemoryResult<String>> + Send + 'a>>;

/// A unit of periodic maintenance.
pub trait MaintenanceJob: Send + Sync {
    /// Unique task name.
    fn name(&self) -> &str;

    /// One-line description for status output.
    fn description(&self) -> &str;

    /// Run once.
    fn run(&self) -> JobFuture<'_>;
}

/// Built-in engine maintenance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineTask {
    /// Run a consolidation pass.
    ConsolidateMemory,
    /// Archive consolidated episodes past the age cutoff.
    ArchiveConsolidated,
    /// Rebuild the search index from the stores.
    ReindexSearch,
    /// Log a grouping preview.
    AnalyzePatterns,
    /// Rewrite the temporal log without superseded records.
    CompactTemporalLog,
}

impl EngineTask {
    /// Every task, in registration order.
    pub const ALL: [Self; 5] = [
        Self::ConsolidateMemory,
        Self::ArchiveConsolidated,
        Self::ReindexSearch,
        Self::AnalyzePatterns,
        Self::CompactTemporalLog,
    ];

    /// Scheduler key, also the state file entry.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ConsolidateMemory => "consolidate_memory",
            Self::ArchiveConsolidated => "archive_consolidated",
            Self::ReindexSearch => "reindex_search",
            Self::AnalyzePatterns => "analyze_patterns",
            Self::CompactTemporalLog => "compact_temporal_log",
        }
    }

    /// One-line description for status output.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ConsolidateMemory => "Turn successful episodes into skills and facts",
            Self::ArchiveConsolidated => "Archive old consolidated episodes",
            Self::ReindexSearch => "Rebuild the hybrid search index",
            Self::AnalyzePatterns => "Preview episode groupings",
            Self::CompactTemporalLog => "Drop superseded records from the temporal log",
        }
    }

    const fn interval_hours(self, config: &SchedulerConfig) -> u64 {
        match self {
            Self::ConsolidateMemory => config.consolidate_every_hours,
            Self::ArchiveConsolidated => config.archive_every_hours,
            Self::ReindexSearch => config.reindex_every_hours,
            Self::AnalyzePatterns => config.analyze_every_hours,
            Self::CompactTemporalLog => config.compact_every_hours,
        }
    }
}

/// An [`EngineTask`] bound to an engine.
pub struct EngineJob {
    engine: Arc<MemoryEngine>,
    task: EngineTask,
}

impl EngineJob {
    /// Run `task` against `engine`.
    #[must_use]
    pub const fn new(engine: Arc<MemoryEngine>, task: EngineTask) -> Self {
        Self { engine, task }
    }
}

impl MaintenanceJob for EngineJob {
    fn name(&self) -> &str {
        self.task.name()
    }

    fn description(&self) -> &str {
        self.task.description()
    }

    fn run(&self) -> JobFuture<'_> {
        Box::pin(async move {
            let engine = &self.engine;
            let summary = match self.task {
                EngineTask::ConsolidateMemory => {
                    let result = engine.consolidate(ConsolidationOptions::default()).await?;
                    format!(
                        "processed {} episodes: {} skills created, {} updated, {} triples, {} archived",
                        result.episodes_processed,
                        result.skills_created,
                        result.skills_updated,
                        result.triples_extracted,
                        result.episodes_archived
                    )
                }
                EngineTask::ArchiveConsolidated => {
                    format!("archived {} episodes", engine.archive_consolidated().await?)
                }
                EngineTask::ReindexSearch => {
                    let report = engine.reindex().await?;
                    format!(
                        "indexed {} documents, removed {}",
                        report.indexed, report.removed
                    )
                }
                EngineTask::AnalyzePatterns => {
                    let limit = engine.config().consolidation.batch_limit;
                    let analysis = engine.analyze_patterns(limit).await?;
                    format!(
                        "{} groups, {} potential skills",
                        analysis.groups.len(),
                        analysis.potential_skills.len()
                    )
                }
                EngineTask::CompactTemporalLog => {
                    format!("dropped {} log records", engine.compact_temporal().await?)
                }
            };
            Ok(summary)
        })
    }
}

/// Last recorded failure of a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// When the run ended.
    pub time: DateTime<Utc>,
    /// Rendered error or timeout message.
    pub error: String,
}

/// Persisted per-task state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    /// Last successful run.
    pub last_run: Option<DateTime<Utc>>,
    /// Successful runs.
    pub run_count: u64,
    /// Kept after later successes.
    #[serde(default)]
    pub last_failure: Option<TaskFailure>,
}

/// Why a run did not happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The interval has not elapsed.
    NotDue,
    /// Another run of the task is in flight.
    AlreadyRunning,
}

/// Result of one [`Scheduler::run_task`] call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The job returned a summary.
    Completed {
        /// Job summary.
        summary: String,
        /// Wall-clock run time.
        duration_ms: u64,
    },
    /// The job returned an error.
    Failed {
        /// Rendered error.
        error: String,
    },
    /// The job hit the per-task timeout.
    TimedOut {
        /// Timeout that elapsed.
        after_seconds: u64,
    },
    /// No run happened.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed {
                summary,
                duration_ms,
            } => write!(f, "completed in {duration_ms} ms: {summary}"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::TimedOut { after_seconds } => write!(f, "timed out after {after_seconds} s"),
            Self::Skipped { reason } => write!(f, "skipped ({reason:?})"),
        }
    }
}

/// Status line for one task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    /// Task key.
    pub name: String,
    /// Task description.
    pub description: String,
    /// Configured interval.
    pub interval_hours: i64,
    /// Last successful run.
    pub last_run: Option<DateTime<Utc>>,
    /// `None` when the task never ran and is due immediately.
    pub next_run: Option<DateTime<Utc>>,
    /// Successful runs.
    pub run_count: u64,
    /// Most recent failure.
    pub last_failure: Option<TaskFailure>,
    /// A run is in flight.
    pub running: bool,
    /// The next tick would run it.
    pub due: bool,
}

struct ScheduledTask {
    job: Arc<dyn MaintenanceJob>,
    interval: TimeDelta,
}

/// Removes a task from the running set when dropped.
struct RunningGuard<'a> {
    running: &'a DashMap<String, ()>,
    name: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.name);
    }
}

fn hours(hours: u64) -> MemoryResult<TimeDelta> {
    i64::try_from(hours)
        .ok()
        .and_then(TimeDelta::try_hours)
        .ok_or_else(|| MemoryError::InvalidConfig(format!("interval of {hours} hours is too large")))
}

/// Runs registered jobs when their interval has elapsed.
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    state: Mutex<BTreeMap<String, TaskState>>,
    state_path: PathBuf,
    running: DashMap<String, ()>,
    timeout: Duration,
    poll_interval: Duration,
    enabled: bool,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    /// Create an empty scheduler, loading state from `state_path`.
    ///
    /// A missing or unreadable state file starts every task fresh.
    pub async fn open(config: &SchedulerConfig, state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let state = Self::load_state(&state_path).await;
        Self {
            tasks: Vec::new(),
            state: Mutex::new(state),
            state_path,
            running: DashMap::new(),
            timeout: Duration::from_secs(config.task_timeout_seconds),
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            enabled: config.enabled,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Scheduler with every [`EngineTask`] registered at its configured interval.
    ///
    /// # Errors
    /// Returns an error if an interval does not fit a duration.
    pub async fn for_engine(engine: Arc<MemoryEngine>) -> MemoryResult<Self> {
        let config = engine.config().scheduler.clone();
        let mut scheduler =
            Self::open(&config, engine.config().storage.scheduler_state_path()).await;
        for task in EngineTask::ALL {
            let job = Arc::new(EngineJob::new(Arc::clone(&engine), task));
            scheduler = scheduler.register(job, hours(task.interval_hours(&config))?);
        }
        Ok(scheduler)
    }

    async fn load_state(path: &Path) -> BTreeMap<String, TaskState> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "Scheduler state unreadable");
                }
                return BTreeMap::new();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "Scheduler state corrupt, starting fresh");
            BTreeMap::new()
        })
    }

    /// Add a job that becomes due every `interval`. A job with the same name is replaced.
    #[must_use]
    pub fn register(mut self, job: Arc<dyn MaintenanceJob>, interval: TimeDelta) -> Self {
        self.tasks.retain(|task| task.job.name() != job.name());
        self.tasks.push(ScheduledTask { job, interval });
        self
    }

    /// Override the per-run timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the background poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Notifier that stops the loop started by [`Scheduler::spawn`]; call `notify_one`.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Registered task names in registration order.
    #[must_use]
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|task| task.job.name()).collect()
    }

    fn task(&self, name: &str) -> Option<&ScheduledTask> {
        self.tasks.iter().find(|task| task.job.name() == name)
    }

    fn due_at(last_run: Option<DateTime<Utc>>, interval: TimeDelta) -> Option<DateTime<Utc>> {
        last_run.map(|last| last + interval)
    }

    /// Whether `name` is registered and its interval has elapsed at `now`.
    pub async fn is_due(&self, name: &str, now: DateTime<Utc>) -> bool {
        let Some(task) = self.task(name) else {
            return false;
        };
        let state = self.state.lock().await;
        let last_run = state.get(name).and_then(|s| s.last_run);
        Self::due_at(last_run, task.interval).is_none_or(|due| now >= due)
    }

    /// When `name` is next due. `None` for unknown tasks and tasks that never ran.
    pub async fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        let task = self.task(name)?;
        let state = self.state.lock().await;
        Self::due_at(state.get(name).and_then(|s| s.last_run), task.interval)
    }

    /// Run `name` if due (or always with `force`).
    ///
    /// Failures and timeouts are recorded and leave `last_run` unchanged.
    ///
    /// # Errors
    /// Returns an error for an unknown task or when the state file cannot be written.
    pub async fn run_task(&self, name: &str, force: bool) -> MemoryResult<TaskOutcome> {
        let task = self
            .task(name)
            .ok_or_else(|| MemoryError::invalid_input(format!("unknown task: {name}")))?;
        if !force && !self.is_due(name, Utc::now()).await {
            debug!(task = name, "Task not due");
            return Ok(TaskOutcome::Skipped {
                reason: SkipReason::NotDue,
            });
        }
        let _guard = match self.running.entry(name.to_string()) {
            Entry::Occupied(_) => {
                debug!(task = name, "Task already running");
                return Ok(TaskOutcome::Skipped {
                    reason: SkipReason::AlreadyRunning,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(());
                RunningGuard {
                    running: &self.running,
                    name: name.to_string(),
                }
            }
        };

        info!(task = name, force, "Running maintenance task");
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, task.job.run()).await {
            Ok(Ok(summary)) => {
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                info!(task = name, duration_ms, summary = %summary, "Maintenance task completed");
                TaskOutcome::Completed {
                    summary,
                    duration_ms,
                }
            }
            Ok(Err(err)) => {
                warn!(task = name, error = %err, "Maintenance task failed");
                TaskOutcome::Failed {
                    error: err.to_string(),
                }
            }
            Err(_) => {
                warn!(task = name, timeout = ?self.timeout, "Maintenance task timed out");
                TaskOutcome::TimedOut {
                    after_seconds: self.timeout.as_secs(),
                }
            }
        };
        self.record(name, &outcome).await?;
        Ok(outcome)
    }

    async fn record(&self, name: &str, outcome: &TaskOutcome) -> MemoryResult<()> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let entry = state.entry(name.to_string()).or_default();
        match outcome {
            TaskOutcome::Completed { .. } => {
                entry.last_run = Some(now);
                entry.run_count += 1;
            }
            TaskOutcome::Failed { error } => {
                entry.last_failure = Some(TaskFailure {
                    time: now,
                    error: error.clone(),
                });
            }
            TaskOutcome::TimedOut { after_seconds } => {
                entry.last_failure = Some(TaskFailure {
                    time: now,
                    error: format!("timed out after {after_seconds} s"),
                });
            }
            TaskOutcome::Skipped { .. } => return Ok(()),
        }
        write_json_atomic(&self.state_path, &*state).await
    }

    /// Run every due task once, in registration order.
    ///
    /// # Errors
    /// Returns an error when the state file cannot be written.
    pub async fn run_all_due(&self) -> MemoryResult<Vec<(String, TaskOutcome)>> {
        let now = Utc::now();
        let mut outcomes = Vec::new();
        for task in &self.tasks {
            let name = task.job.name();
            if self.is_due(name, now).await {
                outcomes.push((name.to_string(), self.run_task(name, false).await?));
            }
        }
        Ok(outcomes)
    }

    /// Status of every task.
    pub async fn status(&self) -> Vec<TaskStatus> {
        let now = Utc::now();
        let state = self.state.lock().await;
        self.tasks
            .iter()
            .map(|task| {
                let name = task.job.name();
                let task_state = state.get(name).cloned().unwrap_or_default();
                let next_run = Self::due_at(task_state.last_run, task.interval);
                TaskStatus {
                    name: name.to_string(),
                    description: task.job.description().to_string(),
                    interval_hours: task.interval.num_hours(),
                    last_run: task_state.last_run,
                    next_run,
                    run_count: task_state.run_count,
                    last_failure: task_state.last_failure,
                    running: self.running.contains_key(name),
                    due: next_run.is_none_or(|due| now >= due),
                }
            })
            .collect()
    }

    /// Spawn the polling loop as a tokio task.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(&self) {
        if !self.enabled {
            info!("Maintenance scheduler is disabled");
            return;
        }
        info!(interval = ?self.poll_interval, tasks = self.tasks.len(), "Starting maintenance scheduler");

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {
                    match self.run_all_due().await {
                        Ok(outcomes) if outcomes.is_empty() => debug!("No maintenance task due"),
                        Ok(outcomes) => info!(ran = outcomes.len(), "Maintenance cycle finished"),
                        Err(err) => warn!(error = %err, "Maintenance cycle failed"),
                    }
                }
                () = self.shutdown.notified() => {
                    info!("Maintenance scheduler shutting down");
                    break;
                }
            }
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.task_names())
            .field("state_path", &self.state_path)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::core::config::MemoryConfig;
    use crate::memory::embedding::hashing::HashingEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        name: &'static str,
        runs: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingJob {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                runs: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail: false,
            }
        }
    }

    impl MaintenanceJob for CountingJob {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test job"
        }

        fn run(&self) -> JobFuture<'_> {
            Box::pin(async move {
                self.runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                if self.fail {
                    return Err(MemoryError::invalid_input("boom"));
                }
                Ok("done".to_string())
            })
        }
    }

    async fn open_scheduler(path: &Path, job: Arc<dyn MaintenanceJob>) -> Scheduler {
        Scheduler::open(&SchedulerConfig::default(), path)
            .await
            .register(job, TimeDelta::hours(1))
    }

    #[tokio::test]
    async fn test_due_run_then_not_due_until_forced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler_state.json");
        let job = Arc::new(CountingJob::new("count"));
        let scheduler = open_scheduler(&path, job.clone()).await;

        assert!(scheduler.is_due("count", Utc::now()).await);
        assert_eq!(scheduler.next_run("count").await, None);
        let outcome = scheduler.run_task("count", false).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Completed { .. }));
        assert!(!scheduler.is_due("count", Utc::now()).await);
        assert!(scheduler.next_run("count").await.is_some());

        let skipped = scheduler.run_task("count", false).await.unwrap();
        assert_eq!(skipped, TaskOutcome::Skipped { reason: SkipReason::NotDue });
        scheduler.run_task("count", true).await.unwrap();
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
        assert!(scheduler.is_due("count", Utc::now() + TimeDelta::hours(2)).await);

        let reopened = open_scheduler(&path, job).await;
        let status = reopened.status().await;
        assert_eq!(status[0].run_count, 2);
        assert!(!status[0].due);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_task_stays_due() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = CountingJob::new("flaky");
        job.fail = true;
        let scheduler = open_scheduler(&dir.path().join("state.json"), Arc::new(job)).await;

        let outcome = scheduler.run_task("flaky", false).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Failed { .. }));
        let status = scheduler.status().await;
        assert_eq!(status[0].run_count, 0);
        assert!(status[0].last_run.is_none());
        assert!(status[0].last_failure.as_ref().unwrap().error.contains("boom"));
        assert!(scheduler.is_due("flaky", Utc::now()).await);
    }

    #[tokio::test]
    async fn test_timeout_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = CountingJob::new("slow");
        job.delay = Duration::from_secs(5);
        let scheduler = open_scheduler(&dir.path().join("state.json"), Arc::new(job))
            .await
            .with_timeout(Duration::from_millis(20));

        let outcome = scheduler.run_task("slow", true).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::TimedOut { .. }));
        let status = scheduler.status().await;
        assert!(status[0].last_failure.is_some());
        assert!(!status[0].running);
        assert!(status[0].due);
    }

    #[tokio::test]
    async fn test_at_most_one_concurrent_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = CountingJob::new("single");
        job.delay = Duration::from_millis(100);
        let job = Arc::new(job);
        let scheduler = open_scheduler(&dir.path().join("state.json"), job.clone()).await;

        let (first, second) = tokio::join!(
            scheduler.run_task("single", true),
            scheduler.run_task("single", true)
        );
        let outcomes = [first.unwrap(), second.unwrap()];
        let skipped = outcomes
            .iter()
            .filter(|o| **o == TaskOutcome::Skipped { reason: SkipReason::AlreadyRunning })
            .count();
        assert_eq!(skipped, 1);
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_task_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler =
            open_scheduler(&dir.path().join("state.json"), Arc::new(CountingJob::new("a"))).await;
        assert!(scheduler.run_task("missing", true).await.is_err());
        assert!(!scheduler.is_due("missing", Utc::now()).await);
    }

    #[tokio::test]
    async fn test_corrupt_state_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        let scheduler = open_scheduler(&path, Arc::new(CountingJob::new("a"))).await;
        assert!(scheduler.is_due("a", Utc::now()).await);
    }

    #[tokio::test]
    async fn test_engine_tasks_registered_and_runnable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MemoryEngine::with_embedder(
            MemoryConfig::with_home(dir.path()),
            Arc::new(HashingEmbedder::new(64)),
        )
        .await
        .unwrap();
        let scheduler = Scheduler::for_engine(Arc::new(engine)).await.unwrap();
        assert_eq!(
            scheduler.task_names(),
            vec![
                "consolidate_memory",
                "archive_consolidated",
                "reindex_search",
                "analyze_patterns",
                "compact_temporal_log"
            ]
        );

        let outcomes = scheduler.run_all_due().await.unwrap();
        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|(_, o)| matches!(o, TaskOutcome::Completed { .. })));
        assert!(dir.path().join("scheduler_state.json").exists());
        assert!(scheduler.run_all_due().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let job = Arc::new(CountingJob::new("tick"));
        let scheduler = Arc::new(
            open_scheduler(&dir.path().join("state.json"), job.clone())
                .await
                .with_poll_interval(Duration::from_millis(10)),
        );
        let shutdown = scheduler.shutdown_notifier();
        let handle = scheduler.spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }
}
