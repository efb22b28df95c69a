//! Priority job scheduler with bounded concurrency.
//!
//! Jobs wait in a priority queue and are dispatched while fewer than
//! `max_concurrent` jobs run. Every job persists an "analyzing" report when
//! it starts and a completed or failed report when it ends. Failures are
//! recorded and never stop dispatching.
//!
//! State lives behind a short-lived mutex that is never held across an
//! await. Only one scheduler instance should drive a given report store.

pub mod pipeline;
pub mod queue;

use crate::error::{AnalysisError, Result};
use crate::models::{AnalysisJob, AnalysisReport, JobState, Priority, ReportStatus};
use crate::store::{AutomationLog, AutomationLogEntry, ReportStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

pub use pipeline::{AnalysisOutcome, AnalysisPipeline, JobContext, JobRunner, LlmSettings};
pub use queue::WaitingQueue;

/// Automation-log task type for analysis jobs.
const JOB_TASK_TYPE: &str = "analysis_job";

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    /// Finished jobs kept per outcome for status queries.
    pub history_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            history_size: 10,
        }
    }
}

/// Result of `enqueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResult {
    /// False when the task was already running.
    pub queued: bool,
    /// 1-based waiting position, 0 when running.
    pub position: usize,
    pub job_id: String,
}

/// A waiting job as shown by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingJob {
    pub job_id: String,
    pub task_id: String,
    pub priority: Priority,
    pub position: usize,
    pub enqueued_at: DateTime<Utc>,
}

/// A finished job kept in the history ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub task_id: String,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of the scheduler state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub waiting: usize,
    pub waiting_tasks: Vec<WaitingJob>,
    /// Running jobs, oldest start first.
    pub running: Vec<AnalysisJob>,
    pub paused: bool,
    pub max_concurrent: usize,
    pub recent_completed: Vec<JobOutcome>,
    pub recent_failed: Vec<JobOutcome>,
}

/// Where a task currently stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskJobStatus {
    Queued {
        job_id: String,
        position: usize,
    },
    Running {
        job_id: String,
        progress: u8,
        step: String,
        started_at: Option<DateTime<Utc>>,
    },
    Completed {
        finished_at: DateTime<Utc>,
    },
    Failed {
        finished_at: DateTime<Utc>,
        error: String,
    },
    None,
}

impl TaskJobStatus {
    /// One-line human-readable description.
    pub fn message(&self) -> String {
        match self {
            TaskJobStatus::Queued { position, .. } => format!("queued at position {}", position),
            TaskJobStatus::Running { progress, step, .. } => {
                format!("running ({}%): {}", progress, step)
            }
            TaskJobStatus::Completed { finished_at } => {
                format!("completed at {}", finished_at.format("%Y-%m-%d %H:%M:%S"))
            }
            TaskJobStatus::Failed { error, .. } => format!("failed: {}", error),
            TaskJobStatus::None => "no analysis job for this task".to_string(),
        }
    }
}

#[derive(Debug)]
struct State {
    waiting: WaitingQueue,
    running: HashMap<String, AnalysisJob>,
    paused: bool,
    max_concurrent: usize,
    history_size: usize,
    completed: VecDeque<JobOutcome>,
    failed: VecDeque<JobOutcome>,
}

impl State {
    fn running_task(&self, task_id: &str) -> Option<&AnalysisJob> {
        self.running.values().find(|job| job.task_id == task_id)
    }

    fn is_idle(&self) -> bool {
        self.running.is_empty() && (self.waiting.is_empty() || self.paused)
    }

    fn record(&mut self, outcome: JobOutcome) {
        let ring = if outcome.error.is_some() {
            &mut self.failed
        } else {
            &mut self.completed
        };
        ring.push_back(outcome);
        while ring.len() > self.history_size {
            ring.pop_front();
        }
    }
}

struct Inner {
    state: Arc<Mutex<State>>,
    runner: Arc<dyn JobRunner>,
    reports: Arc<dyn ReportStore>,
    automation: Arc<dyn AutomationLog>,
    runtime: Handle,
    idle: Notify,
}

/// Cloneable handle to the job scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Lock the state, recovering from a poisoned mutex.
fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Scheduler state mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl Scheduler {
    /// Create a scheduler bound to the current tokio runtime.
    pub fn new(
        config: SchedulerConfig,
        runner: Arc<dyn JobRunner>,
        reports: Arc<dyn ReportStore>,
        automation: Arc<dyn AutomationLog>,
    ) -> Result<Self> {
        if config.max_concurrent == 0 {
            return Err(AnalysisError::Validation(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        let runtime = Handle::try_current().map_err(|e| {
            AnalysisError::Collaborator(anyhow::anyhow!("no tokio runtime available: {}", e))
        })?;

        let state = State {
            waiting: WaitingQueue::new(),
            running: HashMap::new(),
            paused: false,
            max_concurrent: config.max_concurrent,
            history_size: config.history_size,
            completed: VecDeque::new(),
            failed: VecDeque::new(),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                state: Arc::new(Mutex::new(state)),
                runner,
                reports,
                automation,
                runtime,
                idle: Notify::new(),
            }),
        })
    }

    /// Queue a task for analysis. Idempotent per task id.
    pub fn enqueue(&self, task_id: &str, priority: Priority) -> Result<EnqueueResult> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(AnalysisError::Validation("task id must not be empty".to_string()));
        }

        let result = {
            let mut state = lock(&self.inner.state);

            if let Some(job) = state.running_task(task_id) {
                debug!("Task {} is already running as {}", task_id, job.job_id);
                return Ok(EnqueueResult {
                    queued: false,
                    position: 0,
                    job_id: job.job_id.clone(),
                });
            }

            if let Some((position, job)) = state.waiting.find_task(task_id) {
                debug!("Task {} is already queued at {}", task_id, position);
                return Ok(EnqueueResult {
                    queued: true,
                    position,
                    job_id: job.job_id.clone(),
                });
            }

            let job = AnalysisJob::new(task_id, priority);
            let job_id = job.job_id.clone();
            let position = state.waiting.insert(job);
            info!(
                "Queued {} for task {} ({} priority, position {})",
                job_id, task_id, priority, position
            );

            EnqueueResult {
                queued: true,
                position,
                job_id,
            }
        };

        self.dispatch();
        Ok(result)
    }

    /// Start waiting jobs while capacity allows.
    pub fn dispatch(&self) {
        let started: Vec<AnalysisJob> = {
            let mut state = lock(&self.inner.state);
            let mut started = Vec::new();

            while !state.paused && state.running.len() < state.max_concurrent {
                let Some(mut job) = state.waiting.pop_front() else {
                    break;
                };
                job.status = JobState::Running;
                job.started_at = Some(Utc::now());
                job.step = "starting".to_string();
                state.running.insert(job.job_id.clone(), job.clone());
                started.push(job);
            }

            started
        };

        for job in started {
            info!("Starting {} for task {}", job.job_id, job.task_id);
            let scheduler = self.clone();
            self.inner.runtime.spawn(async move {
                scheduler.execute(job).await;
            });
        }
    }

    async fn execute(&self, job: AnalysisJob) {
        let started = Instant::now();
        let report = AnalysisReport::analyzing(job.task_id.clone());
        if let Err(e) = self.inner.reports.upsert_report(report.clone()).await {
            warn!("Could not persist analyzing report for {}: {:#}", job.task_id, e);
        }

        let state = Arc::clone(&self.inner.state);
        let job_id = job.job_id.clone();
        let ctx = JobContext::new(
            job.job_id.clone(),
            job.task_id.clone(),
            Arc::new(move |progress: u8, step: &str| {
                let mut state = lock(&state);
                if let Some(running) = state.running.get_mut(&job_id) {
                    running.progress = running.progress.max(progress);
                    running.step = step.to_string();
                }
            }),
        );

        // The body runs on its own task so a panic surfaces as a JoinError.
        let runner = Arc::clone(&self.inner.runner);
        let body = self
            .inner
            .runtime
            .spawn(async move { runner.run(&ctx).await });
        let result = match body.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("job panicked: {}", e)),
        };

        let duration = started.elapsed().as_secs_f64();
        let outcome = self.finish(&job, report, result, duration).await;

        {
            let mut state = lock(&self.inner.state);
            state.running.remove(&job.job_id);
            state.record(outcome);
        }

        self.dispatch();
        self.inner.idle.notify_waiters();
    }

    /// Persist the final report and automation-log entry.
    async fn finish(
        &self,
        job: &AnalysisJob,
        report: AnalysisReport,
        result: anyhow::Result<AnalysisOutcome>,
        duration: f64,
    ) -> JobOutcome {
        let (report, error_text) = match result {
            Ok(outcome) => {
                let aggregation = outcome.aggregation;
                let report = AnalysisReport {
                    status: ReportStatus::Completed,
                    summary: aggregation.summary,
                    drill_down: aggregation.drill_down,
                    error_patterns: aggregation.error_patterns,
                    root_causes: aggregation.root_causes,
                    suggestions: aggregation.suggestions,
                    llm_analysis: outcome.llm_analysis,
                    duration_seconds: duration,
                    updated_at: Utc::now(),
                    ..report
                };
                info!(
                    "Completed {} for task {} in {:.2}s",
                    job.job_id, job.task_id, duration
                );
                (report, None)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Job {} for task {} failed: {}", job.job_id, job.task_id, message);
                (report.into_failed(message.clone(), duration), Some(message))
            }
        };

        if let Err(e) = self.inner.reports.upsert_report(report).await {
            error!("Could not persist report for {}: {:#}", job.task_id, e);
        }

        let entry = AutomationLogEntry {
            task_type: JOB_TASK_TYPE.to_string(),
            related_id: job.task_id.clone(),
            status: if error_text.is_some() { "failed" } else { "completed" }.to_string(),
            message: error_text
                .clone()
                .unwrap_or_else(|| format!("analysis job {} completed", job.job_id)),
            duration_seconds: duration,
            logged_at: Utc::now(),
        };
        if let Err(e) = self.inner.automation.append(entry).await {
            warn!("Could not write automation log for {}: {:#}", job.task_id, e);
        }

        JobOutcome {
            job_id: job.job_id.clone(),
            task_id: job.task_id.clone(),
            finished_at: Utc::now(),
            duration_seconds: duration,
            error: error_text,
        }
    }

    /// Stop dispatching. Running jobs continue.
    pub fn pause(&self) {
        lock(&self.inner.state).paused = true;
        info!("Scheduler paused");
        self.inner.idle.notify_waiters();
    }

    /// Resume dispatching and start jobs immediately.
    pub fn resume(&self) {
        lock(&self.inner.state).paused = false;
        info!("Scheduler resumed");
        self.dispatch();
    }

    /// Remove a waiting job. Running jobs cannot be cancelled.
    pub fn cancel(&self, job_id: &str) -> Result<AnalysisJob> {
        let job = {
            let mut state = lock(&self.inner.state);
            if state.running.contains_key(job_id) {
                return Err(AnalysisError::NotCancellable {
                    job_id: job_id.to_string(),
                });
            }
            state
                .waiting
                .remove_job(job_id)
                .ok_or_else(|| AnalysisError::NotFound(format!("job {}", job_id)))?
        };

        info!("Cancelled {} for task {}", job.job_id, job.task_id);
        self.inner.idle.notify_waiters();
        Ok(job)
    }

    /// Drop every waiting job. Returns how many were removed.
    pub fn clear_queue(&self) -> usize {
        let removed = lock(&self.inner.state).waiting.clear();
        info!("Cleared {} waiting jobs", removed);
        self.inner.idle.notify_waiters();
        removed
    }

    /// Change the concurrency bound. Takes effect at the next dispatch.
    pub fn set_max_concurrent(&self, max_concurrent: usize) -> Result<()> {
        if max_concurrent == 0 {
            return Err(AnalysisError::Validation(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        lock(&self.inner.state).max_concurrent = max_concurrent;
        info!("max_concurrent set to {}", max_concurrent);
        Ok(())
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = lock(&self.inner.state);

        let waiting_tasks = state
            .waiting
            .iter()
            .enumerate()
            .map(|(idx, job)| WaitingJob {
                job_id: job.job_id.clone(),
                task_id: job.task_id.clone(),
                priority: job.priority,
                position: idx + 1,
                enqueued_at: job.enqueued_at,
            })
            .collect();

        let mut running: Vec<AnalysisJob> = state.running.values().cloned().collect();
        running.sort_by_key(|job| job.started_at);

        SchedulerStatus {
            waiting: state.waiting.len(),
            waiting_tasks,
            running,
            paused: state.paused,
            max_concurrent: state.max_concurrent,
            recent_completed: state.completed.iter().cloned().collect(),
            recent_failed: state.failed.iter().cloned().collect(),
        }
    }

    /// Where a task stands: queued, running, recently finished, or its
    /// latest persisted report.
    pub async fn job_status(&self, task_id: &str) -> Result<TaskJobStatus> {
        {
            let state = lock(&self.inner.state);
            if let Some((position, job)) = state.waiting.find_task(task_id) {
                return Ok(TaskJobStatus::Queued {
                    job_id: job.job_id.clone(),
                    position,
                });
            }
            if let Some(job) = state.running_task(task_id) {
                return Ok(TaskJobStatus::Running {
                    job_id: job.job_id.clone(),
                    progress: job.progress,
                    step: job.step.clone(),
                    started_at: job.started_at,
                });
            }
            let latest = state
                .completed
                .iter()
                .chain(state.failed.iter())
                .filter(|outcome| outcome.task_id == task_id)
                .max_by_key(|outcome| outcome.finished_at);
            if let Some(outcome) = latest {
                return Ok(match outcome.error {
                    Some(ref error) => TaskJobStatus::Failed {
                        finished_at: outcome.finished_at,
                        error: error.clone(),
                    },
                    None => TaskJobStatus::Completed {
                        finished_at: outcome.finished_at,
                    },
                });
            }
        }

        let report = self.inner.reports.get_latest_report(task_id).await?;
        Ok(match report {
            Some(report) if report.status == ReportStatus::Completed => {
                TaskJobStatus::Completed {
                    finished_at: report.updated_at,
                }
            }
            Some(report) if report.status == ReportStatus::Failed => TaskJobStatus::Failed {
                finished_at: report.updated_at,
                error: report.error_message.unwrap_or_default(),
            },
            // An analyzing report with no live job was left by another process.
            _ => TaskJobStatus::None,
        })
    }

    /// Wait until nothing runs and nothing is dispatchable.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if lock(&self.inner.state).is_idle() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pipeline::tests::{pipeline_with, CountingClient, INSIGHTS};
    use super::*;
    use crate::store::{MemoryAutomationLog, MemoryReportStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Runner with scripted per-task behavior.
    struct ScriptedRunner {
        order: Mutex<Vec<String>>,
        current: AtomicUsize,
        peak: AtomicUsize,
        /// Tasks starting with "gate" block until a permit is added.
        gate: Semaphore,
        delay_ms: u64,
    }

    impl ScriptedRunner {
        fn with_delay(delay_ms: u64) -> Self {
            Self {
                order: Mutex::new(Vec::new()),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                gate: Semaphore::new(0),
                delay_ms,
            }
        }

        fn order(&self) -> Vec<String> {
            self.order.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobRunner for ScriptedRunner {
        async fn run(&self, ctx: &JobContext) -> anyhow::Result<AnalysisOutcome> {
            self.order.lock().unwrap().push(ctx.task_id.clone());
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            ctx.progress(40, "working");

            if ctx.task_id.starts_with("gate") {
                let _permit = self.gate.acquire().await?;
            }
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.current.fetch_sub(1, Ordering::SeqCst);

            if ctx.task_id.starts_with("boom") {
                anyhow::bail!("scripted failure for {}", ctx.task_id);
            }
            if ctx.task_id.starts_with("panic") {
                panic!("scripted panic");
            }

            let (_, pipeline) = pipeline_with(None).await;
            let mut outcome = pipeline.run(&JobContext::detached("task-1")).await?;
            outcome.aggregation.summary.main_issues = vec![ctx.task_id.clone()];
            Ok(outcome)
        }
    }

    struct Harness {
        scheduler: Scheduler,
        runner: Arc<ScriptedRunner>,
        reports: Arc<MemoryReportStore>,
        automation: Arc<MemoryAutomationLog>,
    }

    fn harness(max_concurrent: usize, runner: ScriptedRunner) -> Harness {
        let runner = Arc::new(runner);
        let reports = Arc::new(MemoryReportStore::new());
        let automation = Arc::new(MemoryAutomationLog::new());
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_concurrent,
                history_size: 10,
            },
            runner.clone(),
            reports.clone(),
            automation.clone(),
        )
        .unwrap();
        Harness {
            scheduler,
            runner,
            reports,
            automation,
        }
    }

    async fn report_status(reports: &MemoryReportStore, task_id: &str) -> Option<ReportStatus> {
        reports
            .get_latest_report(task_id)
            .await
            .unwrap()
            .map(|r| r.status)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let h = harness(1, ScriptedRunner::with_delay(0));
        h.scheduler.pause();

        let first = h.scheduler.enqueue("A", Priority::Medium).unwrap();
        let second = h.scheduler.enqueue("A", Priority::High).unwrap();

        assert!(first.queued);
        assert_eq!(first.position, 1);
        assert_eq!(first.job_id, second.job_id);
        assert_eq!(second.position, 1);
        assert_eq!(h.scheduler.status().waiting, 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_empty_task() {
        let h = harness(1, ScriptedRunner::with_delay(0));
        let err = h.scheduler.enqueue("  ", Priority::Low).unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
    }

    #[tokio::test]
    async fn test_priority_dispatch_order() {
        let h = harness(1, ScriptedRunner::with_delay(0));
        h.scheduler.pause();
        h.scheduler.enqueue("A", Priority::Low).unwrap();
        h.scheduler.enqueue("B", Priority::High).unwrap();
        h.scheduler.enqueue("C", Priority::Medium).unwrap();

        h.scheduler.resume();
        h.scheduler.wait_idle().await;

        assert_eq!(h.runner.order(), vec!["B", "C", "A"]);
        for task in ["A", "B", "C"] {
            assert_eq!(report_status(&h.reports, task).await, Some(ReportStatus::Completed));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bound() {
        let h = harness(2, ScriptedRunner::with_delay(20));
        for i in 0..6 {
            h.scheduler.enqueue(&format!("task-{}", i), Priority::Medium).unwrap();
            assert!(h.scheduler.status().running.len() <= 2);
        }

        h.scheduler.wait_idle().await;
        assert!(h.runner.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(h.runner.order().len(), 6);
        assert_eq!(h.scheduler.status().recent_completed.len(), 6);
    }

    #[tokio::test]
    async fn test_failure_keeps_scheduler_alive() {
        let h = harness(1, ScriptedRunner::with_delay(0));
        h.scheduler.enqueue("boom-1", Priority::High).unwrap();
        h.scheduler.enqueue("ok-1", Priority::Low).unwrap();
        h.scheduler.wait_idle().await;

        let failed = h.reports.get_latest_report("boom-1").await.unwrap().unwrap();
        assert_eq!(failed.status, ReportStatus::Failed);
        assert!(failed
            .error_message
            .unwrap()
            .contains("scripted failure for boom-1"));
        assert_eq!(report_status(&h.reports, "ok-1").await, Some(ReportStatus::Completed));

        let status = h.scheduler.status();
        assert_eq!(status.recent_failed.len(), 1);
        assert_eq!(status.recent_completed.len(), 1);
        assert!(status.running.is_empty());

        let entries = h.automation.entries().await;
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .any(|e| e.related_id == "boom-1" && e.status == "failed"));
    }

    #[tokio::test]
    async fn test_panicking_job_is_recorded_as_failure() {
        let h = harness(1, ScriptedRunner::with_delay(0));
        h.scheduler.enqueue("panic-1", Priority::Medium).unwrap();
        h.scheduler.enqueue("after", Priority::Medium).unwrap();
        h.scheduler.wait_idle().await;

        assert_eq!(report_status(&h.reports, "panic-1").await, Some(ReportStatus::Failed));
        assert_eq!(report_status(&h.reports, "after").await, Some(ReportStatus::Completed));
    }

    #[tokio::test]
    async fn test_pause_holds_jobs_until_resume() {
        let h = harness(2, ScriptedRunner::with_delay(0));
        h.scheduler.pause();
        h.scheduler.enqueue("A", Priority::High).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let status = h.scheduler.status();
        assert!(status.paused);
        assert!(status.running.is_empty());
        assert_eq!(status.waiting, 1);
        assert!(h.runner.order().is_empty());

        h.scheduler.resume();
        h.scheduler.wait_idle().await;
        assert_eq!(h.runner.order(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_cancel_waiting_and_running() {
        let h = harness(1, ScriptedRunner::with_delay(0));
        let running = h.scheduler.enqueue("gate-1", Priority::High).unwrap();
        let waiting = h.scheduler.enqueue("B", Priority::Medium).unwrap();
        assert_eq!(waiting.position, 1);

        // Let the gated job start.
        while h.runner.order().is_empty() {
            tokio::task::yield_now().await;
        }

        let err = h.scheduler.cancel(&running.job_id).unwrap_err();
        assert!(matches!(err, AnalysisError::NotCancellable { .. }));

        let cancelled = h.scheduler.cancel(&waiting.job_id).unwrap();
        assert_eq!(cancelled.task_id, "B");

        let err = h.scheduler.cancel(&waiting.job_id).unwrap_err();
        assert!(matches!(err, AnalysisError::NotFound(_)));

        h.runner.gate.add_permits(1);
        h.scheduler.wait_idle().await;
        assert_eq!(h.runner.order(), vec!["gate-1"]);
    }

    #[tokio::test]
    async fn test_running_task_reports_position_zero() {
        let h = harness(1, ScriptedRunner::with_delay(0));
        let first = h.scheduler.enqueue("gate-1", Priority::Medium).unwrap();
        while h.runner.order().is_empty() {
            tokio::task::yield_now().await;
        }

        let again = h.scheduler.enqueue("gate-1", Priority::High).unwrap();
        assert!(!again.queued);
        assert_eq!(again.position, 0);
        assert_eq!(again.job_id, first.job_id);

        match h.scheduler.job_status("gate-1").await.unwrap() {
            TaskJobStatus::Running { progress, step, .. } => {
                assert_eq!(progress, 40);
                assert_eq!(step, "working");
            }
            other => panic!("expected running, got {:?}", other),
        }

        h.runner.gate.add_permits(1);
        h.scheduler.wait_idle().await;
        assert!(matches!(
            h.scheduler.job_status("gate-1").await.unwrap(),
            TaskJobStatus::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_clear_queue() {
        let h = harness(1, ScriptedRunner::with_delay(0));
        h.scheduler.pause();
        for task in ["A", "B", "C"] {
            h.scheduler.enqueue(task, Priority::Low).unwrap();
        }

        assert_eq!(h.scheduler.clear_queue(), 3);
        assert_eq!(h.scheduler.status().waiting, 0);
        assert_eq!(h.scheduler.clear_queue(), 0);
    }

    #[tokio::test]
    async fn test_set_max_concurrent() {
        let h = harness(1, ScriptedRunner::with_delay(0));
        let err = h.scheduler.set_max_concurrent(0).unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));

        h.scheduler.enqueue("gate-1", Priority::Medium).unwrap();
        h.scheduler.enqueue("gate-2", Priority::Medium).unwrap();
        h.scheduler.enqueue("gate-3", Priority::Medium).unwrap();
        while h.runner.order().is_empty() {
            tokio::task::yield_now().await;
        }

        // Raising the ceiling does not start waiting jobs by itself.
        h.scheduler.set_max_concurrent(3).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let status = h.scheduler.status();
        assert_eq!(status.max_concurrent, 3);
        assert_eq!(status.running.len(), 1);
        assert_eq!(status.waiting, 2);

        // The next dispatch applies it.
        h.scheduler.enqueue("gate-4", Priority::Low).unwrap();
        let status = h.scheduler.status();
        assert_eq!(status.running.len(), 3);
        assert_eq!(status.waiting_tasks[0].task_id, "gate-4");

        // Lowering it leaves running jobs alone.
        h.scheduler.set_max_concurrent(1).unwrap();
        assert_eq!(h.scheduler.status().running.len(), 3);

        h.runner.gate.add_permits(1);
        loop {
            let status = h.scheduler.status();
            if status.running.iter().any(|job| job.task_id == "gate-4") {
                assert_eq!(status.running.len(), 1);
            }
            if status.running.is_empty() && status.waiting == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        h.scheduler.wait_idle().await;
        assert_eq!(h.runner.order().last().map(String::as_str), Some("gate-4"));
        assert_eq!(h.scheduler.status().recent_completed.len(), 4);
    }

    #[tokio::test]
    async fn test_job_status_variants() {
        let h = harness(1, ScriptedRunner::with_delay(0));
        assert_eq!(h.scheduler.job_status("X").await.unwrap(), TaskJobStatus::None);

        h.scheduler.pause();
        let queued = h.scheduler.enqueue("X", Priority::Medium).unwrap();
        let status = h.scheduler.job_status("X").await.unwrap();
        assert_eq!(
            status,
            TaskJobStatus::Queued {
                job_id: queued.job_id,
                position: 1
            }
        );
        assert_eq!(status.message(), "queued at position 1");

        h.scheduler.enqueue("boom-x", Priority::High).unwrap();
        h.scheduler.resume();
        h.scheduler.wait_idle().await;

        let failed = h.scheduler.job_status("boom-x").await.unwrap();
        assert!(failed.message().starts_with("failed: scripted failure"));
    }

    #[tokio::test]
    async fn test_job_status_falls_back_to_report_store() {
        let h = harness(1, ScriptedRunner::with_delay(0));
        let report = AnalysisReport::analyzing("old-task").into_failed("timed out", 3.0);
        h.reports.upsert_report(report).await.unwrap();
        h.reports
            .upsert_report(AnalysisReport::analyzing("orphan"))
            .await
            .unwrap();

        match h.scheduler.job_status("old-task").await.unwrap() {
            TaskJobStatus::Failed { error, .. } => assert_eq!(error, "timed out"),
            other => panic!("expected failed, got {:?}", other),
        }
        assert_eq!(h.scheduler.job_status("orphan").await.unwrap(), TaskJobStatus::None);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let runner = Arc::new(ScriptedRunner::with_delay(0));
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_concurrent: 1,
                history_size: 2,
            },
            runner,
            Arc::new(MemoryReportStore::new()),
            Arc::new(MemoryAutomationLog::new()),
        )
        .unwrap();

        for task in ["A", "B", "C"] {
            scheduler.enqueue(task, Priority::Medium).unwrap();
        }
        scheduler.wait_idle().await;

        let recent: Vec<String> = scheduler
            .status()
            .recent_completed
            .into_iter()
            .map(|o| o.task_id)
            .collect();
        assert_eq!(recent, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_end_to_end_with_pipeline() {
        let client = Arc::new(CountingClient::new(INSIGHTS));
        let (_, pipeline) = pipeline_with(Some(client.clone())).await;
        let reports = Arc::new(MemoryReportStore::new());
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(pipeline),
            reports.clone(),
            Arc::new(MemoryAutomationLog::new()),
        )
        .unwrap();

        scheduler.enqueue("task-1", Priority::High).unwrap();
        scheduler.wait_idle().await;

        let report = reports.get_latest_report("task-1").await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.summary.total_errors, 7);
        assert_eq!(report.drill_down[0].name, "Math");
        assert_eq!(report.llm_analysis.unwrap().insights.len(), 1);

        // Same data: the deep analysis is served from the cache.
        scheduler.enqueue("task-1", Priority::High).unwrap();
        scheduler.wait_idle().await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_new_rejects_zero_concurrency() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let result = Scheduler::new(
            SchedulerConfig {
                max_concurrent: 0,
                history_size: 10,
            },
            Arc::new(ScriptedRunner::with_delay(0)),
            Arc::new(MemoryReportStore::new()),
            Arc::new(MemoryAutomationLog::new()),
        );
        assert!(matches!(result, Err(AnalysisError::Validation(_))));
    }
}
