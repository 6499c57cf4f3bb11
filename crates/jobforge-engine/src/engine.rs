//! The engine: submission intake, main loop, state transitions,
//! persistence, retries, and shutdown orchestration.
//!
//! The loop runs on one driver thread and processes one job at a time:
//! pop from the scheduler, move the job to RUNNING, persist, route to the
//! backend implied by its mode, wait for the outcome, and finalize. Every
//! transition is persisted before the next step is taken, so per-job
//! history is totally ordered in the store. Submission is safe from any
//! number of concurrent callers.

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;
use jobforge_core::pipeline::PipelineRegistry;
use jobforge_core::{
    CoreResult, EngineError, FailureKind, Job, JobResult, JobSpec, JobStatus,
};
use jobforge_executor::{
    AsyncRunnerConfig, ExecOutcome, ExecutionRouter, ProcessPoolConfig, ThreadPoolConfig,
};
use jobforge_infrastructure::{EngineConfig, MetricsRegistry, ShutdownCoordinator, StateStore};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::retry::RetryPolicy;
use crate::scheduler::{AgingPolicy, Scheduler};

/// Point-in-time engine counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Jobs accepted by `submit`
    pub submitted: u64,
    /// Jobs that reached COMPLETED
    pub completed: u64,
    /// Jobs that reached FAILED
    pub failed: u64,
    /// Retry re-queues performed
    pub retries: u64,
    /// Jobs that reached CANCELLED
    pub cancelled: u64,
    /// Entries currently queued
    pub queued: usize,
}

/// Single-node concurrent job execution engine
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn StateStore>,
    scheduler: Scheduler,
    router: ExecutionRouter,
    metrics: Arc<MetricsRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    retry: RetryPolicy,
    jobs: DashMap<String, Job>,
    cancel_intents: DashSet<String>,
}

impl Engine {
    /// Builds an engine over a pipeline registry and a state store, and
    /// starts the execution backends.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        registry: Arc<PipelineRegistry>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let router = ExecutionRouter::start(
            registry,
            &ThreadPoolConfig {
                workers: config.thread_workers,
                queue_capacity: config.queue_capacity,
                ..ThreadPoolConfig::default()
            },
            &ProcessPoolConfig {
                workers: config.process_workers,
                queue_capacity: config.queue_capacity,
                ..ProcessPoolConfig::default()
            },
            &AsyncRunnerConfig {
                queue_capacity: config.queue_capacity,
            },
        );
        let scheduler = Scheduler::new(AgingPolicy {
            interval: config.aging_interval,
            boost: config.aging_boost,
        });
        let retry = RetryPolicy::new(config.retry_base);

        Self {
            config,
            store,
            scheduler,
            router,
            metrics: Arc::new(MetricsRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            retry,
            jobs: DashMap::new(),
            cancel_intents: DashSet::new(),
        }
    }

    /// The engine's metrics registry.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// The shutdown coordinator, for wiring host signals and cleanups.
    #[must_use]
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Snapshot of the live copy of a job.
    #[must_use]
    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.jobs.get(job_id).map(|j| j.clone())
    }

    /// Current engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            submitted: self.metrics.counter("job.submitted"),
            completed: self.metrics.counter("job.success"),
            failed: self.metrics.counter("job.failure"),
            retries: self.metrics.counter("job.retries"),
            cancelled: self.metrics.counter("job.cancelled"),
            queued: self.scheduler.size(),
        }
    }

    /// Validates and accepts a job: CREATED -> PENDING, persisted, queued.
    ///
    /// Safe to call from any thread, including while the loop runs.
    ///
    /// # Errors
    ///
    /// Validation failures and duplicate ids are returned synchronously,
    /// before any side effect; store failures abort the submission.
    pub fn submit(&self, spec: JobSpec) -> CoreResult<String> {
        let mut job = spec.build()?;
        let job_id = job.job_id.clone();
        match self.jobs.entry(job_id.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateJob { id: job_id }),
            Entry::Vacant(slot) => {
                job.transition(JobStatus::Pending)?;
                self.store
                    .put_job(&job)
                    .map_err(|e| EngineError::Store(e.to_string()))?;
                self.scheduler.submit(job_id.as_str(), job.priority);
                self.metrics.incr("job.submitted");
                debug!(job_id = %job_id, priority = job.priority, mode = %job.mode, "job submitted");
                slot.insert(job);
                Ok(job_id)
            }
        }
    }

    /// Cancels a job.
    ///
    /// Queued jobs are tombstoned and never execute. A RUNNING job gets a
    /// cancellation intent: its execution finishes naturally, the outcome
    /// is discarded, and the job lands in CANCELLED with no result record.
    ///
    /// # Errors
    ///
    /// [`EngineError::JobNotFound`] for unknown ids and
    /// [`EngineError::IllegalTransition`] for jobs already terminal or
    /// between retries.
    pub fn cancel(&self, job_id: &str) -> CoreResult<()> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| EngineError::JobNotFound {
                id: job_id.to_string(),
            })?;
        match entry.status {
            JobStatus::Created | JobStatus::Pending => {
                entry.transition(JobStatus::Cancelled)?;
                self.scheduler.cancel(job_id);
                self.store
                    .put_job(&entry)
                    .map_err(|e| EngineError::Store(e.to_string()))?;
                self.metrics.incr("job.cancelled");
                info!(job_id = %job_id, "queued job cancelled");
                Ok(())
            }
            JobStatus::Running => {
                self.cancel_intents.insert(job_id.to_string());
                debug!(job_id = %job_id, "cancellation intent recorded");
                Ok(())
            }
            other => Err(EngineError::IllegalTransition {
                from: other,
                to: JobStatus::Cancelled,
            }),
        }
    }

    /// Signals the engine to stop after the current iteration.
    ///
    /// Submission keeps accepting until the loop observes the flag; the
    /// already-dispatched job finishes.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Runs the loop until shutdown is observed, then closes backends,
    /// runs cleanups, and flushes metrics.
    pub fn run(&self) {
        info!("engine starting");
        while !self.shutdown.is_triggered() {
            if !self.tick() {
                thread::sleep(self.config.poll_interval);
            }
        }
        info!("engine stopping");
        self.close();
    }

    /// Spawns [`run`](Self::run) on a dedicated thread.
    ///
    /// Callers keep their own handle: `Arc::clone(&engine).spawn()`.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("jobforge-engine".to_string())
            .spawn(move || self.run())
            .expect("spawning the engine loop thread")
    }

    /// Processes at most one job; returns whether one was available.
    ///
    /// The loop is `tick` in a shutdown-checking loop; tests drive it
    /// directly for determinism.
    pub fn tick(&self) -> bool {
        match self.scheduler.next_job() {
            Some(job_id) => {
                self.process(&job_id);
                true
            }
            None => false,
        }
    }

    fn process(&self, job_id: &str) {
        let span = info_span!("job", job_id);
        let _guard = span.enter();

        let mut job = {
            let Some(mut entry) = self.jobs.get_mut(job_id) else {
                warn!("scheduled job missing from the live table");
                return;
            };
            // PENDING -> RUNNING or RETRYING -> RUNNING. A job cancelled
            // between pop and dispatch fails here and is skipped.
            if let Err(e) = entry.transition(JobStatus::Running) {
                debug!("skipping dispatch: {e}");
                return;
            }
            entry.clone()
        };
        let _exec_timer = self.metrics.timer("job.execution");

        if let Err(e) = self.store.put_job(&job) {
            error!("failed to persist RUNNING transition: {e}");
            let now = Utc::now();
            self.finalize(
                job_id,
                ExecOutcome::transient(format!("store error: {e}")),
                now,
                now,
            );
            return;
        }

        // Jobs without their own deadline inherit the engine-wide one.
        if job.timeout_ms.is_none() {
            job.timeout_ms = self.config.job_timeout.map(|t| t.as_millis() as u64);
        }

        let started_at = Utc::now();
        let outcome = {
            let _timer = self.metrics.timer("pipeline.run");
            self.router.route(&job)
        };
        let ended_at = Utc::now();
        self.finalize(job_id, outcome, started_at, ended_at);
    }

    fn finalize(
        &self,
        job_id: &str,
        outcome: ExecOutcome,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) {
        let Some(mut entry) = self.jobs.get_mut(job_id) else {
            return;
        };

        if self.cancel_intents.remove(job_id).is_some() {
            match entry.fulfill_cancellation() {
                Ok(()) => {
                    if let Err(e) = self.store.put_job(&entry) {
                        error!("failed to persist CANCELLED transition: {e}");
                    }
                    self.metrics.incr("job.cancelled");
                    info!("cancelled job finished; outcome discarded");
                }
                Err(e) => error!("cancellation fulfillment rejected: {e}"),
            }
            return;
        }

        match outcome {
            ExecOutcome::Success(output) => {
                match JobResult::completed(job_id, output, started_at, ended_at) {
                    // The result is durable before the terminal transition
                    // is committed.
                    Ok(result) => {
                        if let Err(e) = self.store.put_result(&result) {
                            error!("failed to persist result: {e}");
                        }
                    }
                    Err(e) => error!("malformed result: {e}"),
                }
                if let Err(e) = entry.transition(JobStatus::Completed) {
                    error!("completion transition rejected: {e}");
                    return;
                }
                if let Err(e) = self.store.put_job(&entry) {
                    error!("failed to persist COMPLETED transition: {e}");
                }
                self.metrics.incr("job.success");
                info!("job completed");
            }
            ExecOutcome::Cancelled => {
                // The backend discarded the work before it ran.
                self.fail(
                    &mut entry,
                    "execution cancelled before completion",
                    FailureKind::Transient,
                    started_at,
                    ended_at,
                );
            }
            ExecOutcome::Failure { message, kind } => {
                self.fail(&mut entry, &message, kind, started_at, ended_at);
            }
        }
    }

    fn fail(
        &self,
        job: &mut Job,
        message: &str,
        kind: FailureKind,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) {
        match job.record_failure(message, kind) {
            Ok(JobStatus::Failed) => {
                match JobResult::failed(&job.job_id, message, started_at, ended_at) {
                    Ok(result) => {
                        if let Err(e) = self.store.put_result(&result) {
                            error!("failed to persist result: {e}");
                        }
                    }
                    Err(e) => error!("malformed result: {e}"),
                }
                if let Err(e) = self.store.put_job(job) {
                    error!("failed to persist FAILED transition: {e}");
                }
                self.metrics.incr("job.failure");
                warn!(attempts = job.attempts, "job failed terminally: {message}");
            }
            Ok(_retrying) => {
                if let Err(e) = self.store.put_job(job) {
                    error!("failed to persist RETRYING transition: {e}");
                }
                self.metrics.incr("job.retries");
                let delay = self.retry.backoff(job.attempts);
                self.scheduler
                    .submit_after(job.job_id.as_str(), job.priority, delay);
                info!(
                    attempts = job.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retry scheduled: {message}"
                );
            }
            Err(e) => error!("failure transition rejected: {e}"),
        }
    }

    fn close(&self) {
        self.router.shutdown(true);
        self.shutdown.run_cleanups();
        let stats = self.stats();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            retries = stats.retries,
            cancelled = stats.cancelled,
            "engine stopped"
        );
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("queued", &self.scheduler.size())
            .field("live_jobs", &self.jobs.len())
            .field("shutdown", &self.shutdown.is_triggered())
            .finish()
    }
}
