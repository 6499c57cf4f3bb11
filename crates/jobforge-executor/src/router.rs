//! Execution router.
//!
//! A stateless dispatcher from a job's declared execution mode to a backend.
//! The router owns the three backends, refuses work the isolated backend
//! cannot serve before any side effect occurs, and enforces the optional
//! per-job deadline on the waiting side.

use std::sync::Arc;

use jobforge_core::pipeline::PipelineRegistry;
use jobforge_core::{EngineError, ExecMode, Job};
use tracing::{debug, warn};

use crate::{
    AsyncRunner, AsyncRunnerConfig, Backend, ExecOutcome, ProcessPool, ProcessPoolConfig, Task,
    ThreadPool, ThreadPoolConfig,
};

/// Routes jobs to the backend implied by their mode.
pub struct ExecutionRouter {
    registry: Arc<PipelineRegistry>,
    thread_pool: ThreadPool,
    process_pool: ProcessPool,
    async_runner: AsyncRunner,
}

impl ExecutionRouter {
    /// Starts all three backends.
    #[must_use]
    pub fn start(
        registry: Arc<PipelineRegistry>,
        threads: &ThreadPoolConfig,
        processes: &ProcessPoolConfig,
        tasks: &AsyncRunnerConfig,
    ) -> Self {
        Self {
            registry,
            thread_pool: ThreadPool::start(threads),
            process_pool: ProcessPool::start(processes),
            async_runner: AsyncRunner::start(tasks),
        }
    }

    /// Starts a router with default backend configurations.
    #[must_use]
    pub fn with_defaults(registry: Arc<PipelineRegistry>) -> Self {
        Self::start(
            registry,
            &ThreadPoolConfig::default(),
            &ProcessPoolConfig::default(),
            &AsyncRunnerConfig::default(),
        )
    }

    /// Runs one job to an outcome: exactly one outcome per call.
    ///
    /// Failures at the dispatch boundary (unknown pipeline type, a pipeline
    /// the isolated backend cannot rebuild, a halted backend) are folded
    /// into the outcome with their retry classification rather than raised.
    #[must_use]
    pub fn route(&self, job: &Job) -> ExecOutcome {
        let Some(kind) = job.pipeline_kind() else {
            return ExecOutcome::fatal("payload is missing a string 'type' field");
        };

        let backend: &dyn Backend = match job.mode {
            ExecMode::Thread => &self.thread_pool,
            ExecMode::Process => &self.process_pool,
            ExecMode::Async => &self.async_runner,
        };

        // Resolution happens before submission so refusals have no side
        // effect on the backend.
        let pipeline = match job.mode {
            ExecMode::Process => match self.registry.is_process_safe(kind) {
                None => {
                    return ExecOutcome::fatal(
                        EngineError::UnknownPipeline {
                            kind: kind.to_string(),
                        }
                        .to_string(),
                    );
                }
                Some(false) => {
                    warn!(job_id = %job.job_id, kind, "refusing non-process-safe pipeline");
                    return ExecOutcome::fatal(
                        EngineError::Serialization {
                            kind: kind.to_string(),
                        }
                        .to_string(),
                    );
                }
                Some(true) => None,
            },
            ExecMode::Thread | ExecMode::Async => match self.registry.build(kind) {
                None => {
                    return ExecOutcome::fatal(
                        EngineError::UnknownPipeline {
                            kind: kind.to_string(),
                        }
                        .to_string(),
                    );
                }
                pipeline => pipeline,
            },
        };

        debug!(job_id = %job.job_id, mode = %job.mode, kind, "routing job");
        let task = Task {
            job_id: job.job_id.clone(),
            kind: kind.to_string(),
            payload: job.payload.clone(),
            pipeline,
            timeout: job.timeout(),
        };

        let handle = match backend.submit(task) {
            Ok(handle) => handle,
            Err(e) => return ExecOutcome::transient(e.to_string()),
        };
        match job.timeout() {
            // The isolated backend kills its worker on expiry; the others
            // run on and the late outcome is discarded with the handle.
            Some(deadline) => handle.wait_timeout(deadline),
            None => handle.wait(),
        }
    }

    /// Shuts all backends down, in the reverse of their start order.
    pub fn shutdown(&self, drain: bool) {
        self.async_runner.shutdown(drain);
        self.process_pool.shutdown(drain);
        self.thread_pool.shutdown(drain);
    }

    /// Returns true once every backend has halted.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.thread_pool.is_halted() && self.process_pool.is_halted() && self.async_runner.is_halted()
    }
}
