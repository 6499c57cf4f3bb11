//! # Jobforge Executor
//!
//! Execution backends for the Jobforge engine and the router that picks
//! between them. All three backends present one contract: submit work, get a
//! future-like [`TaskHandle`], shut down with or without draining, observe
//! whether the backend has halted.
//!
//! ## Architecture
//!
//! - `thread_pool`: shared-memory pool of long-lived OS threads
//! - `process_pool`: isolated pool of re-exec'd worker processes
//! - `async_runner`: cooperative task runner on a single driver thread
//! - `router`: dispatch by declared execution mode

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod async_runner;
pub mod process_pool;
pub mod router;
pub mod thread_pool;

pub use async_runner::{AsyncRunner, AsyncRunnerConfig};
pub use process_pool::{ProcessPool, ProcessPoolConfig, maybe_run_worker};
pub use router::ExecutionRouter;
pub use thread_pool::{ThreadPool, ThreadPoolConfig};

use std::sync::mpsc;
use std::time::Duration;

use jobforge_core::pipeline::{Pipeline, Record};
use jobforge_core::{FailureKind, StageError};

/// Unit of work handed to a backend.
#[derive(Debug)]
pub struct Task {
    /// Job the work belongs to, for logs and wire messages
    pub job_id: String,
    /// Payload `type`; isolated workers re-resolve the pipeline from it
    pub kind: String,
    /// Initial record fed to the pipeline
    pub payload: Record,
    /// Pre-built pipeline for the in-process backends
    pub pipeline: Option<Pipeline>,
    /// Per-job execution deadline
    pub timeout: Option<Duration>,
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// Pipeline completed; carries its final record
    Success(Record),
    /// Pipeline or backend failed, classified for the retry policy
    Failure {
        /// Failure message recorded in job and result
        message: String,
        /// Transient failures may be retried
        kind: FailureKind,
    },
    /// Work was discarded before running, e.g. by shutdown
    Cancelled,
}

impl ExecOutcome {
    /// Transient failure shorthand.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            kind: FailureKind::Transient,
        }
    }

    /// Fatal failure shorthand.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            kind: FailureKind::Fatal,
        }
    }
}

impl From<Result<Record, StageError>> for ExecOutcome {
    fn from(result: Result<Record, StageError>) -> Self {
        match result {
            Ok(record) => Self::Success(record),
            Err(e) if e.fatal => Self::fatal(e.message),
            Err(e) => Self::transient(e.message),
        }
    }
}

/// Runs a pipeline against a payload and converts the result.
#[must_use]
pub fn run_pipeline(pipeline: &Pipeline, payload: Record) -> ExecOutcome {
    pipeline.run(payload).into()
}

pub(crate) type OutcomeSender = mpsc::Sender<ExecOutcome>;

/// Future-like handle to a submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    rx: mpsc::Receiver<ExecOutcome>,
}

impl TaskHandle {
    pub(crate) fn channel() -> (OutcomeSender, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }

    /// Blocks until the backend delivers the outcome.
    ///
    /// A backend that drops the task without replying (e.g. abandoned queue
    /// on a non-draining shutdown) yields [`ExecOutcome::Cancelled`].
    #[must_use]
    pub fn wait(self) -> ExecOutcome {
        self.rx.recv().unwrap_or(ExecOutcome::Cancelled)
    }

    /// Blocks up to `timeout`; expiry yields a transient `"timeout"`
    /// failure and the late outcome is discarded with the handle.
    #[must_use]
    pub fn wait_timeout(self, timeout: Duration) -> ExecOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => ExecOutcome::transient("timeout"),
            Err(mpsc::RecvTimeoutError::Disconnected) => ExecOutcome::Cancelled,
        }
    }
}

/// Errors raised at the submission boundary of a backend.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Backend has shut down and refuses new work
    #[error("backend halted")]
    Halted,

    /// Worker process could not be spawned
    #[error("failed to spawn worker process: {0}")]
    Spawn(String),
}

/// Common contract of the three execution backends.
pub trait Backend: Send + Sync {
    /// Backend name for logs and dispatch errors.
    fn name(&self) -> &'static str;

    /// Submits work and returns a handle to its outcome.
    ///
    /// May block when the backend's bounded queue is full; that is the
    /// backpressure point.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::Halted`] once the backend has shut down.
    fn submit(&self, task: Task) -> Result<TaskHandle, ExecutorError>;

    /// Stops the backend. With `drain` set, queued work is allowed to
    /// finish; otherwise it is discarded.
    fn shutdown(&self, drain: bool);

    /// Returns true once all workers have stopped.
    fn is_halted(&self) -> bool;
}
