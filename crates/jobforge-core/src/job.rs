//! Job records and the job state machine.
//!
//! A [`Job`] is a unit of work with identity, priority, payload, execution
//! mode, retry budget, and a strictly validated lifecycle. Every mutation
//! goes through [`Job::transition`] so that the state machine and the
//! timestamp invariants hold on every observable copy of the record.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{CoreResult, EngineError, FailureKind, ValidationError};

/// Backend selector for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Shared-memory worker pool
    Thread,
    /// Isolated-process worker pool
    Process,
    /// Cooperative single-thread task runner
    Async,
}

impl Default for ExecMode {
    fn default() -> Self {
        Self::Thread
    }
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Thread => "thread",
            Self::Process => "process",
            Self::Async => "async",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ExecMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thread" => Ok(Self::Thread),
            "process" => Ok(Self::Process),
            "async" => Ok(Self::Async),
            other => Err(ValidationError::InvalidMode(other.to_string())),
        }
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Constructed, not yet accepted
    Created,
    /// Accepted and queued
    Pending,
    /// Dispatched to a backend
    Running,
    /// Transient failure, awaiting re-queue
    Retrying,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
    /// Terminal, externally requested
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Retrying => "RETRYING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl JobStatus {
    /// Returns true if no transition leaves this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the transition `self -> to` is in the machine.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Created, Self::Pending | Self::Cancelled)
                | (Self::Pending, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Completed | Self::Failed | Self::Retrying)
                | (Self::Retrying, Self::Running | Self::Failed)
        )
    }
}

/// A unit of work owned by the engine after submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identity across the live system
    pub job_id: String,
    /// Higher runs earlier
    pub priority: i64,
    /// Backend the router dispatches to
    pub mode: ExecMode,
    /// Total execution attempts allowed, including the first
    pub max_retries: u32,
    /// Opaque payload; its `type` field names the pipeline
    pub payload: serde_json::Value,
    /// Current lifecycle state
    pub status: JobStatus,
    /// Attempts consumed so far
    pub attempts: u32,
    /// Latest failure message, empty when none
    pub last_error: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Advances on every transition
    pub updated_at: DateTime<Utc>,
    /// Optional per-job execution deadline, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Job {
    /// Returns the payload's pipeline type, if present.
    #[must_use]
    pub fn pipeline_kind(&self) -> Option<&str> {
        self.payload.get("type").and_then(serde_json::Value::as_str)
    }

    /// Returns the per-job execution deadline, if configured.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Checks the record invariants that do not depend on the registry.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.job_id.is_empty() {
            return Err(ValidationError::EmptyJobId);
        }
        if self.max_retries == 0 {
            return Err(ValidationError::InvalidMaxRetries { value: 0 });
        }
        if !self.payload.is_object() {
            return Err(ValidationError::PayloadNotObject);
        }
        if self.pipeline_kind().is_none_or(str::is_empty) {
            return Err(ValidationError::MissingPayloadType);
        }
        Ok(())
    }

    /// Moves the job to `to`, enforcing the state machine.
    ///
    /// `updated_at` strictly advances on success.
    ///
    /// # Errors
    ///
    /// [`EngineError::IllegalTransition`] when the transition is not in the
    /// machine; the record is left untouched.
    pub fn transition(&mut self, to: JobStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    /// Records a failure reported while RUNNING and performs the resulting
    /// transition.
    ///
    /// The increment-then-transition order is load-bearing: `attempts` is
    /// bumped and `last_error` set before the target state is chosen, so a
    /// job that exhausts its budget lands in FAILED with
    /// `attempts == max_retries` exactly.
    ///
    /// # Errors
    ///
    /// [`EngineError::IllegalTransition`] when the job is not in a state
    /// that admits a failure transition.
    pub fn record_failure(&mut self, message: &str, kind: FailureKind) -> CoreResult<JobStatus> {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = message.to_string();
        let target = if kind == FailureKind::Fatal || self.attempts >= self.max_retries {
            JobStatus::Failed
        } else {
            JobStatus::Retrying
        };
        self.transition(target)?;
        Ok(target)
    }

    /// Fulfills a cancellation requested while the job was RUNNING.
    ///
    /// Best-effort cancellation lets the execution finish and discards its
    /// outcome, so CANCELLED is reachable from RUNNING only through this
    /// path. The generic transition table excludes it on purpose: nothing
    /// but the cancellation flow may move a running job to CANCELLED.
    ///
    /// # Errors
    ///
    /// [`EngineError::IllegalTransition`] when the job is not RUNNING.
    pub fn fulfill_cancellation(&mut self) -> CoreResult<()> {
        if self.status != JobStatus::Running {
            return Err(EngineError::IllegalTransition {
                from: self.status,
                to: JobStatus::Cancelled,
            });
        }
        self.status = JobStatus::Cancelled;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            // Wall clock did not move between transitions; advance anyway.
            self.updated_at + chrono::Duration::milliseconds(1)
        };
    }
}

/// Builder for submitting a job
#[derive(Debug, Clone)]
pub struct JobSpec {
    job_id: Option<String>,
    priority: i64,
    mode: ExecMode,
    max_retries: u32,
    payload: serde_json::Value,
    timeout: Option<Duration>,
}

impl JobSpec {
    /// Creates a spec around a payload.
    #[must_use]
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            job_id: None,
            priority: 0,
            mode: ExecMode::Thread,
            max_retries: 3,
            payload,
            timeout: None,
        }
    }

    /// Sets an explicit job id; a `job-<uuid>` id is generated otherwise.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    /// Sets the priority (higher runs earlier).
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the retry budget (total attempts, including the first).
    #[must_use]
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Sets a per-job execution deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds a validated job in the CREATED state.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant of the record.
    pub fn build(self) -> Result<Job, ValidationError> {
        let now = Utc::now();
        let job = Job {
            job_id: self
                .job_id
                .unwrap_or_else(|| format!("job-{}", Uuid::new_v4())),
            priority: self.priority,
            mode: self.mode,
            max_retries: self.max_retries,
            payload: self.payload,
            status: JobStatus::Created,
            attempts: 0,
            last_error: String::new(),
            created_at: now,
            updated_at: now,
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
        };
        job.validate()?;
        Ok(job)
    }
}
