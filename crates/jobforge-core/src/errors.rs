//! Error types for the job engine domain

use thiserror::Error;

use crate::job::JobStatus;

/// Validation errors for jobs and results
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Job id cannot be empty
    #[error("job id cannot be empty")]
    EmptyJobId,

    /// Retry budget must allow at least one attempt
    #[error("max_retries must be positive, got {value}")]
    InvalidMaxRetries {
        /// The invalid retry budget.
        value: u32,
    },

    /// Payload must be a JSON object
    #[error("payload must be a JSON object")]
    PayloadNotObject,

    /// Payload must carry a `type` field naming a pipeline
    #[error("payload is missing a string 'type' field")]
    MissingPayloadType,

    /// Unrecognized execution mode string
    #[error("invalid execution mode: '{0}'")]
    InvalidMode(String),

    /// A result must carry exactly one of output or error
    #[error("result must carry exactly one of output or error")]
    AmbiguousResult,

    /// A result status must be terminal
    #[error("result status must be COMPLETED or FAILED, got {0}")]
    NonTerminalResult(JobStatus),

    /// Result timestamps are inverted
    #[error("result ended_at precedes started_at")]
    InvertedTimestamps,
}

/// Errors surfaced by the engine and its collaborators
#[derive(Error, Debug)]
pub enum EngineError {
    /// Ill-formed job or result
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// State transition not present in the machine
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition {
        /// State the job was in.
        from: JobStatus,
        /// State the transition asked for.
        to: JobStatus,
    },

    /// A job with this id already exists
    #[error("duplicate job id: '{id}'")]
    DuplicateJob {
        /// The offending id.
        id: String,
    },

    /// Payload `type` did not resolve in the registry
    #[error("unknown pipeline type: '{kind}'")]
    UnknownPipeline {
        /// The unresolved payload type.
        kind: String,
    },

    /// Pipeline cannot cross the process boundary
    #[error("pipeline '{kind}' is not process-safe")]
    Serialization {
        /// The refused payload type.
        kind: String,
    },

    /// A stage or backend reported a failure
    #[error("execution failed: {message}")]
    Execution {
        /// Failure message from the stage or backend.
        message: String,
    },

    /// Execution exceeded the configured deadline
    #[error("timeout")]
    Timeout,

    /// No live job under this id
    #[error("job not found: '{id}'")]
    JobNotFound {
        /// The unknown id.
        id: String,
    },

    /// Results are write-once
    #[error("result already recorded for job '{id}'")]
    ResultExists {
        /// The job whose result already exists.
        id: String,
    },

    /// Durable storage failure
    #[error("store error: {0}")]
    Store(String),

    /// Backend refused work after shutdown
    #[error("backend halted")]
    Halted,
}

impl EngineError {
    /// Classifies this error for the retry policy.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Execution { .. } | Self::Timeout | Self::Store(_) | Self::Halted => {
                FailureKind::Transient
            }
            _ => FailureKind::Fatal,
        }
    }
}

/// Retry classification for execution failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Eligible for retry while attempts remain
    Transient,
    /// Bypasses the retry budget and terminates the job
    Fatal,
}

impl FailureKind {
    /// Returns true if the retry policy may re-queue the job.
    #[must_use]
    pub fn should_retry(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Core result type
pub type CoreResult<T = ()> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_classification() {
        let err = EngineError::Execution {
            message: "boom".to_string(),
        };
        assert_eq!(err.failure_kind(), FailureKind::Transient);
        assert!(err.failure_kind().should_retry());

        let err = EngineError::UnknownPipeline {
            kind: "nope".to_string(),
        };
        assert_eq!(err.failure_kind(), FailureKind::Fatal);
        assert!(!err.failure_kind().should_retry());
    }

    #[test]
    fn test_timeout_is_transient() {
        assert_eq!(EngineError::Timeout.failure_kind(), FailureKind::Transient);
    }

    #[test]
    fn test_serialization_is_fatal() {
        let err = EngineError::Serialization {
            kind: "local-only".to_string(),
        };
        assert_eq!(err.failure_kind(), FailureKind::Fatal);
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::DuplicateJob {
            id: "job-1".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate job id: 'job-1'");
    }
}
