//! Terminal result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::job::JobStatus;

/// The terminal record of a job's execution, immutable once written.
///
/// Carries an `output` value for success xor an `error` string for failure;
/// the constructors are the only way to build a well-formed record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Job this result belongs to
    pub job_id: String,
    /// COMPLETED or FAILED
    pub status: JobStatus,
    /// Success value, absent for failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Failure message, empty for successes
    #[serde(default)]
    pub error: String,
    /// When the final execution attempt began
    pub started_at: DateTime<Utc>,
    /// When the final execution attempt ended
    pub ended_at: DateTime<Utc>,
}

impl JobResult {
    /// Builds a COMPLETED result.
    ///
    /// # Errors
    ///
    /// [`ValidationError::InvertedTimestamps`] when `ended_at` precedes
    /// `started_at`.
    pub fn completed(
        job_id: impl Into<String>,
        output: serde_json::Value,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let result = Self {
            job_id: job_id.into(),
            status: JobStatus::Completed,
            output: Some(output),
            error: String::new(),
            started_at,
            ended_at,
        };
        result.validate()?;
        Ok(result)
    }

    /// Builds a FAILED result.
    ///
    /// # Errors
    ///
    /// [`ValidationError::AmbiguousResult`] when `error` is empty,
    /// [`ValidationError::InvertedTimestamps`] when the timestamps are
    /// inverted.
    pub fn failed(
        job_id: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let result = Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            output: None,
            error: error.into(),
            started_at,
            ended_at,
        };
        result.validate()?;
        Ok(result)
    }

    /// Checks the record invariants; also applied to records read back from
    /// storage.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.status {
            JobStatus::Completed => {
                if self.output.is_none() || !self.error.is_empty() {
                    return Err(ValidationError::AmbiguousResult);
                }
            }
            JobStatus::Failed => {
                if self.output.is_some() || self.error.is_empty() {
                    return Err(ValidationError::AmbiguousResult);
                }
            }
            other => return Err(ValidationError::NonTerminalResult(other)),
        }
        if self.ended_at < self.started_at {
            return Err(ValidationError::InvertedTimestamps);
        }
        Ok(())
    }

    /// Returns true for a COMPLETED result.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_completed_result() {
        let now = Utc::now();
        let result = JobResult::completed("job-1", json!(42), now, now).unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, Some(json!(42)));
        assert_eq!(result.error, "");
    }

    #[test]
    fn test_failed_result() {
        let now = Utc::now();
        let result = JobResult::failed("job-1", "boom", now, now + Duration::seconds(1)).unwrap();
        assert!(!result.is_success());
        assert_eq!(result.error, "boom");
        assert!(result.output.is_none());
    }

    #[test]
    fn test_failed_requires_error_text() {
        let now = Utc::now();
        let err = JobResult::failed("job-1", "", now, now).unwrap_err();
        assert_eq!(err, ValidationError::AmbiguousResult);
    }

    #[test]
    fn test_inverted_timestamps_rejected() {
        let now = Utc::now();
        let err = JobResult::completed("job-1", json!(1), now, now - Duration::seconds(1))
            .unwrap_err();
        assert_eq!(err, ValidationError::InvertedTimestamps);
    }

    #[test]
    fn test_validate_rejects_non_terminal() {
        let now = Utc::now();
        let mut result = JobResult::completed("job-1", json!(1), now, now).unwrap();
        result.status = JobStatus::Running;
        assert_eq!(
            result.validate().unwrap_err(),
            ValidationError::NonTerminalResult(JobStatus::Running)
        );
    }

    #[test]
    fn test_result_serde_round_trip() {
        let now = Utc::now();
        let result = JobResult::failed("job-1", "boom", now, now).unwrap();
        let text = serde_json::to_string(&result).unwrap();
        let back: JobResult = serde_json::from_str(&text).unwrap();
        back.validate().unwrap();
        assert_eq!(back.job_id, "job-1");
        assert_eq!(back.error, "boom");
        assert_eq!(back.started_at, result.started_at);
    }
}
