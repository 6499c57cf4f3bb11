//! Configuration management

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sleep between empty scheduler polls
    pub poll_interval: Duration,
    /// Worker threads in the shared-memory pool
    pub thread_workers: usize,
    /// Worker processes in the isolated pool
    pub process_workers: usize,
    /// Bounded capacity of each backend queue
    pub queue_capacity: usize,
    /// Wait per aging step
    pub aging_interval: Duration,
    /// Score added per aging step
    pub aging_boost: i64,
    /// Base of the exponential retry backoff
    pub retry_base: Duration,
    /// Default per-job execution deadline; jobs may override
    pub job_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            thread_workers: 4,
            process_workers: 2,
            queue_capacity: 64,
            aging_interval: Duration::from_secs(1),
            aging_boost: 1,
            retry_base: Duration::from_secs(2),
            job_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.aging_interval, Duration::from_secs(1));
        assert_eq!(config.aging_boost, 1);
        assert_eq!(config.retry_base, Duration::from_secs(2));
        assert!(config.job_timeout.is_none());
    }

    #[test]
    fn test_config_round_trip() {
        let config = EngineConfig {
            thread_workers: 8,
            ..EngineConfig::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.thread_workers, 8);
        assert_eq!(back.poll_interval, config.poll_interval);
    }
}
