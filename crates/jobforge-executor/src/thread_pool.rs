//! Shared-memory worker pool.
//!
//! A fixed set of long-lived OS threads pulls work from a bounded queue.
//! Workers use a timed dequeue so the shutdown flag is observed within one
//! interval, and the bounded queue blocks `submit` when full, which is the
//! backpressure point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{Backend, ExecutorError, OutcomeSender, Task, TaskHandle, run_pipeline};

/// Thread pool configuration
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Bounded queue capacity; `submit` blocks when full
    pub queue_capacity: usize,
    /// Timed dequeue interval, bounds shutdown responsiveness
    pub dequeue_timeout: Duration,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            dequeue_timeout: Duration::from_millis(500),
        }
    }
}

struct WorkItem {
    job_id: String,
    pipeline: jobforge_core::Pipeline,
    payload: jobforge_core::Record,
    reply: OutcomeSender,
}

/// Shared-memory worker pool
pub struct ThreadPool {
    tx: Mutex<Option<SyncSender<WorkItem>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    abandon: Arc<AtomicBool>,
}

impl ThreadPool {
    /// Starts the pool with `config.workers` threads.
    #[must_use]
    pub fn start(config: &ThreadPoolConfig) -> Self {
        let (tx, rx) = mpsc::sync_channel::<WorkItem>(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let shutdown = Arc::new(AtomicBool::new(false));
        let abandon = Arc::new(AtomicBool::new(false));

        let workers = (0..config.workers.max(1))
            .map(|i| {
                let rx = Arc::clone(&rx);
                let shutdown = Arc::clone(&shutdown);
                let abandon = Arc::clone(&abandon);
                let dequeue_timeout = config.dequeue_timeout;
                thread::Builder::new()
                    .name(format!("jobforge-thread-{i}"))
                    .spawn(move || worker_loop(i, &rx, &shutdown, &abandon, dequeue_timeout))
                    .expect("spawning a pool thread")
            })
            .collect();

        info!(workers = config.workers, "thread pool started");
        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            shutdown,
            abandon,
        }
    }
}

fn worker_loop(
    id: usize,
    rx: &Mutex<Receiver<WorkItem>>,
    shutdown: &AtomicBool,
    abandon: &AtomicBool,
    dequeue_timeout: Duration,
) {
    debug!(worker = id, "thread worker starting");
    loop {
        if abandon.load(Ordering::SeqCst) {
            break;
        }
        let item = {
            let rx = rx.lock();
            rx.recv_timeout(dequeue_timeout)
        };
        match item {
            Ok(item) => {
                debug!(worker = id, job_id = %item.job_id, "executing");
                let outcome = run_pipeline(&item.pipeline, item.payload);
                // The waiter may have timed out and dropped the handle.
                let _ = item.reply.send(outcome);
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }
            // Queue closed and drained.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = id, "thread worker stopping");
}

impl Backend for ThreadPool {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn submit(&self, task: Task) -> Result<TaskHandle, ExecutorError> {
        let Some(pipeline) = task.pipeline else {
            return Err(ExecutorError::Spawn(
                "thread backend requires a built pipeline".to_string(),
            ));
        };
        let (reply, handle) = TaskHandle::channel();
        let item = WorkItem {
            job_id: task.job_id,
            pipeline,
            payload: task.payload,
            reply,
        };
        let tx = self.tx.lock();
        match tx.as_ref() {
            // send blocks while the queue is at capacity
            Some(tx) => tx.send(item).map_err(|_| ExecutorError::Halted)?,
            None => return Err(ExecutorError::Halted),
        }
        Ok(handle)
    }

    fn shutdown(&self, drain: bool) {
        info!(drain, "thread pool shutting down");
        self.shutdown.store(true, Ordering::SeqCst);
        if !drain {
            self.abandon.store(true, Ordering::SeqCst);
        }
        // Closing the channel lets draining workers run the queue dry.
        self.tx.lock().take();

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                warn!("thread worker panicked during shutdown");
            }
        }
        info!("thread pool stopped");
    }

    fn is_halted(&self) -> bool {
        self.tx.lock().is_none() && self.workers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use jobforge_core::{Pipeline, StageError};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::ExecOutcome;

    fn task(id: &str, pipeline: Pipeline, payload: serde_json::Value) -> Task {
        Task {
            job_id: id.to_string(),
            kind: "demo".to_string(),
            payload,
            pipeline: Some(pipeline),
            timeout: None,
        }
    }

    fn doubling() -> Pipeline {
        Pipeline::new("double").map("double", |r| Ok(json!(r.as_i64().unwrap() * 2)))
    }

    #[test]
    fn test_submit_and_wait() {
        let pool = ThreadPool::start(&ThreadPoolConfig::default());
        let handle = pool.submit(task("job-1", doubling(), json!(21))).unwrap();
        assert_eq!(handle.wait(), ExecOutcome::Success(json!(42)));
        pool.shutdown(true);
    }

    #[test]
    fn test_failure_outcome() {
        let pool = ThreadPool::start(&ThreadPoolConfig::default());
        let pipeline = Pipeline::new("boom").map("boom", |_| Err(StageError::transient("boom")));
        let handle = pool.submit(task("job-1", pipeline, json!(1))).unwrap();
        assert_eq!(handle.wait(), ExecOutcome::transient("boom"));
        pool.shutdown(true);
    }

    #[test]
    fn test_drain_shutdown_finishes_queued_work() {
        let config = ThreadPoolConfig {
            workers: 1,
            ..ThreadPoolConfig::default()
        };
        let pool = ThreadPool::start(&config);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                pool.submit(task(&format!("job-{i}"), doubling(), json!(i)))
                    .unwrap()
            })
            .collect();
        pool.shutdown(true);
        assert!(pool.is_halted());

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.wait(), ExecOutcome::Success(json!(i as i64 * 2)));
        }
    }

    #[test]
    fn test_submit_after_shutdown_is_refused() {
        let pool = ThreadPool::start(&ThreadPoolConfig::default());
        pool.shutdown(true);
        let err = pool.submit(task("late", doubling(), json!(1))).unwrap_err();
        assert!(matches!(err, ExecutorError::Halted));
    }

    #[test]
    fn test_shutdown_observed_within_dequeue_interval() {
        let config = ThreadPoolConfig {
            workers: 2,
            dequeue_timeout: Duration::from_millis(50),
            ..ThreadPoolConfig::default()
        };
        let pool = ThreadPool::start(&config);
        let start = Instant::now();
        pool.shutdown(false);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(pool.is_halted());
    }
}
