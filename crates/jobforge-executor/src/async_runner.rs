//! Cooperative task runner.
//!
//! One driver thread hosts a current-thread tokio runtime and a `LocalSet`
//! of logical tasks. Tasks are admitted in submission order (FIFO) and
//! yield once before running so a cancellation signalled in the meantime is
//! observed without doing the work. From the outside the runner presents the same
//! contract as the parallel pools; suspension of one task never suspends
//! the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{Backend, ExecOutcome, ExecutorError, OutcomeSender, Task, TaskHandle, run_pipeline};

/// Cooperative runner configuration
#[derive(Debug, Clone)]
pub struct AsyncRunnerConfig {
    /// Bounded admission queue capacity; `submit` blocks when full
    pub queue_capacity: usize,
}

impl Default for AsyncRunnerConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

struct AsyncItem {
    job_id: String,
    pipeline: jobforge_core::Pipeline,
    payload: jobforge_core::Record,
    reply: OutcomeSender,
}

/// Cooperative single-thread task runner
pub struct AsyncRunner {
    tx: Mutex<Option<mpsc::Sender<AsyncItem>>>,
    driver: Mutex<Option<thread::JoinHandle<()>>>,
    cancelled: Arc<AtomicBool>,
}

impl AsyncRunner {
    /// Starts the driver thread.
    #[must_use]
    pub fn start(config: &AsyncRunnerConfig) -> Self {
        let (tx, rx) = mpsc::channel::<AsyncItem>(config.queue_capacity.max(1));
        let cancelled = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&cancelled);
        let driver = thread::Builder::new()
            .name("jobforge-async".to_string())
            .spawn(move || drive(rx, &flag))
            .expect("spawning the async driver thread");

        info!("async runner started");
        Self {
            tx: Mutex::new(Some(tx)),
            driver: Mutex::new(Some(driver)),
            cancelled,
        }
    }
}

fn drive(mut rx: mpsc::Receiver<AsyncItem>, cancelled: &Arc<AtomicBool>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            warn!("async driver failed to build its runtime: {e}");
            return;
        }
    };
    let local = tokio::task::LocalSet::new();

    // Admission loop: spawn in arrival order, then let the set drain.
    runtime.block_on(local.run_until(async {
        while let Some(item) = rx.recv().await {
            let cancelled = Arc::clone(cancelled);
            tokio::task::spawn_local(async move {
                // One cooperative step before the work, so shutdown
                // signalled after admission is still observed.
                tokio::task::yield_now().await;
                if cancelled.load(Ordering::SeqCst) {
                    debug!(job_id = %item.job_id, "task cancelled before start");
                    let _ = item.reply.send(ExecOutcome::Cancelled);
                    return;
                }
                let outcome = run_pipeline(&item.pipeline, item.payload);
                let _ = item.reply.send(outcome);
            });
        }
    }));
    runtime.block_on(local);
    debug!("async driver stopping");
}

impl Backend for AsyncRunner {
    fn name(&self) -> &'static str {
        "async"
    }

    fn submit(&self, task: Task) -> Result<TaskHandle, ExecutorError> {
        let Some(pipeline) = task.pipeline else {
            return Err(ExecutorError::Spawn(
                "async backend requires a built pipeline".to_string(),
            ));
        };
        let (reply, handle) = TaskHandle::channel();
        let item = AsyncItem {
            job_id: task.job_id,
            pipeline,
            payload: task.payload,
            reply,
        };
        let tx = self.tx.lock();
        match tx.as_ref() {
            Some(tx) => tx.blocking_send(item).map_err(|_| ExecutorError::Halted)?,
            None => return Err(ExecutorError::Halted),
        }
        Ok(handle)
    }

    fn shutdown(&self, drain: bool) {
        info!(drain, "async runner shutting down");
        if !drain {
            // Admitted-but-unstarted tasks observe this at their first step.
            self.cancelled.store(true, Ordering::SeqCst);
        }
        self.tx.lock().take();

        if let Some(driver) = self.driver.lock().take()
            && driver.join().is_err()
        {
            warn!("async driver panicked during shutdown");
        }
        info!("async runner stopped");
    }

    fn is_halted(&self) -> bool {
        self.tx.lock().is_none() && self.driver.lock().is_none()
    }
}
