//! Isolated worker pool.
//!
//! Work crosses a process boundary: each pool worker owns a child process
//! (a re-exec of the current executable with [`WORKER_ENV`] set) and speaks
//! a JSON-line request/response protocol over the child's stdin/stdout.
//! Pipelines are re-resolved inside the child from the process-wide
//! registry, which is why only process-safe registrations may be routed
//! here. A stage that panics takes down its child, not the engine; the
//! parent reports a transient failure and respawns the worker.
//!
//! Hosts that use this backend must call [`maybe_run_worker`] at the top of
//! `main`, before anything else runs in the child.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

use jobforge_core::pipeline::{self, PipelineRegistry};
use jobforge_core::Record;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{Backend, ExecOutcome, ExecutorError, OutcomeSender, Task, TaskHandle};

/// Environment marker that turns a re-exec'd child into a pool worker.
pub const WORKER_ENV: &str = "JOBFORGE_PROCESS_WORKER";

/// Process pool configuration
#[derive(Debug, Clone)]
pub struct ProcessPoolConfig {
    /// Number of worker processes
    pub workers: usize,
    /// Bounded queue capacity; `submit` blocks when full
    pub queue_capacity: usize,
    /// Timed dequeue interval, bounds shutdown responsiveness
    pub dequeue_timeout: Duration,
    /// Best-effort drain window before children are killed
    pub drain_timeout: Duration,
}

impl Default for ProcessPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
            dequeue_timeout: Duration::from_millis(500),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

/// One unit of work on the wire, parent to child.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireRequest {
    /// Job identity, echoed back in the response
    pub job_id: String,
    /// Payload type; the child re-resolves the pipeline from it
    pub kind: String,
    /// Initial pipeline record
    pub payload: Record,
}

/// Execution outcome on the wire, child to parent.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireResponse {
    /// Job identity
    pub job_id: String,
    /// Final record on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Record>,
    /// Failure on error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Classified failure on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireError {
    /// Failure message
    pub message: String,
    /// Fatal failures bypass the retry budget
    pub fatal: bool,
}

impl From<WireResponse> for ExecOutcome {
    fn from(response: WireResponse) -> Self {
        match (response.output, response.error) {
            (Some(output), None) => Self::Success(output),
            (_, Some(e)) if e.fatal => Self::fatal(e.message),
            (_, Some(e)) => Self::transient(e.message),
            (None, None) => Self::transient("malformed worker response"),
        }
    }
}

/// Serves the worker side of the protocol until the reader closes.
///
/// Exposed separately from [`maybe_run_worker`] so the protocol can be
/// exercised over in-memory pipes.
///
/// # Errors
///
/// I/O errors reading requests or writing responses.
pub fn serve<R: BufRead, W: Write>(
    registry: &PipelineRegistry,
    reader: R,
    mut writer: W,
) -> io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<WireRequest>(&line) {
            Ok(request) => handle_request(registry, request),
            Err(e) => WireResponse {
                job_id: String::new(),
                output: None,
                error: Some(WireError {
                    message: format!("malformed work request: {e}"),
                    fatal: true,
                }),
            },
        };
        serde_json::to_writer(&mut writer, &response)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    Ok(())
}

fn handle_request(registry: &PipelineRegistry, request: WireRequest) -> WireResponse {
    let (output, error) = match registry.build(&request.kind) {
        None => (
            None,
            Some(WireError {
                message: format!("unknown pipeline type: '{}'", request.kind),
                fatal: true,
            }),
        ),
        Some(p) => match p.run(request.payload) {
            Ok(record) => (Some(record), None),
            Err(e) => (
                None,
                Some(WireError {
                    message: e.message,
                    fatal: e.fatal,
                }),
            ),
        },
    };
    WireResponse {
        job_id: request.job_id,
        output,
        error,
    }
}

/// Turns this process into a pool worker when [`WORKER_ENV`] is set.
///
/// Hosts embedding the isolated backend call this at the top of `main`;
/// in the parent process it is a no-op, in a re-exec'd child it serves the
/// protocol against the process-wide registry and exits.
pub fn maybe_run_worker() {
    if std::env::var_os(WORKER_ENV).is_none() {
        return;
    }
    let stdin = io::stdin();
    let stdout = io::stdout();
    let code = match serve(pipeline::global(), stdin.lock(), stdout.lock()) {
        Ok(()) => 0,
        Err(e) => {
            error!("process worker terminating: {e}");
            1
        }
    };
    std::process::exit(code);
}

struct WorkerChild {
    child: Arc<Mutex<Child>>,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

fn spawn_child() -> io::Result<WorkerChild> {
    let exe = std::env::current_exe()?;
    let mut child = Command::new(exe)
        .env(WORKER_ENV, "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("child stdin unavailable"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout unavailable"))?;
    debug!(pid = child.id(), "spawned process worker");
    Ok(WorkerChild {
        child: Arc::new(Mutex::new(child)),
        stdin,
        stdout: BufReader::new(stdout),
    })
}

struct ProcItem {
    request: WireRequest,
    timeout: Option<Duration>,
    reply: OutcomeSender,
}

/// Isolated worker pool
pub struct ProcessPool {
    tx: Mutex<Option<SyncSender<ProcItem>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    abandon: Arc<AtomicBool>,
}

impl ProcessPool {
    /// Starts the pool.
    ///
    /// Children are spawned on first dispatch and kept alive afterwards, so
    /// constructing a pool that never sees process-mode work costs nothing.
    #[must_use]
    pub fn start(config: &ProcessPoolConfig) -> Self {
        let (tx, rx) = mpsc::sync_channel::<ProcItem>(config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let shutdown = Arc::new(AtomicBool::new(false));
        let abandon = Arc::new(AtomicBool::new(false));

        let workers = (0..config.workers.max(1))
            .map(|i| {
                let rx = Arc::clone(&rx);
                let shutdown = Arc::clone(&shutdown);
                let abandon = Arc::clone(&abandon);
                let config = config.clone();
                thread::Builder::new()
                    .name(format!("jobforge-process-{i}"))
                    .spawn(move || {
                        let mut worker = PoolWorker {
                            id: i,
                            child: None,
                            config,
                        };
                        worker.run(&rx, &shutdown, &abandon);
                    })
                    .expect("spawning a pool thread")
            })
            .collect();

        info!(workers = config.workers, "process pool started");
        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            shutdown,
            abandon,
        }
    }
}

struct PoolWorker {
    id: usize,
    child: Option<WorkerChild>,
    config: ProcessPoolConfig,
}

impl PoolWorker {
    fn run(&mut self, rx: &Mutex<Receiver<ProcItem>>, shutdown: &AtomicBool, abandon: &AtomicBool) {
        debug!(worker = self.id, "process worker starting");
        loop {
            if abandon.load(Ordering::SeqCst) {
                break;
            }
            let item = {
                let rx = rx.lock();
                rx.recv_timeout(self.config.dequeue_timeout)
            };
            match item {
                Ok(item) => {
                    let outcome = self.dispatch(&item);
                    let _ = item.reply.send(outcome);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.retire(abandon.load(Ordering::SeqCst));
        debug!(worker = self.id, "process worker stopping");
    }

    fn dispatch(&mut self, item: &ProcItem) -> ExecOutcome {
        if self.child.is_none() {
            match spawn_child() {
                Ok(child) => self.child = Some(child),
                Err(e) => {
                    warn!(worker = self.id, "spawn failed: {e}");
                    return ExecOutcome::transient(format!("failed to spawn worker process: {e}"));
                }
            }
        }
        let worker = self.child.as_mut().expect("child just spawned");

        let request = match serde_json::to_string(&item.request) {
            Ok(line) => line,
            Err(e) => return ExecOutcome::fatal(format!("unserializable payload: {e}")),
        };
        if let Err(e) = worker
            .stdin
            .write_all(request.as_bytes())
            .and_then(|()| worker.stdin.write_all(b"\n"))
            .and_then(|()| worker.stdin.flush())
        {
            warn!(worker = self.id, "child write failed: {e}");
            self.child = None;
            return ExecOutcome::transient("worker process exited");
        }

        // Watchdog: a child that blows its deadline is killed, which turns
        // the pending read below into EOF.
        let timed_out = Arc::new(AtomicBool::new(false));
        let done_tx = item.timeout.map(|deadline| {
            let (done_tx, done_rx) = mpsc::channel::<()>();
            let child = Arc::clone(&worker.child);
            let timed_out = Arc::clone(&timed_out);
            thread::spawn(move || {
                if matches!(done_rx.recv_timeout(deadline), Err(RecvTimeoutError::Timeout)) {
                    timed_out.store(true, Ordering::SeqCst);
                    let _ = child.lock().kill();
                }
            });
            done_tx
        });

        let mut line = String::new();
        let read = worker.stdout.read_line(&mut line);
        if let Some(done_tx) = done_tx {
            let _ = done_tx.send(());
        }

        match read {
            Ok(0) | Err(_) => {
                self.child = None;
                if timed_out.load(Ordering::SeqCst) {
                    ExecOutcome::transient("timeout")
                } else {
                    ExecOutcome::transient("worker process exited")
                }
            }
            Ok(_) => match serde_json::from_str::<WireResponse>(&line) {
                Ok(response) => response.into(),
                Err(e) => {
                    self.child = None;
                    ExecOutcome::transient(format!("malformed worker response: {e}"))
                }
            },
        }
    }

    /// Closes the child: EOF on stdin, a bounded wait, then a kill.
    fn retire(&mut self, force: bool) {
        let Some(worker) = self.child.take() else {
            return;
        };
        drop(worker.stdin);
        let mut child = worker.child.lock();
        if !force {
            let deadline = std::time::Instant::now() + self.config.drain_timeout;
            while std::time::Instant::now() < deadline {
                match child.try_wait() {
                    Ok(Some(_)) => return,
                    Ok(None) => thread::sleep(Duration::from_millis(50)),
                    Err(_) => break,
                }
            }
        }
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Backend for ProcessPool {
    fn name(&self) -> &'static str {
        "process"
    }

    fn submit(&self, task: Task) -> Result<TaskHandle, ExecutorError> {
        let (reply, handle) = TaskHandle::channel();
        let item = ProcItem {
            request: WireRequest {
                job_id: task.job_id,
                kind: task.kind,
                payload: task.payload,
            },
            timeout: task.timeout,
            reply,
        };
        let tx = self.tx.lock();
        match tx.as_ref() {
            Some(tx) => tx.send(item).map_err(|_| ExecutorError::Halted)?,
            None => return Err(ExecutorError::Halted),
        }
        Ok(handle)
    }

    fn shutdown(&self, drain: bool) {
        info!(drain, "process pool shutting down");
        self.shutdown.store(true, Ordering::SeqCst);
        if !drain {
            self.abandon.store(true, Ordering::SeqCst);
        }
        self.tx.lock().take();

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                warn!("process pool worker panicked during shutdown");
            }
        }
        info!("process pool stopped");
    }

    fn is_halted(&self) -> bool {
        self.tx.lock().is_none() && self.workers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use jobforge_core::Pipeline;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn registry() -> PipelineRegistry {
        let registry = PipelineRegistry::new();
        registry.register("double", || {
            Pipeline::new("double").map("double", |r| Ok(json!(r.as_i64().unwrap() * 2)))
        });
        registry
    }

    fn roundtrip(registry: &PipelineRegistry, lines: &str) -> Vec<WireResponse> {
        let mut out = Vec::new();
        serve(registry, Cursor::new(lines.to_string()), &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_serve_executes_registered_pipeline() {
        let request = serde_json::to_string(&WireRequest {
            job_id: "job-1".to_string(),
            kind: "double".to_string(),
            payload: json!(21),
        })
        .unwrap();

        let responses = roundtrip(&registry(), &format!("{request}\n"));
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].job_id, "job-1");
        assert_eq!(responses[0].output, Some(json!(42)));
        assert!(responses[0].error.is_none());
    }

    #[test]
    fn test_serve_unknown_kind_is_fatal() {
        let request = serde_json::to_string(&WireRequest {
            job_id: "job-1".to_string(),
            kind: "nonexistent".to_string(),
            payload: json!({}),
        })
        .unwrap();

        let responses = roundtrip(&registry(), &format!("{request}\n"));
        let error = responses[0].error.as_ref().unwrap();
        assert!(error.fatal);
        assert!(error.message.contains("unknown pipeline type"));
    }

    #[test]
    fn test_serve_malformed_request() {
        let responses = roundtrip(&registry(), "{not json}\n");
        let error = responses[0].error.as_ref().unwrap();
        assert!(error.fatal);
        assert!(error.message.contains("malformed"));
    }

    #[test]
    fn test_serve_handles_multiple_requests() {
        let lines: String = (0..3)
            .map(|i| {
                serde_json::to_string(&WireRequest {
                    job_id: format!("job-{i}"),
                    kind: "double".to_string(),
                    payload: json!(i),
                })
                .unwrap()
                    + "\n"
            })
            .collect();

        let responses = roundtrip(&registry(), &lines);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[2].output, Some(json!(4)));
    }

    #[test]
    fn test_wire_response_to_outcome() {
        let success = WireResponse {
            job_id: "j".to_string(),
            output: Some(json!(1)),
            error: None,
        };
        assert_eq!(ExecOutcome::from(success), ExecOutcome::Success(json!(1)));

        let failed = WireResponse {
            job_id: "j".to_string(),
            output: None,
            error: Some(WireError {
                message: "boom".to_string(),
                fatal: false,
            }),
        };
        assert_eq!(ExecOutcome::from(failed), ExecOutcome::transient("boom"));
    }

    // Spawning real children re-execs the test harness, so pool tests stop
    // at the lifecycle boundary that does not dispatch work.
    #[test]
    fn test_pool_lifecycle_without_dispatch() {
        let pool = ProcessPool::start(&ProcessPoolConfig {
            workers: 2,
            dequeue_timeout: Duration::from_millis(50),
            ..ProcessPoolConfig::default()
        });
        assert!(!pool.is_halted());
        pool.shutdown(true);
        assert!(pool.is_halted());

        let err = pool
            .submit(Task {
                job_id: "late".to_string(),
                kind: "double".to_string(),
                payload: json!(1),
                pipeline: None,
                timeout: None,
            })
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Halted));
    }
}
