//! # Jobforge - A Concurrent Job Execution Engine
//!
//! Jobforge is a single-node engine for concurrent job execution: jobs are
//! ordered by a fairness-aware priority policy, dispatched to one of three
//! execution backends (shared-memory thread pool, isolated process pool, or
//! cooperative task runner), run through staged processing pipelines,
//! retried on transient failure with bounded attempts, and persisted to
//! durable storage for crash survivability.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use jobforge::prelude::*;
//!
//! // Pipelines are registered by payload type.
//! let registry = PipelineRegistry::new();
//! registry.register("greet", || {
//!     Pipeline::new("greet").map("greet", |record| {
//!         Ok(serde_json::json!(format!("hello, {}", record["who"])))
//!     })
//! });
//!
//! let engine = Arc::new(Engine::new(
//!     EngineConfig::default(),
//!     Arc::new(registry),
//!     Arc::new(MemoryStore::new()),
//! ));
//! let loop_handle = Arc::clone(&engine).spawn();
//!
//! engine
//!     .submit(
//!         JobSpec::new(serde_json::json!({"type": "greet", "who": "world"}))
//!             .with_priority(5),
//!     )
//!     .unwrap();
//!
//! engine.shutdown();
//! loop_handle.join().unwrap();
//! ```
//!
//! ## Features
//!
//! - **Fairness-aware scheduling**: priority ordering with aging, so queued
//!   work never starves
//! - **Three execution backends**: `thread`, `process`, and `async` modes
//!   behind one contract
//! - **Strict job lifecycle**: a validated state machine with exact retry
//!   accounting
//! - **Crash survivability**: every transition persisted before it is
//!   considered committed
//! - **Graceful shutdown**: in-flight work finishes, cleanups unwind LIFO
//!
//! ## License
//!
//! Licensed under either of
//! - Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <https://www.apache.org/licenses/LICENSE-2.0>)
//! - MIT license ([LICENSE-MIT](LICENSE-MIT) or <https://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use jobforge_core::{
    EngineError, ExecMode, FailureKind, Job, JobResult, JobSpec, JobStatus, MapStage, Pipeline,
    PipelineFactory, PipelineRegistry, Record, Stage, StageError, ValidationError,
};
pub use jobforge_engine::{AgingPolicy, Engine, EngineStats, RetryPolicy, Scheduler};
pub use jobforge_executor::{Backend, ExecOutcome, ExecutionRouter, TaskHandle, maybe_run_worker};
pub use jobforge_infrastructure::{
    EngineConfig, FileStore, MemoryStore, MetricsRegistry, MetricsSnapshot, ShutdownCoordinator,
    StateStore, init_logging,
};

/// Version of the jobforge crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
