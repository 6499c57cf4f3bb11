//! # Jobforge Engine
//!
//! The scheduling and orchestration core of Jobforge: a fairness-aware
//! priority scheduler, the retry backoff policy, and the engine loop that
//! ties scheduling, execution, persistence, metrics, and shutdown together
//! under concurrent submission.
//!
//! ## Architecture
//!
//! - `scheduler`: priority queue with aging and a monotonic FIFO tiebreak
//! - `retry`: exponential backoff for transient failures
//! - `engine`: submission intake, main loop, finalization, shutdown
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use jobforge_core::JobSpec;
//! use jobforge_core::pipeline::{Pipeline, PipelineRegistry};
//! use jobforge_engine::Engine;
//! use jobforge_infrastructure::{EngineConfig, MemoryStore};
//!
//! let registry = PipelineRegistry::new();
//! registry.register("echo", || Pipeline::new("echo").map("echo", Ok));
//!
//! let engine = Arc::new(Engine::new(
//!     EngineConfig::default(),
//!     Arc::new(registry),
//!     Arc::new(MemoryStore::new()),
//! ));
//! let loop_handle = Arc::clone(&engine).spawn();
//!
//! engine
//!     .submit(JobSpec::new(serde_json::json!({"type": "echo"})))
//!     .unwrap();
//!
//! engine.shutdown();
//! loop_handle.join().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod retry;
pub mod scheduler;

pub use engine::{Engine, EngineStats};
pub use retry::RetryPolicy;
pub use scheduler::{AgingPolicy, Scheduler};
