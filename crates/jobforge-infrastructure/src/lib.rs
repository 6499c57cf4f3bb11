//! # Jobforge Infrastructure
//!
//! Ambient services for the Jobforge engine: durable state persistence,
//! metrics aggregation, shutdown coordination, configuration, and logging
//! setup.
//!
//! ## Architecture
//!
//! - `store`: keyed durable persistence of jobs and results
//! - `metrics`: concurrent counter/timing registry
//! - `shutdown`: one-shot broadcast signal with LIFO cleanups
//! - `config`: engine configuration
//! - `logging`: tracing initialization

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod logging;
pub mod metrics;
pub mod shutdown;
pub mod store;

pub use config::EngineConfig;
pub use logging::init_logging;
pub use metrics::{MetricsRegistry, MetricsSnapshot, Timer, TimingStats};
pub use shutdown::ShutdownCoordinator;
pub use store::{FileStore, MemoryStore, StateStore, StoreError, StoreResult};
