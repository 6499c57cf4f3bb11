//! Convenient re-exports for typical engine hosts.
//!
//! ```rust
//! use jobforge::prelude::*;
//! ```

pub use jobforge_core::{
    EngineError, ExecMode, FailureKind, Job, JobResult, JobSpec, JobStatus, Pipeline,
    PipelineRegistry, Record, Stage, StageError,
};
pub use jobforge_engine::{Engine, EngineStats};
pub use jobforge_executor::{ExecOutcome, maybe_run_worker};
pub use jobforge_infrastructure::{
    EngineConfig, FileStore, MemoryStore, MetricsRegistry, ShutdownCoordinator, StateStore,
    init_logging,
};
