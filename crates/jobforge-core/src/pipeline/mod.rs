//! Staged processing pipelines.
//!
//! A pipeline is an ordered list of stages. Each stage is a lazy transformer
//! from an input sequence of records to an output sequence; execution feeds
//! the payload as a one-element sequence into the first stage and chains
//! outputs into subsequent stages. Evaluation is demand-driven, so memory is
//! bounded by one in-flight record per stage plus any buffering a stage
//! chooses. The last emitted record is the pipeline's output.

mod registry;

pub use registry::{PipelineFactory, PipelineRegistry, global};

use std::sync::Arc;

use thiserror::Error;

/// A record flowing through a pipeline
pub type Record = serde_json::Value;

/// Lazy sequence of records, fallible per element
pub type RecordStream = Box<dyn Iterator<Item = Result<Record, StageError>> + Send>;

/// Structured failure raised by a stage
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StageError {
    /// Failure message recorded in the job and result
    pub message: String,
    /// Fatal failures bypass the retry budget
    pub fatal: bool,
}

impl StageError {
    /// A failure eligible for retry under the retry budget.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    /// A failure that terminates the job immediately.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// A lazy transformer from an input sequence to an output sequence
pub trait Stage: Send + Sync {
    /// Stage name, used in logs and failure messages.
    fn name(&self) -> &str;

    /// Consumes the input sequence and produces the output sequence.
    fn apply(&self, input: RecordStream) -> RecordStream;
}

/// Stage built from a per-record mapping function.
///
/// Covers the common one-in-one-out case; stages that expand or filter
/// records implement [`Stage`] directly.
pub struct MapStage {
    name: String,
    f: Arc<dyn Fn(Record) -> Result<Record, StageError> + Send + Sync>,
}

impl MapStage {
    /// Creates a stage applying `f` to every record.
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(Record) -> Result<Record, StageError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

impl Stage for MapStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, input: RecordStream) -> RecordStream {
        let f = Arc::clone(&self.f);
        Box::new(input.map(move |item| item.and_then(|record| f(record))))
    }
}

impl std::fmt::Debug for MapStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapStage").field("name", &self.name).finish()
    }
}

/// An ordered sequence of stages
#[derive(Clone, Default)]
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Creates an empty pipeline; with no stages, the payload passes through.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Appends a per-record mapping stage.
    #[must_use]
    pub fn map(self, name: impl Into<String>, f: impl Fn(Record) -> Result<Record, StageError> + Send + Sync + 'static) -> Self {
        self.stage(MapStage::new(name, f))
    }

    /// Pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Runs the payload through the stage chain and returns the last
    /// emitted record.
    ///
    /// # Errors
    ///
    /// The first `Err` element encountered while draining the final stage;
    /// a pipeline that emits no records at all fails fatally, since retrying
    /// it cannot help.
    pub fn run(&self, payload: Record) -> Result<Record, StageError> {
        let mut stream: RecordStream = Box::new(std::iter::once(Ok(payload)));
        for stage in &self.stages {
            stream = stage.apply(stream);
        }

        let mut last = None;
        for item in stream {
            last = Some(item?);
        }
        last.ok_or_else(|| StageError::fatal(format!("pipeline '{}' produced no output", self.name)))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stages.len())
            .finish()
    }
}
