//! Pipeline registry.
//!
//! Maps a payload `type` string to a pipeline factory. Lookup is O(1).
//! Duplicate registration replaces the previous entry silently, matching the
//! behavior documented in DESIGN.md.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use super::Pipeline;

/// Builds a fresh pipeline per execution.
pub trait PipelineFactory: Send + Sync {
    /// Constructs the pipeline.
    fn build(&self) -> Pipeline;
}

impl<F> PipelineFactory for F
where
    F: Fn() -> Pipeline + Send + Sync,
{
    fn build(&self) -> Pipeline {
        self()
    }
}

struct Registration {
    factory: Arc<dyn PipelineFactory>,
    process_safe: bool,
}

/// Registry of pipeline factories keyed by payload type.
#[derive(Default)]
pub struct PipelineRegistry {
    entries: DashMap<String, Registration>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registers a process-safe factory under `kind`.
    ///
    /// Process-safe means the same registration runs in a worker child, so
    /// the factory must not capture state that only exists in the parent.
    /// Registering an already-known kind replaces the previous entry
    /// silently.
    pub fn register(&self, kind: impl Into<String>, factory: impl PipelineFactory + 'static) {
        self.insert(kind.into(), factory, true);
    }

    /// Registers a factory restricted to the thread and async backends.
    ///
    /// Use this for closures capturing in-process state; the router refuses
    /// to dispatch these to the isolated backend.
    pub fn register_local(&self, kind: impl Into<String>, factory: impl PipelineFactory + 'static) {
        self.insert(kind.into(), factory, false);
    }

    fn insert(&self, kind: String, factory: impl PipelineFactory + 'static, process_safe: bool) {
        debug!(kind = %kind, process_safe, "registering pipeline");
        self.entries.insert(
            kind,
            Registration {
                factory: Arc::new(factory),
                process_safe,
            },
        );
    }

    /// Builds the pipeline registered under `kind`.
    #[must_use]
    pub fn build(&self, kind: &str) -> Option<Pipeline> {
        self.entries.get(kind).map(|r| r.factory.build())
    }

    /// Returns whether `kind` is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Returns whether `kind` may cross the process boundary; `None` when
    /// unregistered.
    #[must_use]
    pub fn is_process_safe(&self, kind: &str) -> Option<bool> {
        self.entries.get(kind).map(|r| r.process_safe)
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("kinds", &self.entries.len())
            .finish()
    }
}

static GLOBAL: Lazy<PipelineRegistry> = Lazy::new(PipelineRegistry::new);

/// The process-wide registry.
///
/// Worker children resolve pipelines here, so hosts using the isolated
/// backend must register their process-safe pipelines in this registry
/// before the pool spawns.
#[must_use]
pub fn global() -> &'static PipelineRegistry {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn noop(name: &str) -> Pipeline {
        Pipeline::new(name.to_string())
    }

    #[test]
    fn test_register_and_build() {
        let registry = PipelineRegistry::new();
        registry.register("etl", || noop("etl"));

        assert!(registry.contains("etl"));
        assert_eq!(registry.len(), 1);
        let pipeline = registry.build("etl").unwrap();
        assert_eq!(pipeline.name(), "etl");
    }

    #[test]
    fn test_missing_kind_is_none() {
        let registry = PipelineRegistry::new();
        assert!(registry.build("nonexistent").is_none());
        assert!(registry.is_process_safe("nonexistent").is_none());
    }

    #[test]
    fn test_register_replaces_silently() {
        let registry = PipelineRegistry::new();
        registry.register("etl", || noop("first"));
        registry.register("etl", || noop("second"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.build("etl").unwrap().name(), "second");
    }

    #[test]
    fn test_process_safety_flag() {
        let registry = PipelineRegistry::new();
        let captured = json!(7);
        registry.register("safe", || noop("safe"));
        registry.register_local("local", move || {
            let v = captured.clone();
            Pipeline::new("local").map("inject", move |_| Ok(v.clone()))
        });

        assert_eq!(registry.is_process_safe("safe"), Some(true));
        assert_eq!(registry.is_process_safe("local"), Some(false));
    }

    #[test]
    fn test_factories_build_fresh_pipelines() {
        let registry = PipelineRegistry::new();
        registry.register("demo", || noop("demo").map("id", Ok));

        let a = registry.build("demo").unwrap();
        let b = registry.build("demo").unwrap();
        assert_eq!(a.stage_count(), b.stage_count());
    }
}
