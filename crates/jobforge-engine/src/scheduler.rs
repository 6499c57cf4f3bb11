//! Priority scheduling with aging.
//!
//! The scheduler orders queued jobs by an effective score
//!
//! ```text
//! score = priority + floor(waited / aging_interval) * aging_boost
//! ```
//!
//! recomputed for every resident entry on each pop, under one lock. Higher
//! scores win; ties break by earliest insertion sequence. Because waits only
//! grow, any queued job eventually outscores newer fixed-priority jobs, so
//! nothing starves. The per-pop re-score is O(n log n), which keeps the
//! policy exact and auditable at the target scale.

use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Aging configuration
#[derive(Debug, Clone, Copy)]
pub struct AgingPolicy {
    /// Wait per aging step
    pub interval: Duration,
    /// Score added per aging step
    pub boost: i64,
}

impl Default for AgingPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            boost: 1,
        }
    }
}

impl AgingPolicy {
    fn score(&self, priority: i64, waited: Duration) -> i64 {
        let interval = self.interval.as_millis().max(1);
        let steps = (waited.as_millis() / interval) as i64;
        priority + steps * self.boost
    }
}

#[derive(Debug, Clone)]
struct Entry {
    job_id: String,
    priority: i64,
    seq: u64,
    enqueued_at: Instant,
    not_before: Option<Instant>,
    score: i64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap on score; equal scores pop in insertion order.
        self.score
            .cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<Entry>,
    cancelled: HashSet<String>,
    next_seq: u64,
}

/// Thread-safe priority queue with aging
#[derive(Debug)]
pub struct Scheduler {
    inner: Mutex<Inner>,
    policy: AgingPolicy,
}

impl Scheduler {
    /// Creates a scheduler with the given aging policy.
    #[must_use]
    pub fn new(policy: AgingPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            policy,
        }
    }

    /// Queues a job, recording its enqueue time and insertion sequence.
    pub fn submit(&self, job_id: impl Into<String>, priority: i64) {
        self.push(job_id.into(), priority, None);
    }

    /// Queues a job that must not run before `delay` has elapsed; used for
    /// retry backoff.
    pub fn submit_after(&self, job_id: impl Into<String>, priority: i64, delay: Duration) {
        self.push(job_id.into(), priority, Some(Instant::now() + delay));
    }

    fn push(&self, job_id: String, priority: i64, not_before: Option<Instant>) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        trace!(job_id = %job_id, priority, seq, "queued");
        inner.heap.push(Entry {
            job_id,
            priority,
            seq,
            enqueued_at: Instant::now(),
            not_before,
            score: priority,
        });
    }

    /// Tombstones a queued job so it never executes; lazily filtered on pop.
    pub fn cancel(&self, job_id: &str) {
        let mut inner = self.inner.lock();
        if inner.heap.iter().any(|e| e.job_id == job_id) {
            debug!(job_id = %job_id, "tombstoned queued job");
            inner.cancelled.insert(job_id.to_string());
        }
    }

    /// Removes and returns the highest-ranked eligible job id.
    ///
    /// Never blocks: an empty (or entirely deferred) queue returns `None`
    /// immediately.
    #[must_use]
    pub fn next_job(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        Self::rescore(&mut inner, &self.policy, now);

        let mut deferred = Vec::new();
        let mut picked = None;
        while let Some(entry) = inner.heap.pop() {
            if inner.cancelled.remove(&entry.job_id) {
                continue;
            }
            if entry.not_before.is_some_and(|t| t > now) {
                deferred.push(entry);
                continue;
            }
            picked = Some(entry.job_id);
            break;
        }
        for entry in deferred {
            inner.heap.push(entry);
        }
        picked
    }

    /// Observes the top-of-queue (job id, effective score) without removing.
    #[must_use]
    pub fn peek(&self) -> Option<(String, i64)> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        Self::rescore(&mut inner, &self.policy, now);

        let mut stash = Vec::new();
        let mut top = None;
        while let Some(entry) = inner.heap.pop() {
            if inner.cancelled.contains(&entry.job_id) {
                stash.push(entry);
                continue;
            }
            if entry.not_before.is_some_and(|t| t > now) {
                stash.push(entry);
                continue;
            }
            top = Some((entry.job_id.clone(), entry.score));
            stash.push(entry);
            break;
        }
        for entry in stash {
            inner.heap.push(entry);
        }
        top
    }

    /// Number of queued (non-tombstoned) entries.
    #[must_use]
    pub fn size(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .heap
            .iter()
            .filter(|e| !inner.cancelled.contains(&e.job_id))
            .count()
    }

    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Recomputes every entry's effective score at `now` and re-heapifies.
    fn rescore(inner: &mut Inner, policy: &AgingPolicy, now: Instant) {
        let entries: Vec<Entry> = std::mem::take(&mut inner.heap).into_vec();
        inner.heap = entries
            .into_iter()
            .map(|mut entry| {
                entry.score =
                    policy.score(entry.priority, now.duration_since(entry.enqueued_at));
                entry
            })
            .collect();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(AgingPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use pretty_assertions::assert_eq;

    use super::*;

    fn drain(scheduler: &Scheduler) -> Vec<String> {
        std::iter::from_fn(|| scheduler.next_job()).collect()
    }

    #[test]
    fn test_priority_order() {
        let scheduler = Scheduler::default();
        scheduler.submit("a", 1);
        scheduler.submit("b", 5);
        scheduler.submit("c", 3);

        assert_eq!(drain(&scheduler), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let scheduler = Scheduler::default();
        for i in 0..5 {
            scheduler.submit(format!("job-{i}"), 7);
        }
        assert_eq!(
            drain(&scheduler),
            vec!["job-0", "job-1", "job-2", "job-3", "job-4"]
        );
    }

    #[test]
    fn test_empty_queue_returns_none_immediately() {
        let scheduler = Scheduler::default();
        assert!(scheduler.next_job().is_none());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_aging_overtakes_higher_priority() {
        // 10ms per step, +5 per step: the old low-priority entry outscores
        // a fresh priority-10 one after ~30ms.
        let scheduler = Scheduler::new(AgingPolicy {
            interval: Duration::from_millis(10),
            boost: 5,
        });
        scheduler.submit("old-low", 0);
        thread::sleep(Duration::from_millis(50));
        scheduler.submit("new-high", 10);

        assert_eq!(scheduler.next_job().unwrap(), "old-low");
    }

    #[test]
    fn test_peek_does_not_remove() {
        let scheduler = Scheduler::default();
        scheduler.submit("a", 1);
        scheduler.submit("b", 5);

        let (top, score) = scheduler.peek().unwrap();
        assert_eq!(top, "b");
        assert_eq!(score, 5);
        assert_eq!(scheduler.size(), 2);
        assert_eq!(scheduler.next_job().unwrap(), "b");
    }

    #[test]
    fn test_cancelled_job_never_pops() {
        let scheduler = Scheduler::default();
        scheduler.submit("keep", 1);
        scheduler.submit("drop", 9);
        scheduler.cancel("drop");

        assert_eq!(scheduler.size(), 1);
        assert_eq!(drain(&scheduler), vec!["keep"]);
    }

    #[test]
    fn test_cancel_unknown_id_is_noop() {
        let scheduler = Scheduler::default();
        scheduler.submit("a", 1);
        scheduler.cancel("ghost");
        assert_eq!(scheduler.size(), 1);
    }

    #[test]
    fn test_not_before_defers_entry() {
        let scheduler = Scheduler::default();
        scheduler.submit_after("later", 10, Duration::from_millis(80));
        scheduler.submit("now", 0);

        assert_eq!(scheduler.next_job().unwrap(), "now");
        assert!(scheduler.next_job().is_none());
        assert_eq!(scheduler.size(), 1);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(scheduler.next_job().unwrap(), "later");
    }

    #[test]
    fn test_resubmit_after_cancel_is_live() {
        let scheduler = Scheduler::default();
        scheduler.submit("job", 1);
        scheduler.cancel("job");
        scheduler.submit("job", 1);

        assert_eq!(drain(&scheduler), vec!["job"]);
    }

    #[test]
    fn test_concurrent_submits_get_distinct_sequences() {
        let scheduler = Arc::new(Scheduler::default());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || {
                    for i in 0..50 {
                        scheduler.submit(format!("job-{t}-{i}"), 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(scheduler.size(), 200);
        let drained = drain(&scheduler);
        let distinct: std::collections::HashSet<_> = drained.iter().collect();
        assert_eq!(distinct.len(), 200);
    }
}
