//! In-memory state store for tests and embedding.

use dashmap::DashMap;
use jobforge_core::{Job, JobResult};

use super::{StateStore, StoreError, StoreResult, job_key, result_key};

/// In-memory store holding serialized records under their logical keys.
///
/// Not durable, but it exercises the same serde round-trip as the durable
/// stores, so records read back are byte-for-byte what persistence would
/// have produced.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(key: &str, text: &str) -> StoreResult<T> {
        serde_json::from_str(text).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

impl StateStore for MemoryStore {
    fn put_job(&self, job: &Job) -> StoreResult {
        let text = serde_json::to_string(job).map_err(|e| StoreError::Corrupt {
            key: job_key(&job.job_id),
            reason: e.to_string(),
        })?;
        self.entries.insert(job_key(&job.job_id), text);
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> StoreResult<Option<Job>> {
        let key = job_key(job_id);
        self.entries
            .get(&key)
            .map(|text| Self::decode(&key, &text))
            .transpose()
    }

    fn put_result(&self, result: &JobResult) -> StoreResult {
        let key = result_key(&result.job_id);
        let text = serde_json::to_string(result).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(key) {
            Entry::Occupied(_) => Err(StoreError::ResultExists {
                id: result.job_id.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(text);
                Ok(())
            }
        }
    }

    fn get_result(&self, job_id: &str) -> StoreResult<Option<JobResult>> {
        let key = result_key(job_id);
        let decoded: Option<JobResult> = self
            .entries
            .get(&key)
            .map(|text| Self::decode(&key, &text))
            .transpose()?;
        if let Some(result) = &decoded {
            result.validate().map_err(|e| StoreError::Corrupt {
                key,
                reason: e.to_string(),
            })?;
        }
        Ok(decoded)
    }

    fn list_jobs(&self) -> StoreResult<Vec<Job>> {
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with("job:"))
            .map(|entry| Self::decode(entry.key(), entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use jobforge_core::{JobSpec, JobStatus};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn job(id: &str) -> Job {
        JobSpec::new(json!({"type": "demo"})).with_id(id).build().unwrap()
    }

    #[test]
    fn test_job_round_trip() {
        let store = MemoryStore::new();
        let mut original = job("j1");
        original.transition(JobStatus::Pending).unwrap();

        store.put_job(&original).unwrap();
        let loaded = store.get_job("j1").unwrap().unwrap();
        assert_eq!(loaded.job_id, "j1");
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.updated_at, original.updated_at);
    }

    #[test]
    fn test_missing_job_is_none() {
        let store = MemoryStore::new();
        assert!(store.get_job("absent").unwrap().is_none());
        assert!(store.get_result("absent").unwrap().is_none());
    }

    #[test]
    fn test_put_job_replaces() {
        let store = MemoryStore::new();
        let mut j = job("j1");
        store.put_job(&j).unwrap();
        j.transition(JobStatus::Pending).unwrap();
        store.put_job(&j).unwrap();

        assert_eq!(store.get_job("j1").unwrap().unwrap().status, JobStatus::Pending);
        assert_eq!(store.list_jobs().unwrap().len(), 1);
    }

    #[test]
    fn test_results_are_write_once() {
        let store = MemoryStore::new();
        let now = chrono::Utc::now();
        let first = JobResult::completed("j1", json!(1), now, now).unwrap();
        let second = JobResult::completed("j1", json!(2), now, now).unwrap();

        store.put_result(&first).unwrap();
        let err = store.put_result(&second).unwrap_err();
        assert!(matches!(err, StoreError::ResultExists { .. }));

        let stored = store.get_result("j1").unwrap().unwrap();
        assert_eq!(stored.output, Some(json!(1)));
    }

    #[test]
    fn test_list_jobs_skips_results() {
        let store = MemoryStore::new();
        store.put_job(&job("j1")).unwrap();
        let now = chrono::Utc::now();
        store
            .put_result(&JobResult::completed("j1", json!(1), now, now).unwrap())
            .unwrap();

        assert_eq!(store.list_jobs().unwrap().len(), 1);
    }
}
