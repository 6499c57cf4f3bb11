//! File-backed durable state store.
//!
//! One JSON document per record, written to a temporary file, fsynced, and
//! atomically renamed into place. Concurrent readers therefore see either
//! the pre-write or the post-write document, never a partial one, and a
//! record that survived a crash is exactly what was last committed.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use jobforge_core::{Job, JobResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{StateStore, StoreError, StoreResult, job_key, result_key};

const JOBS_DIR: &str = "jobs";
const RESULTS_DIR: &str = "results";

/// Durable store rooted at a directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and creates, if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// I/O failures creating the directory layout.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(JOBS_DIR))?;
        fs::create_dir_all(root.join(RESULTS_DIR))?;
        debug!(root = %root.display(), "state store opened");
        Ok(Self { root })
    }

    fn record_path(&self, dir: &str, id: &str) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", encode_id(id)))
    }

    fn write_record<T: Serialize>(&self, dir: &str, id: &str, key: &str, record: &T) -> StoreResult {
        let path = self.record_path(dir, id);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_vec_pretty(record).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let mut file = File::create(&tmp)?;
        file.write_all(&text)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        // Make the rename itself durable.
        #[cfg(unix)]
        File::open(path.parent().unwrap_or(&self.root))?.sync_all()?;
        Ok(())
    }

    fn read_record<T: DeserializeOwned>(&self, dir: &str, id: &str, key: &str) -> StoreResult<Option<T>> {
        let path = self.record_path(dir, id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Maps a job id onto a safe file name; bytes outside `[A-Za-z0-9._-]` are
/// percent-encoded so ids cannot escape the store directory.
fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(b as char),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

impl StateStore for FileStore {
    fn put_job(&self, job: &Job) -> StoreResult {
        self.write_record(JOBS_DIR, &job.job_id, &job_key(&job.job_id), job)
    }

    fn get_job(&self, job_id: &str) -> StoreResult<Option<Job>> {
        self.read_record(JOBS_DIR, job_id, &job_key(job_id))
    }

    fn put_result(&self, result: &JobResult) -> StoreResult {
        if self.record_path(RESULTS_DIR, &result.job_id).exists() {
            return Err(StoreError::ResultExists {
                id: result.job_id.clone(),
            });
        }
        self.write_record(
            RESULTS_DIR,
            &result.job_id,
            &result_key(&result.job_id),
            result,
        )
    }

    fn get_result(&self, job_id: &str) -> StoreResult<Option<JobResult>> {
        let key = result_key(job_id);
        let decoded: Option<JobResult> = self.read_record(RESULTS_DIR, job_id, &key)?;
        if let Some(result) = &decoded {
            result.validate().map_err(|e| StoreError::Corrupt {
                key,
                reason: e.to_string(),
            })?;
        }
        Ok(decoded)
    }

    fn list_jobs(&self) -> StoreResult<Vec<Job>> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(self.root.join(JOBS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            jobs.push(read_job_file(&path)?);
        }
        Ok(jobs)
    }
}

fn read_job_file(path: &Path) -> StoreResult<Job> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| StoreError::Corrupt {
        key: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use jobforge_core::{JobSpec, JobStatus};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn job(id: &str) -> Job {
        JobSpec::new(json!({"type": "demo"})).with_id(id).build().unwrap()
    }

    #[test]
    fn test_round_trip_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let mut original = job("j1");
        original.transition(JobStatus::Pending).unwrap();

        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put_job(&original).unwrap();
        }

        // Reopening simulates a restart: the record must read back equal.
        let store = FileStore::open(dir.path()).unwrap();
        let loaded = store.get_job("j1").unwrap().unwrap();
        assert_eq!(loaded.job_id, original.job_id);
        assert_eq!(loaded.status, original.status);
        assert_eq!(loaded.created_at, original.created_at);
        assert_eq!(loaded.updated_at, original.updated_at);
        assert_eq!(loaded.payload, original.payload);
    }

    #[test]
    fn test_missing_records_are_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.get_job("absent").unwrap().is_none());
        assert!(store.get_result("absent").unwrap().is_none());
    }

    #[test]
    fn test_results_are_write_once() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let now = chrono::Utc::now();

        store
            .put_result(&JobResult::completed("j1", json!("first"), now, now).unwrap())
            .unwrap();
        let err = store
            .put_result(&JobResult::completed("j1", json!("second"), now, now).unwrap())
            .unwrap_err();
        assert!(matches!(err, StoreError::ResultExists { .. }));

        let stored = store.get_result("j1").unwrap().unwrap();
        assert_eq!(stored.output, Some(json!("first")));
    }

    #[test]
    fn test_result_round_trip_preserves_failure() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let now = chrono::Utc::now();

        let result = JobResult::failed("j2", "boom", now, now).unwrap();
        store.put_result(&result).unwrap();

        let loaded = store.get_result("j2").unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.error, "boom");
        assert!(loaded.output.is_none());
    }

    #[test]
    fn test_list_jobs() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        for i in 0..3 {
            store.put_job(&job(&format!("j{i}"))).unwrap();
        }
        let mut ids: Vec<_> = store
            .list_jobs()
            .unwrap()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["j0", "j1", "j2"]);
    }

    #[test]
    fn test_hostile_job_ids_stay_inside_the_store() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let id = "../escape/attempt";
        store.put_job(&job(id)).unwrap();
        assert_eq!(store.get_job(id).unwrap().unwrap().job_id, id);
        assert!(store.get_job("escape/attempt").unwrap().is_none());
    }
}
