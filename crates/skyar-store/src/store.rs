//! Job record store with a durable JSON snapshot.
//!
//! Every mutation rewrites the snapshot before returning, so the full
//! id -> record mapping can be rebuilt after an unplanned restart. The write
//! goes to a sibling `.tmp` file which is synced and renamed over the
//! snapshot, so a crash mid-write leaves the previous snapshot intact.
//!
//! A failed write does not fail the mutation: the in-memory value stays
//! authoritative for the rest of the process lifetime and the failure is
//! logged and counted.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use skyar_models::{BatchId, JobId, JobRecord};

use crate::error::{StoreError, StoreResult};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Counter incremented whenever a snapshot write fails.
pub const PERSIST_FAILURES_TOTAL: &str = "skyar_store_persist_failures_total";

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    jobs: BTreeMap<&'a JobId, &'a JobRecord>,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    #[serde(default)]
    jobs: HashMap<JobId, JobRecord>,
}

/// Durable mapping from job ID to [`JobRecord`].
///
/// Share it as `Arc<JobStore>`. The write lock is held across mutate and
/// persist, so snapshots are written in mutation order.
#[derive(Debug)]
pub struct JobStore {
    path: PathBuf,
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl JobStore {
    /// Open the store, loading the snapshot at `path` if it exists.
    ///
    /// A missing snapshot yields an empty store. An unreadable or corrupt
    /// snapshot is an error rather than an empty store, so history is never
    /// overwritten by accident.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let jobs = match fs::read(&path) {
            Ok(bytes) => {
                let snapshot: Snapshot =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                if snapshot.version != SNAPSHOT_VERSION {
                    return Err(StoreError::UnsupportedVersion(snapshot.version));
                }
                snapshot.jobs
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        info!(path = %path.display(), jobs = jobs.len(), "Opened job store");

        Ok(Self {
            path,
            jobs: RwLock::new(jobs),
        })
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new record. IDs are never reused.
    pub fn put(&self, record: JobRecord) -> StoreResult<()> {
        let mut jobs = self.write_lock();
        if jobs.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        debug!(job_id = %record.id, status = %record.status, "Storing new job");
        jobs.insert(record.id.clone(), record);
        self.persist_or_warn(&jobs);
        Ok(())
    }

    /// Get a copy of a record.
    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.read_lock().get(id).cloned()
    }

    /// Mutate a record in place and persist it.
    ///
    /// The snapshot is only rewritten when the closure actually changed the
    /// record.
    pub fn update<F, T>(&self, id: &JobId, mutate: F) -> StoreResult<T>
    where
        F: FnOnce(&mut JobRecord) -> T,
    {
        let mut jobs = self.write_lock();
        let record = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::JobNotFound(id.clone()))?;

        let before = record.clone();
        let result = mutate(record);
        let changed = *record != before;

        if changed {
            self.persist_or_warn(&jobs);
        }
        Ok(result)
    }

    /// Copies of every record.
    pub fn all(&self) -> Vec<JobRecord> {
        self.read_lock().values().cloned().collect()
    }

    /// Records sharing `batch_id`, in submission order.
    pub fn batch(&self, batch_id: &BatchId) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self
            .read_lock()
            .values()
            .filter(|job| job.batch_id.as_ref() == Some(batch_id))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.batch_position.unwrap_or(u32::MAX));
        jobs
    }

    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    /// Write the snapshot now, reporting failure to the caller.
    pub fn flush(&self) -> StoreResult<()> {
        let jobs = self.read_lock();
        self.persist(&jobs)
    }

    /// Flush one last time and release the store.
    pub fn close(self) -> StoreResult<()> {
        self.flush()?;
        info!(path = %self.path.display(), "Closed job store");
        Ok(())
    }

    fn persist_or_warn(&self, jobs: &HashMap<JobId, JobRecord>) {
        if let Err(e) = self.persist(jobs) {
            metrics::counter!(PERSIST_FAILURES_TOTAL).increment(1);
            warn!(
                path = %self.path.display(),
                "Job store write failed, keeping in-memory state: {}", e
            );
        }
    }

    fn persist(&self, jobs: &HashMap<JobId, JobRecord>) -> StoreResult<()> {
        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            jobs: jobs.iter().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let tmp_path = self.tmp_path();
        let mut file = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::io(&self.path, e)
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyar_models::{FileType, JobStatus, ProcessingParams};
    use tempfile::TempDir;

    fn uploaded(name: &str) -> JobRecord {
        JobRecord::uploaded(name, format!("/uploads/{}", name), FileType::Image)
    }

    fn run_to_processing(store: &JobStore, id: &JobId, batch_id: &BatchId, position: u32) {
        store
            .update(id, |r| {
                r.assign_to_batch(batch_id.clone(), position, ProcessingParams::default(), "Pending")
                    .unwrap();
                r.start_processing("Processing").unwrap();
            })
            .unwrap();
    }

    #[test]
    fn test_open_missing_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path().join("state").join("jobs.json")).unwrap();
        assert!(store.is_empty());
        assert!(dir.path().join("state").exists());
    }

    #[test]
    fn test_put_get_and_duplicate() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).unwrap();

        let record = uploaded("a.jpg");
        let id = record.id.clone();
        store.put(record.clone()).unwrap();

        assert_eq!(store.get(&id), Some(record.clone()));
        assert!(matches!(store.put(record), Err(StoreError::DuplicateId(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_missing_job() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).unwrap();
        let result = store.update(&JobId::new(), |r| r.progress);
        assert!(matches!(result, Err(StoreError::JobNotFound(_))));
    }

    #[test]
    fn test_every_mutation_is_durable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        let store = JobStore::open(&path).unwrap();

        let record = uploaded("a.jpg");
        let id = record.id.clone();
        store.put(record).unwrap();
        run_to_processing(&store, &id, &BatchId::new(), 0);
        store.update(&id, |r| r.advance_progress(50, "half")).unwrap();

        // A second instance sees the state without any explicit flush
        let reopened = JobStore::open(&path).unwrap();
        let loaded = reopened.get(&id).unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
        assert_eq!(loaded.progress, 50);
    }

    #[test]
    fn test_reload_reproduces_terminal_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        let batch_id = BatchId::new();

        let (done, failed) = {
            let store = JobStore::open(&path).unwrap();
            let a = uploaded("a.jpg");
            let b = uploaded("b.jpg");
            let (a_id, b_id) = (a.id.clone(), b.id.clone());
            store.put(a).unwrap();
            store.put(b).unwrap();

            run_to_processing(&store, &a_id, &batch_id, 0);
            store.update(&a_id, |r| r.complete("/out/a/result.jpg")).unwrap().unwrap();
            run_to_processing(&store, &b_id, &batch_id, 1);
            store.update(&b_id, |r| r.fail("exit code 1")).unwrap().unwrap();

            (store.get(&a_id).unwrap(), store.get(&b_id).unwrap())
            // dropped without close(): simulated crash
        };

        let reloaded = JobStore::open(&path).unwrap();
        assert_eq!(reloaded.get(&done.id), Some(done));
        assert_eq!(reloaded.get(&failed.id), Some(failed));

        let batch = reloaded.batch(&batch_id);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].batch_position, Some(0));
        assert_eq!(batch[1].status, JobStatus::Error);
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(JobStore::open(&path), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_unsupported_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        fs::write(&path, br#"{"version": 99, "jobs": {}}"#).unwrap();

        assert!(matches!(
            JobStore::open(&path),
            Err(StoreError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_write_failure_keeps_memory_authoritative() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        let store = JobStore::open(state_dir.join("jobs.json")).unwrap();

        // Replace the snapshot directory with a plain file so writes fail
        fs::remove_dir_all(&state_dir).unwrap();
        fs::write(&state_dir, b"").unwrap();

        let record = uploaded("a.jpg");
        let id = record.id.clone();
        store.put(record).unwrap();
        store.update(&id, |r| r.message = "still here".into()).unwrap();

        assert_eq!(store.get(&id).unwrap().message, "still here");
        assert!(store.flush().is_err());
    }

    #[test]
    fn test_noop_update_skips_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");
        let store = JobStore::open(&path).unwrap();
        let record = uploaded("a.jpg");
        let id = record.id.clone();
        store.put(record).unwrap();

        fs::remove_file(&path).unwrap();
        // Uploaded jobs ignore progress estimates, so nothing changes
        let applied = store.update(&id, |r| r.advance_progress(40, "tick")).unwrap();
        assert!(!applied);
        assert!(!path.exists());

        store.close().unwrap();
        assert!(path.exists());
    }
}
