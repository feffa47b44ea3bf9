//! In-process ownership of running jobs.
//!
//! A job is leased while a supervisor (or the reconciler) is acting on it.
//! The reconciler never touches a job leased by someone else.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use skyar_models::JobId;

/// Set of job IDs currently owned by a task in this process.
#[derive(Debug, Clone, Default)]
pub struct LeaseRegistry {
    held: Arc<Mutex<HashSet<JobId>>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `job_id`. Returns `None` if another task holds it.
    pub fn acquire(&self, job_id: &JobId) -> Option<JobLease> {
        if !self.lock().insert(job_id.clone()) {
            return None;
        }
        Some(JobLease {
            registry: self.clone(),
            job_id: job_id.clone(),
        })
    }

    pub fn is_leased(&self, job_id: &JobId) -> bool {
        self.lock().contains(job_id)
    }

    /// Whether any job other than `job_id` is currently leased.
    pub fn held_by_others(&self, job_id: &JobId) -> bool {
        self.lock().iter().any(|held| held != job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of ownership of one job. Released on drop.
#[derive(Debug)]
pub struct JobLease {
    registry: LeaseRegistry,
    job_id: JobId,
}

impl JobLease {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.job_id);
    }
}
