//! Job registry with TTL eviction of finished jobs.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use super::Job;
use crate::error::{DiscoveryError, Result};

pub type JobHandle = Arc<RwLock<Job>>;

pub(crate) fn read(job: &RwLock<Job>) -> RwLockReadGuard<'_, Job> {
    job.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write(job: &RwLock<Job>) -> RwLockWriteGuard<'_, Job> {
    job.write().unwrap_or_else(PoisonError::into_inner)
}

pub struct JobStore {
    jobs: RwLock<HashMap<String, JobHandle>>,
    ttl: Duration,
}

impl JobStore {
    /// Finished jobs are kept for `ttl` after completion
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a new job; fails if its id is already taken
    pub fn insert(&self, job: Job) -> Result<JobHandle> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job.id) {
            return Err(DiscoveryError::DuplicateJobId(job.id));
        }
        let id = job.id.clone();
        let handle = Arc::new(RwLock::new(job));
        jobs.insert(id, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Result<JobHandle> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| DiscoveryError::JobNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Ids ordered by creation time
    pub fn ids(&self) -> Vec<String> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(DateTime<Utc>, String)> = jobs
            .values()
            .map(|handle| {
                let job = read(handle);
                (job.created_at, job.id.clone())
            })
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    /// Drop terminal jobs that finished more than `ttl` before `now`.
    /// Pending and running jobs are never evicted.
    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, handle| {
            let job = read(handle);
            match job.completed_at {
                Some(done) if job.status.is_terminal() => now.signed_duration_since(done) <= ttl,
                _ => true,
            }
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            tracing::debug!("Evicted {} expired job(s)", evicted);
        }
        evicted
    }
}
