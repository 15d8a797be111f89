// crates/core/src/registry.rs
//! Authoritative in-memory job collection.
//!
//! The registry is plain data with no locking of its own; the lifecycle
//! engine owns it behind the single lock that serializes every mutation.

use crate::error::JobError;
use crate::types::{Job, JobId, JobStatus, StatusCounts};

/// Jobs in creation order, with case-insensitive unique names.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Vec<Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.jobs.iter().any(|j| j.name.eq_ignore_ascii_case(name))
    }

    /// Add a job. Fails with `DuplicateName` if the name is taken.
    pub fn insert(&mut self, job: Job) -> Result<&Job, JobError> {
        if self.contains_name(&job.name) {
            return Err(JobError::DuplicateName(job.name));
        }
        self.jobs.push(job);
        Ok(&self.jobs[self.jobs.len() - 1])
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.job_id == id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.job_id == id)
    }

    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        let idx = self.jobs.iter().position(|j| j.job_id == id)?;
        Some(self.jobs.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn with_status(&self, status: JobStatus) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(move |j| j.status == status)
    }

    /// Remove and return every job in `status`, keeping the rest in order.
    pub fn remove_with_status(&mut self, status: JobStatus) -> Vec<Job> {
        let (removed, kept): (Vec<Job>, Vec<Job>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|j| j.status == status);
        self.jobs = kept;
        removed
    }

    pub fn status_counts(&self) -> StatusCounts {
        self.jobs.iter().map(|j| j.status).collect()
    }
}
