// crates/core/src/engine.rs
//! Job lifecycle engine.
//!
//! Drives every job through `Pending -> InQueue -> Running -> Completed|Failed`
//! on randomized timers and applies stop/restart/delete commands. All job
//! state lives in one [`Ledger`] behind a single mutex; commands and timer
//! callbacks both take that lock, so they behave as queued writers.
//!
//! Each job with pending work owns a [`Timeline`] (a child of the engine's
//! root). Commands cancel it while holding the lock, and every timer callback
//! re-checks it under the same lock before mutating, so a timer that fired
//! concurrently with `stop`, `restart` or `delete` is a no-op.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tracing::{debug, info};

use crate::bus::ProgressEventBus;
use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::error::{JobAction, JobError};
use crate::registry::JobRegistry;
use crate::rng::SharedRng;
use crate::timeline::Timeline;
use crate::types::{Job, JobId, JobPriority, JobStatus, StatusCounts};
use crate::validation::validate_job_name;

/// Messages a failed job can end with.
pub const FAILURE_MESSAGES: [&str; 10] = [
    "Connection timeout during processing",
    "Insufficient memory to complete operation",
    "Invalid input data format detected",
    "External service unavailable",
    "Process terminated due to resource limits",
    "Authentication failed for external API",
    "File not found in specified location",
    "Network connection interrupted",
    "Database connection pool exhausted",
    "Rate limit exceeded for external service",
];

/// Jobs plus the live timeline of each job that still has scheduled work.
#[derive(Default)]
struct Ledger {
    jobs: JobRegistry,
    timelines: HashMap<JobId, Timeline>,
}

impl Ledger {
    fn cancel_timeline(&mut self, job_id: JobId) {
        if let Some(timeline) = self.timelines.remove(&job_id) {
            timeline.cancel();
        }
    }
}

struct EngineInner {
    config: LifecycleConfig,
    ledger: Mutex<Ledger>,
    bus: Arc<ProgressEventBus>,
    clock: Arc<dyn Clock>,
    rng: SharedRng,
    root: Timeline,
}

/// Cheap to clone; clones share the same jobs.
#[derive(Clone)]
pub struct JobLifecycleEngine {
    inner: Arc<EngineInner>,
}

impl JobLifecycleEngine {
    pub fn new(
        config: LifecycleConfig,
        bus: Arc<ProgressEventBus>,
        clock: Arc<dyn Clock>,
        rng: SharedRng,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                ledger: Mutex::new(Ledger::default()),
                bus,
                clock,
                rng,
                root: Timeline::new(),
            }),
        }
    }

    // -- Commands -------------------------------------------------------------

    /// Validate the name, register a `Pending` job and start its timeline.
    pub fn create(&self, name: &str, priority: JobPriority) -> Result<Job, JobError> {
        let name = validate_job_name(name)?;
        let inner = &self.inner;
        let mut ledger = inner.lock();
        let job = ledger
            .jobs
            .insert(Job::new(name, priority, inner.clock.now_millis()))?
            .clone();
        inner.bus.publish(job.progress_update());
        inner.launch(&mut ledger, job.job_id, job.status, job.progress);
        info!(job_id = %job.job_id, name = %job.name, priority = job.priority.label(), "job created");
        Ok(job)
    }

    /// Register an existing job as-is and resume its lifecycle from its
    /// current status. Terminal jobs get no timeline.
    pub fn adopt(&self, job: Job) -> Result<Job, JobError> {
        let inner = &self.inner;
        let mut ledger = inner.lock();
        let job = ledger.jobs.insert(job)?.clone();
        inner.launch(&mut ledger, job.job_id, job.status, job.progress);
        debug!(job_id = %job.job_id, status = ?job.status, "job adopted");
        Ok(job)
    }

    pub fn stop(&self, job_id: JobId) -> Result<Job, JobError> {
        let inner = &self.inner;
        let mut ledger = inner.lock();
        let status = ledger.status_of(job_id)?;
        if !status.can_stop() {
            return Err(JobError::invalid_state(job_id, JobAction::Stop, status));
        }
        ledger.cancel_timeline(job_id);

        let job = ledger.jobs.get_mut(job_id).ok_or(JobError::NotFound(job_id))?;
        job.status = JobStatus::Stopped;
        job.completed_at = inner.clock.now_millis();
        inner.bus.publish(job.progress_update());
        info!(job_id = %job_id, progress = job.progress, "job stopped");
        Ok(job.clone())
    }

    pub fn restart(&self, job_id: JobId) -> Result<Job, JobError> {
        let inner = &self.inner;
        let mut ledger = inner.lock();
        let status = ledger.status_of(job_id)?;
        if !status.can_restart() {
            return Err(JobError::invalid_state(job_id, JobAction::Restart, status));
        }
        ledger.cancel_timeline(job_id);

        let job = ledger.jobs.get_mut(job_id).ok_or(JobError::NotFound(job_id))?;
        job.reset_for_restart();
        let job = job.clone();
        inner.bus.publish(job.progress_update());
        inner.launch(&mut ledger, job_id, job.status, job.progress);
        info!(job_id = %job_id, previous = %status, "job restarted");
        Ok(job)
    }

    /// Remove a terminal job. No event is published for the removal.
    pub fn delete(&self, job_id: JobId) -> Result<Job, JobError> {
        let mut ledger = self.inner.lock();
        let status = ledger.status_of(job_id)?;
        if !status.can_delete() {
            return Err(JobError::invalid_state(job_id, JobAction::Delete, status));
        }
        ledger.cancel_timeline(job_id);
        let job = ledger.jobs.remove(job_id).ok_or(JobError::NotFound(job_id))?;
        info!(job_id = %job_id, status = ?status, "job deleted");
        Ok(job)
    }

    /// Remove every job in `status`, which must be bulk-deletable.
    pub fn delete_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobError> {
        if !status.can_bulk_delete() {
            return Err(JobError::InvalidBulkStatus(status));
        }
        let mut ledger = self.inner.lock();
        let removed = ledger.jobs.remove_with_status(status);
        if removed.is_empty() {
            return Err(JobError::NoMatches(status));
        }
        for job in &removed {
            ledger.cancel_timeline(job.job_id);
        }
        info!(status = ?status, count = removed.len(), "jobs bulk deleted");
        Ok(removed)
    }

    // -- Queries --------------------------------------------------------------

    pub fn job(&self, job_id: JobId) -> Option<Job> {
        self.inner.lock().jobs.get(job_id).cloned()
    }

    /// Snapshot of every job in creation order.
    pub fn jobs(&self) -> Vec<Job> {
        self.inner.lock().jobs.iter().cloned().collect()
    }

    pub fn jobs_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.inner.lock().jobs.with_status(status).cloned().collect()
    }

    pub fn status_counts(&self) -> StatusCounts {
        self.inner.lock().jobs.status_counts()
    }

    /// Jobs that still have timers scheduled.
    pub fn active_timelines(&self) -> usize {
        self.inner.lock().timelines.len()
    }

    /// Cancel every timeline. Jobs keep their last state and stop advancing.
    pub fn shutdown(&self) {
        let mut ledger = self.inner.lock();
        self.inner.root.cancel();
        ledger.timelines.clear();
        info!(jobs = ledger.jobs.len(), "lifecycle engine shut down");
    }
}

impl Ledger {
    fn status_of(&self, job_id: JobId) -> Result<JobStatus, JobError> {
        self.jobs
            .get(job_id)
            .map(|job| job.status)
            .ok_or(JobError::NotFound(job_id))
    }
}

// -- Timeline steps -----------------------------------------------------------

type Step = fn(&Arc<EngineInner>, &Timeline, JobId);

impl EngineInner {
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Mutex poisoned in job ledger, recovering");
            poisoned.into_inner()
        })
    }

    /// Give `job_id` a fresh timeline matching `status`.
    fn launch(self: &Arc<Self>, ledger: &mut Ledger, job_id: JobId, status: JobStatus, progress: u8) {
        ledger.cancel_timeline(job_id);
        let timeline = self.root.child();
        match status {
            JobStatus::Pending => {
                let delay = self.rng.delay(self.config.pending_to_queue_delay);
                self.schedule_step(&timeline, delay, job_id, Self::enter_queue);
            }
            JobStatus::InQueue => {
                let delay = self.rng.delay(self.config.queue_to_running_delay);
                self.schedule_step(&timeline, delay, job_id, Self::start_running);
            }
            JobStatus::Running if progress >= 100 => {
                let delay = self.rng.delay(self.config.completion_grace_delay);
                self.schedule_step(&timeline, delay, job_id, Self::resolve);
            }
            JobStatus::Running => self.start_ticking(&timeline, job_id),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped => return,
        }
        ledger.timelines.insert(job_id, timeline);
    }

    fn schedule_step(self: &Arc<Self>, timeline: &Timeline, delay: Duration, job_id: JobId, step: Step) {
        let engine = Arc::downgrade(self);
        let scope = timeline.clone();
        timeline.schedule(delay, move || {
            if let Some(engine) = engine.upgrade() {
                step(&engine, &scope, job_id);
            }
        });
    }

    fn start_ticking(self: &Arc<Self>, timeline: &Timeline, job_id: JobId) {
        let engine: Weak<Self> = Arc::downgrade(self);
        let scope = timeline.clone();
        timeline.every(self.config.progress_tick_interval(), move || {
            match engine.upgrade() {
                Some(engine) => engine.tick(&scope, job_id),
                None => ControlFlow::Break(()),
            }
        });
    }

    fn enter_queue(self: &Arc<Self>, timeline: &Timeline, job_id: JobId) {
        let mut ledger = self.lock();
        if timeline.is_cancelled() {
            return;
        }
        let Some(job) = ledger.jobs.get_mut(job_id) else {
            return;
        };
        if job.status != JobStatus::Pending {
            return;
        }
        job.status = JobStatus::InQueue;
        self.bus.publish(job.progress_update());
        debug!(job_id = %job_id, "job queued");

        let delay = self.rng.delay(self.config.queue_to_running_delay);
        self.schedule_step(timeline, delay, job_id, Self::start_running);
    }

    fn start_running(self: &Arc<Self>, timeline: &Timeline, job_id: JobId) {
        let mut ledger = self.lock();
        if timeline.is_cancelled() {
            return;
        }
        let Some(job) = ledger.jobs.get_mut(job_id) else {
            return;
        };
        if job.status != JobStatus::InQueue {
            return;
        }
        job.status = JobStatus::Running;
        job.started_at = self.clock.now_millis();
        self.bus.publish(job.progress_update());
        debug!(job_id = %job_id, started_at = job.started_at, "job running");

        self.start_ticking(timeline, job_id);
    }

    fn tick(self: &Arc<Self>, timeline: &Timeline, job_id: JobId) -> ControlFlow<()> {
        let mut ledger = self.lock();
        if timeline.is_cancelled() {
            return ControlFlow::Break(());
        }
        let Some(job) = ledger.jobs.get_mut(job_id) else {
            return ControlFlow::Break(());
        };
        if job.status != JobStatus::Running || job.progress >= 100 {
            return ControlFlow::Break(());
        }

        let base = self.rng.uniform(
            self.config.progress_increment_min,
            self.config.progress_increment_max,
        );
        let step = (base * self.config.slowdown_factor(job.progress)).round().max(1.0);
        job.progress = (f64::from(job.progress) + step).min(100.0) as u8;
        self.bus.publish(job.progress_update());
        debug!(job_id = %job_id, progress = job.progress, "job progress");

        if job.progress < 100 {
            return ControlFlow::Continue(());
        }
        let delay = self.rng.delay(self.config.completion_grace_delay);
        self.schedule_step(timeline, delay, job_id, Self::resolve);
        ControlFlow::Break(())
    }

    fn resolve(self: &Arc<Self>, timeline: &Timeline, job_id: JobId) {
        let mut ledger = self.lock();
        if timeline.is_cancelled() {
            return;
        }
        let Some(job) = ledger.jobs.get_mut(job_id) else {
            return;
        };
        if job.status != JobStatus::Running {
            return;
        }

        if self.rng.chance(self.config.success_rate) {
            job.status = JobStatus::Completed;
            job.progress = 100;
        } else {
            let message = self
                .rng
                .pick(&FAILURE_MESSAGES)
                .copied()
                .unwrap_or(FAILURE_MESSAGES[0]);
            job.status = JobStatus::Failed;
            job.error_message = Some(message.to_string());
        }
        job.completed_at = self.clock.now_millis();
        self.bus.publish(job.progress_update());
        info!(
            job_id = %job_id,
            status = ?job.status,
            error = job.error_message.as_deref().unwrap_or(""),
            "job finished"
        );

        ledger.cancel_timeline(job_id);
    }
}
