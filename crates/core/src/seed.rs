// crates/core/src/seed.rs
//! Demo jobs for a fresh dashboard.

use crate::engine::FAILURE_MESSAGES;
use crate::rng::SharedRng;
use crate::types::{Job, JobPriority, JobStatus};

pub const DEMO_JOB_NAMES: [&str; 12] = [
    "Customer Data Export",
    "Monthly Analytics Report",
    "Database Optimization",
    "Email Campaign Batch",
    "Image Processing Pipeline",
    "Backup Verification",
    "Log File Analysis",
    "User Activity Sync",
    "Inventory Update Process",
    "Payment Processing Batch",
    "Content Moderation Queue",
    "Search Index Rebuild",
];

const HIGH_PRIORITY_RATE: f64 = 0.3;
const HOUR_MS: f64 = 3_600_000.0;

/// Cumulative thresholds for the seeded status spread.
const STATUS_SPREAD: [(f64, JobStatus); 5] = [
    (0.3, JobStatus::Completed),
    (0.4, JobStatus::Running),
    (0.5, JobStatus::Failed),
    (0.6, JobStatus::InQueue),
    (0.7, JobStatus::Stopped),
];

fn pick_status(roll: f64) -> JobStatus {
    STATUS_SPREAD
        .iter()
        .find(|(below, _)| roll < *below)
        .map_or(JobStatus::Pending, |(_, status)| *status)
}

/// One job per demo name with a random status. Timestamps and progress are
/// consistent with the status as of `now`.
pub fn demo_jobs(rng: &SharedRng, now: i64) -> Vec<Job> {
    DEMO_JOB_NAMES
        .iter()
        .map(|name| {
            let priority = if rng.chance(HIGH_PRIORITY_RATE) {
                JobPriority::High
            } else {
                JobPriority::Regular
            };
            let status = pick_status(rng.uniform(0.0, 1.0));
            demo_job(rng, name, priority, status, now)
        })
        .collect()
}

fn demo_job(rng: &SharedRng, name: &str, priority: JobPriority, status: JobStatus, now: i64) -> Job {
    let age = rng.uniform(HOUR_MS, 4.0 * HOUR_MS) as i64;
    let mut job = Job::new(name, priority, now - age);
    job.status = status;

    if matches!(status, JobStatus::Pending | JobStatus::InQueue) {
        return job;
    }

    // Started somewhere in the first quarter of the job's life.
    job.started_at = job.created_at + rng.uniform(1_000.0, age as f64 / 4.0) as i64;
    job.progress = match status {
        JobStatus::Completed => 100,
        JobStatus::Failed => rng.uniform(10.0, 100.0) as u8,
        _ => rng.uniform(10.0, 90.0) as u8,
    };
    if status.is_terminal() {
        let ran_for = (now - job.started_at) as f64;
        job.completed_at = job.started_at + rng.uniform(ran_for / 4.0, ran_for) as i64;
    }
    if status == JobStatus::Failed {
        let message = rng.pick(&FAILURE_MESSAGES).copied().unwrap_or(FAILURE_MESSAGES[0]);
        job.error_message = Some(message.to_string());
    }
    job
}
