// crates/core/src/types.rs
//! Job model shared by the registry, the lifecycle engine and subscribers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job.
pub type JobId = Uuid;

/// Status of a job.
///
/// `Pending < InQueue < Running < Completed` is the progress order.
/// `Failed` and `Stopped` are terminal but sit outside that order, so the
/// enum has no `Ord` impl; compare with [`JobStatus::is_at_least`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobStatus {
    Pending = 0,
    InQueue = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
    Stopped = 5,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::InQueue,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Stopped,
    ];

    /// Statuses accepted by bulk delete.
    pub const BULK_DELETABLE: [JobStatus; 3] =
        [JobStatus::Failed, JobStatus::Completed, JobStatus::Stopped];

    /// Position in the progress order, `None` for `Failed` and `Stopped`.
    pub fn progress_rank(self) -> Option<u8> {
        match self {
            Self::Pending | Self::InQueue | Self::Running | Self::Completed => Some(self as u8),
            Self::Failed | Self::Stopped => None,
        }
    }

    /// `true` when both statuses are progress-comparable and `self` has
    /// advanced at least as far as `other`.
    pub fn is_at_least(self, other: JobStatus) -> bool {
        match (self.progress_rank(), other.progress_rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }

    /// No automatic transition leaves these statuses.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    pub fn can_stop(self) -> bool {
        matches!(self, Self::Running | Self::InQueue)
    }

    pub fn can_restart(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }

    pub fn can_delete(self) -> bool {
        self.is_terminal()
    }

    pub fn can_bulk_delete(self) -> bool {
        Self::BULK_DELETABLE.contains(&self)
    }

    /// Stable lower-camel label used by status cards and logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InQueue => "inQueue",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Scheduling priority of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobPriority {
    #[default]
    Regular = 0,
    High = 1,
}

impl JobPriority {
    pub fn label(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::High => "high",
        }
    }
}

/// A unit of simulated asynchronous work.
///
/// Timestamps are Unix epoch milliseconds; `0` means unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    /// Completion percentage, always within `0..=100`.
    pub progress: u8,
    pub created_at: i64,
    pub started_at: i64,
    pub completed_at: i64,
    /// Set only while the job is `Failed`.
    pub error_message: Option<String>,
}

impl Job {
    /// A fresh `Pending` job with a new id.
    pub fn new(name: impl Into<String>, priority: JobPriority, created_at: i64) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            name: name.into(),
            status: JobStatus::Pending,
            priority,
            progress: 0,
            created_at,
            started_at: 0,
            completed_at: 0,
            error_message: None,
        }
    }

    /// The event published for this job's current state.
    pub fn progress_update(&self) -> JobProgressUpdate {
        JobProgressUpdate {
            job_id: self.job_id,
            status: self.status,
            progress: self.progress,
        }
    }

    /// Put the job back to `Pending` with all run data cleared.
    pub fn reset_for_restart(&mut self) {
        self.status = JobStatus::Pending;
        self.progress = 0;
        self.started_at = 0;
        self.completed_at = 0;
        self.error_message = None;
    }
}

/// Real-time progress event for one job. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressUpdate {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
}

/// Payload for creating a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub name: String,
    #[serde(default)]
    pub priority: JobPriority,
}

impl CreateJobRequest {
    pub fn new(name: impl Into<String>, priority: JobPriority) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }
}

/// Acknowledgement returned by stop and restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub is_success: bool,
    pub message: String,
}

impl Ack {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            is_success: true,
            message: message.into(),
        }
    }
}

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: usize,
    pub in_queue: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
}

impl StatusCounts {
    pub fn get(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::InQueue => self.in_queue,
            JobStatus::Running => self.running,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Stopped => self.stopped,
        }
    }

    pub fn record(&mut self, status: JobStatus) {
        let slot = match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::InQueue => &mut self.in_queue,
            JobStatus::Running => &mut self.running,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Stopped => &mut self.stopped,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        JobStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

impl FromIterator<JobStatus> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = JobStatus>>(iter: I) -> Self {
        let mut counts = Self::default();
        for status in iter {
            counts.record(status);
        }
        counts
    }
}

/// Logical state of the live-updates channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
