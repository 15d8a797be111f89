// crates/core/src/error.rs
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Reasons a job name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("Job name is required")]
    Empty,

    #[error("Job name must be at least {min} characters")]
    TooShort { min: usize },

    #[error("Job name must be at most {max} characters")]
    TooLong { max: usize },

    #[error("Job name can only contain letters, numbers, spaces, hyphens, and underscores")]
    InvalidCharacters,
}

/// Commands whose legality depends on the job's current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Stop,
    Restart,
    Delete,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Delete => "delete",
        })
    }
}

/// Errors returned by the job command surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Invalid job name: {0}")]
    InvalidName(#[from] NameError),

    #[error("A job with the name '{0}' already exists")]
    DuplicateName(String),

    #[error("Cannot {action} job {job_id} in {status} state")]
    InvalidState {
        job_id: JobId,
        action: JobAction,
        status: JobStatus,
    },

    #[error("Bulk delete is only allowed for Failed, Completed and Stopped jobs, not {0}")]
    InvalidBulkStatus(JobStatus),

    #[error("No {0} jobs found to delete")]
    NoMatches(JobStatus),
}

impl JobError {
    pub(crate) fn invalid_state(job_id: JobId, action: JobAction, status: JobStatus) -> Self {
        Self::InvalidState {
            job_id,
            action,
            status,
        }
    }

    /// Bad input from the caller (name or status selection).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidName(_) | Self::DuplicateName(_) | Self::InvalidBulkStatus(_)
        )
    }

    /// The command does not apply to the job's current state.
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::InvalidState { .. } | Self::NoMatches(_)
        )
    }
}

/// Errors from the live-updates transport. Retried by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection attempt timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Connection attempt superseded by stop or manual reconnect")]
    Aborted,
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field}: minimum {min} exceeds maximum {max}")]
    InvertedRange {
        field: &'static str,
        min: f64,
        max: f64,
    },

    #[error("{field} must be within [0, 1], got {value}")]
    RateOutOfBounds { field: &'static str, value: f64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("retry delay table must not be empty")]
    EmptyRetryTable,
}
