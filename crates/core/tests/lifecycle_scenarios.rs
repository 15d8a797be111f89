// crates/core/tests/lifecycle_scenarios.rs
//! End-to-end scenarios through `JobService` on paused Tokio time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobpulse_core::{
    ConnectionState, Connector, CreateJobRequest, DashboardConfig, JobError, JobId,
    JobPriority, JobProgressUpdate, JobService, JobStatus, LifecycleConfig, LinkId, ManualClock,
    MillisRange, TransportError,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc::UnboundedReceiver;

const T0: i64 = 1_700_000_000_000;

/// Fails the first `failures` handshakes, then connects. Never drops.
struct FlakyLink {
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyLink {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        })
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FlakyLink {
    async fn connect(&self, _link: LinkId) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(TransportError::ConnectFailed("endpoint unreachable".into()));
        }
        Ok(())
    }

    async fn closed(&self, _link: LinkId) -> TransportError {
        std::future::pending().await
    }
}

/// Pending 1s, queued 2s, +25 per 1s tick, 500ms grace.
fn fixed_lifecycle(success_rate: f64) -> LifecycleConfig {
    LifecycleConfig {
        pending_to_queue_delay: MillisRange::fixed(1_000),
        queue_to_running_delay: MillisRange::fixed(2_000),
        progress_tick_interval_ms: 1_000,
        progress_increment_min: 25.0,
        progress_increment_max: 25.0,
        slowdown: Vec::new(),
        completion_grace_delay: MillisRange::fixed(500),
        success_rate,
    }
}

fn config(lifecycle: LifecycleConfig) -> DashboardConfig {
    let mut config = DashboardConfig {
        lifecycle,
        seed: Some(2024),
        ..DashboardConfig::default()
    };
    config.bus.packet_loss_rate = 0.0;
    config.bus.delivery_delay = MillisRange::fixed(0);
    config
}

async fn connected_service(config: DashboardConfig) -> JobService {
    let service =
        JobService::new(config, FlakyLink::new(0), Arc::new(ManualClock::new(T0))).unwrap();
    service.start().await.unwrap();
    service
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn drain_for(events: &mut UnboundedReceiver<JobProgressUpdate>, job_id: JobId) -> Vec<JobProgressUpdate> {
    let mut out = Vec::new();
    while let Ok(update) = events.try_recv() {
        if update.job_id == job_id {
            out.push(update);
        }
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_export_job_reaches_terminal_state() {
    let service = connected_service(config(LifecycleConfig::default())).await;
    let job = service
        .create_job(CreateJobRequest::new("Export-1", JobPriority::Regular))
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress, 0);

    // Both delay windows at their maximum.
    advance(4_000 + 6_000 + 10).await;
    let running = service.get_job(job.job_id).unwrap();
    assert!(running.status.is_at_least(JobStatus::Running));
    assert_ne!(running.started_at, 0);

    // Worst case: 3 per tick below 60, 2 above (slowed), plus grace.
    advance(60 * 1_500 + 1_500).await;
    let done = service.get_job(job.job_id).unwrap();
    assert!(matches!(done.status, JobStatus::Completed | JobStatus::Failed));
    assert_ne!(done.completed_at, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_final_even_at_a_tick_boundary() {
    let service = connected_service(config(fixed_lifecycle(1.0))).await;
    let job = service
        .create_job(CreateJobRequest::new("Export-1", JobPriority::Regular))
        .unwrap();

    // Land exactly on the second tick so the timer and the command race.
    advance(5_000).await;
    service.stop_job(job.job_id).unwrap();
    let stopped = service.get_job(job.job_id).unwrap();
    assert_eq!(stopped.status, JobStatus::Stopped);
    assert_ne!(stopped.completed_at, 0);

    let published = service.bus_stats().published;
    advance(60_000).await;
    assert_eq!(service.bus_stats().published, published);
    assert_eq!(service.get_job(job.job_id).unwrap(), stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_rejected_for_non_live_statuses() {
    let service = connected_service(config(fixed_lifecycle(0.0))).await;
    let pending = service
        .create_job(CreateJobRequest::new("Pending One", JobPriority::Regular))
        .unwrap();
    assert!(matches!(
        service.stop_job(pending.job_id),
        Err(JobError::InvalidState { status: JobStatus::Pending, .. })
    ));

    advance(10_000).await;
    assert!(matches!(
        service.stop_job(pending.job_id),
        Err(JobError::InvalidState { status: JobStatus::Failed, .. })
    ));

    service.restart_job(pending.job_id).unwrap();
    advance(4_000).await;
    service.stop_job(pending.job_id).unwrap();
    assert!(matches!(
        service.stop_job(pending.job_id),
        Err(JobError::InvalidState { status: JobStatus::Stopped, .. })
    ));

    let done = connected_service(config(fixed_lifecycle(1.0))).await;
    let job = done
        .create_job(CreateJobRequest::new("Done One", JobPriority::Regular))
        .unwrap();
    advance(10_000).await;
    assert!(matches!(
        done.stop_job(job.job_id),
        Err(JobError::InvalidState { status: JobStatus::Completed, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_restart_resets_run_data() {
    let service = connected_service(config(fixed_lifecycle(0.0))).await;
    let job = service
        .create_job(CreateJobRequest::new("Retry Me", JobPriority::High))
        .unwrap();
    advance(10_000).await;
    let failed = service.get_job(job.job_id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.is_some());

    let ack = service.restart_job(job.job_id).unwrap();
    assert!(ack.is_success);
    let reset = service.get_job(job.job_id).unwrap();
    assert_eq!(reset.status, JobStatus::Pending);
    assert_eq!(reset.progress, 0);
    assert_eq!(reset.started_at, 0);
    assert_eq!(reset.completed_at, 0);
    assert_eq!(reset.error_message, None);
    assert_eq!(reset.created_at, failed.created_at);
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic_and_clamped() {
    let service = connected_service(config(LifecycleConfig {
        success_rate: 1.0,
        ..LifecycleConfig::default()
    }))
    .await;
    let (_sub, mut events) = service.progress_updates();
    let job = service
        .create_job(CreateJobRequest::new("Climber", JobPriority::Regular))
        .unwrap();

    advance(200_000).await;
    let running: Vec<u8> = drain_for(&mut events, job.job_id)
        .into_iter()
        .filter(|u| u.status == JobStatus::Running)
        .map(|u| u.progress)
        .collect();
    assert!(!running.is_empty());
    assert!(running.windows(2).all(|w| w[0] <= w[1]));
    assert!(running.iter().all(|p| *p <= 100));
    assert_eq!(running.last(), Some(&100));
}

#[tokio::test(start_paused = true)]
async fn test_no_events_after_delete() {
    let service = connected_service(config(fixed_lifecycle(1.0))).await;
    let (_sub, mut events) = service.progress_updates();
    let job = service
        .create_job(CreateJobRequest::new("Short Lived", JobPriority::Regular))
        .unwrap();
    advance(4_100).await;
    service.stop_job(job.job_id).unwrap();
    service.delete_job(job.job_id).unwrap();
    assert!(service.get_job(job.job_id).is_none());

    advance(1).await;
    drain_for(&mut events, job.job_id);
    advance(120_000).await;
    assert!(drain_for(&mut events, job.job_id).is_empty());
    assert_eq!(service.job_stats().active_timelines, 0);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_delete_by_status() {
    let service = connected_service(config(fixed_lifecycle(0.0))).await;
    for name in ["Fail A", "Fail B", "Fail C"] {
        service
            .create_job(CreateJobRequest::new(name, JobPriority::Regular))
            .unwrap();
    }
    advance(10_000).await;
    let runner = service
        .create_job(CreateJobRequest::new("Still Running", JobPriority::Regular))
        .unwrap();
    advance(3_500).await;
    assert_eq!(service.status_counts().failed, 3);
    assert_eq!(service.get_job(runner.job_id).unwrap().status, JobStatus::Running);

    assert_eq!(
        service.delete_jobs_by_status(JobStatus::Running),
        Err(JobError::InvalidBulkStatus(JobStatus::Running))
    );
    assert_eq!(service.get_all_jobs().len(), 4);

    assert_eq!(service.delete_jobs_by_status(JobStatus::Failed), Ok(3));
    let remaining = service.get_all_jobs();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].job_id, runner.job_id);

    assert_eq!(
        service.delete_jobs_by_status(JobStatus::Completed),
        Err(JobError::NoMatches(JobStatus::Completed))
    );
}

#[tokio::test(start_paused = true)]
async fn test_five_failures_require_manual_reconnect() {
    let link = FlakyLink::new(5);
    let service = JobService::new(
        config(fixed_lifecycle(1.0)),
        link.clone(),
        Arc::new(ManualClock::new(T0)),
    )
    .unwrap();
    let states = Arc::new(std::sync::Mutex::new(Vec::new()));
    let s = Arc::clone(&states);
    service.on_connection_state_changed(move |state| s.lock().unwrap().push(state));

    assert!(service.start().await.is_err());
    advance(5 * 60_000).await;

    assert_eq!(link.attempts(), 5);
    assert_eq!(service.connection_stats().failed_attempts, 5);
    assert!(service.is_manual_reconnect_needed());
    assert!(!service.connection_stats().retry_pending);
    assert_eq!(service.connection_state(), ConnectionState::Disconnected);

    service.manual_reconnect().await.unwrap();
    assert_eq!(link.attempts(), 6);
    assert_eq!(service.connection_stats().failed_attempts, 0);
    assert!(!service.is_manual_reconnect_needed());
    assert_eq!(service.connection_state(), ConnectionState::Connected);

    let states = states.lock().unwrap();
    let connecting = states
        .iter()
        .filter(|s| **s == ConnectionState::Connecting)
        .count();
    assert_eq!(connecting, 6);
    assert_eq!(states.last(), Some(&ConnectionState::Connected));
}

#[tokio::test(start_paused = true)]
async fn test_offline_publishes_are_not_replayed() {
    let link = FlakyLink::new(0);
    let service = JobService::new(
        config(fixed_lifecycle(1.0)),
        link,
        Arc::new(ManualClock::new(T0)),
    )
    .unwrap();
    let (_sub, mut events) = service.progress_updates();
    let job = service
        .create_job(CreateJobRequest::new("Quiet Start", JobPriority::Regular))
        .unwrap();
    advance(1_500).await;
    assert!(drain_for(&mut events, job.job_id).is_empty());

    service.start().await.unwrap();
    advance(2_000).await;
    let seen: Vec<_> = drain_for(&mut events, job.job_id)
        .into_iter()
        .map(|u| u.status)
        .collect();
    assert_eq!(seen, vec![JobStatus::Running]);
}
