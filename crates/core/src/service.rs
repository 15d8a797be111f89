// crates/core/src/service.rs
//! Command and subscription surface consumed by the dashboard UI.
//!
//! [`JobService`] wires the pieces together: the connection manager's state
//! gates the progress bus, and the lifecycle engine publishes into that bus.
//! Nothing here is global; every collaborator is passed in or built from
//! [`DashboardConfig`].

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bus::{BusStats, ProgressEventBus};
use crate::clock::{Clock, SystemClock};
use crate::config::DashboardConfig;
use crate::connection::{ConnectionManager, ConnectionStats, Connector, SimulatedConnector};
use crate::engine::JobLifecycleEngine;
use crate::error::{ConfigError, JobError, TransportError};
use crate::rng::SharedRng;
use crate::seed::demo_jobs;
use crate::subscribers::Subscription;
use crate::types::{
    Ack, ConnectionState, CreateJobRequest, Job, JobId, JobProgressUpdate, JobStatus, StatusCounts,
};

/// Summary for the status cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total: usize,
    pub by_status: StatusCounts,
    pub active_timelines: usize,
}

pub struct JobService {
    engine: JobLifecycleEngine,
    bus: Arc<ProgressEventBus>,
    connection: Arc<ConnectionManager>,
    clock: Arc<dyn Clock>,
    rng: SharedRng,
    simulated_link: Option<Arc<SimulatedConnector>>,
}

impl JobService {
    /// Build a service over a caller-supplied transport and clock.
    pub fn new(
        config: DashboardConfig,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = SharedRng::from_seed(config.seed);
        Ok(Self::assemble(config, connector, clock, rng, None))
    }

    /// Build a service over the in-process [`SimulatedConnector`] and the
    /// system clock.
    pub fn simulated(config: DashboardConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = SharedRng::from_seed(config.seed);
        let link = Arc::new(SimulatedConnector::new(config.link.clone(), rng.clone()));
        let connector: Arc<dyn Connector> = link.clone();
        Ok(Self::assemble(
            config,
            connector,
            Arc::new(SystemClock),
            rng,
            Some(link),
        ))
    }

    fn assemble(
        config: DashboardConfig,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
        rng: SharedRng,
        simulated_link: Option<Arc<SimulatedConnector>>,
    ) -> Self {
        let connection = ConnectionManager::new(config.connection, connector, rng.clone());
        let bus = Arc::new(ProgressEventBus::new(
            config.bus,
            connection.watch_state(),
            rng.clone(),
        ));
        let engine = JobLifecycleEngine::new(
            config.lifecycle,
            Arc::clone(&bus),
            Arc::clone(&clock),
            rng.clone(),
        );
        Self {
            engine,
            bus,
            connection,
            clock,
            rng,
            simulated_link,
        }
    }

    // -- Job commands ---------------------------------------------------------

    pub fn create_job(&self, request: CreateJobRequest) -> Result<Job, JobError> {
        self.engine.create(&request.name, request.priority)
    }

    pub fn stop_job(&self, job_id: JobId) -> Result<Ack, JobError> {
        let job = self.engine.stop(job_id)?;
        Ok(Ack::success(format!("Job '{}' stopped", job.name)))
    }

    pub fn restart_job(&self, job_id: JobId) -> Result<Ack, JobError> {
        let job = self.engine.restart(job_id)?;
        Ok(Ack::success(format!("Job '{}' restarted", job.name)))
    }

    pub fn delete_job(&self, job_id: JobId) -> Result<(), JobError> {
        self.engine.delete(job_id).map(|_| ())
    }

    /// Returns how many jobs were removed.
    pub fn delete_jobs_by_status(&self, status: JobStatus) -> Result<usize, JobError> {
        self.engine.delete_by_status(status).map(|removed| removed.len())
    }

    /// Insert the demo jobs, skipping names that already exist. Returns the
    /// number inserted.
    pub fn seed_demo_jobs(&self) -> usize {
        let mut inserted = 0;
        for job in demo_jobs(&self.rng, self.clock.now_millis()) {
            match self.engine.adopt(job) {
                Ok(_) => inserted += 1,
                Err(err) => debug!(error = %err, "skipping demo job"),
            }
        }
        info!(inserted, "demo jobs seeded");
        inserted
    }

    // -- Job queries ----------------------------------------------------------

    pub fn get_all_jobs(&self) -> Vec<Job> {
        self.engine.jobs()
    }

    pub fn get_job(&self, job_id: JobId) -> Option<Job> {
        self.engine.job(job_id)
    }

    pub fn jobs_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.engine.jobs_by_status(status)
    }

    pub fn status_counts(&self) -> StatusCounts {
        self.engine.status_counts()
    }

    pub fn job_stats(&self) -> JobStats {
        let by_status = self.engine.status_counts();
        JobStats {
            total: by_status.total(),
            by_status,
            active_timelines: self.engine.active_timelines(),
        }
    }

    pub fn bus_stats(&self) -> BusStats {
        self.bus.stats()
    }

    // -- Progress subscriptions -----------------------------------------------

    pub fn on_progress_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(JobProgressUpdate) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    /// Channel-backed alternative to [`JobService::on_progress_update`].
    pub fn progress_updates(&self) -> (Subscription, mpsc::UnboundedReceiver<JobProgressUpdate>) {
        self.bus.subscribe_channel()
    }

    pub fn off_progress_update(&self, subscription: Subscription) -> bool {
        self.bus.unsubscribe(subscription)
    }

    // -- Connection -----------------------------------------------------------

    pub fn on_connection_state_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.connection.on_connection_state_changed(callback)
    }

    pub fn off_connection_state_changed(&self, subscription: Subscription) -> bool {
        self.connection.off_connection_state_changed(subscription)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.connection.stats()
    }

    pub fn is_manual_reconnect_needed(&self) -> bool {
        self.connection.is_manual_reconnect_needed()
    }

    pub async fn start(&self) -> Result<(), TransportError> {
        self.connection.start().await
    }

    /// Stop live updates and drop every progress and connection subscriber.
    pub async fn stop(&self) {
        self.connection.stop().await;
        self.bus.unsubscribe_all();
    }

    pub async fn manual_reconnect(&self) -> Result<(), TransportError> {
        self.connection.manual_reconnect().await
    }

    /// Force the simulated link to drop. Returns `false` for other transports.
    pub fn simulate_connection_loss(&self) -> bool {
        match &self.simulated_link {
            Some(link) => {
                link.simulate_connection_loss();
                true
            }
            None => false,
        }
    }

    /// Freeze every job, cancel in-flight deliveries and close the channel.
    pub async fn shutdown(&self) {
        self.engine.shutdown();
        self.stop().await;
        self.connection.shutdown();
        self.bus.shutdown();
        info!("job service shut down");
    }
}
