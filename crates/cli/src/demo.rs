// crates/cli/src/demo.rs
//! Simulation run: create jobs, follow live updates, print a summary.

use std::time::Duration;

use anyhow::{Context, Result};
use jobpulse_core::{
    CreateJobRequest, DashboardConfig, Job, JobPriority, JobService, JobStatus, StatusCounts,
};
use tracing::{info, warn};

use crate::args::Args;

/// How often the driver checks whether auto-retry has given up.
const RECONNECT_CHECK_INTERVAL: Duration = Duration::from_secs(15);

pub async fn run(args: &Args) -> Result<()> {
    let mut config = DashboardConfig::from_env();
    args.apply(&mut config);
    let service = JobService::simulated(config).context("invalid dashboard configuration")?;

    service.on_connection_state_changed(|state| info!(%state, "live updates state changed"));
    let (_subscription, mut updates) = service.progress_updates();

    if let Err(err) = service.start().await {
        warn!(error = %err, "initial connection failed, retrying in background");
    }

    if args.seed_demo {
        service.seed_demo_jobs();
    }
    for i in 1..=args.jobs {
        let priority = if i % 3 == 0 {
            JobPriority::High
        } else {
            JobPriority::Regular
        };
        service
            .create_job(CreateJobRequest::new(format!("Demo Job {i}"), priority))
            .with_context(|| format!("creating demo job {i}"))?;
    }

    let deadline = tokio::time::sleep(Duration::from_secs(args.duration_secs));
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(deadline, interrupted);
    let mut reconnect_check = tokio::time::interval(RECONNECT_CHECK_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = &mut interrupted => {
                info!("interrupted, shutting down");
                break;
            }
            Some(update) = updates.recv() => {
                info!(
                    job_id = %update.job_id,
                    status = update.status.label(),
                    progress = update.progress,
                    "progress update"
                );
            }
            _ = reconnect_check.tick() => {
                if args.auto_manual_reconnect && service.is_manual_reconnect_needed() {
                    warn!("auto-retry exhausted, reconnecting manually");
                    if let Err(err) = service.manual_reconnect().await {
                        warn!(error = %err, "manual reconnect failed");
                    }
                }
            }
        }
    }

    let jobs = service.get_all_jobs();
    let stats = service.job_stats();
    let bus = service.bus_stats();
    let connection = service.connection_stats();
    service.shutdown().await;

    info!(
        published = bus.published,
        dropped_offline = bus.dropped_offline,
        lost = bus.lost,
        failed_attempts = connection.failed_attempts,
        "run finished"
    );

    if args.json_summary {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
    } else {
        print!("{}", render_summary(&jobs, &stats.by_status));
    }
    Ok(())
}

fn render_summary(jobs: &[Job], counts: &StatusCounts) -> String {
    let mut out = String::new();
    for job in jobs {
        out.push_str(&format!(
            "{:<32} {:<10} {:>3}%  {}\n",
            job.name,
            job.status.label(),
            job.progress,
            job.error_message.as_deref().unwrap_or("")
        ));
    }
    out.push('\n');
    for status in JobStatus::ALL {
        out.push_str(&format!("{:<10} {}\n", status.label(), counts.get(status)));
    }
    out.push_str(&format!("{:<10} {}\n", "total", counts.total()));
    out
}
