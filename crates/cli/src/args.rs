// crates/cli/src/args.rs
use clap::{Parser, ValueEnum};
use jobpulse_core::DashboardConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Drive a simulated job dashboard and log its live updates.
#[derive(Parser, Debug)]
#[command(name = "jobpulse", version, about, long_about = None)]
pub struct Args {
    /// Number of jobs to create at startup
    #[arg(short = 'n', long, default_value_t = 5)]
    pub jobs: usize,

    /// Also insert the twelve demo jobs
    #[arg(long)]
    pub seed_demo: bool,

    /// Seconds to run before printing the summary
    #[arg(short = 'd', long = "duration", default_value_t = 60)]
    pub duration_secs: u64,

    /// Seed for every random draw (reproducible runs)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Probability that a job reaching 100% completes instead of failing
    #[arg(long)]
    pub success_rate: Option<f64>,

    /// Probability that a progress event is lost in transit
    #[arg(long)]
    pub packet_loss: Option<f64>,

    /// Consecutive connection failures before auto-retry stops
    #[arg(long)]
    pub max_failed_attempts: Option<u32>,

    /// Progress tick interval in milliseconds
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Reconnect by hand once auto-retry gives up
    #[arg(long)]
    pub auto_manual_reconnect: bool,

    /// Print the final job list as JSON instead of a status table
    #[arg(long)]
    pub json_summary: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Args {
    /// Apply command-line overrides on top of `config`.
    pub fn apply(&self, config: &mut DashboardConfig) {
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(rate) = self.success_rate {
            config.lifecycle.success_rate = rate;
        }
        if let Some(rate) = self.packet_loss {
            config.bus.packet_loss_rate = rate;
        }
        if let Some(max) = self.max_failed_attempts {
            config.connection.max_failed_attempts = max;
        }
        if let Some(ms) = self.tick_ms {
            config.lifecycle.progress_tick_interval_ms = ms;
        }
    }
}
