// crates/cli/src/main.rs
//! jobpulse demo binary.
//!
//! Runs the simulated job subsystem for a fixed duration, logging every
//! progress event and connection transition, then prints a status summary.

mod args;
mod demo;
mod observability;

use anyhow::Result;
use clap::Parser;

use crate::args::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    observability::init_tracing(args.log_format);
    demo::run(&args).await
}
