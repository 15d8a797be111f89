// crates/core/src/lib.rs
pub mod bus;
pub mod clock;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod registry;
pub mod rng;
pub mod seed;
pub mod service;
pub mod subscribers;
pub mod timeline;
pub mod types;
pub mod validation;

pub use bus::{BusStats, ProgressEventBus, PublishOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use connection::{ConnectionManager, ConnectionStats, Connector, LinkId, SimulatedConnector};
pub use engine::{JobLifecycleEngine, FAILURE_MESSAGES};
pub use error::*;
pub use registry::JobRegistry;
pub use rng::SharedRng;
pub use service::{JobService, JobStats};
pub use subscribers::Subscription;
pub use timeline::Timeline;
pub use types::*;
pub use validation::{sanitize_job_name, validate_job_name};
