//! Eventide session engine.
//!
//! Synthesizes the event log of a streaming-media service: a population of
//! users, each chaining sessions over simulated time, each session walking a
//! probabilistic page graph and emitting page views, logins, plays, ads and
//! subscription changes.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use eventide_core::catalog::Catalog;
//! use eventide_core::config::EventideConfig;
//! use eventide_core::sink::ConsoleSink;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EventideConfig::default();
//! let catalog = Catalog::demo(Duration::from_secs_f64(config.ads.breakpoint_interval));
//!
//! let report = eventide_sim::run_simulation(&config, catalog, &mut ConsoleSink)?;
//! eprintln!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Deterministic primitives**: logical clock and seeded per-stream RNGs
//! - **Graph**: page states in an arena with probabilistic transitions
//! - **Sessions and users**: the per-visit state machine and the session
//!   lifecycle with churn
//! - **Scheduler**: a priority queue over users in simulated-time order,
//!   optionally sharded across threads

#![warn(clippy::missing_errors_doc)]
#![warn(clippy::missing_panics_doc)]

pub mod ad_policy;
pub mod content;
pub mod context;
pub mod deterministic;
pub mod encoder;
pub mod graph;
pub mod ids;
pub mod population;
pub mod report;
pub mod sampler;
pub mod scheduler;
pub mod session;
pub mod shard;
pub mod user;

use std::sync::Arc;

use eventide_core::catalog::Catalog;
use eventide_core::config::{ConfigError, EventideConfig};
use eventide_core::sink::EventSink;

pub use ad_policy::{Ad, AdPolicy, AdStep, AdType};
pub use content::{Content, MediaType, PageKind, SubscriptionChange};
pub use context::SimulationContext;
pub use deterministic::{DeterministicRng, LogicalClock, SimTime};
pub use encoder::EncodeError;
pub use graph::{GraphError, State, StateId, StateKey, TransitionGraph};
pub use ids::IdGenerator;
pub use population::{PopulationBuilder, SubscriptionLadder, UserProfile};
pub use report::SimulationReport;
pub use sampler::{SamplerError, WeightedSampler};
pub use scheduler::{Scheduler, ShardAssignment};
pub use session::{NextEventType, Session, SessionEvent, SessionEventKind, SessionPhase};
pub use shard::{ShardOptions, default_shards, run_sharded};
pub use user::{SessionOutcome, User};

/// Errors that stop a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Sampler error: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Transition graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Invalid event scheduling: {reason}")]
    InvalidEventScheduling { reason: String },

    #[error("Shard {shard} failed: {reason}")]
    ShardFailed { shard: usize, reason: String },
}

impl SimulationError {
    /// True for errors caused by the supplied configuration rather than the
    /// engine.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SimulationError::Config(_)
                | SimulationError::Configuration { .. }
                | SimulationError::Sampler(_)
                | SimulationError::Graph(_)
        )
    }
}

/// Builds the context for `config` and runs it into `sink`, sharded per the
/// configured output options.
///
/// # Errors
///
/// - `SimulationError::Config` - Configuration fails validation
/// - `SimulationError::Graph` - Page or transition tables are inconsistent
/// - Any error raised while running
pub fn run_simulation(
    config: &EventideConfig,
    catalog: Catalog,
    sink: &mut dyn EventSink,
) -> Result<SimulationReport, SimulationError> {
    let ctx = Arc::new(SimulationContext::new(config, catalog)?);
    run_sharded(ctx, ShardOptions::from_config(&config.output), sink)
}
