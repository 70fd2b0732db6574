//! Read-only simulation context shared by every scheduler and session.

use eventide_core::catalog::Catalog;
use eventide_core::config::{EventideConfig, SimulationConfig};

use crate::SimulationError;
use crate::ad_policy::AdPolicy;
use crate::deterministic::SimTime;
use crate::graph::TransitionGraph;
use crate::population::{PopulationBuilder, SubscriptionLadder};

/// Everything built once from configuration before the first event.
#[derive(Debug)]
pub struct SimulationContext {
    simulation: SimulationConfig,
    graph: TransitionGraph,
    catalog: Catalog,
    policy: AdPolicy,
    population: PopulationBuilder,
    genre_increment: u64,
    start: SimTime,
    end: SimTime,
}

impl SimulationContext {
    /// Validates `config` and builds the graph, samplers and ad policy.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Config` - Configuration values are out of range
    /// - `SimulationError::Graph` - Page or transition tables are inconsistent
    /// - `SimulationError::Sampler` - A weighted list cannot be sampled
    /// - `SimulationError::Configuration` - Growth is requested for an empty population
    pub fn new(config: &EventideConfig, catalog: Catalog) -> Result<Self, SimulationError> {
        config.validate()?;
        if config.simulation.growth_rate > 0.0 && config.simulation.n_users == 0 {
            return Err(SimulationError::Configuration {
                reason: "growth-rate is relative to n-users, which is zero".to_string(),
            });
        }

        let graph = TransitionGraph::from_config(config)?;
        let population = PopulationBuilder::from_config(config)?;
        let policy = AdPolicy::new(config.ads.clone(), population.ladder().ad_supported());

        if catalog.is_empty() {
            tracing::warn!("Catalog is empty; content pages will be logged as plain page views");
        }

        Ok(Self {
            simulation: config.simulation.clone(),
            graph,
            catalog,
            policy,
            population,
            genre_increment: u64::from(config.population.genre_preference_increment),
            start: SimTime::from_datetime(config.simulation.start_time),
            end: SimTime::from_datetime(config.simulation.end_time),
        })
    }

    pub fn simulation(&self) -> &SimulationConfig {
        &self.simulation
    }

    pub fn graph(&self) -> &TransitionGraph {
        &self.graph
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn policy(&self) -> &AdPolicy {
        &self.policy
    }

    pub fn population(&self) -> &PopulationBuilder {
        &self.population
    }

    pub fn ladder(&self) -> &SubscriptionLadder {
        self.population.ladder()
    }

    pub fn genre_increment(&self) -> u64 {
        self.genre_increment
    }

    pub fn seed(&self) -> u64 {
        self.simulation.seed
    }

    pub fn start(&self) -> SimTime {
        self.start
    }

    pub fn end(&self) -> SimTime {
        self.end
    }
}
