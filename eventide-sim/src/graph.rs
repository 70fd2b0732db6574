//! Page transition graph.
//!
//! States live in a flat arena addressed by [`StateId`]. Each state keeps
//! three adjacency lists (lateral, upgrade, downgrade) whose probabilities
//! together never exceed one; the remaining mass is the chance that the
//! session ends at that state. Initial states are drawn from per-(auth, level)
//! weighted buckets.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use eventide_core::config::{EventideConfig, PageConfig, StateKeyConfig, TransitionKind};

use crate::deterministic::DeterministicRng;
use crate::sampler::{SamplerError, WeightedSampler};

/// Tolerance for accumulated floating-point error in outgoing mass.
const PROBABILITY_EPSILON: f64 = 1e-9;

/// Errors raised while building or querying the graph.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("Outgoing probability of {state} would reach {total}, exceeding 1.0")]
    ProbabilityOverflow { state: StateKey, total: f64 },

    #[error("Transition probability must be within [0, 1], got {probability}")]
    InvalidProbability { probability: f64 },

    #[error("Unknown state: {state}")]
    UnknownState { state: String },

    #[error("State already registered: {state}")]
    DuplicateState { state: StateKey },

    #[error("No initial states for auth {auth:?} and level {level:?}")]
    NoStatesForBucket { auth: String, level: String },

    #[error("Initial state sampler error: {0}")]
    Sampler(#[from] SamplerError),
}

/// Index of a state in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(usize);

impl StateId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Identity of a state: page name, auth status and user level.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey {
    pub page: String,
    pub auth: String,
    pub level: String,
}

impl StateKey {
    pub fn new(page: &str, auth: &str, level: &str) -> Self {
        Self {
            page: page.to_string(),
            auth: auth.to_string(),
            level: level.to_string(),
        }
    }
}

impl From<&StateKeyConfig> for StateKey {
    fn from(key: &StateKeyConfig) -> Self {
        Self::new(&key.page, &key.auth, &key.level)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.page, self.auth, self.level)
    }
}

/// A page of the simulated site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub page: String,
    pub method: String,
    pub status: u16,
    pub auth: String,
    pub level: String,
}

impl State {
    pub fn new(page: &str, method: &str, status: u16, auth: &str, level: &str) -> Self {
        Self {
            page: page.to_string(),
            method: method.to_string(),
            status,
            auth: auth.to_string(),
            level: level.to_string(),
        }
    }

    pub fn key(&self) -> StateKey {
        StateKey::new(&self.page, &self.auth, &self.level)
    }

    /// The client follows a 3xx page after a fixed one-second delay.
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

impl From<&PageConfig> for State {
    fn from(page: &PageConfig) -> Self {
        Self::new(&page.page, &page.method, page.status, &page.auth, &page.level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Edge {
    target: StateId,
    probability: f64,
}

#[derive(Debug)]
struct Node {
    state: State,
    lateral: Vec<Edge>,
    upgrade: Vec<Edge>,
    downgrade: Vec<Edge>,
    outgoing: f64,
}

impl Node {
    fn edges(&self, kind: TransitionKind) -> &Vec<Edge> {
        match kind {
            TransitionKind::Lateral => &self.lateral,
            TransitionKind::Upgrade => &self.upgrade,
            TransitionKind::Downgrade => &self.downgrade,
        }
    }

    fn edges_mut(&mut self, kind: TransitionKind) -> &mut Vec<Edge> {
        match kind {
            TransitionKind::Lateral => &mut self.lateral,
            TransitionKind::Upgrade => &mut self.upgrade,
            TransitionKind::Downgrade => &mut self.downgrade,
        }
    }
}

/// Walk order of the combined outgoing table.
const KIND_ORDER: [TransitionKind; 3] = [
    TransitionKind::Lateral,
    TransitionKind::Upgrade,
    TransitionKind::Downgrade,
];

/// Directed graph of pages with probabilistic edges.
///
/// Built once from configuration and shared read-only by every session.
#[derive(Debug, Default)]
pub struct TransitionGraph {
    nodes: Vec<Node>,
    index: HashMap<StateKey, StateId>,
    initial: BTreeMap<(String, String), WeightedSampler<StateId>>,
}

impl TransitionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from the page and transition tables.
    ///
    /// Every combination of configured auth level and user level with a
    /// positive weight must have at least one entry state.
    ///
    /// # Errors
    ///
    /// - `GraphError::DuplicateState` - A page is listed twice
    /// - `GraphError::UnknownState` - A transition references an unlisted page
    /// - `GraphError::ProbabilityOverflow` - Outgoing mass of a page exceeds 1.0
    /// - `GraphError::NoStatesForBucket` - An (auth, level) pair has no entry state
    pub fn from_config(config: &EventideConfig) -> Result<Self, GraphError> {
        let mut graph = Self::new();

        for page in &config.pages {
            graph.add_state(State::from(page), u64::from(page.weight))?;
        }

        for transition in &config.transitions {
            let source = graph.require(&StateKey::from(&transition.source))?;
            let dest = graph.require(&StateKey::from(&transition.dest))?;
            graph.add_transition(source, dest, transition.p, transition.kind)?;
        }

        let population = &config.population;
        for auth in population.auth_levels.iter().filter(|a| a.weight > 0) {
            for level in population.levels.iter().filter(|l| l.weight > 0) {
                if !graph.has_bucket(&auth.name, &level.name) {
                    return Err(GraphError::NoStatesForBucket {
                        auth: auth.name.clone(),
                        level: level.name.clone(),
                    });
                }
            }
        }

        tracing::debug!(
            states = graph.len(),
            transitions = config.transitions.len(),
            buckets = graph.initial.len(),
            "Transition graph built"
        );

        Ok(graph)
    }

    /// Registers a state with its weight as a session entry point.
    ///
    /// A zero weight registers the state without making it an entry point.
    ///
    /// # Errors
    ///
    /// - `GraphError::DuplicateState` - A state with the same key exists
    /// - `GraphError::Sampler` - The entry bucket was already sampled from
    pub fn add_state(&mut self, state: State, initial_weight: u64) -> Result<StateId, GraphError> {
        let key = state.key();
        if self.index.contains_key(&key) {
            return Err(GraphError::DuplicateState { state: key });
        }

        let id = StateId(self.nodes.len());
        if initial_weight > 0 {
            self.initial
                .entry((state.auth.clone(), state.level.clone()))
                .or_default()
                .add(id, initial_weight)?;
        }

        self.index.insert(key, id);
        self.nodes.push(Node {
            state,
            lateral: Vec::new(),
            upgrade: Vec::new(),
            downgrade: Vec::new(),
            outgoing: 0.0,
        });
        Ok(id)
    }

    /// Adds an edge `from -> to`.
    ///
    /// # Errors
    ///
    /// - `GraphError::InvalidProbability` - Probability outside [0, 1]
    /// - `GraphError::UnknownState` - Either endpoint is not in the graph
    /// - `GraphError::ProbabilityOverflow` - Outgoing mass of `from` would exceed 1.0
    pub fn add_transition(
        &mut self,
        from: StateId,
        to: StateId,
        probability: f64,
        kind: TransitionKind,
    ) -> Result<(), GraphError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(GraphError::InvalidProbability { probability });
        }
        if to.0 >= self.nodes.len() {
            return Err(GraphError::UnknownState {
                state: format!("#{}", to.0),
            });
        }

        let node = self.nodes.get_mut(from.0).ok_or(GraphError::UnknownState {
            state: format!("#{}", from.0),
        })?;

        let total = node.outgoing + probability;
        if total > 1.0 + PROBABILITY_EPSILON {
            return Err(GraphError::ProbabilityOverflow {
                state: node.state.key(),
                total,
            });
        }

        node.outgoing = total;
        node.edges_mut(kind).push(Edge {
            target: to,
            probability,
        });
        Ok(())
    }

    /// Draws the successor of `current`, or `None` when the session ends.
    ///
    /// The draw walks lateral, then upgrade, then downgrade edges in insertion
    /// order and returns the first edge whose cumulative mass exceeds it.
    pub fn next_state(&self, current: StateId, rng: &mut DeterministicRng) -> Option<StateId> {
        let node = self.nodes.get(current.0)?;
        let draw = rng.random_f64();

        let mut cumulative = 0.0;
        for kind in KIND_ORDER {
            for edge in node.edges(kind) {
                cumulative += edge.probability;
                if cumulative > draw {
                    return Some(edge.target);
                }
            }
        }
        None
    }

    /// Draws an entry state for a session of a user with `auth` and `level`.
    ///
    /// # Errors
    ///
    /// - `GraphError::NoStatesForBucket` - No entry states for this combination
    pub fn initial_state(
        &self,
        auth: &str,
        level: &str,
        rng: &mut DeterministicRng,
    ) -> Result<StateId, GraphError> {
        let bucket = self
            .initial
            .get(&(auth.to_string(), level.to_string()))
            .ok_or_else(|| GraphError::NoStatesForBucket {
                auth: auth.to_string(),
                level: level.to_string(),
            })?;
        Ok(*bucket.sample(rng)?)
    }

    pub fn has_bucket(&self, auth: &str, level: &str) -> bool {
        self.initial
            .contains_key(&(auth.to_string(), level.to_string()))
    }

    /// # Panics
    ///
    /// Panics if `id` was not produced by this graph.
    pub fn state(&self, id: StateId) -> &State {
        &self.nodes[id.0].state
    }

    pub fn get(&self, id: StateId) -> Option<&State> {
        self.nodes.get(id.0).map(|node| &node.state)
    }

    pub fn lookup(&self, key: &StateKey) -> Option<StateId> {
        self.index.get(key).copied()
    }

    fn require(&self, key: &StateKey) -> Result<StateId, GraphError> {
        self.lookup(key).ok_or_else(|| GraphError::UnknownState {
            state: key.to_string(),
        })
    }

    /// Total outgoing probability of `id`; one minus this is the chance the
    /// session ends there.
    pub fn outgoing_probability(&self, id: StateId) -> f64 {
        self.nodes.get(id.0).map_or(0.0, |node| node.outgoing)
    }

    /// Outgoing edges of `id` in walk order.
    pub fn transitions(&self, id: StateId) -> Vec<(StateId, f64, TransitionKind)> {
        let Some(node) = self.nodes.get(id.0) else {
            return Vec::new();
        };
        KIND_ORDER
            .iter()
            .flat_map(|&kind| {
                node.edges(kind)
                    .iter()
                    .map(move |edge| (edge.target, edge.probability, kind))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
