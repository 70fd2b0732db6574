//! Centralized configuration for Eventide.
//!
//! All tunable simulation parameters are defined here to avoid hard-coded
//! values scattered throughout the engine. Configuration is loaded from JSON
//! with kebab-case keys; every field has a default so that a partial file (or
//! no file at all) still yields a complete, runnable setup.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default simulation start: 2024-01-01T00:00:00Z.
const DEFAULT_START_EPOCH_SECS: i64 = 1_704_067_200;

/// Default simulation window length (one week).
const DEFAULT_WINDOW_SECS: i64 = 7 * 24 * 3600;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Weighted list {field} has no entries with positive weight")]
    EmptyWeights { field: &'static str },
}

/// Central configuration for all Eventide components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EventideConfig {
    pub simulation: SimulationConfig,
    pub ads: AdConfig,
    pub population: PopulationConfig,
    /// Page table: every state of the transition graph and its weight as a
    /// session entry point.
    #[serde(rename = "new-session")]
    pub pages: Vec<PageConfig>,
    pub transitions: Vec<TransitionConfig>,
    pub output: OutputConfig,
}

impl Default for EventideConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            ads: AdConfig::default(),
            population: PopulationConfig::default(),
            pages: default_pages(),
            transitions: default_transitions(),
            output: OutputConfig::default(),
        }
    }
}

/// Simulated time window, population size and pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SimulationConfig {
    /// Master seed; every RNG stream in a run derives from it
    pub seed: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Initial number of users
    pub n_users: usize,
    pub first_user_id: u64,
    /// Mean seconds between events inside a session
    pub alpha: f64,
    /// Mean seconds between sessions
    pub beta: f64,
    /// Coefficient of variation applied to alpha and beta per user
    pub pacing_jitter: f64,
    /// Minimum seconds between the end of a session and the next one
    pub session_gap: f64,
    /// Annual fraction of users that churn
    pub attrition_rate: f64,
    /// Annual fraction of `n-users` that join during the run
    pub growth_rate: f64,
    pub tag: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let start_time = DateTime::<Utc>::from_timestamp(DEFAULT_START_EPOCH_SECS, 0)
            .unwrap_or_default();
        let end_time =
            DateTime::<Utc>::from_timestamp(DEFAULT_START_EPOCH_SECS + DEFAULT_WINDOW_SECS, 0)
                .unwrap_or_default();

        Self {
            seed: 42,
            start_time,
            end_time,
            n_users: 100,
            first_user_id: 1,
            alpha: 60.0,
            beta: 43_200.0, // 12 hours
            pacing_jitter: 0.5,
            session_gap: 1_800.0, // 30 minutes
            attrition_rate: 0.2,
            growth_rate: 0.0,
            tag: None,
        }
    }
}

impl SimulationConfig {
    /// Length of the simulated window in seconds.
    pub fn window_secs(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

/// Ad insertion policy parameters. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AdConfig {
    /// Chance of an audio ad after each completed song
    pub audio_ad_frequency: f64,
    /// Chance of a pre-roll ad when new video content starts
    pub pre_roll_ad_frequency: f64,
    /// Minimum time since the previous ad before a pre-roll may play
    pub pre_roll_ad_cooldown: f64,
    /// Distance from a breakpoint within which a mid-roll is proposed
    pub mid_roll_ad_window: f64,
    pub ad_duration: f64,
    /// Chance that an impression is followed by another impression
    pub impression_continue_probability: f64,
    pub impression_dwell_min: f64,
    pub impression_dwell_max: f64,
    pub ad_end_dwell_min: f64,
    pub ad_end_dwell_max: f64,
    /// Spacing of generated breakpoints for videos that declare none
    pub breakpoint_interval: f64,
}

impl Default for AdConfig {
    fn default() -> Self {
        Self {
            audio_ad_frequency: 0.2,
            pre_roll_ad_frequency: 0.6,
            pre_roll_ad_cooldown: 60.0,
            mid_roll_ad_window: 30.0,
            ad_duration: 30.0,
            impression_continue_probability: 0.8,
            impression_dwell_min: 1.0,
            impression_dwell_max: 10.0,
            ad_end_dwell_min: 1.0,
            ad_end_dwell_max: 5.0,
            breakpoint_interval: 900.0, // 15 minutes
        }
    }
}

/// A named entry in a weighted list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub name: String,
    pub weight: u32,
}

impl Preference {
    pub fn new(name: &str, weight: u32) -> Self {
        Self {
            name: name.to_string(),
            weight,
        }
    }
}

/// Subscription tier with its share of the initial population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionChance {
    #[serde(rename = "type")]
    pub tier: String,
    pub chance: f64,
}

impl SubscriptionChance {
    /// Integer weight used for sampling (chance expressed in percent).
    pub fn weight(&self) -> u32 {
        (self.chance * 100.0).round().max(0.0) as u32
    }
}

/// Weighted attribute lists used to build the user population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PopulationConfig {
    pub levels: Vec<Preference>,
    pub auth_levels: Vec<Preference>,
    pub subscription_chances: Vec<SubscriptionChance>,
    pub genres: Vec<Preference>,
    pub device_types: Vec<String>,
    pub operating_systems: Vec<String>,
    /// Weight added to each genre of a watched video
    pub genre_preference_increment: u32,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            levels: vec![Preference::new("free", 70), Preference::new("paid", 30)],
            auth_levels: vec![
                Preference::new("Guest", 30),
                Preference::new("Logged In", 70),
            ],
            subscription_chances: vec![
                SubscriptionChance {
                    tier: "free".to_string(),
                    chance: 0.6,
                },
                SubscriptionChance {
                    tier: "basic".to_string(),
                    chance: 0.25,
                },
                SubscriptionChance {
                    tier: "premium".to_string(),
                    chance: 0.15,
                },
            ],
            genres: vec![
                Preference::new("Drama", 30),
                Preference::new("Comedy", 25),
                Preference::new("Action", 20),
                Preference::new("Romance", 10),
                Preference::new("Documentary", 10),
                Preference::new("Horror", 5),
            ],
            device_types: ["smartphone", "tablet", "desktop", "laptop"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            operating_systems: ["Android", "iOS", "Windows", "macOS", "Linux"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            genre_preference_increment: 1,
        }
    }
}

/// One page of the site, i.e. one state of the transition graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageConfig {
    pub page: String,
    pub method: String,
    pub status: u16,
    pub auth: String,
    pub level: String,
    /// Weight as a session entry point; zero means never an entry point
    #[serde(default)]
    pub weight: u32,
}

/// Identifies a page by name, auth status and user level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKeyConfig {
    pub page: String,
    pub auth: String,
    pub level: String,
}

/// Class of a transition edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    #[default]
    Lateral,
    Upgrade,
    Downgrade,
}

/// Probabilistic edge between two pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionConfig {
    pub source: StateKeyConfig,
    pub dest: StateKeyConfig,
    pub p: f64,
    #[serde(default)]
    pub kind: TransitionKind,
}

/// Output boundary settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Capacity of the channel between the scheduler and the sink writer
    pub buffer_capacity: usize,
    /// Number of scheduler shards; 1 runs a single scheduler
    pub shards: usize,
    /// Merge shard output into one timestamp-ordered stream
    pub ordered: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 8192,
            shards: 1,
            ordered: true,
        }
    }
}

impl EventideConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Io` - File cannot be read
    /// - `ConfigError::Parse` - File is not valid configuration JSON
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Parses configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Parse` - Input is not valid configuration JSON
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Creates configuration from defaults with environment variable overrides.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Invalid` - An override variable holds an unparseable value
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies `EVENTIDE_*` environment variable overrides in place.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Invalid` - An override variable holds an unparseable value
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(seed) = std::env::var("EVENTIDE_SEED") {
            self.simulation.seed = seed.parse().map_err(|_| ConfigError::Invalid {
                field: "EVENTIDE_SEED",
                reason: format!("not an unsigned integer: {seed}"),
            })?;
        }

        if let Ok(users) = std::env::var("EVENTIDE_USERS") {
            self.simulation.n_users = users.parse().map_err(|_| ConfigError::Invalid {
                field: "EVENTIDE_USERS",
                reason: format!("not an unsigned integer: {users}"),
            })?;
        }

        if let Ok(rate) = std::env::var("EVENTIDE_ATTRITION_RATE") {
            self.simulation.attrition_rate = rate.parse().map_err(|_| ConfigError::Invalid {
                field: "EVENTIDE_ATTRITION_RATE",
                reason: format!("not a number: {rate}"),
            })?;
        }

        if let Ok(start) = std::env::var("EVENTIDE_START_TIME") {
            self.simulation.start_time = parse_timestamp("EVENTIDE_START_TIME", &start)?;
        }

        if let Ok(end) = std::env::var("EVENTIDE_END_TIME") {
            self.simulation.end_time = parse_timestamp("EVENTIDE_END_TIME", &end)?;
        }

        Ok(())
    }

    /// Checks value ranges and weighted lists before a run starts.
    ///
    /// Graph-level problems (probability overflow, missing entry buckets) are
    /// detected when the transition graph is built from this configuration.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Invalid` - A value is out of range
    /// - `ConfigError::EmptyWeights` - A weighted list cannot be sampled
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if sim.end_time <= sim.start_time {
            return Err(ConfigError::Invalid {
                field: "simulation.end-time",
                reason: format!("{} is not after {}", sim.end_time, sim.start_time),
            });
        }
        require_positive("simulation.alpha", sim.alpha)?;
        require_positive("simulation.beta", sim.beta)?;
        require_non_negative("simulation.session-gap", sim.session_gap)?;
        require_non_negative("simulation.pacing-jitter", sim.pacing_jitter)?;
        require_non_negative("simulation.attrition-rate", sim.attrition_rate)?;
        require_non_negative("simulation.growth-rate", sim.growth_rate)?;

        let ads = &self.ads;
        require_probability("ads.audio-ad-frequency", ads.audio_ad_frequency)?;
        require_probability("ads.pre-roll-ad-frequency", ads.pre_roll_ad_frequency)?;
        require_probability(
            "ads.impression-continue-probability",
            ads.impression_continue_probability,
        )?;
        require_non_negative("ads.pre-roll-ad-cooldown", ads.pre_roll_ad_cooldown)?;
        require_non_negative("ads.mid-roll-ad-window", ads.mid_roll_ad_window)?;
        require_positive("ads.ad-duration", ads.ad_duration)?;
        require_positive("ads.breakpoint-interval", ads.breakpoint_interval)?;
        require_at_most("ads.mid-roll-ad-window", ads.mid_roll_ad_window, MAX_AD_TIMING_SECS)?;
        require_at_most("ads.ad-duration", ads.ad_duration, MAX_AD_TIMING_SECS)?;
        require_at_most("ads.breakpoint-interval", ads.breakpoint_interval, MAX_AD_TIMING_SECS)?;
        require_range(
            "ads.impression-dwell",
            ads.impression_dwell_min,
            ads.impression_dwell_max,
        )?;
        require_range("ads.ad-end-dwell", ads.ad_end_dwell_min, ads.ad_end_dwell_max)?;

        let population = &self.population;
        require_weights("population.levels", &population.levels)?;
        require_weights("population.auth-levels", &population.auth_levels)?;
        if population
            .subscription_chances
            .iter()
            .all(|chance| chance.weight() == 0)
        {
            return Err(ConfigError::EmptyWeights {
                field: "population.subscription-chances",
            });
        }
        if population.device_types.is_empty() {
            return Err(ConfigError::EmptyWeights {
                field: "population.device-types",
            });
        }
        if population.operating_systems.is_empty() {
            return Err(ConfigError::EmptyWeights {
                field: "population.operating-systems",
            });
        }

        if self.pages.is_empty() {
            return Err(ConfigError::EmptyWeights {
                field: "new-session",
            });
        }
        for transition in &self.transitions {
            require_probability("transitions.p", transition.p)?;
        }

        if self.output.shards == 0 {
            return Err(ConfigError::Invalid {
                field: "output.shards",
                reason: "at least one shard is required".to_string(),
            });
        }
        if self.output.buffer_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "output.buffer-capacity",
                reason: "channel capacity must be positive".to_string(),
            });
        }

        Ok(())
    }
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, ConfigError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| ConfigError::Invalid {
            field,
            reason: format!("not an RFC 3339 timestamp ({e}): {value}"),
        })
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be a positive number, got {value}"),
        })
    }
}

fn require_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be zero or positive, got {value}"),
        })
    }
}

fn require_probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be within [0, 1], got {value}"),
        })
    }
}

fn require_at_most(field: &'static str, value: f64, max: f64) -> Result<(), ConfigError> {
    if value <= max {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be at most {max}, got {value}"),
        })
    }
}

fn require_range(field: &'static str, min: f64, max: f64) -> Result<(), ConfigError> {
    require_non_negative(field, min)?;
    require_at_most(field, max, MAX_AD_TIMING_SECS)?;
    if max < min {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("max {max} is below min {min}"),
        });
    }
    Ok(())
}

fn require_weights(field: &'static str, items: &[Preference]) -> Result<(), ConfigError> {
    if items.iter().any(|item| item.weight > 0) {
        Ok(())
    } else {
        Err(ConfigError::EmptyWeights { field })
    }
}

/// Upper bound for ad durations, dwell times and breakpoint spacing, in seconds.
pub const MAX_AD_TIMING_SECS: f64 = 86_400.0;

const GUEST: &str = "Guest";
const LOGGED_IN: &str = "Logged In";
const LOGGED_OUT: &str = "Logged Out";
const LEVELS: [&str; 2] = ["free", "paid"];

fn page(page: &str, method: &str, status: u16, auth: &str, level: &str, weight: u32) -> PageConfig {
    PageConfig {
        page: page.to_string(),
        method: method.to_string(),
        status,
        auth: auth.to_string(),
        level: level.to_string(),
        weight,
    }
}

fn key(page: &str, auth: &str, level: &str) -> StateKeyConfig {
    StateKeyConfig {
        page: page.to_string(),
        auth: auth.to_string(),
        level: level.to_string(),
    }
}

fn edge(source: StateKeyConfig, dest: StateKeyConfig, p: f64, kind: TransitionKind) -> TransitionConfig {
    TransitionConfig {
        source,
        dest,
        p,
        kind,
    }
}

/// Page table of the built-in demo site.
fn default_pages() -> Vec<PageConfig> {
    let mut pages = Vec::new();
    for level in LEVELS {
        pages.push(page("Home", "GET", 200, GUEST, level, 10));
        pages.push(page("Browse", "GET", 200, GUEST, level, 5));
        pages.push(page("Register", "PUT", 200, GUEST, level, 0));

        pages.push(page("Login", "PUT", 307, LOGGED_IN, level, 0));
        pages.push(page("Home", "GET", 200, LOGGED_IN, level, 20));
        pages.push(page("Browse", "GET", 200, LOGGED_IN, level, 10));
        pages.push(page("PlayVideo", "GET", 200, LOGGED_IN, level, 5));
        pages.push(page("NextVideo", "GET", 200, LOGGED_IN, level, 0));
        pages.push(page("NextSong", "GET", 200, LOGGED_IN, level, 5));
        pages.push(page("Settings", "GET", 200, LOGGED_IN, level, 0));
        pages.push(page("Logout", "PUT", 307, LOGGED_OUT, level, 0));
    }
    pages.push(page("Submit Upgrade", "PUT", 307, LOGGED_IN, "free", 0));
    pages.push(page("Submit Downgrade", "PUT", 307, LOGGED_IN, "paid", 0));
    pages.push(page("Cancel Subscription", "PUT", 307, LOGGED_IN, "paid", 0));
    pages
}

/// Transition table of the built-in demo site.
fn default_transitions() -> Vec<TransitionConfig> {
    use TransitionKind::{Downgrade, Lateral, Upgrade};

    let mut transitions = Vec::new();
    for level in LEVELS {
        let guest = |name: &str| key(name, GUEST, level);
        let member = |name: &str| key(name, LOGGED_IN, level);

        transitions.push(edge(guest("Home"), guest("Browse"), 0.4, Lateral));
        transitions.push(edge(guest("Home"), guest("Register"), 0.1, Lateral));
        transitions.push(edge(guest("Home"), member("Login"), 0.2, Lateral));
        transitions.push(edge(guest("Browse"), guest("Home"), 0.4, Lateral));
        transitions.push(edge(guest("Browse"), guest("Register"), 0.05, Lateral));
        transitions.push(edge(guest("Browse"), member("Login"), 0.1, Lateral));
        transitions.push(edge(guest("Register"), member("Login"), 0.6, Lateral));

        transitions.push(edge(member("Login"), member("Home"), 1.0, Lateral));
        transitions.push(edge(member("Home"), member("Browse"), 0.3, Lateral));
        transitions.push(edge(member("Home"), member("PlayVideo"), 0.25, Lateral));
        transitions.push(edge(member("Home"), member("NextSong"), 0.15, Lateral));
        transitions.push(edge(member("Home"), member("Settings"), 0.05, Lateral));
        transitions.push(edge(member("Home"), key("Logout", LOGGED_OUT, level), 0.05, Lateral));
        transitions.push(edge(member("Browse"), member("PlayVideo"), 0.4, Lateral));
        transitions.push(edge(member("Browse"), member("NextSong"), 0.2, Lateral));
        transitions.push(edge(member("Browse"), member("Home"), 0.2, Lateral));
        transitions.push(edge(member("PlayVideo"), member("NextVideo"), 0.5, Lateral));
        transitions.push(edge(member("PlayVideo"), member("PlayVideo"), 0.2, Lateral));
        transitions.push(edge(member("PlayVideo"), member("Browse"), 0.15, Lateral));
        transitions.push(edge(member("PlayVideo"), member("Home"), 0.05, Lateral));
        transitions.push(edge(member("NextVideo"), member("NextVideo"), 0.5, Lateral));
        transitions.push(edge(member("NextVideo"), member("PlayVideo"), 0.1, Lateral));
        transitions.push(edge(member("NextVideo"), member("Home"), 0.2, Lateral));
        transitions.push(edge(member("NextSong"), member("NextSong"), 0.7, Lateral));
        transitions.push(edge(member("NextSong"), member("Home"), 0.1, Lateral));
        transitions.push(edge(member("NextSong"), member("Browse"), 0.05, Lateral));
        transitions.push(edge(member("Settings"), member("Home"), 0.5, Lateral));
        transitions.push(edge(key("Logout", LOGGED_OUT, level), guest("Home"), 0.6, Lateral));
    }

    let free = |name: &str| key(name, LOGGED_IN, "free");
    let paid = |name: &str| key(name, LOGGED_IN, "paid");
    transitions.push(edge(free("Settings"), free("Submit Upgrade"), 0.2, Upgrade));
    transitions.push(edge(free("Submit Upgrade"), paid("Home"), 1.0, Upgrade));
    transitions.push(edge(paid("Settings"), paid("Submit Downgrade"), 0.1, Downgrade));
    transitions.push(edge(paid("Settings"), paid("Cancel Subscription"), 0.05, Downgrade));
    transitions.push(edge(paid("Submit Downgrade"), free("Home"), 1.0, Downgrade));
    transitions.push(edge(paid("Cancel Subscription"), free("Home"), 1.0, Downgrade));
    transitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = EventideConfig::default();

        assert_eq!(config.simulation.seed, 42);
        assert_eq!(config.simulation.n_users, 100);
        assert_eq!(config.simulation.window_secs(), 7.0 * 24.0 * 3600.0);
        assert_eq!(config.ads.impression_continue_probability, 0.8);
        assert_eq!(config.output.shards, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let raw = r#"{
            "simulation": { "seed": 7, "n-users": 3, "start-time": "2024-03-01T00:00:00Z", "end-time": "2024-03-02T00:00:00Z" },
            "ads": { "pre-roll-ad-frequency": 1.0 }
        }"#;
        let config = EventideConfig::from_json_str(raw).unwrap();

        assert_eq!(config.simulation.seed, 7);
        assert_eq!(config.simulation.n_users, 3);
        assert_eq!(config.simulation.window_secs(), 86_400.0);
        assert_eq!(config.ads.pre_roll_ad_frequency, 1.0);
        assert_eq!(config.ads.mid_roll_ad_window, 30.0);
        assert_eq!(config.pages, default_pages());
    }

    #[test]
    fn test_transition_kind_defaults_to_lateral() {
        let raw = r#"{
            "transitions": [{
                "source": { "page": "Browse", "auth": "Guest", "level": "free" },
                "dest": { "page": "PlayVideo", "auth": "Guest", "level": "free" },
                "p": 1.0
            }]
        }"#;
        let config = EventideConfig::from_json_str(raw).unwrap();

        assert_eq!(config.transitions.len(), 1);
        assert_eq!(config.transitions[0].kind, TransitionKind::Lateral);
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let mut config = EventideConfig::default();
        config.simulation.end_time = config.simulation.start_time;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "simulation.end-time",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_probabilities() {
        let mut config = EventideConfig::default();
        config.ads.pre_roll_ad_frequency = 1.5;
        assert!(config.validate().is_err());

        let mut config = EventideConfig::default();
        config.transitions[0].p = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_weights() {
        let mut config = EventideConfig::default();
        config.population.auth_levels = vec![Preference::new("Guest", 0)];

        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyWeights {
                field: "population.auth-levels"
            })
        ));
    }

    #[test]
    fn test_validate_bounds_ad_timings() {
        let mut config = EventideConfig::default();
        config.ads.ad_duration = f64::INFINITY;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "ads.ad-duration",
                ..
            })
        ));

        let mut config = EventideConfig::default();
        config.ads.breakpoint_interval = 1.0e300;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "ads.breakpoint-interval",
                ..
            })
        ));

        let mut config = EventideConfig::default();
        config.ads.impression_dwell_max = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = EventideConfig::default();
        config.ads.ad_duration = MAX_AD_TIMING_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_subscription_chance_weight() {
        let chance = SubscriptionChance {
            tier: "basic".to_string(),
            chance: 0.25,
        };
        assert_eq!(chance.weight(), 25);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("EVENTIDE_SEED", "12345");
            std::env::set_var("EVENTIDE_USERS", "17");
            std::env::set_var("EVENTIDE_START_TIME", "2024-02-01T00:00:00Z");
        }

        let config = EventideConfig::from_env().unwrap();

        assert_eq!(config.simulation.seed, 12345);
        assert_eq!(config.simulation.n_users, 17);
        assert_eq!(
            config.simulation.start_time.to_rfc3339(),
            "2024-02-01T00:00:00+00:00"
        );

        unsafe {
            std::env::remove_var("EVENTIDE_SEED");
            std::env::remove_var("EVENTIDE_USERS");
            std::env::remove_var("EVENTIDE_START_TIME");
        }
    }
}
