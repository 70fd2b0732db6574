//! User population: attribute sampling and subscription tiers.

use std::collections::BTreeMap;

use eventide_core::config::{EventideConfig, Preference, SubscriptionChance};
use rand_distr::{Distribution, LogNormal};

use crate::content::SubscriptionChange;
use crate::deterministic::DeterministicRng;
use crate::sampler::{SamplerError, WeightedSampler};

/// Largest random factor applied to a configured genre weight.
const GENRE_FACTOR_MAX: u64 = 10;

/// Ordered subscription tiers, ad-supported tier first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionLadder {
    tiers: Vec<String>,
}

impl SubscriptionLadder {
    pub fn new(tiers: Vec<String>) -> Self {
        Self { tiers }
    }

    pub fn from_config(chances: &[SubscriptionChance]) -> Self {
        let mut tiers: Vec<String> = Vec::with_capacity(chances.len());
        for chance in chances {
            if !tiers.contains(&chance.tier) {
                tiers.push(chance.tier.clone());
            }
        }
        Self { tiers }
    }

    /// The tier that is shown ads.
    pub fn ad_supported(&self) -> &str {
        self.tiers.first().map_or("free", String::as_str)
    }

    pub fn tiers(&self) -> &[String] {
        &self.tiers
    }

    fn rung(&self, tier: &str) -> Option<usize> {
        self.tiers.iter().position(|candidate| candidate == tier)
    }

    /// Tier after applying `change` to `tier`. Unknown tiers are left as is,
    /// except for cancellation which always lands on the first rung.
    pub fn apply(&self, change: SubscriptionChange, tier: &str) -> String {
        let top = self.tiers.len().saturating_sub(1);
        let next = match (change, self.rung(tier)) {
            (SubscriptionChange::Cancel, _) => Some(0),
            (SubscriptionChange::Upgrade, Some(rung)) => Some((rung + 1).min(top)),
            (SubscriptionChange::Downgrade, Some(rung)) => Some(rung.saturating_sub(1)),
            (_, None) => None,
        };
        next.and_then(|rung| self.tiers.get(rung))
            .cloned()
            .unwrap_or_else(|| tier.to_string())
    }
}

/// Attributes of a simulated user that sessions read and update.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: u64,
    pub auth: String,
    pub level: String,
    pub tier: String,
    pub device_type: String,
    pub device_os: String,
    /// Mean seconds between events inside a session
    pub alpha: f64,
    /// Mean seconds between sessions
    pub beta: f64,
    pub genre_preferences: BTreeMap<String, u64>,
}

/// Samples user profiles from the configured weighted lists.
#[derive(Debug)]
pub struct PopulationBuilder {
    levels: WeightedSampler<String>,
    auth_levels: WeightedSampler<String>,
    paid_tiers: WeightedSampler<String>,
    genres: Vec<Preference>,
    device_types: Vec<String>,
    operating_systems: Vec<String>,
    ladder: SubscriptionLadder,
    alpha: f64,
    beta: f64,
    pacing_jitter: f64,
}

impl PopulationBuilder {
    /// # Errors
    ///
    /// - `SamplerError` - Never for validated configuration; zero weights are skipped
    pub fn from_config(config: &EventideConfig) -> Result<Self, SamplerError> {
        let population = &config.population;
        let ladder = SubscriptionLadder::from_config(&population.subscription_chances);

        let paid_tiers = WeightedSampler::from_weighted(
            population
                .subscription_chances
                .iter()
                .filter(|chance| chance.tier != ladder.ad_supported() && chance.weight() > 0)
                .map(|chance| (chance.tier.clone(), u64::from(chance.weight()))),
        )?;

        Ok(Self {
            levels: weighted_names(&population.levels)?,
            auth_levels: weighted_names(&population.auth_levels)?,
            paid_tiers,
            genres: population.genres.clone(),
            device_types: population.device_types.clone(),
            operating_systems: population.operating_systems.clone(),
            ladder,
            alpha: config.simulation.alpha,
            beta: config.simulation.beta,
            pacing_jitter: config.simulation.pacing_jitter,
        })
    }

    pub fn ladder(&self) -> &SubscriptionLadder {
        &self.ladder
    }

    /// Draws the attributes of user `user_id` from its own stream.
    ///
    /// # Errors
    ///
    /// - `SamplerError::EmptyPopulation` - Levels or auth levels have no positive weight
    pub fn build_profile(&self, user_id: u64, rng: &mut DeterministicRng) -> Result<UserProfile, SamplerError> {
        let level = self.levels.sample(rng)?.clone();
        let auth = self.auth_levels.sample(rng)?.clone();

        let tier = if level == self.ladder.ad_supported() {
            level.clone()
        } else {
            match self.paid_tiers.sample(rng) {
                Ok(tier) => tier.clone(),
                Err(_) => level.clone(),
            }
        };

        let device_type = rng.choose(&self.device_types).cloned().unwrap_or_default();
        let device_os = rng.choose(&self.operating_systems).cloned().unwrap_or_default();

        let alpha = jittered(self.alpha, self.pacing_jitter, rng);
        let beta = jittered(self.beta, self.pacing_jitter, rng);

        let genre_preferences = self
            .genres
            .iter()
            .map(|genre| {
                let factor = rng.uniform_f64(1.0, (GENRE_FACTOR_MAX + 1) as f64).floor() as u64;
                let factor = factor.clamp(1, GENRE_FACTOR_MAX);
                (genre.name.clone(), u64::from(genre.weight) * factor)
            })
            .collect();

        Ok(UserProfile {
            user_id,
            auth,
            level,
            tier,
            device_type,
            device_os,
            alpha,
            beta,
            genre_preferences,
        })
    }
}

fn weighted_names(items: &[Preference]) -> Result<WeightedSampler<String>, SamplerError> {
    WeightedSampler::from_weighted(
        items
            .iter()
            .filter(|item| item.weight > 0)
            .map(|item| (item.name.clone(), u64::from(item.weight))),
    )
}

/// Log-normal draw with the given mean and coefficient of variation.
fn jittered(mean: f64, cv: f64, rng: &mut DeterministicRng) -> f64 {
    if cv <= 0.0 {
        return mean;
    }
    let sigma_squared = (1.0 + cv * cv).ln();
    let mu = mean.ln() - sigma_squared / 2.0;
    match LogNormal::new(mu, sigma_squared.sqrt()) {
        Ok(distribution) => distribution.sample(rng),
        Err(_) => mean,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> SubscriptionLadder {
        SubscriptionLadder::new(vec![
            "free".to_string(),
            "basic".to_string(),
            "premium".to_string(),
        ])
    }

    #[test]
    fn test_ladder_moves_one_rung() {
        let ladder = ladder();

        assert_eq!(ladder.apply(SubscriptionChange::Upgrade, "free"), "basic");
        assert_eq!(ladder.apply(SubscriptionChange::Upgrade, "premium"), "premium");
        assert_eq!(ladder.apply(SubscriptionChange::Downgrade, "premium"), "basic");
        assert_eq!(ladder.apply(SubscriptionChange::Downgrade, "free"), "free");
        assert_eq!(ladder.apply(SubscriptionChange::Cancel, "premium"), "free");
        assert_eq!(ladder.apply(SubscriptionChange::Upgrade, "gold"), "gold");
    }

    #[test]
    fn test_ladder_from_config_keeps_order() {
        let config = EventideConfig::default();
        let ladder = SubscriptionLadder::from_config(&config.population.subscription_chances);

        assert_eq!(ladder.ad_supported(), "free");
        assert_eq!(ladder.tiers().len(), 3);
    }

    #[test]
    fn test_free_level_users_get_free_tier() {
        let mut config = EventideConfig::default();
        config.population.levels = vec![Preference::new("free", 1)];
        let builder = PopulationBuilder::from_config(&config).unwrap();
        let mut rng = DeterministicRng::from_seed(5);

        for user_id in 0..20 {
            let profile = builder.build_profile(user_id, &mut rng).unwrap();
            assert_eq!(profile.tier, "free");
            assert_eq!(profile.level, "free");
        }
    }

    #[test]
    fn test_paid_level_users_get_paid_tier() {
        let mut config = EventideConfig::default();
        config.population.levels = vec![Preference::new("paid", 1)];
        let builder = PopulationBuilder::from_config(&config).unwrap();
        let mut rng = DeterministicRng::from_seed(6);

        for user_id in 0..20 {
            let profile = builder.build_profile(user_id, &mut rng).unwrap();
            assert!(profile.tier == "basic" || profile.tier == "premium");
        }
    }

    #[test]
    fn test_profiles_are_reproducible() {
        let config = EventideConfig::default();
        let builder = PopulationBuilder::from_config(&config).unwrap();

        let first = builder
            .build_profile(3, &mut DeterministicRng::for_stream(42, 3))
            .unwrap();
        let second = builder
            .build_profile(3, &mut DeterministicRng::for_stream(42, 3))
            .unwrap();

        assert_eq!(first, second);
        assert!(first.alpha > 0.0 && first.beta > 0.0);
        assert_eq!(first.genre_preferences.len(), config.population.genres.len());
    }

    #[test]
    fn test_genre_weights_scaled_within_factor_range() {
        let config = EventideConfig::default();
        let builder = PopulationBuilder::from_config(&config).unwrap();
        let mut rng = DeterministicRng::from_seed(8);

        let profile = builder.build_profile(1, &mut rng).unwrap();
        for genre in &config.population.genres {
            let weight = profile.genre_preferences[&genre.name];
            let base = u64::from(genre.weight);
            assert!(weight >= base && weight <= base * GENRE_FACTOR_MAX);
        }
    }

    #[test]
    fn test_zero_jitter_keeps_mean() {
        let mut rng = DeterministicRng::from_seed(1);
        assert_eq!(jittered(60.0, 0.0, &mut rng), 60.0);
    }
}
