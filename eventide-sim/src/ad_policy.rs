//! Ad insertion rules and ad-sequence progression.
//!
//! The policy itself is stateless. The only state it touches is the session's
//! last-ad timestamp, passed in by reference and updated when a pre-roll is
//! granted.

use std::fmt;
use std::time::Duration;

use eventide_core::config::AdConfig;
use rand::RngCore;
use uuid::Uuid;

use crate::deterministic::{DeterministicRng, SimTime};

/// Placement of an ad relative to the content it accompanies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdType {
    PreRoll,
    MidRoll,
    PostRoll,
}

impl AdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdType::PreRoll => "pre-roll",
            AdType::MidRoll => "mid-roll",
            AdType::PostRoll => "post-roll",
        }
    }
}

impl fmt::Display for AdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of the embedded ad chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdStep {
    Start,
    Impression,
    End,
}

impl AdStep {
    /// Page name logged for this step.
    pub fn page(&self) -> &'static str {
        match self {
            AdStep::Start => "AdStart",
            AdStep::Impression => "AdImpression",
            AdStep::End => "AdEnd",
        }
    }
}

/// An ad being played inside a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ad {
    pub id: Uuid,
    pub ad_type: AdType,
    pub duration: Duration,
    pub start_time: SimTime,
}

/// Saturates instead of panicking on values a `Duration` cannot hold.
fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Ad eligibility and pacing rules.
#[derive(Debug, Clone)]
pub struct AdPolicy {
    config: AdConfig,
    ad_supported_tier: String,
}

impl AdPolicy {
    pub fn new(config: AdConfig, ad_supported_tier: &str) -> Self {
        Self {
            config,
            ad_supported_tier: ad_supported_tier.to_string(),
        }
    }

    pub fn config(&self) -> &AdConfig {
        &self.config
    }

    /// Only the ad-supported tier is shown ads.
    pub fn is_ad_supported(&self, tier: &str) -> bool {
        tier == self.ad_supported_tier
    }

    /// Decides whether new video content starts with a pre-roll.
    ///
    /// Requires the cooldown since the previous ad to have elapsed and a
    /// successful draw against the pre-roll frequency. On success
    /// `last_ad_time` is set to `now`.
    pub fn should_insert_pre_roll(
        &self,
        tier: &str,
        last_ad_time: &mut Option<SimTime>,
        now: SimTime,
        rng: &mut DeterministicRng,
    ) -> bool {
        if !self.is_ad_supported(tier) {
            return false;
        }
        let cooled_down = match *last_ad_time {
            None => true,
            Some(last) => now.secs_since(last) >= self.config.pre_roll_ad_cooldown,
        };
        if !cooled_down || !rng.chance(self.config.pre_roll_ad_frequency) {
            return false;
        }

        *last_ad_time = Some(now);
        true
    }

    /// Index of the breakpoint within the mid-roll window of `offset`, if any.
    ///
    /// Purely a function of its inputs; no randomness is involved.
    pub fn mid_roll_breakpoint(&self, tier: &str, offset: Duration, breakpoints: &[Duration]) -> Option<usize> {
        if !self.is_ad_supported(tier) {
            return None;
        }
        let window = secs_to_duration(self.config.mid_roll_ad_window);
        breakpoints
            .iter()
            .position(|&breakpoint| offset.abs_diff(breakpoint) <= window)
    }

    pub fn should_insert_mid_roll(&self, tier: &str, offset: Duration, breakpoints: &[Duration]) -> bool {
        self.mid_roll_breakpoint(tier, offset, breakpoints).is_some()
    }

    /// Draw for an audio ad after a completed song.
    pub fn should_insert_audio_ad(&self, tier: &str, rng: &mut DeterministicRng) -> bool {
        self.is_ad_supported(tier) && rng.chance(self.config.audio_ad_frequency)
    }

    /// Creates an ad with an identifier drawn from the session stream.
    pub fn new_ad(&self, ad_type: AdType, now: SimTime, rng: &mut DeterministicRng) -> Ad {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        Ad {
            id: uuid::Builder::from_random_bytes(bytes).into_uuid(),
            ad_type,
            duration: secs_to_duration(self.config.ad_duration),
            start_time: now,
        }
    }

    /// Next step of the ad chain and the dwell before it, or `None` after
    /// `AdEnd`.
    pub fn next_step(&self, step: AdStep, rng: &mut DeterministicRng) -> Option<(AdStep, Duration)> {
        let dwell = self.impression_dwell(rng);
        match step {
            AdStep::Start => Some((AdStep::Impression, dwell)),
            AdStep::Impression => {
                if rng.chance(self.config.impression_continue_probability) {
                    Some((AdStep::Impression, dwell))
                } else {
                    Some((AdStep::End, dwell))
                }
            }
            AdStep::End => None,
        }
    }

    /// Dwell between impressions.
    pub fn impression_dwell(&self, rng: &mut DeterministicRng) -> Duration {
        let secs = rng.uniform_f64(self.config.impression_dwell_min, self.config.impression_dwell_max);
        secs_to_duration(secs)
    }

    /// Dwell between `AdEnd` and resumed content.
    pub fn end_dwell(&self, rng: &mut DeterministicRng) -> Duration {
        let secs = rng.uniform_f64(self.config.ad_end_dwell_min, self.config.ad_end_dwell_max);
        secs_to_duration(secs)
    }
}
