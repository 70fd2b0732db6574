//! Logical time and random number generation for deterministic simulations.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp1};

use crate::SimulationError;

/// Golden-ratio increment used to spread per-stream seeds.
const STREAM_SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Simulated instant in epoch milliseconds.
///
/// Millisecond resolution matches the `ts` field of emitted events, so a
/// timestamp survives serialization without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(i64);

impl SimTime {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    pub fn from_datetime(timestamp: DateTime<Utc>) -> Self {
        Self(timestamp.timestamp_millis())
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.0)
    }

    /// Adds a non-negative number of seconds, rounded to the millisecond.
    pub fn add_secs(self, secs: f64) -> Self {
        let millis = (secs.max(0.0) * 1000.0).round();
        Self(self.0.saturating_add(millis as i64))
    }

    /// Subtracts a non-negative number of seconds, rounded to the millisecond.
    pub fn sub_secs(self, secs: f64) -> Self {
        let millis = (secs.max(0.0) * 1000.0).round();
        Self(self.0.saturating_sub(millis as i64))
    }

    pub fn add_duration(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later.
    pub fn duration_since(self, earlier: SimTime) -> Duration {
        let millis = self.0.saturating_sub(earlier.0).max(0);
        Duration::from_millis(millis as u64)
    }

    /// Signed seconds between `earlier` and `self`.
    pub fn secs_since(self, earlier: SimTime) -> f64 {
        self.0.saturating_sub(earlier.0) as f64 / 1000.0
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(timestamp) => write!(f, "{}", timestamp.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Logical clock driven by the scheduler rather than wall-clock time.
///
/// Time only moves forward; the scheduler advances it to the timestamp of
/// each event it pops.
#[derive(Debug, Clone)]
pub struct LogicalClock {
    start: SimTime,
    now: SimTime,
}

impl LogicalClock {
    pub fn new(start: SimTime) -> Self {
        Self { start, now: start }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn start(&self) -> SimTime {
        self.start
    }

    pub fn elapsed(&self) -> Duration {
        self.now.duration_since(self.start)
    }

    /// Advances the clock to `target`.
    ///
    /// # Errors
    ///
    /// - `SimulationError::InvalidEventScheduling` - If target time is in the past
    pub fn advance_to(&mut self, target: SimTime) -> Result<(), SimulationError> {
        if target < self.now {
            return Err(SimulationError::InvalidEventScheduling {
                reason: format!("cannot move clock back from {} to {}", self.now, target),
            });
        }
        self.now = target;
        Ok(())
    }
}

/// Deterministic random number generator for reproducible simulations.
///
/// Wraps ChaCha8; every user, session and shard owns its own stream derived
/// from the master seed, so results do not depend on thread scheduling.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
    seed: u64,
}

impl DeterministicRng {
    /// Creates deterministic RNG from seed value.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// Independent stream for `stream_id` (user ID, shard index) under `master_seed`.
    pub fn for_stream(master_seed: u64, stream_id: u64) -> Self {
        Self::from_seed(master_seed ^ stream_id.wrapping_add(1).wrapping_mul(STREAM_SEED_MIX))
    }

    /// Derives a child stream, advancing this one by a single draw.
    pub fn fork(&mut self) -> Self {
        Self::from_seed(self.rng.next_u64())
    }

    /// Returns the seed used for this RNG.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generates random number in range [0, 1).
    pub fn random_f64(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Returns true with the given probability.
    pub fn chance(&mut self, probability: f64) -> bool {
        self.random_f64() < probability
    }

    /// Uniform draw in [min, max]; returns `min` when the range is empty.
    pub fn uniform_f64(&mut self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        min + (max - min) * self.random_f64()
    }

    /// Exponentially distributed value with the given mean.
    pub fn exponential(&mut self, mean: f64) -> f64 {
        let unit: f64 = Exp1.sample(&mut self.rng);
        unit * mean
    }

    /// Selects random element from slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            slice.get(self.rng.random_range(0..slice.len()))
        }
    }
}

impl RngCore for DeterministicRng {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.rng.fill_bytes(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_time_second_arithmetic() {
        let start = SimTime::from_millis(1_000);

        assert_eq!(start.add_secs(1.5).as_millis(), 2_500);
        assert_eq!(start.sub_secs(0.25).as_millis(), 750);
        assert_eq!(start.add_secs(-3.0), start);
        assert_eq!(start.add_secs(2.0).secs_since(start), 2.0);
        assert_eq!(start.secs_since(start.add_secs(2.0)), -2.0);
        assert!(SimTime::from_millis(i64::MIN).secs_since(SimTime::from_millis(1)) < 0.0);
        assert!(SimTime::from_millis(i64::MAX).secs_since(SimTime::from_millis(-1)) > 0.0);
        assert_eq!(start.duration_since(start.add_secs(5.0)), Duration::ZERO);
    }

    #[test]
    fn test_sim_time_datetime_round_trip() {
        let timestamp = DateTime::parse_from_rfc3339("2024-01-01T00:00:00.123Z")
            .unwrap()
            .with_timezone(&Utc);
        let time = SimTime::from_datetime(timestamp);

        assert_eq!(time.as_millis(), 1_704_067_200_123);
        assert_eq!(time.to_datetime(), Some(timestamp));
    }

    #[test]
    fn test_clock_cannot_go_backwards() {
        let mut clock = LogicalClock::new(SimTime::from_millis(10_000));
        clock.advance_to(SimTime::from_millis(15_000)).unwrap();

        let result = clock.advance_to(SimTime::from_millis(12_000));

        assert!(matches!(
            result,
            Err(SimulationError::InvalidEventScheduling { .. })
        ));
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_deterministic_rng_reproducibility() {
        let mut rng1 = DeterministicRng::from_seed(12345);
        let mut rng2 = DeterministicRng::from_seed(12345);

        let values1: Vec<f64> = (0..10).map(|_| rng1.exponential(60.0)).collect();
        let values2: Vec<f64> = (0..10).map(|_| rng2.exponential(60.0)).collect();

        assert_eq!(values1, values2);
        assert!(values1.iter().all(|value| *value >= 0.0));
    }

    #[test]
    fn test_streams_are_independent() {
        let mut first = DeterministicRng::for_stream(7, 1);
        let mut second = DeterministicRng::for_stream(7, 2);

        assert_ne!(first.seed(), second.seed());
        assert_ne!(first.next_u64(), second.next_u64());
        assert_eq!(
            DeterministicRng::for_stream(7, 1).seed(),
            DeterministicRng::for_stream(7, 1).seed()
        );
    }

    #[test]
    fn test_exponential_mean_converges() {
        let mut rng = DeterministicRng::from_seed(99);
        let draws = 50_000;
        let mean = (0..draws).map(|_| rng.exponential(30.0)).sum::<f64>() / draws as f64;

        assert!((mean - 30.0).abs() < 1.0, "sample mean {mean}");
    }

    #[test]
    fn test_uniform_bounds() {
        let mut rng = DeterministicRng::from_seed(3);
        for _ in 0..1_000 {
            let value = rng.uniform_f64(1.0, 10.0);
            assert!((1.0..=10.0).contains(&value));
        }
        assert_eq!(rng.uniform_f64(5.0, 5.0), 5.0);
    }
}
