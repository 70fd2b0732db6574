//! Weighted random selection over a fixed population.
//!
//! Items are kept in insertion order next to their cumulative weights. A draw
//! picks a uniform integer in `[0, total)` and binary-searches the cumulative
//! table, so each sample costs O(log n). The first draw seals the sampler;
//! later insertions are rejected so that the distribution a stream samples
//! from can never change under it.

use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;

/// Errors raised by [`WeightedSampler`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SamplerError {
    #[error("Weight must be positive, got {weight}")]
    InvalidWeight { weight: u64 },

    #[error("Sampler is sealed; items cannot be added after sampling")]
    AlreadySealed,

    #[error("Sampler has no items to draw from")]
    EmptyPopulation,

    #[error("Total weight overflows when adding weight {weight} to {total}")]
    WeightOverflow { total: u64, weight: u64 },
}

/// Weighted population of `T`.
#[derive(Debug)]
pub struct WeightedSampler<T> {
    items: Vec<T>,
    cumulative: Vec<u64>,
    total: u64,
    sealed: AtomicBool,
}

impl<T> Default for WeightedSampler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WeightedSampler<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            cumulative: Vec::new(),
            total: 0,
            sealed: AtomicBool::new(false),
        }
    }

    /// Builds a sampler from `(value, weight)` pairs, keeping their order.
    ///
    /// # Errors
    ///
    /// - `SamplerError::InvalidWeight` - A weight is zero
    pub fn from_weighted<I>(entries: I) -> Result<Self, SamplerError>
    where
        I: IntoIterator<Item = (T, u64)>,
    {
        let mut sampler = Self::new();
        for (value, weight) in entries {
            sampler.add(value, weight)?;
        }
        Ok(sampler)
    }

    /// Appends `value` with `weight`.
    ///
    /// # Errors
    ///
    /// - `SamplerError::InvalidWeight` - Weight is zero
    /// - `SamplerError::AlreadySealed` - Sampling has already occurred
    /// - `SamplerError::WeightOverflow` - The total weight would exceed `u64::MAX`
    pub fn add(&mut self, value: T, weight: u64) -> Result<(), SamplerError> {
        if self.is_sealed() {
            return Err(SamplerError::AlreadySealed);
        }
        if weight == 0 {
            return Err(SamplerError::InvalidWeight { weight });
        }

        self.total = self
            .total
            .checked_add(weight)
            .ok_or(SamplerError::WeightOverflow {
                total: self.total,
                weight,
            })?;
        self.items.push(value);
        self.cumulative.push(self.total);
        Ok(())
    }

    /// Draws one item with probability proportional to its weight.
    ///
    /// # Errors
    ///
    /// - `SamplerError::EmptyPopulation` - No items were added
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&T, SamplerError> {
        self.sealed.store(true, Ordering::Release);
        if self.total == 0 {
            return Err(SamplerError::EmptyPopulation);
        }

        let draw = rng.random_range(0..self.total);
        let index = self.cumulative.partition_point(|&bound| bound <= draw);
        self.items.get(index).ok_or(SamplerError::EmptyPopulation)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.total
    }

    /// Items with their individual weights, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&T, u64)> {
        let mut previous = 0;
        self.items
            .iter()
            .zip(self.cumulative.iter())
            .map(move |(item, &bound)| {
                let weight = bound - previous;
                previous = bound;
                (item, weight)
            })
    }
}
