//! Deterministic primitives shared by the session engine.
//!
//! Simulated time is a logical quantity advanced by the scheduler, and all
//! randomness flows from seeded per-stream generators so that a run is fully
//! reproducible from its master seed.

mod clock;

pub use clock::{DeterministicRng, LogicalClock, SimTime};
