//! Logical-clock scheduler.
//!
//! Every active user sits in a min-heap keyed by the time of its session's
//! next event. The loop pops the earliest user, advances the clock to that
//! instant, emits one event and re-queues the user. Nothing here waits on the
//! wall clock, so a week of simulated traffic runs as fast as the engine can
//! produce it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

use eventide_core::sink::EventSink;

use crate::SimulationError;
use crate::context::SimulationContext;
use crate::deterministic::{DeterministicRng, LogicalClock, SimTime};
use crate::encoder;
use crate::ids::IdGenerator;
use crate::report::SimulationReport;
use crate::session::SessionEvent;
use crate::user::{SECONDS_PER_YEAR, SessionOutcome, User};

/// Emitted events between progress log lines.
const PROGRESS_INTERVAL: u64 = 100_000;

/// RNG stream reserved for the arrival process.
const ARRIVAL_STREAM: u64 = u64::MAX;

/// Which users a scheduler owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardAssignment {
    pub index: usize,
    pub count: usize,
}

impl ShardAssignment {
    pub const SINGLE: ShardAssignment = ShardAssignment { index: 0, count: 1 };

    pub fn new(index: usize, count: usize) -> Self {
        Self {
            index,
            count: count.max(1),
        }
    }

    pub fn owns(&self, user_id: u64) -> bool {
        user_id % self.count as u64 == self.index as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    time: SimTime,
    user_id: u64,
    slot: usize,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior; ties go to the lower user ID
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.user_id.cmp(&self.user_id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Poisson arrivals of new users.
#[derive(Debug)]
struct ArrivalProcess {
    rng: DeterministicRng,
    mean_gap_secs: f64,
    next_at: SimTime,
    next_user_id: u64,
}

impl ArrivalProcess {
    fn from_context(ctx: &SimulationContext) -> Option<Self> {
        let sim = ctx.simulation();
        let per_year = sim.growth_rate * sim.n_users as f64;
        if per_year <= 0.0 {
            return None;
        }

        let mean_gap_secs = SECONDS_PER_YEAR / per_year;
        let mut rng = DeterministicRng::for_stream(ctx.seed(), ARRIVAL_STREAM);
        let next_at = ctx.start().add_secs(rng.exponential(mean_gap_secs));
        Some(Self {
            rng,
            mean_gap_secs,
            next_at,
            next_user_id: sim.first_user_id + sim.n_users as u64,
        })
    }

    fn pop(&mut self) -> (SimTime, u64) {
        let arrival = (self.next_at, self.next_user_id);
        self.next_at = self.next_at.add_secs(self.rng.exponential(self.mean_gap_secs));
        self.next_user_id += 1;
        arrival
    }
}

/// Drives the users of one shard through simulated time.
#[derive(Debug)]
pub struct Scheduler {
    ctx: Arc<SimulationContext>,
    shard: ShardAssignment,
    users: Vec<User>,
    queue: BinaryHeap<QueueEntry>,
    clock: LogicalClock,
    ids: IdGenerator,
    arrivals: Option<ArrivalProcess>,
    report: SimulationReport,
}

impl Scheduler {
    /// Scheduler owning every configured user.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Sampler` - A user profile cannot be drawn
    /// - `SimulationError::Graph` - A user has no entry states
    pub fn new(ctx: Arc<SimulationContext>) -> Result<Self, SimulationError> {
        Self::for_shard(ctx, ShardAssignment::SINGLE)
    }

    /// Scheduler owning the users with `user_id % count == index`.
    ///
    /// Session IDs are strided by the shard count so shards never collide.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Sampler` - A user profile cannot be drawn
    /// - `SimulationError::Graph` - A user has no entry states
    pub fn for_shard(ctx: Arc<SimulationContext>, shard: ShardAssignment) -> Result<Self, SimulationError> {
        let ids = IdGenerator::strided(1 + shard.index as u64, shard.count as u64);
        let arrivals = ArrivalProcess::from_context(&ctx);
        let mut report = SimulationReport::new(ctx.seed());
        report.shards = shard.count;

        let mut scheduler = Self {
            clock: LogicalClock::new(ctx.start()),
            ctx,
            shard,
            users: Vec::new(),
            queue: BinaryHeap::new(),
            ids,
            arrivals,
            report,
        };

        let first = scheduler.ctx.simulation().first_user_id;
        let count = scheduler.ctx.simulation().n_users as u64;
        for user_id in (first..first + count).filter(|id| shard.owns(*id)) {
            scheduler.admit_user(user_id, None)?;
        }

        tracing::debug!(
            shard = shard.index,
            users = scheduler.users.len(),
            "Population ready"
        );
        Ok(scheduler)
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn report(&self) -> &SimulationReport {
        &self.report
    }

    /// Runs until the next event would fall after the simulation end.
    ///
    /// Events before the simulation start advance state but are not written.
    /// Encoding and sink failures are logged and counted; the run continues.
    ///
    /// # Errors
    ///
    /// - `SimulationError::InvalidEventScheduling` - An event was scheduled in the past
    /// - `SimulationError::Graph` - A follow-up session has no entry states
    pub fn run(&mut self, sink: &mut dyn EventSink) -> Result<SimulationReport, SimulationError> {
        let wall = Instant::now();
        let end = self.ctx.end();
        let origin = self
            .queue
            .peek()
            .map_or(self.ctx.start(), |entry| entry.time.min(self.ctx.start()));
        self.clock = LogicalClock::new(origin);

        tracing::info!(
            shard = self.shard.index,
            users = self.users.len(),
            start = %self.ctx.start(),
            end = %end,
            "Simulation starting"
        );

        loop {
            self.admit_arrivals()?;
            let Some(entry) = self.queue.pop() else {
                break;
            };
            if entry.time > end {
                self.queue.push(entry);
                break;
            }

            self.clock.advance_to(entry.time)?;
            self.step(entry, sink)?;
        }

        if let Err(error) = sink.flush() {
            tracing::warn!(error = %error, "Failed to flush sink");
        }

        self.report.wall_time = wall.elapsed();
        tracing::info!(
            shard = self.shard.index,
            events = self.report.events_emitted,
            dropped = self.report.events_dropped,
            failed = self.report.events_failed,
            churned = self.report.churned_users,
            "Simulation finished in {:.2?}",
            self.report.wall_time
        );
        Ok(self.report.clone())
    }

    fn step(&mut self, entry: QueueEntry, sink: &mut dyn EventSink) -> Result<(), SimulationError> {
        let ctx = Arc::clone(&self.ctx);
        let event = self.users[entry.slot].advance(&ctx);
        let now = event.as_ref().map_or(entry.time, |event| event.ts);
        if let Some(event) = &event {
            self.emit(event, sink);
        }

        let user = &mut self.users[entry.slot];
        if user.session_is_done() {
            self.report.sessions_finished += 1;
            match user.on_session_finished(now, &ctx, &self.ids)? {
                SessionOutcome::Continued { .. } => self.report.sessions_started += 1,
                SessionOutcome::Churned => self.report.churned_users += 1,
            }
        }

        if let Some(time) = user.next_event_time() {
            self.queue.push(QueueEntry {
                time,
                user_id: user.id(),
                slot: entry.slot,
            });
        }
        Ok(())
    }

    fn emit(&mut self, event: &SessionEvent, sink: &mut dyn EventSink) {
        if event.ts < self.ctx.start() {
            self.report.warm_up_events += 1;
            return;
        }

        let message = match encoder::encode(event) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(user_id = event.user_id, error = %error, "Dropping event");
                self.report.events_dropped += 1;
                return;
            }
        };

        match sink.write_message(&message) {
            Ok(()) => {
                self.report.record_emitted(message.topic, event.ts);
                if self.report.events_emitted % PROGRESS_INTERVAL == 0 {
                    tracing::info!(
                        shard = self.shard.index,
                        events = self.report.events_emitted,
                        sim_time = %event.ts,
                        "Progress"
                    );
                }
            }
            Err(error) => {
                tracing::warn!(
                    user_id = event.user_id,
                    session_id = event.session_id,
                    error = %error,
                    "Sink rejected event"
                );
                self.report.events_failed += 1;
            }
        }
    }

    /// Admits every arrival due no later than the earliest queued event.
    fn admit_arrivals(&mut self) -> Result<(), SimulationError> {
        let end = self.ctx.end();
        let horizon = self.queue.peek().map_or(end, |entry| entry.time.min(end));
        let Some(arrivals) = self.arrivals.as_mut() else {
            return Ok(());
        };

        let mut due = Vec::new();
        while arrivals.next_at <= horizon {
            due.push(arrivals.pop());
        }

        for (at, user_id) in due {
            if self.shard.owns(user_id) {
                self.admit_user(user_id, Some(at))?;
            }
        }
        Ok(())
    }

    /// Creates user `user_id` and queues its first session. Initial users are
    /// warm-up seeded; arrivals start exactly at `arrival`.
    fn admit_user(&mut self, user_id: u64, arrival: Option<SimTime>) -> Result<(), SimulationError> {
        let mut rng = DeterministicRng::for_stream(self.ctx.seed(), user_id);
        let profile = self.ctx.population().build_profile(user_id, &mut rng)?;
        let mut user = User::new(profile, rng);

        match arrival {
            None => {
                user.start_first_session(&self.ctx, &self.ids)?;
                self.report.initial_users += 1;
            }
            Some(at) => {
                user.begin_session(at, &self.ctx, &self.ids)?;
                self.report.arrived_users += 1;
                tracing::debug!(user_id, at = %at, "User arrived");
            }
        }
        self.report.sessions_started += 1;

        if let Some(time) = user.next_event_time() {
            self.queue.push(QueueEntry {
                time,
                user_id,
                slot: self.users.len(),
            });
        }
        self.users.push(user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use eventide_core::catalog::Catalog;
    use eventide_core::config::EventideConfig;
    use eventide_core::sink::MemorySink;

    use super::*;

    fn context(config: &EventideConfig) -> Arc<SimulationContext> {
        Arc::new(SimulationContext::new(config, Catalog::demo(Duration::from_secs(900))).unwrap())
    }

    fn small_config() -> EventideConfig {
        let mut config = EventideConfig::default();
        config.simulation.n_users = 5;
        config.simulation.end_time = config.simulation.start_time + chrono::Duration::days(1);
        config
    }

    #[test]
    fn test_queue_entry_min_heap_order() {
        let mut heap = BinaryHeap::new();
        for (time, user_id) in [(30, 1), (10, 2), (10, 1), (20, 3)] {
            heap.push(QueueEntry {
                time: SimTime::from_millis(time),
                user_id,
                slot: 0,
            });
        }

        let order: Vec<(i64, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|entry| (entry.time.as_millis(), entry.user_id))
            .collect();
        assert_eq!(order, [(10, 1), (10, 2), (20, 3), (30, 1)]);
    }

    #[test]
    fn test_shard_assignment() {
        let shard = ShardAssignment::new(1, 3);
        assert!(shard.owns(4));
        assert!(!shard.owns(5));
        assert!(ShardAssignment::SINGLE.owns(17));
    }

    #[test]
    fn test_events_are_time_ordered_and_in_window() {
        let config = small_config();
        let ctx = context(&config);
        let mut scheduler = Scheduler::new(Arc::clone(&ctx)).unwrap();
        let mut sink = MemorySink::new();

        let report = scheduler.run(&mut sink).unwrap();

        let messages = sink.messages();
        assert_eq!(messages.len() as u64, report.events_emitted);
        assert!(!messages.is_empty());
        for pair in messages.windows(2) {
            assert!(pair[0].ts <= pair[1].ts);
        }
        assert!(messages.first().unwrap().ts >= ctx.start().as_millis());
        assert!(messages.last().unwrap().ts <= ctx.end().as_millis());
        assert_eq!(report.initial_users, 5);
    }

    #[test]
    fn test_warm_up_events_are_not_written() {
        let mut config = small_config();
        config.simulation.n_users = 20;
        let ctx = context(&config);
        let mut scheduler = Scheduler::new(Arc::clone(&ctx)).unwrap();
        let mut sink = MemorySink::new();

        let report = scheduler.run(&mut sink).unwrap();

        assert!(report.warm_up_events > 0);
        assert!(sink.messages().iter().all(|message| message.ts >= ctx.start().as_millis()));
        assert_eq!(report.events_dropped, 0);
        assert_eq!(report.events_failed, 0);
    }

    #[test]
    fn test_growth_adds_users() {
        let mut config = small_config();
        config.simulation.n_users = 10;
        config.simulation.growth_rate = 1_000.0;
        let mut scheduler = Scheduler::new(context(&config)).unwrap();

        let report = scheduler.run(&mut MemorySink::new()).unwrap();

        assert!(report.arrived_users > 0);
        assert!(scheduler.users().iter().any(|user| user.id() > 10));
    }

    #[test]
    fn test_shards_partition_users() {
        let config = small_config();
        let ctx = context(&config);

        let ids: Vec<Vec<u64>> = (0..2)
            .map(|index| {
                let scheduler = Scheduler::for_shard(Arc::clone(&ctx), ShardAssignment::new(index, 2)).unwrap();
                scheduler.users().iter().map(User::id).collect()
            })
            .collect();

        assert_eq!(ids[0], [2, 4]);
        assert_eq!(ids[1], [1, 3, 5]);
    }
}
