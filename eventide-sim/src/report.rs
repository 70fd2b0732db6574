//! Run statistics.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use eventide_core::events::Topic;

use crate::deterministic::SimTime;

/// Counters gathered by a scheduler, merged across shards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationReport {
    pub seed: u64,
    pub shards: usize,
    pub initial_users: u64,
    pub arrived_users: u64,
    pub churned_users: u64,
    pub sessions_started: u64,
    pub sessions_finished: u64,
    /// Events handed to the sink successfully
    pub events_emitted: u64,
    /// Events that could not be serialized
    pub events_dropped: u64,
    /// Events the sink rejected
    pub events_failed: u64,
    /// Events before the simulation start, not written
    pub warm_up_events: u64,
    pub events_by_topic: BTreeMap<Topic, u64>,
    pub first_event: Option<SimTime>,
    pub last_event: Option<SimTime>,
    pub wall_time: Duration,
}

impl SimulationReport {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            shards: 1,
            ..Self::default()
        }
    }

    pub(crate) fn record_emitted(&mut self, topic: Topic, ts: SimTime) {
        self.events_emitted += 1;
        *self.events_by_topic.entry(topic).or_insert(0) += 1;
        self.first_event = Some(self.first_event.map_or(ts, |first| first.min(ts)));
        self.last_event = Some(self.last_event.map_or(ts, |last| last.max(ts)));
    }

    /// Reclassifies emitted events that a downstream sink rejected.
    pub(crate) fn record_sink_failures(&mut self, failed: u64) {
        self.events_emitted = self.events_emitted.saturating_sub(failed);
        self.events_failed += failed;
    }

    /// Adds the counters of another shard.
    pub fn merge(&mut self, other: &SimulationReport) {
        self.initial_users += other.initial_users;
        self.arrived_users += other.arrived_users;
        self.churned_users += other.churned_users;
        self.sessions_started += other.sessions_started;
        self.sessions_finished += other.sessions_finished;
        self.events_emitted += other.events_emitted;
        self.events_dropped += other.events_dropped;
        self.events_failed += other.events_failed;
        self.warm_up_events += other.warm_up_events;
        for (topic, count) in &other.events_by_topic {
            *self.events_by_topic.entry(*topic).or_insert(0) += count;
        }
        self.first_event = match (self.first_event, other.first_event) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_event = match (self.last_event, other.last_event) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.wall_time = self.wall_time.max(other.wall_time);
    }

    pub fn total_users(&self) -> u64 {
        self.initial_users + self.arrived_users
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        writeln!(out, "seed:               {}", self.seed).ok();
        writeln!(out, "shards:             {}", self.shards).ok();
        writeln!(
            out,
            "users:              {} ({} initial, {} arrived, {} churned)",
            self.total_users(),
            self.initial_users,
            self.arrived_users,
            self.churned_users
        )
        .ok();
        writeln!(
            out,
            "sessions:           {} started, {} finished",
            self.sessions_started, self.sessions_finished
        )
        .ok();
        writeln!(
            out,
            "events:             {} emitted, {} dropped, {} failed, {} warm-up",
            self.events_emitted, self.events_dropped, self.events_failed, self.warm_up_events
        )
        .ok();
        for (topic, count) in &self.events_by_topic {
            writeln!(out, "  {:<18}{}", topic.as_str(), count).ok();
        }
        if let (Some(first), Some(last)) = (self.first_event, self.last_event) {
            writeln!(out, "time range:         {first} .. {last}").ok();
        }
        write!(out, "wall time:          {:.2?}", self.wall_time).ok();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adds_counts_and_widens_range() {
        let mut left = SimulationReport::new(1);
        left.initial_users = 2;
        left.record_emitted(Topic::Watch, SimTime::from_millis(100));
        left.record_emitted(Topic::Ad, SimTime::from_millis(300));

        let mut right = SimulationReport::new(1);
        right.initial_users = 3;
        right.churned_users = 1;
        right.record_emitted(Topic::Watch, SimTime::from_millis(50));

        left.merge(&right);

        assert_eq!(left.initial_users, 5);
        assert_eq!(left.churned_users, 1);
        assert_eq!(left.events_emitted, 3);
        assert_eq!(left.events_by_topic[&Topic::Watch], 2);
        assert_eq!(left.first_event, Some(SimTime::from_millis(50)));
        assert_eq!(left.last_event, Some(SimTime::from_millis(300)));
    }

    #[test]
    fn test_sink_failures_move_out_of_emitted() {
        let mut report = SimulationReport::new(1);
        report.record_emitted(Topic::PageViews, SimTime::from_millis(1));
        report.record_emitted(Topic::PageViews, SimTime::from_millis(2));

        report.record_sink_failures(1);

        assert_eq!(report.events_emitted, 1);
        assert_eq!(report.events_failed, 1);
    }

    #[test]
    fn test_summary_mentions_topics() {
        let mut report = SimulationReport::new(9);
        report.record_emitted(Topic::Listen, SimTime::from_millis(1));

        let summary = report.summary();
        assert!(summary.contains("seed:               9"));
        assert!(summary.contains("listen_events"));
        assert!(summary.contains("time range:"));
        assert!(summary.lines().last().is_some_and(|line| line.starts_with("wall time:")));
    }
}
