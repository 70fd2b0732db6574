//! Parallel execution across user shards.
//!
//! Users are partitioned by `user_id % shards`; each shard runs its own
//! [`Scheduler`] on a scoped thread and writes into a bounded channel. The
//! calling thread drains the channels into the downstream sink, either as a
//! k-way merge that keeps the global (timestamp, user) order or in arrival
//! order when ordering is not needed.
//!
//! Per-user RNG streams depend only on the seed and user ID, so a user's
//! events are the same whatever the shard count; only session IDs differ.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

use eventide_core::config::OutputConfig;
use eventide_core::events::EventMessage;
use eventide_core::sink::{ChannelSink, EventSink};
use tokio::sync::mpsc;

use crate::SimulationError;
use crate::context::SimulationContext;
use crate::report::SimulationReport;
use crate::scheduler::{Scheduler, ShardAssignment};

/// Shard count matching the available CPUs.
pub fn default_shards() -> usize {
    num_cpus::get().max(1)
}

/// How a run is split and merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardOptions {
    pub shards: usize,
    pub ordered: bool,
    /// Capacity of each shard's output channel
    pub capacity: usize,
}

impl ShardOptions {
    pub fn from_config(output: &OutputConfig) -> Self {
        Self {
            shards: output.shards,
            ordered: output.ordered,
            capacity: output.buffer_capacity,
        }
    }
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self::from_config(&OutputConfig::default())
    }
}

/// Runs the whole population, sharded per `options`, into `sink`.
///
/// Blocks the calling thread; call it from a plain thread or `spawn_blocking`,
/// never from inside an async task.
///
/// # Errors
///
/// - `SimulationError::ShardFailed` - A shard thread panicked
/// - Any error a shard's scheduler returns
pub fn run_sharded(
    ctx: Arc<SimulationContext>,
    options: ShardOptions,
    sink: &mut dyn EventSink,
) -> Result<SimulationReport, SimulationError> {
    let shards = options.shards.max(1);
    if shards == 1 {
        return Scheduler::new(ctx)?.run(sink);
    }

    let wall = Instant::now();
    let mut schedulers = Vec::with_capacity(shards);
    for index in 0..shards {
        schedulers.push(Scheduler::for_shard(
            Arc::clone(&ctx),
            ShardAssignment::new(index, shards),
        )?);
    }
    tracing::info!(shards, ordered = options.ordered, "Starting sharded run");

    let capacity = options.capacity.max(1);
    let (senders, receivers): (Vec<_>, Vec<_>) = if options.ordered {
        (0..shards).map(|_| mpsc::channel::<EventMessage>(capacity)).unzip()
    } else {
        let (sender, receiver) = mpsc::channel::<EventMessage>(capacity);
        (vec![sender; shards], vec![receiver])
    };

    std::thread::scope(|scope| {
        let handles: Vec<_> = schedulers
            .into_iter()
            .zip(senders)
            .map(|(mut scheduler, sender)| {
                scope.spawn(move || {
                    let mut channel = ChannelSink::new(sender);
                    scheduler.run(&mut channel)
                })
            })
            .collect();

        let failed = if options.ordered {
            merge_ordered(receivers, sink)
        } else {
            forward(receivers, sink)
        };

        let mut report = SimulationReport::new(ctx.seed());
        report.shards = shards;
        for (shard, handle) in handles.into_iter().enumerate() {
            let shard_report = handle.join().map_err(|_| SimulationError::ShardFailed {
                shard,
                reason: "worker thread panicked".to_string(),
            })??;
            report.merge(&shard_report);
        }
        report.record_sink_failures(failed);

        if let Err(error) = sink.flush() {
            tracing::warn!(error = %error, "Failed to flush sink");
        }
        report.wall_time = wall.elapsed();
        Ok(report)
    })
}

/// Next message of one shard in the merge heap.
#[derive(Debug)]
struct MergeHead {
    message: EventMessage,
    shard: usize,
}

impl MergeHead {
    fn key(&self) -> (i64, u64, usize) {
        let (ts, user_id) = self.message.order_key();
        (ts, user_id, self.shard)
    }
}

impl PartialEq for MergeHead {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for MergeHead {}

impl Ord for MergeHead {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for MergeHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// K-way merge of per-shard streams, each already in (timestamp, user) order.
/// Returns the number of writes the sink rejected.
fn merge_ordered(mut receivers: Vec<mpsc::Receiver<EventMessage>>, sink: &mut dyn EventSink) -> u64 {
    let mut heads = BinaryHeap::with_capacity(receivers.len());
    for (shard, receiver) in receivers.iter_mut().enumerate() {
        if let Some(message) = receiver.blocking_recv() {
            heads.push(MergeHead { message, shard });
        }
    }

    let mut failed = 0;
    while let Some(MergeHead { message, shard }) = heads.pop() {
        if let Err(error) = sink.write_message(&message) {
            failed += 1;
            tracing::warn!(topic = %message.topic, user_id = message.user_id, error = %error, "Sink rejected event");
        }
        if let Some(next) = receivers[shard].blocking_recv() {
            heads.push(MergeHead { message: next, shard });
        }
    }
    failed
}

/// Forwards messages as they arrive.
fn forward(receivers: Vec<mpsc::Receiver<EventMessage>>, sink: &mut dyn EventSink) -> u64 {
    let mut failed = 0;
    for mut receiver in receivers {
        while let Some(message) = receiver.blocking_recv() {
            if let Err(error) = sink.write_message(&message) {
                failed += 1;
                tracing::warn!(topic = %message.topic, user_id = message.user_id, error = %error, "Sink rejected event");
            }
        }
    }
    failed
}
