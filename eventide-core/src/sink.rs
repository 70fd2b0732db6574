//! Output boundary for encoded events.
//!
//! The engine hands every event to an [`EventSink`]. Sinks are plain
//! synchronous writers; to keep sink latency off the simulation loop the
//! scheduler writes into a [`ChannelSink`] whose receiving end is drained by a
//! blocking worker task (see [`spawn_sink_writer`]).

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::{EventMessage, Topic};

/// Errors raised by output sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to write {topic} event: {source}")]
    Write {
        topic: Topic,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open output {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to flush output: {0}")]
    Flush(#[source] std::io::Error),

    #[error("Sink channel closed")]
    Closed,

    #[error("Sink writer task failed: {reason}")]
    WriterTask { reason: String },
}

/// Destination for encoded events.
pub trait EventSink: Send {
    /// Writes one event.
    ///
    /// # Errors
    ///
    /// - `SinkError` - The event could not be delivered
    fn write_message(&mut self, message: &EventMessage) -> Result<(), SinkError>;

    /// Flushes buffered output.
    ///
    /// # Errors
    ///
    /// - `SinkError::Flush` - Underlying writer failed
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl EventSink for Box<dyn EventSink> {
    fn write_message(&mut self, message: &EventMessage) -> Result<(), SinkError> {
        (**self).write_message(message)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Writes `topic<TAB>json` lines to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn write_message(&mut self, message: &EventMessage) -> Result<(), SinkError> {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(message.topic.as_str().as_bytes())
            .and_then(|_| stdout.write_all(b"\t"))
            .and_then(|_| stdout.write_all(&message.payload))
            .and_then(|_| stdout.write_all(b"\n"))
            .map_err(|source| SinkError::Write {
                topic: message.topic,
                source,
            })
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        std::io::stdout().flush().map_err(SinkError::Flush)
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn write_message(&mut self, _message: &EventMessage) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes newline-delimited JSON, one file per topic: `{dir}/{topic}.json`.
pub struct FileSink {
    dir: PathBuf,
    writers: BTreeMap<Topic, BufWriter<File>>,
}

impl FileSink {
    /// Creates the output directory; topic files are opened on first use.
    ///
    /// # Errors
    ///
    /// - `SinkError::Open` - Directory cannot be created
    pub fn new(dir: &Path) -> Result<Self, SinkError> {
        create_dir_all(dir).map_err(|source| SinkError::Open {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            writers: BTreeMap::new(),
        })
    }

    /// Path of the file receiving `topic`.
    pub fn topic_path(&self, topic: Topic) -> PathBuf {
        self.dir.join(format!("{}.json", topic.as_str()))
    }

    fn writer(&mut self, topic: Topic) -> Result<&mut BufWriter<File>, SinkError> {
        let path = self.topic_path(topic);
        match self.writers.entry(topic) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let file = File::create(&path).map_err(|source| SinkError::Open {
                    path: path.display().to_string(),
                    source,
                })?;
                tracing::debug!("Opened topic file {}", path.display());
                Ok(entry.insert(BufWriter::new(file)))
            }
        }
    }
}

impl EventSink for FileSink {
    fn write_message(&mut self, message: &EventMessage) -> Result<(), SinkError> {
        let writer = self.writer(message.topic)?;
        writer
            .write_all(&message.payload)
            .and_then(|_| writer.write_all(b"\n"))
            .map_err(|source| SinkError::Write {
                topic: message.topic,
                source,
            })
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        for writer in self.writers.values_mut() {
            writer.flush().map_err(SinkError::Flush)?;
        }
        Ok(())
    }
}

/// Collects events in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<EventMessage>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<EventMessage> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl EventSink for MemorySink {
    fn write_message(&mut self, message: &EventMessage) -> Result<(), SinkError> {
        self.messages.lock().push(message.clone());
        Ok(())
    }
}

/// Sending half of a bounded channel feeding a sink writer task.
///
/// Writes block the calling thread when the channel is full, so this sink must
/// be used from a synchronous context (a dedicated thread or `spawn_blocking`).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<EventMessage>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<EventMessage>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn write_message(&mut self, message: &EventMessage) -> Result<(), SinkError> {
        self.sender
            .blocking_send(message.clone())
            .map_err(|_| SinkError::Closed)
    }
}

/// Delivery statistics of a sink writer task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Handle to a running sink writer task.
pub struct SinkWriterHandle {
    task: JoinHandle<Result<SinkStats, SinkError>>,
}

impl SinkWriterHandle {
    /// Waits for the writer to drain the channel and flush.
    ///
    /// The channel closes once every `ChannelSink` clone has been dropped, so
    /// callers drop their senders before awaiting this.
    ///
    /// # Errors
    ///
    /// - `SinkError::Flush` - Final flush of the inner sink failed
    /// - `SinkError::WriterTask` - Writer task panicked or was cancelled
    pub async fn finish(self) -> Result<SinkStats, SinkError> {
        self.task.await.map_err(|e| SinkError::WriterTask {
            reason: e.to_string(),
        })?
    }
}

/// Moves `inner` onto a blocking worker fed by a bounded channel.
///
/// Write failures of the inner sink are logged and counted; the worker keeps
/// draining so one bad write never stalls the producer.
pub fn spawn_sink_writer<S>(mut inner: S, capacity: usize) -> (ChannelSink, SinkWriterHandle)
where
    S: EventSink + 'static,
{
    let (sender, mut receiver) = mpsc::channel::<EventMessage>(capacity.max(1));

    let task = tokio::task::spawn_blocking(move || {
        let mut stats = SinkStats::default();
        while let Some(message) = receiver.blocking_recv() {
            match inner.write_message(&message) {
                Ok(()) => stats.delivered += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(
                        topic = %message.topic,
                        user_id = message.user_id,
                        "Dropping event: {e}"
                    );
                }
            }
        }
        inner.flush()?;
        tracing::debug!(
            "Sink writer drained: {} delivered, {} failed",
            stats.delivered,
            stats.failed
        );
        Ok(stats)
    });

    (ChannelSink::new(sender), SinkWriterHandle { task })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn message(topic: Topic, ts: i64, body: &str) -> EventMessage {
        EventMessage {
            topic,
            ts,
            user_id: 1,
            payload: Bytes::from(body.to_string()),
        }
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn write_message(&mut self, message: &EventMessage) -> Result<(), SinkError> {
            Err(SinkError::Write {
                topic: message.topic,
                source: std::io::Error::other("rejected"),
            })
        }
    }

    #[test]
    fn test_memory_sink_shares_buffer() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();

        writer.write_message(&message(Topic::Auth, 1, "{}")).unwrap();
        writer.write_message(&message(Topic::Ad, 2, "{}")).unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.messages()[1].topic, Topic::Ad);
    }

    #[test]
    fn test_file_sink_writes_one_file_per_topic() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path()).unwrap();

        sink.write_message(&message(Topic::Watch, 1, r#"{"a":1}"#)).unwrap();
        sink.write_message(&message(Topic::Watch, 2, r#"{"a":2}"#)).unwrap();
        sink.write_message(&message(Topic::PageViews, 3, r#"{"b":1}"#)).unwrap();
        sink.flush().unwrap();

        let watch = std::fs::read_to_string(dir.path().join("watch_events.json")).unwrap();
        assert_eq!(watch, "{\"a\":1}\n{\"a\":2}\n");

        let views = std::fs::read_to_string(sink.topic_path(Topic::PageViews)).unwrap();
        assert_eq!(views.lines().count(), 1);
        assert!(!dir.path().join("ad_events.json").exists());
    }

    #[tokio::test]
    async fn test_sink_writer_delivers_in_order() {
        let memory = MemorySink::new();
        let (channel, handle) = spawn_sink_writer(memory.clone(), 4);

        let producer = tokio::task::spawn_blocking(move || {
            let mut channel = channel;
            for ts in 0..10 {
                channel.write_message(&message(Topic::Listen, ts, "{}")).unwrap();
            }
        });
        producer.await.unwrap();

        let stats = handle.finish().await.unwrap();
        assert_eq!(stats, SinkStats { delivered: 10, failed: 0 });

        let timestamps: Vec<i64> = memory.messages().iter().map(|m| m.ts).collect();
        assert_eq!(timestamps, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_sink_writer_counts_failures() {
        let (channel, handle) = spawn_sink_writer(FailingSink, 2);

        tokio::task::spawn_blocking(move || {
            let mut channel = channel;
            channel.write_message(&message(Topic::Ad, 1, "{}")).unwrap();
            channel.write_message(&message(Topic::Ad, 2, "{}")).unwrap();
        })
        .await
        .unwrap();

        let stats = handle.finish().await.unwrap();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);

        let result = tokio::task::spawn_blocking(move || {
            let mut sink = ChannelSink::new(sender);
            sink.write_message(&message(Topic::Auth, 1, "{}"))
        })
        .await
        .unwrap();

        assert!(matches!(result, Err(SinkError::Closed)));
    }
}
