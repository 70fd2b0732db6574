//! Output event schema and topic routing.
//!
//! Every emitted event is one JSON object sharing a common envelope. Event
//! categories add their own fields on top of the envelope and are routed to a
//! fixed topic name. Field names here are the wire contract with downstream
//! analytics pipelines.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Destination topic of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "page_views_events")]
    PageViews,
    #[serde(rename = "auth_events")]
    Auth,
    #[serde(rename = "watch_events")]
    Watch,
    #[serde(rename = "listen_events")]
    Listen,
    #[serde(rename = "ad_events")]
    Ad,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::PageViews,
        Topic::Auth,
        Topic::Watch,
        Topic::Listen,
        Topic::Ad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::PageViews => "page_views_events",
            Topic::Auth => "auth_events",
            Topic::Watch => "watch_events",
            Topic::Listen => "listen_events",
            Topic::Ad => "ad_events",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Simulated event time, epoch milliseconds
    pub ts: i64,
    pub user_id: u64,
    pub session_id: u64,
    pub page: String,
    pub auth: String,
    pub method: String,
    pub status: u16,
    pub item_in_session: u32,
    pub subscription_type: String,
    pub device_type: String,
    pub device_os: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub video_id: String,
    pub video_title: String,
    /// Comma-separated genre list
    pub genres: String,
    /// Seconds
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub song_id: String,
    pub audio_title: String,
    pub artist_name: String,
    /// Seconds
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub ad_id: String,
    pub ad_type: String,
    /// Seconds
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    pub old_status: String,
    pub new_status: String,
}

/// Any event the engine can emit.
#[derive(Debug, Clone, PartialEq)]
pub enum EventRecord {
    PageView(EventEnvelope),
    Auth(AuthEvent),
    Watch(WatchEvent),
    Listen(ListenEvent),
    Ad(AdEvent),
    StatusChange(StatusChangeEvent),
}

impl EventRecord {
    /// Topic this event is routed to.
    pub fn topic(&self) -> Topic {
        match self {
            EventRecord::PageView(_) | EventRecord::StatusChange(_) => Topic::PageViews,
            EventRecord::Auth(_) => Topic::Auth,
            EventRecord::Watch(_) => Topic::Watch,
            EventRecord::Listen(_) => Topic::Listen,
            EventRecord::Ad(_) => Topic::Ad,
        }
    }

    pub fn envelope(&self) -> &EventEnvelope {
        match self {
            EventRecord::PageView(envelope) => envelope,
            EventRecord::Auth(event) => &event.envelope,
            EventRecord::Watch(event) => &event.envelope,
            EventRecord::Listen(event) => &event.envelope,
            EventRecord::Ad(event) => &event.envelope,
            EventRecord::StatusChange(event) => &event.envelope,
        }
    }

    /// Serializes the event to its JSON wire form.
    ///
    /// # Errors
    ///
    /// - `serde_json::Error` - Payload cannot be encoded
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            EventRecord::PageView(envelope) => serde_json::to_vec(envelope),
            EventRecord::Auth(event) => serde_json::to_vec(event),
            EventRecord::Watch(event) => serde_json::to_vec(event),
            EventRecord::Listen(event) => serde_json::to_vec(event),
            EventRecord::Ad(event) => serde_json::to_vec(event),
            EventRecord::StatusChange(event) => serde_json::to_vec(event),
        }
    }

    /// Parses a JSON payload read back from `topic`.
    ///
    /// Subscription changes share the page-view topic and are recognised by
    /// their `oldStatus` field.
    ///
    /// # Errors
    ///
    /// - `serde_json::Error` - Payload does not match the topic's schema
    pub fn from_json(topic: Topic, payload: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match topic {
            Topic::Auth => EventRecord::Auth(serde_json::from_slice(payload)?),
            Topic::Watch => EventRecord::Watch(serde_json::from_slice(payload)?),
            Topic::Listen => EventRecord::Listen(serde_json::from_slice(payload)?),
            Topic::Ad => EventRecord::Ad(serde_json::from_slice(payload)?),
            Topic::PageViews => {
                let value: serde_json::Value = serde_json::from_slice(payload)?;
                if value.get("oldStatus").is_some() {
                    EventRecord::StatusChange(serde_json::from_value(value)?)
                } else {
                    EventRecord::PageView(serde_json::from_value(value)?)
                }
            }
        })
    }
}

/// Encoded event ready for a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub topic: Topic,
    /// Event time, epoch milliseconds
    pub ts: i64,
    pub user_id: u64,
    pub payload: Bytes,
}

impl EventMessage {
    /// Encodes `record` into a message.
    ///
    /// # Errors
    ///
    /// - `serde_json::Error` - Payload cannot be encoded
    pub fn encode(record: &EventRecord) -> Result<Self, serde_json::Error> {
        let envelope = record.envelope();
        Ok(Self {
            topic: record.topic(),
            ts: envelope.ts,
            user_id: envelope.user_id,
            payload: Bytes::from(record.to_json()?),
        })
    }

    /// Merge key for timestamp-ordered output: time first, then user.
    pub fn order_key(&self) -> (i64, u64) {
        (self.ts, self.user_id)
    }
}
