//! Conversion of session events into sink messages.

use eventide_core::events::{
    AdEvent, AuthEvent, EventEnvelope, EventMessage, EventRecord, ListenEvent, StatusChangeEvent, WatchEvent,
};

use crate::session::{SessionEvent, SessionEventKind};

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Failed to serialize {page} event of session {session_id}: {source}")]
    Serialization {
        page: String,
        session_id: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Maps an engine event to its wire record.
pub fn to_record(event: &SessionEvent) -> EventRecord {
    let envelope = EventEnvelope {
        ts: event.ts.as_millis(),
        user_id: event.user_id,
        session_id: event.session_id,
        page: event.page.clone(),
        auth: event.auth.clone(),
        method: event.method.clone(),
        status: event.status,
        item_in_session: event.item_in_session,
        subscription_type: event.subscription_type.clone(),
        device_type: event.device_type.clone(),
        device_os: event.device_os.clone(),
    };

    match &event.kind {
        SessionEventKind::PageView => EventRecord::PageView(envelope),
        SessionEventKind::Auth { success } => EventRecord::Auth(AuthEvent {
            envelope,
            success: *success,
        }),
        SessionEventKind::Watch { video } => EventRecord::Watch(WatchEvent {
            envelope,
            video_id: video.id.clone(),
            video_title: video.title.clone(),
            genres: video.genres.join(","),
            duration: video.runtime.as_secs(),
        }),
        SessionEventKind::Listen { song } => EventRecord::Listen(ListenEvent {
            envelope,
            song_id: song.id.clone(),
            audio_title: song.title.clone(),
            artist_name: song.artist.clone(),
            duration: song.duration_secs,
        }),
        SessionEventKind::Ad {
            ad_id,
            ad_type,
            duration,
        } => EventRecord::Ad(AdEvent {
            envelope,
            ad_id: ad_id.to_string(),
            ad_type: ad_type.as_str().to_string(),
            duration: duration.as_secs(),
        }),
        SessionEventKind::StatusChange {
            old_status,
            new_status,
        } => EventRecord::StatusChange(StatusChangeEvent {
            envelope,
            old_status: old_status.clone(),
            new_status: new_status.clone(),
        }),
    }
}

/// Encodes an engine event into a routed JSON message.
///
/// # Errors
///
/// - `EncodeError::Serialization` - The payload cannot be serialized
pub fn encode(event: &SessionEvent) -> Result<EventMessage, EncodeError> {
    EventMessage::encode(&to_record(event)).map_err(|source| EncodeError::Serialization {
        page: event.page.clone(),
        session_id: event.session_id,
        source,
    })
}
