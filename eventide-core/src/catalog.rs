//! Playable content available to simulated users.
//!
//! Videos carry genres and mid-roll breakpoints; songs carry an artist and a
//! fixed duration. The catalog indexes videos by genre in an ordered map so
//! that content selection is reproducible for a given seed.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Errors raised while loading a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid runtime: {value}")]
    InvalidRuntime { value: String },
}

/// A movie or episode that can be watched.
#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub runtime: Duration,
    pub genres: Vec<String>,
    /// Offsets into the runtime eligible for mid-roll ads, ascending
    pub breakpoints: Vec<Duration>,
}

/// A track that can be listened to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: String,
    /// Duration in seconds
    #[serde(rename = "duration")]
    pub duration_secs: u64,
}

impl Song {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

/// Runtime as written in catalog files: minutes, or a `"<n> min"` string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawRuntime {
    Minutes(u64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
struct RawVideo {
    id: String,
    title: String,
    runtime: RawRuntime,
    #[serde(default, deserialize_with = "deserialize_genres")]
    genres: Vec<String>,
    /// Breakpoints in seconds
    #[serde(default)]
    breakpoints: Vec<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    videos: Vec<RawVideo>,
    #[serde(default)]
    songs: Vec<Song>,
}

/// Genres may be a JSON list or a single comma-separated string.
fn deserialize_genres<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Genres {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Genres::deserialize(deserializer)? {
        Genres::List(list) => list,
        Genres::Joined(joined) => joined
            .split(',')
            .map(|genre| genre.trim().to_string())
            .filter(|genre| !genre.is_empty())
            .collect(),
    })
}

/// Parses a runtime such as `"142 min"` or `"1,020 min"`.
///
/// # Errors
///
/// - `CatalogError::InvalidRuntime` - Input is not `<number> min`
pub fn parse_runtime(value: &str) -> Result<Duration, CatalogError> {
    let invalid = || CatalogError::InvalidRuntime {
        value: value.to_string(),
    };

    let mut parts = value.split_whitespace();
    let (Some(number), Some("min"), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    let minutes: u64 = number.replace(',', "").parse().map_err(|_| invalid())?;
    if minutes == 0 {
        return Err(invalid());
    }

    minutes_to_runtime(minutes).ok_or_else(invalid)
}

/// `None` when the runtime does not fit in seconds.
fn minutes_to_runtime(minutes: u64) -> Option<Duration> {
    minutes.checked_mul(60).map(Duration::from_secs)
}

/// Evenly spaced breakpoints strictly inside `runtime`.
pub fn generate_breakpoints(runtime: Duration, interval: Duration) -> Vec<Duration> {
    if interval.is_zero() {
        return Vec::new();
    }
    let mut breakpoints = Vec::new();
    let mut offset = interval;
    while offset < runtime {
        breakpoints.push(offset);
        offset += interval;
    }
    breakpoints
}

/// Video and audio content indexed for selection.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    videos: Vec<Video>,
    songs: Vec<Song>,
    by_genre: BTreeMap<String, Vec<usize>>,
}

impl Catalog {
    /// Builds a catalog from already-parsed content.
    pub fn new(videos: Vec<Video>, songs: Vec<Song>) -> Self {
        let mut by_genre: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, video) in videos.iter().enumerate() {
            for genre in &video.genres {
                by_genre.entry(genre.clone()).or_default().push(index);
            }
        }

        Self {
            videos,
            songs,
            by_genre,
        }
    }

    /// Loads a catalog from a JSON file with `videos` and `songs` arrays.
    ///
    /// Videos without breakpoints get one every `breakpoint_interval`.
    /// Records with unparseable runtimes are skipped.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Io` - File cannot be read
    /// - `CatalogError::Parse` - File is not valid catalog JSON
    pub fn from_json_file(path: &Path, breakpoint_interval: Duration) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw, breakpoint_interval)
    }

    /// Parses a catalog from a JSON string.
    ///
    /// # Errors
    ///
    /// - `CatalogError::Parse` - Input is not valid catalog JSON
    pub fn from_json_str(raw: &str, breakpoint_interval: Duration) -> Result<Self, CatalogError> {
        let parsed: RawCatalog = serde_json::from_str(raw)?;

        let mut videos = Vec::with_capacity(parsed.videos.len());
        for record in parsed.videos {
            let runtime = match &record.runtime {
                RawRuntime::Minutes(0) => None,
                RawRuntime::Minutes(minutes) => minutes_to_runtime(*minutes),
                RawRuntime::Text(text) => parse_runtime(text).ok(),
            };
            let Some(runtime) = runtime else {
                tracing::warn!(video_id = %record.id, "Skipping video with invalid runtime");
                continue;
            };

            let mut breakpoints: Vec<Duration> = record
                .breakpoints
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .filter(|offset| *offset < runtime)
                .collect();
            breakpoints.sort();
            if breakpoints.is_empty() {
                breakpoints = generate_breakpoints(runtime, breakpoint_interval);
            }

            videos.push(Video {
                id: record.id,
                title: record.title,
                runtime,
                genres: record.genres,
                breakpoints,
            });
        }

        tracing::debug!(
            videos = videos.len(),
            songs = parsed.songs.len(),
            "Catalog loaded"
        );

        Ok(Self::new(videos, parsed.songs))
    }

    /// Small built-in catalog used when no catalog file is supplied.
    pub fn demo(breakpoint_interval: Duration) -> Self {
        let video = |id: &str, title: &str, minutes: u64, genres: &[&str]| {
            let runtime = Duration::from_secs(minutes * 60);
            Video {
                id: id.to_string(),
                title: title.to_string(),
                runtime,
                genres: genres.iter().map(|g| g.to_string()).collect(),
                breakpoints: generate_breakpoints(runtime, breakpoint_interval),
            }
        };
        let song = |id: &str, title: &str, artist: &str, secs: u64| Song {
            id: id.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            duration_secs: secs,
        };

        let videos = vec![
            video("tt0000001", "Harbor Lights", 118, &["Drama", "Romance"]),
            video("tt0000002", "The Long Detour", 96, &["Comedy"]),
            video("tt0000003", "Iron Meridian", 131, &["Action"]),
            video("tt0000004", "Tidal Archive", 88, &["Documentary"]),
            video("tt0000005", "Night Shift", 104, &["Horror"]),
            video("tt0000006", "Second Act", 112, &["Comedy", "Romance"]),
            video("tt0000007", "Last Signal", 124, &["Action", "Drama"]),
            video("tt0000008", "Salt and Stone", 77, &["Documentary", "Drama"]),
        ];
        let songs = vec![
            song("so0000001", "Undertow", "The Breakers", 214),
            song("so0000002", "Slow Current", "Marine Layer", 187),
            song("so0000003", "Low Tide", "Coastline", 242),
            song("so0000004", "Undertow Radio", "Static Bloom", 169),
            song("so0000005", "Estuary", "Paper Boats", 201),
        ];

        Self::new(videos, songs)
    }

    pub fn videos(&self) -> &[Video] {
        &self.videos
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn video(&self, index: usize) -> Option<&Video> {
        self.videos.get(index)
    }

    pub fn song(&self, index: usize) -> Option<&Song> {
        self.songs.get(index)
    }

    /// Indices of videos tagged with `genre`.
    pub fn videos_in_genre(&self, genre: &str) -> &[usize] {
        self.by_genre.get(genre).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Genres present in the catalog, in sorted order.
    pub fn genres(&self) -> impl Iterator<Item = &str> {
        self.by_genre.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty() && self.songs.is_empty()
    }
}
