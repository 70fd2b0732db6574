//! Page classification and content selection.

use std::collections::BTreeMap;
use std::time::Duration;

use eventide_core::catalog::{Catalog, Song, Video};

use crate::ad_policy::AdStep;
use crate::deterministic::DeterministicRng;
use crate::sampler::WeightedSampler;

/// Kind of subscription change requested by a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    Upgrade,
    Downgrade,
    Cancel,
}

/// What a page means to the session engine, decided by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Video,
    Audio,
    Ad(AdStep),
    Auth,
    Subscription(SubscriptionChange),
    PageView,
}

impl PageKind {
    pub fn classify(page: &str) -> Self {
        match page {
            "PlayVideo" | "NextVideo" => PageKind::Video,
            "NextSong" => PageKind::Audio,
            "AdStart" => PageKind::Ad(AdStep::Start),
            "AdImpression" => PageKind::Ad(AdStep::Impression),
            "AdEnd" => PageKind::Ad(AdStep::End),
            "Login" | "Logout" | "Register" => PageKind::Auth,
            "Submit Upgrade" => PageKind::Subscription(SubscriptionChange::Upgrade),
            "Submit Downgrade" => PageKind::Subscription(SubscriptionChange::Downgrade),
            "Cancel Subscription" => PageKind::Subscription(SubscriptionChange::Cancel),
            _ => PageKind::PageView,
        }
    }

    pub fn media(&self) -> Option<MediaType> {
        match self {
            PageKind::Video => Some(MediaType::Video),
            PageKind::Audio => Some(MediaType::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Video,
    Audio,
}

/// Content currently owned by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Video(Video),
    Song(Song),
}

impl Content {
    pub fn media(&self) -> MediaType {
        match self {
            Content::Video(_) => MediaType::Video,
            Content::Song(_) => MediaType::Audio,
        }
    }

    pub fn runtime(&self) -> Duration {
        match self {
            Content::Video(video) => video.runtime,
            Content::Song(song) => song.duration(),
        }
    }

    /// Offsets eligible for mid-roll ads; songs have none.
    pub fn breakpoints(&self) -> &[Duration] {
        match self {
            Content::Video(video) => &video.breakpoints,
            Content::Song(_) => &[],
        }
    }
}

/// Picks a video: a genre weighted by the user's preferences among genres the
/// catalog carries, then a uniform video of that genre. Falls back to a
/// uniform pick when no preferred genre is available.
pub fn select_video(
    catalog: &Catalog,
    preferences: &BTreeMap<String, u64>,
    rng: &mut DeterministicRng,
) -> Option<Video> {
    let mut genres = WeightedSampler::new();
    for (genre, weight) in preferences {
        if *weight > 0 && !catalog.videos_in_genre(genre).is_empty() && genres.add(genre.as_str(), *weight).is_err() {
            // Total weight saturated; sample among the genres added so far
            break;
        }
    }

    let index = match genres.sample(rng) {
        Ok(genre) => *rng.choose(catalog.videos_in_genre(genre))?,
        Err(_) => {
            let indices: Vec<usize> = (0..catalog.videos().len()).collect();
            *rng.choose(&indices)?
        }
    };
    catalog.video(index).cloned()
}

/// Picks a song uniformly.
pub fn select_song(catalog: &Catalog, rng: &mut DeterministicRng) -> Option<Song> {
    rng.choose(catalog.songs()).cloned()
}

/// Picks new content of `media`.
pub fn select_content(
    media: MediaType,
    catalog: &Catalog,
    preferences: &BTreeMap<String, u64>,
    rng: &mut DeterministicRng,
) -> Option<Content> {
    match media {
        MediaType::Video => select_video(catalog, preferences, rng).map(Content::Video),
        MediaType::Audio => select_song(catalog, rng).map(Content::Song),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::demo(Duration::from_secs(900))
    }

    #[test]
    fn test_page_classification() {
        assert_eq!(PageKind::classify("NextVideo"), PageKind::Video);
        assert_eq!(PageKind::classify("NextSong").media(), Some(MediaType::Audio));
        assert_eq!(PageKind::classify("AdEnd"), PageKind::Ad(AdStep::End));
        assert_eq!(PageKind::classify("Register"), PageKind::Auth);
        assert_eq!(
            PageKind::classify("Cancel Subscription"),
            PageKind::Subscription(SubscriptionChange::Cancel)
        );
        assert_eq!(PageKind::classify("Settings"), PageKind::PageView);
    }

    #[test]
    fn test_single_preferred_genre_selects_only_that_genre() {
        let catalog = catalog();
        let preferences = BTreeMap::from([("Horror".to_string(), 10), ("Comedy".to_string(), 0)]);
        let mut rng = DeterministicRng::from_seed(17);

        for _ in 0..50 {
            let video = select_video(&catalog, &preferences, &mut rng).unwrap();
            assert!(video.genres.iter().any(|genre| genre == "Horror"));
        }
    }

    #[test]
    fn test_unknown_genres_fall_back_to_whole_catalog() {
        let catalog = catalog();
        let preferences = BTreeMap::from([("Western".to_string(), 10)]);
        let mut rng = DeterministicRng::from_seed(2);

        assert!(select_video(&catalog, &preferences, &mut rng).is_some());
    }

    #[test]
    fn test_empty_catalog_selects_nothing() {
        let catalog = Catalog::default();
        let mut rng = DeterministicRng::from_seed(2);

        assert!(select_content(MediaType::Video, &catalog, &BTreeMap::new(), &mut rng).is_none());
        assert!(select_content(MediaType::Audio, &catalog, &BTreeMap::new(), &mut rng).is_none());
    }

    #[test]
    fn test_song_content_has_no_breakpoints() {
        let catalog = catalog();
        let mut rng = DeterministicRng::from_seed(9);
        let song = select_content(MediaType::Audio, &catalog, &BTreeMap::new(), &mut rng).unwrap();

        assert_eq!(song.media(), MediaType::Audio);
        assert!(song.breakpoints().is_empty());
        assert!(song.runtime() > Duration::ZERO);
    }
}
