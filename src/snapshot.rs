//! The published "now playing" snapshot.
//!
//! [`SnapshotStore`] holds the last known [`Snapshot`] behind an
//! [`ArcSwap`]. Readers take a cheap `Arc` and never block the writer;
//! the writer builds a complete new value from the previous one and swaps
//! it in, so a reader never sees a half-merged state.
//!
//! # Merge Rules
//!
//! * A failed fetch, an empty response or a response without a track only
//!   clears `is_playing`. Everything else keeps its last observed value,
//!   so the frontend keeps showing the last track as paused.
//! * A successful fetch overwrites the track fields and fully replaces the
//!   artists from the batched artist lookup, each reduced to one image.
//!
//! # Wire Format
//!
//! The serialized snapshot is the frontend contract:
//!
//! ```json
//! {
//!     "is_playing": true,
//!     "progress_ms": 42000,
//!     "item": {
//!         "id": "4uLU6hMCjMI75M1A2tKUQC",
//!         "name": "Never Gonna Give You Up",
//!         "duration_ms": 213573,
//!         "album": { "id": "6N9PS4QXF1D0OWPk0Sxtb4", "images": [{ "url": "https://..." }] },
//!         "artists": [{ "id": "0gxyHStUsqpMadRV0Di1Qt", "name": "Rick Astley", "images": [{ "url": "https://..." }] }]
//!     }
//! }
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    events::{self, Event},
    protocol::player,
    upstream::RawPlayback,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub images: Vec<Image>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub images: Vec<Image>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub duration_ms: u64,
    pub album: Album,
    pub artists: Vec<Artist>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Snapshot {
    pub is_playing: bool,
    pub progress_ms: u64,
    pub item: Item,
}

impl Snapshot {
    /// Name shown before anything was ever fetched.
    pub const PLACEHOLDER_NAME: &'static str = "Pream Pinbut";

    /// The value published before the first successful fetch.
    #[must_use]
    pub fn placeholder() -> Self {
        let blank = || vec![Image::default()];

        Self {
            is_playing: false,
            progress_ms: 0,
            item: Item {
                id: String::new(),
                name: Self::PLACEHOLDER_NAME.to_owned(),
                duration_ms: 0,
                album: Album {
                    id: String::new(),
                    images: blank(),
                },
                artists: vec![Artist {
                    id: String::new(),
                    name: Self::PLACEHOLDER_NAME.to_owned(),
                    images: blank(),
                }],
            },
        }
    }

    /// Whether no track was observed yet.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.item.id.is_empty() && self.item.name == Self::PLACEHOLDER_NAME
    }
}

impl From<&player::Image> for Image {
    fn from(image: &player::Image) -> Self {
        Self {
            url: image.url.clone(),
        }
    }
}

impl From<&player::Artist> for Artist {
    fn from(artist: &player::Artist) -> Self {
        // The upstream orders images by size, largest first.
        let image = artist.images.first().map(Image::from).unwrap_or_default();

        Self {
            id: artist.id.clone(),
            name: artist.name.clone(),
            images: vec![image],
        }
    }
}

pub struct SnapshotStore {
    current: ArcSwap<Snapshot>,
    events: Option<events::Sender>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// Creates a store publishing the placeholder.
    #[must_use]
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot::placeholder())
    }

    #[must_use]
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            events: None,
        }
    }

    /// Reports track changes and play/pause transitions on `events`.
    #[must_use]
    pub fn with_events(mut self, events: events::Sender) -> Self {
        self.events = Some(events);
        self
    }

    /// The current snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Merges the outcome of one fetch and publishes the result.
    ///
    /// Merges must not run concurrently with each other; the feed runs them
    /// under the token lock.
    pub fn merge(&self, fetched: &Result<Option<RawPlayback>>) -> Arc<Snapshot> {
        let raw = match fetched {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("nothing is playing");
                return self.mark_stopped();
            }
            Err(e) => {
                debug!("keeping last track after failed fetch: {e}");
                return self.mark_stopped();
            }
        };

        let Some(track) = raw.playback.track() else {
            debug!("no track is playing");
            return self.mark_stopped();
        };

        let previous = self.current.load_full();
        let next = Snapshot {
            is_playing: raw.playback.is_playing,
            progress_ms: raw.playback.progress_ms.unwrap_or(previous.progress_ms),
            item: Item {
                id: track.id.clone().unwrap_or_default(),
                name: track.name.clone(),
                duration_ms: track.duration_ms,
                album: Album {
                    id: track.album.id.clone(),
                    images: track.album.images.iter().map(Image::from).collect(),
                },
                artists: raw.artists.iter().map(Artist::from).collect(),
            },
        };

        self.publish(&previous, next)
    }

    /// Clears `is_playing` and keeps everything else.
    pub fn mark_stopped(&self) -> Arc<Snapshot> {
        let previous = self.current.load_full();
        if !previous.is_playing {
            return previous;
        }

        let mut next = Snapshot::clone(&previous);
        next.is_playing = false;
        self.publish(&previous, next)
    }

    fn publish(&self, previous: &Snapshot, next: Snapshot) -> Arc<Snapshot> {
        // Local files have an empty id too, so only the placeholder is
        // exempt.
        if previous.is_placeholder() {
            if !next.is_placeholder() {
                info!("now playing: {}", next.item.name);
            }
        } else if previous.item.id != next.item.id {
            info!("now playing: {}", next.item.name);
            events::emit(
                self.events.as_ref(),
                Event::TrackChanged {
                    id: next.item.id.clone(),
                    name: next.item.name.clone(),
                },
            );
        }

        if previous.is_playing != next.is_playing {
            let event = if next.is_playing {
                Event::Play
            } else {
                Event::Pause
            };
            events::emit(self.events.as_ref(), event);
        }

        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        next
    }
}
