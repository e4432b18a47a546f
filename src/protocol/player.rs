//! Playback state and artist lookup responses.
//!
//! # Wire Format
//!
//! `GET /v1/me/player` answers `204 No Content` with an empty body when
//! no device is active, and otherwise:
//!
//! ```json
//! {
//!     "is_playing": true,
//!     "progress_ms": 42000,
//!     "currently_playing_type": "track",
//!     "item": {
//!         "id": "4uLU6hMCjMI75M1A2tKUQC",
//!         "name": "Never Gonna Give You Up",
//!         "duration_ms": 213573,
//!         "album": { "id": "6N9PS4QXF1D0OWPk0Sxtb4", "images": [{ "url": "https://..." }] },
//!         "artists": [{ "id": "0gxyHStUsqpMadRV0Di1Qt", "name": "Rick Astley" }]
//!     }
//! }
//! ```
//!
//! `GET /v1/artists?ids=a,b` answers `{ "artists": [ ... ] }` in request
//! order, with `null` for unknown ids. Artist entries there do carry
//! images, unlike the ones embedded in the track.

use serde::Deserialize;
use serde_with::{serde_as, DefaultOnNull};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct Image {
    pub url: String,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct Album {
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub id: String,

    #[serde(default)]
    pub images: Vec<Image>,
}

// Local artists come with `null` ids.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct Artist {
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub id: String,

    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    pub name: String,

    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct TrackObject {
    // Local files have no id.
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub duration_ms: u64,

    #[serde(default)]
    pub album: Album,

    #[serde(default)]
    pub artists: Vec<Artist>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct PlaybackState {
    #[serde(default)]
    pub is_playing: bool,

    #[serde(default)]
    pub progress_ms: Option<u64>,

    #[serde(default)]
    pub currently_playing_type: Option<String>,

    #[serde(default)]
    pub item: Option<TrackObject>,
}

impl PlaybackState {
    /// The playing track, if any.
    ///
    /// Episodes, ads and unknown items are not tracks and yield `None`.
    #[must_use]
    pub fn track(&self) -> Option<&TrackObject> {
        match self.currently_playing_type.as_deref() {
            None | Some("track") => self.item.as_ref(),
            Some(_) => None,
        }
    }

    /// Ids of the track's artists, in order, skipping local artists.
    #[must_use]
    pub fn artist_ids(&self) -> Vec<&str> {
        self.track()
            .map(|track| {
                track
                    .artists
                    .iter()
                    .map(|artist| artist.id.as_str())
                    .filter(|id| !id.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct Artists {
    #[serde(default)]
    pub artists: Vec<Option<Artist>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episodes_are_not_tracks() {
        let body = r#"{
            "is_playing": true,
            "progress_ms": 10,
            "currently_playing_type": "episode",
            "item": { "id": "ep", "name": "Some show" }
        }"#;
        let state: PlaybackState = serde_json::from_str(body).unwrap();

        assert!(state.track().is_none());
        assert!(state.artist_ids().is_empty());
    }

    #[test]
    fn artist_ids_skip_local_artists() {
        let body = r#"{
            "is_playing": true,
            "item": {
                "id": "t",
                "name": "n",
                "artists": [{ "id": "a1", "name": "A" }, { "id": null, "name": "Local" }]
            }
        }"#;
        let state: PlaybackState = serde_json::from_str(body).unwrap();

        assert_eq!(state.artist_ids(), vec!["a1"]);
    }
}
