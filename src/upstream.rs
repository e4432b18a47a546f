//! Fetching the playback state from the upstream Web API.
//!
//! One fetch costs two calls: the player state, then a batched lookup of
//! the playing track's artists (the artist objects embedded in the track
//! carry no images). Both go out through the same [`AuthorizedClient`], so
//! they run under one token lock.

use async_trait::async_trait;
use url::Url;

use crate::{
    error::{Error, Result},
    http::AuthorizedClient,
    protocol::{
        self,
        player::{Artist, Artists, PlaybackState},
    },
};

/// Raw result of one successful fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawPlayback {
    pub playback: PlaybackState,

    /// Artists of the playing track as returned by the batched lookup, in
    /// track order. Unknown ids are left out.
    pub artists: Vec<Artist>,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetches the current playback.
    ///
    /// Returns `Ok(None)` when nothing is playing on any device (the
    /// upstream answers with an empty body).
    ///
    /// # Errors
    ///
    /// Any failure of either call, including a malformed body, fails the
    /// whole fetch.
    async fn fetch(&self, client: &AuthorizedClient) -> Result<Option<RawPlayback>>;
}

pub struct Spotify {
    api: Url,
}

impl Spotify {
    const API_URL: &'static str = "https://api.spotify.com/v1/";

    /// # Errors
    ///
    /// Never fails for the built-in API URL; see [`with_api`](Self::with_api).
    pub fn new() -> Result<Self> {
        Self::with_api(Url::parse(Self::API_URL)?)
    }

    /// Uses `api` as the base of every call instead of the public API.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `api` cannot be a base URL.
    pub fn with_api(mut api: Url) -> Result<Self> {
        if api.cannot_be_a_base() {
            return Err(Error::invalid_argument(format!(
                "{api} is not a valid API base"
            )));
        }

        // `Url::join` drops the last segment unless it ends in a slash.
        if !api.path().ends_with('/') {
            let path = format!("{}/", api.path());
            api.set_path(&path);
        }

        Ok(Self { api })
    }

    async fn artists(&self, client: &AuthorizedClient, ids: &[&str]) -> Result<Vec<Artist>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.api.join("artists")?;
        url.query_pairs_mut().append_pair("ids", &ids.join(","));

        let body = client.get(url).await?;
        let response: Artists = protocol::json(&body, "artists")?;

        Ok(response.artists.into_iter().flatten().collect())
    }
}

#[async_trait]
impl Upstream for Spotify {
    async fn fetch(&self, client: &AuthorizedClient) -> Result<Option<RawPlayback>> {
        let body = client.get(self.api.join("me/player")?).await?;
        if body.trim().is_empty() {
            trace!("player: no active device");
            return Ok(None);
        }

        let playback: PlaybackState = protocol::json(&body, "player")?;
        let artists = self.artists(client, &playback.artist_ids()).await?;

        Ok(Some(RawPlayback { playback, artists }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_base_gets_trailing_slash() {
        let spotify = Spotify::with_api(Url::parse("http://127.0.0.1:9/v1").unwrap()).unwrap();
        assert_eq!(
            spotify.api.join("me/player").unwrap().as_str(),
            "http://127.0.0.1:9/v1/me/player"
        );
    }

    #[test]
    fn default_api_is_public() {
        let spotify = Spotify::new().unwrap();
        assert_eq!(
            spotify.api.join("artists").unwrap().as_str(),
            "https://api.spotify.com/v1/artists"
        );
    }
}
