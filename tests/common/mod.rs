//! Test doubles and builders shared by the integration tests.

#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tokio::net::TcpListener;
use url::Url;

use spinfeed::{
    auth::{Authorizer, TokenRefresher},
    config::Config,
    credentials::CredentialStore,
    error::{Error, Result},
    feed::Feed,
    guard::TokenGuard,
    http::{self, AuthorizedClient},
    protocol::player::{Artist, Image, PlaybackState},
    registry::SubscriberRegistry,
    snapshot::SnapshotStore,
    token::Token,
    upstream::{RawPlayback, Upstream},
};

pub fn config() -> Config {
    Config::new(
        "test-client",
        Url::parse("http://localhost:8080").unwrap(),
        "127.0.0.1:0".parse().unwrap(),
    )
    .unwrap()
}

pub fn http_client() -> Arc<http::Client> {
    Arc::new(http::Client::new(&config()).unwrap())
}

pub fn valid_token() -> Token {
    Token::new("access-0", "refresh", Duration::from_secs(3600))
}

pub fn expired_token() -> Token {
    Token::new("access-0", "refresh", Duration::ZERO)
}

/// A playing track with id `id` and one artist.
pub fn playing(id: &str) -> RawPlayback {
    let body = format!(
        r#"{{
            "is_playing": true,
            "progress_ms": 5000,
            "currently_playing_type": "track",
            "item": {{
                "id": "{id}",
                "name": "Track {id}",
                "duration_ms": 180000,
                "album": {{ "id": "album", "images": [{{ "url": "https://img/album" }}] }},
                "artists": [{{ "id": "artist", "name": "Artist" }}]
            }}
        }}"#
    );
    let playback: PlaybackState = serde_json::from_str(&body).unwrap();

    RawPlayback {
        playback,
        artists: vec![Artist {
            id: "artist".to_owned(),
            name: "Artist".to_owned(),
            images: vec![Image {
                url: "https://img/artist".to_owned(),
            }],
        }],
    }
}

/// Plays track "t1", "t2", ... on consecutive fetches and counts them.
#[derive(Default)]
pub struct CountingUpstream {
    pub fetches: AtomicUsize,
}

impl CountingUpstream {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for CountingUpstream {
    async fn fetch(&self, _: &AuthorizedClient) -> Result<Option<RawPlayback>> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(playing(&format!("t{n}"))))
    }
}

/// Hands out a new access token on every refresh.
#[derive(Default)]
pub struct RotatingRefresher {
    pub refreshes: AtomicUsize,
}

#[async_trait]
impl TokenRefresher for RotatingRefresher {
    async fn refresh(&self, token: &Token) -> Result<Token> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Token::new(
            &format!("access-{n}"),
            &token.refresh_token,
            Duration::from_secs(3600),
        ))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub saved: Mutex<Vec<Token>>,
    pub fail: bool,
}

impl MemoryStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self) -> Result<Option<Token>> {
        Ok(self.saved.lock().unwrap().last().cloned())
    }

    async fn save(&self, token: &Token) -> Result<()> {
        if self.fail {
            return Err(Error::unavailable("disk on fire"));
        }
        self.saved.lock().unwrap().push(token.clone());
        Ok(())
    }
}

pub fn guard(store: Arc<MemoryStore>, token: Option<Token>) -> Arc<TokenGuard> {
    Arc::new(TokenGuard::new(
        http_client(),
        Arc::new(RotatingRefresher::default()),
        store,
        token,
    ))
}

pub fn feed(guard: Arc<TokenGuard>, upstream: Arc<dyn Upstream>) -> Arc<Feed> {
    Arc::new(Feed::new(
        guard,
        upstream,
        SnapshotStore::new(),
        Arc::new(SubscriberRegistry::new()),
    ))
}

/// Stand-in for the accounts service token endpoint.
///
/// Accepts the code "good-code" with any PKCE verifier, and the refresh
/// token "refresh". A refresh does not rotate the refresh token.
async fn token_endpoint(form: String) -> Response {
    let has = |pair: &str| form.split('&').any(|p| p == pair);

    let body = if has("grant_type=authorization_code")
        && has("code=good-code")
        && form.contains("code_verifier=")
    {
        r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3600,"refresh_token":"refresh"}"#
    } else if has("grant_type=refresh_token") && has("refresh_token=refresh") {
        r#"{"access_token":"renewed","token_type":"Bearer","expires_in":3600}"#
    } else {
        return (StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#).into_response();
    };

    ([(CONTENT_TYPE, "application/json")], body).into_response()
}

/// Serves [`token_endpoint`] at `/api/token` and returns the base URL.
pub async fn accounts() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/api/token", post(token_endpoint));
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    Url::parse(&format!("http://{addr}/")).unwrap()
}

/// An authorizer talking to the accounts service at `base`.
pub fn authorizer(base: &Url) -> Authorizer {
    Authorizer::new(&config(), http_client())
        .unwrap()
        .with_endpoints(base.join("authorize").unwrap(), base.join("api/token").unwrap())
}
