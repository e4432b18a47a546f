//! HTTP surface.
//!
//! # Routes
//!
//! * `GET /api/state` - polls once, then answers with the snapshot as JSON
//! * `GET /api/stream` - server-sent events: the snapshot now, then once
//!   per poll until the client goes away
//! * `GET /api/login` - redirects to the upstream login while one is
//!   pending
//! * `GET /api/callback` - OAuth redirect target
//!
//! All feed responses allow any origin and must not be cached: the
//! frontend may be served from elsewhere, and a cached snapshot is a
//! wrong snapshot.

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
};

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::Notify};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    auth::{Authorizer, PendingLogin},
    broadcast::ChannelSink,
    config::CALLBACK_PATH,
    error::{Error, Result},
    feed::Feed,
};

/// Shared between all handlers.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

struct Shared {
    feed: Arc<Feed>,
    authorizer: Arc<Authorizer>,
    pending: Mutex<Option<PendingLogin>>,
    authorized: Notify,
    shutdown: CancellationToken,
}

/// Query of the OAuth redirect.
#[derive(Clone, Debug, Default, Deserialize)]
struct Callback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl Server {
    #[must_use]
    pub fn new(feed: Arc<Feed>, authorizer: Arc<Authorizer>, shutdown: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                feed,
                authorizer,
                pending: Mutex::new(None),
                authorized: Notify::new(),
                shutdown,
            }),
        }
    }

    /// Starts a login and returns the URL the operator has to open.
    ///
    /// A previously started login is abandoned.
    pub fn begin_login(&self) -> Url {
        let login = self.shared.authorizer.begin();
        let url = login.url.clone();
        *self.pending() = Some(login);
        url
    }

    /// Completes once the callback installed a token.
    pub async fn authorized(&self) {
        self.shared.authorized.notified().await;
    }

    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/state", get(state))
            .route("/api/stream", get(stream))
            .route("/api/login", get(login))
            .route(CALLBACK_PATH, get(callback))
            .with_state(self.clone())
    }

    /// Serves until the shutdown token fires and all streams have ended.
    ///
    /// # Errors
    ///
    /// Will return `Err` if accepting connections fails.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("listening on {addr}");
        }

        let shutdown = self.shared.shutdown.clone();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(Into::into)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Option<PendingLogin>> {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn state(State(server): State<Server>) -> impl IntoResponse {
    let feed = &server.shared.feed;

    // The fallback snapshot is still worth answering with.
    let snapshot = match feed.cycle().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("polling for state request failed: {e}");
            feed.snapshot()
        }
    };

    (
        [(CACHE_CONTROL, "no-cache"), (ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(snapshot.as_ref().clone()),
    )
}

async fn stream(
    State(server): State<Server>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let feed = Arc::clone(&server.shared.feed);
    let subscription = feed.registry().subscribe(Some(peer));
    let (sink, body) = ChannelSink::channel();
    let shutdown = server.shared.shutdown.clone();

    tokio::spawn(async move {
        feed.serve(sink, subscription, shutdown).await;
    });

    (
        [
            (CACHE_CONTROL, "no-cache"),
            (CONTENT_TYPE, "text/event-stream"),
            (CONNECTION, "keep-alive"),
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Body::from_stream(body.map(Ok::<_, Infallible>)),
    )
}

async fn login(State(server): State<Server>) -> Response {
    match server.pending().as_ref() {
        Some(login) => Redirect::temporary(login.url.as_str()).into_response(),
        None => Error::not_found("no login pending").into_response(),
    }
}

async fn callback(State(server): State<Server>, Query(query): Query<Callback>) -> Response {
    // Taken for good: a login can only be completed once.
    let pending = server.pending().take();
    let Some(login) = pending else {
        return Error::not_found("no login pending").into_response();
    };

    match complete_login(&server, &login, query).await {
        Ok(()) => {
            server.shared.authorized.notify_one();
            "Logged in. You can close this window.".into_response()
        }
        Err(e) => {
            server.shared.feed.guard().halt(&format!("login failed: {e}"));
            Error::permission_denied(e).into_response()
        }
    }
}

async fn complete_login(server: &Server, login: &PendingLogin, query: Callback) -> Result<()> {
    if let Some(error) = query.error {
        return Err(Error::permission_denied(format!("login refused: {error}")));
    }

    if !query
        .state
        .as_deref()
        .is_some_and(|state| login.verify_state(state))
    {
        return Err(Error::permission_denied("login state does not match"));
    }

    let code = query
        .code
        .ok_or_else(|| Error::invalid_argument("callback without code"))?;
    let token = server.shared.authorizer.exchange(login, &code).await?;

    server.shared.feed.guard().install(token).await
}
