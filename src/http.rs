//! HTTP client with rate limiting for the upstream Web API.
//!
//! This module wraps `reqwest::Client` and adds:
//! * Request rate limiting shared by every caller
//! * Consistent timeouts and headers
//! * Bearer authorization for requests issued on behalf of
//!   [`TokenGuard`](crate::guard::TokenGuard)
//!
//! # Rate Limiting
//!
//! The upstream API computes its limit over a rolling 30 second window.
//! The client allows a burst of up to the per-window budget and then
//! spreads the remaining calls evenly; requests that would exceed the
//! budget are delayed, not rejected.

use std::{future::Future, num::NonZeroU32, sync::Arc, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION},
    Method, Url,
};

use crate::{config::Config, error::Result};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Unlimited request client for special cases.
    pub unlimited: reqwest::Client,

    /// Rate limiter for API quota compliance.
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window over which the upstream counts calls.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(30);

    /// Calls allowed within each window.
    ///
    /// Every poll costs two calls (playback state plus the artist lookup),
    /// so this leaves room for a 3 second poll period with headroom for
    /// token refreshes and on-demand state requests.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 30;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Upper bound for a complete request, so a stalled upstream call does
    /// not hold the token lock indefinitely.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .timeout(Self::REQUEST_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        // Rate limit own requests as to not get throttled upstream.
        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request without a body.
    pub fn request<U>(&self, method: Method, url: U) -> reqwest::Request
    where
        U: Into<Url>,
    {
        reqwest::Request::new(method, url.into())
    }

    /// Builds a GET request.
    pub fn get<U>(&self, url: U) -> reqwest::Request
    where
        U: Into<Url>,
    {
        self.request(Method::GET, url)
    }

    /// Builds a POST request with a `application/x-www-form-urlencoded`
    /// body.
    ///
    /// # Errors
    ///
    /// Returns error if the form cannot be encoded.
    pub fn post_form<U>(&self, url: U, form: &[(&str, &str)]) -> Result<reqwest::Request>
    where
        U: Into<Url>,
    {
        self.unlimited
            .post(url.into())
            .form(form)
            .build()
            .map_err(Into::into)
    }

    /// Executes a request with rate limiting.
    ///
    /// Responses with an error status are turned into errors, so callers
    /// only ever see successful responses.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * Request execution fails
    /// * Network error occurs
    /// * The upstream answers with a 4xx or 5xx status
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is
        // low: all authenticated calls are serialized by the token guard.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| {
            self.unlimited
                .execute(request)
                .and_then(|response| async move { response.error_for_status() })
                .map_err(Into::into)
        })
    }
}

/// Request-capable client bound to one access token.
///
/// Handed to the operation passed to
/// [`TokenGuard::with_client`](crate::guard::TokenGuard::with_client).
/// The token it carries is guaranteed not to rotate while the operation
/// runs.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: Arc<Client>,
    bearer: HeaderValue,
}

impl AuthorizedClient {
    /// # Errors
    ///
    /// Returns error if the access token is not a valid header value.
    pub fn new(http: Arc<Client>, access_token: &str) -> Result<Self> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))?;
        bearer.set_sensitive(true);
        Ok(Self { http, bearer })
    }

    /// Performs an authorized GET request and returns the response body.
    ///
    /// An empty body (as sent with `204 No Content`) is returned as an
    /// empty string.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the body cannot be read.
    pub async fn get(&self, url: Url) -> Result<String> {
        let mut request = self.http.get(url);
        request.headers_mut().try_insert(AUTHORIZATION, self.bearer.clone())?;

        let response = self.http.execute(request).await?;
        response.text().await.map_err(Into::into)
    }
}

impl std::fmt::Debug for AuthorizedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("bearer", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}
