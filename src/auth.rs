//! OAuth authorization code flow with PKCE, and token refresh.
//!
//! The login itself is a one-off at first start: [`Authorizer::begin`]
//! produces the authorize URL that the operator opens in a browser, and the
//! upstream redirects back to [`CALLBACK_PATH`](crate::config::CALLBACK_PATH)
//! where [`Authorizer::exchange`] trades the code for a [`Token`].
//! Afterwards only [`TokenRefresher::refresh`] is used, from within
//! [`TokenGuard`](crate::guard::TokenGuard).

use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::*;
use rand::RngCore;
use sha2::{Digest, Sha256};
use url::Url;
use veil::Redact;

use crate::{
    config::Config,
    error::{Error, ErrorKind, Result},
    http,
    protocol::{self, auth::TokenResponse},
    token::Token,
};

/// Exchanges an expired token for a fresh one.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Refreshes `token`.
    ///
    /// The returned token may carry the same access token when the upstream
    /// decided not to rotate it.
    async fn refresh(&self, token: &Token) -> Result<Token>;
}

/// A login in progress: the anti-forgery `state` and the PKCE verifier
/// that the callback must present.
#[derive(Clone, Redact, PartialEq, Eq, Hash)]
pub struct PendingLogin {
    #[redact]
    state: String,

    #[redact]
    verifier: String,

    /// Where to send the operator's browser.
    pub url: Url,
}

impl PendingLogin {
    /// Whether `state` as returned by the callback belongs to this login.
    #[must_use]
    pub fn verify_state(&self, state: &str) -> bool {
        !state.is_empty() && state == self.state
    }
}

pub struct Authorizer {
    http: Arc<http::Client>,
    client_id: String,
    redirect_uri: Url,
    authorize_url: Url,
    token_url: Url,
}

impl Authorizer {
    const AUTHORIZE_URL: &'static str = "https://accounts.spotify.com/authorize";
    const TOKEN_URL: &'static str = "https://accounts.spotify.com/api/token";

    /// Read access to the profile and to the playback state.
    const SCOPES: &'static str = "user-read-private user-read-playback-state";

    /// Random bytes behind a PKCE verifier; 64 bytes encode to 86
    /// characters, within the 43 to 128 allowed.
    const VERIFIER_BYTES: usize = 64;

    const STATE_BYTES: usize = 16;

    /// # Errors
    ///
    /// Will return `Err` if the redirect URI cannot be built from the
    /// configuration.
    pub fn new(config: &Config, http: Arc<http::Client>) -> Result<Self> {
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri()?,
            authorize_url: Url::parse(Self::AUTHORIZE_URL)?,
            token_url: Url::parse(Self::TOKEN_URL)?,
        })
    }

    /// Sends logins to `authorize` and token requests to `token` instead of
    /// the Spotify accounts service.
    #[must_use]
    pub fn with_endpoints(mut self, authorize: Url, token: Url) -> Self {
        self.authorize_url = authorize;
        self.token_url = token;
        self
    }

    /// Starts a login.
    #[must_use]
    pub fn begin(&self) -> PendingLogin {
        let state = random_string(Self::STATE_BYTES);
        let verifier = random_string(Self::VERIFIER_BYTES);

        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", Self::SCOPES)
            .append_pair("state", &state)
            .append_pair("code_challenge_method", "S256")
            .append_pair("code_challenge", &challenge(&verifier));

        PendingLogin {
            state,
            verifier,
            url,
        }
    }

    /// Trades an authorization code for a token.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the token endpoint rejects the code or cannot
    /// be reached.
    pub async fn exchange(&self, login: &PendingLogin, code: &str) -> Result<Token> {
        if code.is_empty() {
            return Err(Error::invalid_argument("authorization code is empty"));
        }

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", login.verifier.as_str()),
        ];
        let response = self.token_request(&form).await?;

        let refresh_token = response.refresh_token.clone().ok_or_else(|| {
            Error::unauthenticated("token endpoint did not issue a refresh token")
        })?;
        Ok(response.into_token(&refresh_token))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let request = self.http.post_form(self.token_url.clone(), form)?;

        let response = self.http.execute(request).await.map_err(|e| {
            // A rejected grant means the credentials are no good anymore.
            match e.kind {
                ErrorKind::FailedPrecondition | ErrorKind::PermissionDenied => {
                    Error::unauthenticated(format!("token endpoint rejected grant: {e}"))
                }
                _ => e,
            }
        })?;
        let body = response.text().await?;

        protocol::json(&body, "token")
    }
}

#[async_trait]
impl TokenRefresher for Authorizer {
    async fn refresh(&self, token: &Token) -> Result<Token> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", token.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
        ];
        let response = self.token_request(&form).await?;

        let refreshed = response.into_token(&token.refresh_token);
        debug!(
            "token refreshed; time to live: {} seconds",
            refreshed.time_to_live().as_secs()
        );
        Ok(refreshed)
    }
}

/// URL-safe, unpadded base64 of `len` random bytes from the thread-local
/// CSPRNG.
fn random_string(len: usize) -> String {
    let mut bytes = vec![0; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE S256 code challenge for `verifier`.
fn challenge(verifier: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorizer() -> Authorizer {
        let config = Config::new(
            "client-id",
            Url::parse("http://localhost:8080").unwrap(),
            "127.0.0.1:8080".parse().unwrap(),
        )
        .unwrap();
        let http = Arc::new(http::Client::new(&config).unwrap());
        Authorizer::new(&config, http).unwrap()
    }

    #[test]
    fn challenge_matches_rfc7636_example() {
        assert_eq!(
            challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn authorize_url_carries_pkce_parameters() {
        let login = authorizer().begin();
        let pairs: std::collections::HashMap<_, _> = login.url.query_pairs().collect();

        assert_eq!(pairs["client_id"], "client-id");
        assert_eq!(pairs["redirect_uri"], "http://localhost:8080/api/callback");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["code_challenge"], challenge(&login.verifier).as_str());
        assert!(login.verify_state(&pairs["state"]));
        assert!((43..=128).contains(&login.verifier.len()));
    }

    #[test]
    fn foreign_state_is_rejected() {
        let authorizer = authorizer();
        let first = authorizer.begin();
        let second = authorizer.begin();

        assert!(!first.verify_state(&second.state));
        assert!(!first.verify_state(""));
    }
}
