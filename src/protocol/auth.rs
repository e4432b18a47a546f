//! Token endpoint response.
//!
//! # Example Response
//!
//! ```json
//! {
//!     "access_token": "BQD...",
//!     "token_type": "Bearer",
//!     "scope": "user-read-private user-read-playback-state",
//!     "expires_in": 3600,
//!     "refresh_token": "AQB..."
//! }
//! ```
//!
//! Refresh responses may omit `refresh_token`, in which case the previous
//! one stays valid.

use std::time::Duration;

use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DurationSeconds};
use veil::Redact;

use crate::token::Token;

#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact, Hash)]
pub struct TokenResponse {
    #[redact]
    pub access_token: String,

    #[serde(default)]
    pub token_type: String,

    #[serde(default)]
    pub scope: String,

    /// Lifetime of the access token from the moment it was issued.
    #[serde_as(as = "DurationSeconds<u64, Flexible>")]
    pub expires_in: Duration,

    #[redact]
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// Converts into a [`Token`], falling back to `previous_refresh` when
    /// the response did not rotate the refresh token.
    #[must_use]
    pub fn into_token(self, previous_refresh: &str) -> Token {
        let refresh = self.refresh_token.as_deref().unwrap_or(previous_refresh);
        Token::new(&self.access_token, refresh, self.expires_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_refresh_token_keeps_previous() {
        let body = r#"{"access_token":"new","token_type":"Bearer","expires_in":3600}"#;
        let response: TokenResponse = serde_json::from_str(body).unwrap();
        let token = response.into_token("old-refresh");

        assert_eq!(token.access_token, "new");
        assert_eq!(token.refresh_token, "old-refresh");
        assert!(!token.is_expired());
    }

    #[test]
    fn rotated_refresh_token_wins() {
        let body = r#"{"access_token":"new","expires_in":"3600","refresh_token":"fresh"}"#;
        let response: TokenResponse = serde_json::from_str(body).unwrap();

        assert_eq!(response.into_token("old").refresh_token, "fresh");
    }
}
