//! OAuth token held by [`TokenGuard`](crate::guard::TokenGuard).

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampSeconds};
use veil::Redact;

/// Access and refresh token pair with the access token's expiry.
///
/// Both secrets are redacted from `Debug` output, so tokens can be logged
/// at trace level without leaking credentials.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Redact)]
pub struct Token {
    #[redact]
    pub access_token: String,

    #[redact]
    pub refresh_token: String,

    #[serde_as(as = "TimestampSeconds<i64>")]
    pub expires_at: SystemTime,
}

impl Token {
    /// Tokens are considered expired this long before their actual expiry,
    /// so a request never goes out with a token on its last few seconds.
    pub const EXPIRY_DELTA: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new(access_token: &str, refresh_token: &str, expires_in: Duration) -> Self {
        let now = SystemTime::now();
        Self {
            access_token: access_token.to_owned(),
            refresh_token: refresh_token.to_owned(),
            expires_at: now.checked_add(expires_in).unwrap_or(now),
        }
    }

    #[must_use]
    pub fn time_to_live(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.time_to_live() <= Self::EXPIRY_DELTA
    }

    /// Whether `self` replaces `previous`, i.e. the access token changed.
    #[must_use]
    pub fn rotates(&self, previous: &Token) -> bool {
        self.access_token != previous.access_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_within_delta() {
        let token = Token::new("access", "refresh", Duration::from_secs(5));
        assert!(token.is_expired());

        let token = Token::new("access", "refresh", Duration::from_secs(3600));
        assert!(!token.is_expired());
        assert!(token.time_to_live() > Duration::from_secs(3500));
    }

    #[test]
    fn rotation_compares_access_token_only() {
        let old = Token::new("a", "r", Duration::from_secs(60));
        let mut same = old.clone();
        same.refresh_token = "other".to_owned();
        assert!(!same.rotates(&old));

        let new = Token::new("b", "r", Duration::from_secs(60));
        assert!(new.rotates(&old));
    }

    #[test]
    fn debug_redacts_secrets() {
        let token = Token::new("very-secret-access", "very-secret-refresh", Duration::ZERO);
        let debug = format!("{token:?}");
        assert!(!debug.contains("very-secret-access"));
        assert!(!debug.contains("very-secret-refresh"));
    }
}
