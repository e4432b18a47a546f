//! Exclusive ownership of the OAuth token.
//!
//! [`TokenGuard`] is the only place the token lives. Every authenticated
//! upstream call goes through [`TokenGuard::with_client`], which holds one
//! async lock from before the expiry check until the caller's operation
//! has finished. As a consequence:
//!
//! * no two refreshes ever race each other,
//! * a token is never rotated underneath an operation that is using it,
//! * all authenticated calls are strictly serialized.
//!
//! The price is that a slow upstream call delays the next one. With a
//! single poller and occasional on-demand requests that is acceptable.
//!
//! # Persistence failures
//!
//! A rotated token is persisted before the lock is released. If that
//! fails, the guard trips its *halt* signal: continuing with a token that
//! differs from the stored one risks losing the refresh token for good,
//! so the process is expected to stop. [`AdaptiveScheduler`] observes the
//! signal and stops ticking, and `main` exits.
//!
//! [`AdaptiveScheduler`]: crate::scheduler::AdaptiveScheduler

use std::{future::Future, sync::Arc};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::TokenRefresher,
    credentials::CredentialStore,
    error::{Error, Result},
    http::{self, AuthorizedClient},
    token::Token,
};

pub struct TokenGuard {
    token: Mutex<Option<Token>>,
    http: Arc<http::Client>,
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn CredentialStore>,
    halt: CancellationToken,
}

impl TokenGuard {
    /// Creates a guard, either empty (before the first login) or hydrated
    /// from a persisted token.
    #[must_use]
    pub fn new(
        http: Arc<http::Client>,
        refresher: Arc<dyn TokenRefresher>,
        store: Arc<dyn CredentialStore>,
        token: Option<Token>,
    ) -> Self {
        Self {
            token: Mutex::new(token),
            http,
            refresher,
            store,
            halt: CancellationToken::new(),
        }
    }

    /// Signal that fires when the process must stop: a rotated token could
    /// not be persisted, or the login failed.
    #[must_use]
    pub fn halted(&self) -> CancellationToken {
        self.halt.clone()
    }

    /// Trips the halt signal.
    pub fn halt(&self, reason: &str) {
        error!("halting: {reason}");
        self.halt.cancel();
    }

    pub async fn is_authorized(&self) -> bool {
        self.token.lock().await.is_some()
    }

    /// Installs a token obtained by logging in, and persists it.
    ///
    /// # Errors
    ///
    /// Returns a `DataLoss` error and trips the halt signal if the token
    /// cannot be persisted.
    pub async fn install(&self, token: Token) -> Result<()> {
        let mut current = self.token.lock().await;
        self.persist(&token).await?;
        *current = Some(token);

        info!("login succeeded");
        Ok(())
    }

    /// Runs `op` with a client authorized by a valid token.
    ///
    /// The token is refreshed first if it expired. The lock is held until
    /// `op` completes, so concurrent callers run strictly one after
    /// another. Errors from `op` are returned as-is; nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - no token is installed yet (`Unauthenticated`)
    /// - the guard has halted (`Aborted`)
    /// - the token refresh fails
    /// - a rotated token cannot be persisted (`DataLoss`, halts)
    /// - `op` fails
    pub async fn with_client<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(AuthorizedClient) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = self.token.lock().await;

        if self.halt.is_cancelled() {
            return Err(Error::aborted("token guard has halted"));
        }

        let current = guard
            .as_ref()
            .ok_or_else(|| Error::unauthenticated("not logged in yet"))?;

        if current.is_expired() {
            let refreshed = self.refresher.refresh(current).await.map_err(|e| {
                warn!("failed to refresh token: {e}");
                e
            })?;

            if refreshed.rotates(current) {
                self.persist(&refreshed).await?;
            }
            *guard = Some(refreshed);
        }

        let token = guard
            .as_ref()
            .ok_or_else(|| Error::internal("token vanished while locked"))?;
        let client = AuthorizedClient::new(Arc::clone(&self.http), &token.access_token)?;

        // `guard` stays alive across `op`.
        let result = op(client).await;
        drop(guard);
        result
    }

    async fn persist(&self, token: &Token) -> Result<()> {
        if let Err(e) = self.store.save(token).await {
            self.halt(&format!("failed to save credentials: {e}"));
            return Err(Error::data_loss(format!("failed to save credentials: {e}")));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex as StdMutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::{config::Config, error::ErrorKind};

    /// Hands out "access-1", "access-2", ... on every refresh.
    #[derive(Default)]
    struct CountingRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, token: &Token) -> Result<Token> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Token::new(
                &format!("access-{n}"),
                &token.refresh_token,
                Duration::from_secs(3600),
            ))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        saved: StdMutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl CredentialStore for MemoryStore {
        async fn load(&self) -> Result<Option<Token>> {
            Ok(None)
        }

        async fn save(&self, token: &Token) -> Result<()> {
            if self.fail {
                return Err(Error::unavailable("store is down"));
            }
            self.saved.lock().unwrap().push(token.access_token.clone());
            Ok(())
        }
    }

    fn http_client() -> Arc<http::Client> {
        let config = Config::new(
            "client",
            Url::parse("http://localhost:8080").unwrap(),
            "127.0.0.1:8080".parse().unwrap(),
        )
        .unwrap();
        Arc::new(http::Client::new(&config).unwrap())
    }

    fn expired() -> Token {
        Token::new("access-0", "refresh", Duration::ZERO)
    }

    #[tokio::test]
    async fn refuses_without_token() {
        let guard = TokenGuard::new(
            http_client(),
            Arc::new(CountingRefresher::default()),
            Arc::new(MemoryStore::default()),
            None,
        );

        let err = guard.with_client(|_| async { Ok(()) }).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
        assert!(!guard.is_authorized().await);
    }

    #[tokio::test]
    async fn rotation_is_persisted_once() {
        let refresher = Arc::new(CountingRefresher::default());
        let store = Arc::new(MemoryStore::default());
        let guard = TokenGuard::new(
            http_client(),
            Arc::clone(&refresher) as _,
            Arc::clone(&store) as _,
            Some(expired()),
        );

        guard.with_client(|_| async { Ok(()) }).await.unwrap();
        guard.with_client(|_| async { Ok(()) }).await.unwrap();

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*store.saved.lock().unwrap(), vec!["access-1".to_owned()]);
    }

    #[tokio::test]
    async fn operation_errors_pass_through() {
        let guard = TokenGuard::new(
            http_client(),
            Arc::new(CountingRefresher::default()),
            Arc::new(MemoryStore::default()),
            Some(Token::new("a", "r", Duration::from_secs(3600))),
        );

        let err = guard
            .with_client(|_| async { Err::<(), _>(Error::not_found("no device")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(!guard.halted().is_cancelled());
    }

    #[tokio::test]
    async fn failed_persistence_halts() {
        let store = Arc::new(MemoryStore {
            fail: true,
            ..MemoryStore::default()
        });
        let guard = TokenGuard::new(
            http_client(),
            Arc::new(CountingRefresher::default()),
            store,
            Some(expired()),
        );

        let ran = AtomicUsize::new(0);
        let err = guard
            .with_client(|_| async {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::DataLoss);
        assert!(guard.halted().is_cancelled());
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let err = guard.with_client(|_| async { Ok(()) }).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Aborted);
    }

    #[tokio::test]
    async fn install_persists_and_authorizes() {
        let store = Arc::new(MemoryStore::default());
        let guard = TokenGuard::new(
            http_client(),
            Arc::new(CountingRefresher::default()),
            Arc::clone(&store) as _,
            None,
        );

        guard
            .install(Token::new("fresh", "r", Duration::from_secs(3600)))
            .await
            .unwrap();

        assert!(guard.is_authorized().await);
        assert_eq!(*store.saved.lock().unwrap(), vec!["fresh".to_owned()]);
    }
}
