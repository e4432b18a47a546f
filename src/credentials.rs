//! Persistence of the OAuth token across restarts.
//!
//! The token is stored as a single TOML document. It is read once at
//! startup and overwritten whenever [`TokenGuard`](crate::guard::TokenGuard)
//! observes a rotation. Writes go to a temporary file first and are then
//! renamed over the previous document, so a crash mid-write never leaves a
//! truncated token behind.
//!
//! # Format
//!
//! ```toml
//! access_token = "BQD..."
//! refresh_token = "AQB..."
//! expires_at = 1735689600
//! ```

use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    token::Token,
};

/// Backend that persists the current [`Token`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads the persisted token, or `None` when nothing was stored yet.
    async fn load(&self) -> Result<Option<Token>>;

    /// Replaces the persisted token.
    async fn save(&self, token: &Token) -> Result<()>;
}

/// Stores the token in a TOML file.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// A credentials file holds one small document; anything larger is not
    /// ours and is not read into memory.
    const MAX_FILE_SIZE: u64 = 4096;

    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn load(&self) -> Result<Option<Token>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no credentials at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.len() > Self::MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large",
                self.path.display()
            )));
        }

        let contents = tokio::fs::read_to_string(&self.path).await?;
        let token = toml::from_str::<Token>(&contents).map_err(|e| {
            Error::invalid_argument(format!("{} format is invalid: {e}", self.path.display()))
        })?;

        trace!("loaded credentials: {token:?}");
        Ok(Some(token))
    }

    async fn save(&self, token: &Token) -> Result<()> {
        let contents = toml::to_string(token)?;
        let staging = self.staging_path();

        tokio::fs::write(&staging, contents).await?;

        // The file holds a refresh token: keep it private to the owner.
        #[cfg(unix)]
        {
            use std::{fs::Permissions, os::unix::fs::PermissionsExt};
            tokio::fs::set_permissions(&staging, Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&staging, &self.path).await?;
        debug!("saved credentials to {}", self.path.display());

        Ok(())
    }
}
