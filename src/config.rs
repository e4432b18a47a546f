use std::{net::SocketAddr, path::PathBuf, time::Duration};

use url::Url;

use crate::error::{Error, Result};

/// Path the upstream authorization server redirects back to.
pub const CALLBACK_PATH: &str = "/api/callback";

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,

    /// OAuth client id of the registered upstream application.
    pub client_id: String,

    /// Externally reachable base URL, used to build the redirect URI.
    pub base_url: Url,

    pub listen: SocketAddr,

    pub credentials_file: PathBuf,

    /// Poll period while at least one subscriber is connected.
    pub active_interval: Duration,

    /// Poll period while nobody is watching.
    pub idle_interval: Duration,

    pub user_agent: String,
}

impl Config {
    pub const DEFAULT_ACTIVE_INTERVAL: Duration = Duration::from_secs(3);
    pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(30);

    /// Builds a configuration with default intervals.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the client id is empty
    /// - the base URL cannot be a base for the redirect URI
    /// - no valid `User-Agent` can be built from the package metadata
    pub fn new(client_id: &str, base_url: Url, listen: SocketAddr) -> Result<Self> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(Error::invalid_argument("client id must be set"));
        }

        if base_url.cannot_be_a_base() {
            return Err(Error::invalid_argument(format!(
                "base url {base_url} cannot be used for redirects"
            )));
        }

        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
        {
            return Err(Error::internal(format!(
                "application name and/or version invalid (\"{app_name}\"; \"{app_version}\")"
            )));
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version()
            .filter(|version| !version.is_empty() && !version.contains(illegal_chars))
            .unwrap_or_else(|| String::from("0"));

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");

        Ok(Self {
            app_name,
            app_version,

            client_id: client_id.to_owned(),
            base_url,
            listen,

            credentials_file: PathBuf::from("credentials.toml"),

            active_interval: Self::DEFAULT_ACTIVE_INTERVAL,
            idle_interval: Self::DEFAULT_IDLE_INTERVAL,

            user_agent,
        })
    }

    /// The OAuth redirect URI: the base URL joined with [`CALLBACK_PATH`].
    ///
    /// # Errors
    ///
    /// Will return `Err` if the joined URL is invalid.
    pub fn redirect_uri(&self) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{CALLBACK_PATH}")).map_err(Into::into)
    }

    /// Sets both poll periods.
    ///
    /// # Errors
    ///
    /// Will return `Err` if either interval is zero or the active interval
    /// is longer than the idle one.
    pub fn with_intervals(mut self, active: Duration, idle: Duration) -> Result<Self> {
        if active.is_zero() || idle.is_zero() {
            return Err(Error::invalid_argument("poll intervals must be non-zero"));
        }
        if active > idle {
            return Err(Error::invalid_argument(format!(
                "active interval ({}s) must not exceed idle interval ({}s)",
                active.as_secs_f32(),
                idle.as_secs_f32()
            )));
        }

        self.active_interval = active;
        self.idle_interval = idle;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(base: &str) -> Result<Config> {
        Config::new(
            "client",
            Url::parse(base).unwrap(),
            "127.0.0.1:8080".parse().unwrap(),
        )
    }

    #[test]
    fn redirect_uri_joins_callback_path() {
        let config = build("https://example.com/").unwrap();
        assert_eq!(
            config.redirect_uri().unwrap().as_str(),
            "https://example.com/api/callback"
        );

        let config = build("https://example.com/feed").unwrap();
        assert_eq!(
            config.redirect_uri().unwrap().as_str(),
            "https://example.com/feed/api/callback"
        );
    }

    #[test]
    fn rejects_inverted_intervals() {
        let config = build("http://localhost:8080").unwrap();
        assert!(config
            .clone()
            .with_intervals(Duration::from_secs(10), Duration::from_secs(5))
            .is_err());
        assert!(config
            .clone()
            .with_intervals(Duration::ZERO, Duration::from_secs(5))
            .is_err());

        let config = config
            .with_intervals(Duration::from_secs(1), Duration::from_secs(5))
            .unwrap();
        assert_eq!(config.active_interval, Duration::from_secs(1));
    }

    #[test]
    fn user_agent_names_the_package() {
        let config = build("http://localhost:8080").unwrap();
        assert!(config.user_agent.starts_with("spinfeed/"));
    }

    #[test]
    fn empty_client_id_is_invalid() {
        assert!(Config::new(
            "  ",
            Url::parse("http://localhost").unwrap(),
            "127.0.0.1:0".parse().unwrap()
        )
        .is_err());
    }
}
