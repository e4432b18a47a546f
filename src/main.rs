use std::{net::SocketAddr, path::PathBuf, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

use spinfeed::{
    auth::Authorizer,
    config::Config,
    credentials::{CredentialStore, FileStore},
    error::{Error, Result},
    events,
    feed::Feed,
    guard::TokenGuard,
    http,
    registry::SubscriberRegistry,
    scheduler::AdaptiveScheduler,
    server::Server,
    signal,
    snapshot::SnapshotStore,
    upstream::Spotify,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
///
/// Every option can also be given in the environment or in a `.env` file
/// in the working directory.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client id of the registered Spotify application
    #[arg(long, env = "CLIENT_ID")]
    client_id: String,

    /// Externally reachable base URL
    ///
    /// The OAuth redirect URI is this URL followed by `/api/callback`, and
    /// must be registered with the Spotify application.
    #[arg(long, env = "BASE_URL", value_hint = ValueHint::Url, default_value = "http://localhost:8080")]
    base_url: Url,

    /// Port to listen on, on all interfaces
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Credentials file
    ///
    /// Holds the OAuth tokens between restarts. Ensure that this file is
    /// kept secure and not shared publicly, as it grants read access to
    /// your Spotify account.
    #[arg(short, long, env = "CREDENTIALS_FILE", value_name = "FILE", value_hint = ValueHint::FilePath, default_value = "credentials.toml")]
    credentials_file: PathBuf,

    /// Seconds between polls while somebody is watching
    #[arg(long, env = "ACTIVE_INTERVAL", value_name = "SECONDS", default_value_t = 3)]
    active_interval: u64,

    /// Seconds between polls while nobody is watching
    #[arg(long, env = "IDLE_INTERVAL", value_name = "SECONDS", default_value_t = 30)]
    idle_interval: u64,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Builds the configuration from the command line arguments.
fn config(args: &Args) -> Result<Config> {
    let listen = SocketAddr::from(([0, 0, 0, 0], args.port));

    let mut config = Config::new(&args.client_id, args.base_url.clone(), listen)?
        .with_intervals(
            Duration::from_secs(args.active_interval),
            Duration::from_secs(args.idle_interval),
        )?;
    config.credentials_file.clone_from(&args.credentials_file);

    Ok(config)
}

/// Waits for the login if there is none yet, then polls until shutdown.
async fn poll(
    server: Server,
    guard: Arc<TokenGuard>,
    mut scheduler: AdaptiveScheduler,
    shutdown: CancellationToken,
) {
    if !guard.is_authorized().await {
        let halted = guard.halted();
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = halted.cancelled() => return,
            () = server.authorized() => {}
        }
    }

    scheduler.run(shutdown).await;
}

/// Main application loop.
///
/// # Errors
///
/// This function returns an error when startup fails, or when the feed
/// halted because of an unrecoverable error.
async fn run(args: Args) -> Result<()> {
    let config = config(&args)?;

    let http = Arc::new(http::Client::new(&config)?);
    let authorizer = Arc::new(Authorizer::new(&config, Arc::clone(&http))?);

    let store = Arc::new(FileStore::new(&config.credentials_file));
    let token = store.load().await?;
    if token.is_none() {
        info!(
            "no credentials in {}; login required",
            config.credentials_file.display()
        );
    }

    let (events_tx, events_rx) = events::channel();
    tokio::spawn(events::log_all(events_rx));

    let guard = Arc::new(TokenGuard::new(
        Arc::clone(&http),
        Arc::clone(&authorizer) as _,
        store,
        token,
    ));
    let registry = Arc::new(SubscriberRegistry::new().with_events(events_tx.clone()));
    let feed = Arc::new(Feed::new(
        Arc::clone(&guard),
        Arc::new(Spotify::new()?),
        SnapshotStore::new().with_events(events_tx),
        registry,
    ));

    let shutdown = CancellationToken::new();
    let server = Server::new(Arc::clone(&feed), authorizer, shutdown.clone());

    // Fails early when the port is taken.
    let listener = TcpListener::bind(config.listen).await?;
    let server_task = tokio::spawn(server.clone().serve(listener));

    if !guard.is_authorized().await {
        let url = server.begin_login();
        info!("open {url} to log in");
        info!(
            "or browse to {}/api/login",
            config.base_url.as_str().trim_end_matches('/')
        );
    }

    let mut signals = signal::Handler::new()?;
    let halted = guard.halted();

    let scheduler = AdaptiveScheduler::from_config(Arc::clone(&feed), &config);
    let poller = tokio::spawn(poll(server, guard, scheduler, shutdown.clone()));

    let result = tokio::select! {
        // Prioritize shutdown signals.
        biased;

        signal = signals.recv() => {
            info!("shutting down gracefully ({signal})");
            Ok(())
        }

        () = halted.cancelled() => {
            Err(Error::aborted("stopped after an unrecoverable error"))
        }
    };

    shutdown.cancel();

    if let Err(e) = poller.await {
        error!("poller failed: {e}");
    }
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("server failed: {e}"),
        Err(e) => error!("server failed: {e}"),
    }

    result
}

/// Main entry point of the application.
///
/// This function loads the `.env` file, initializes the logger facade,
/// parses the command line arguments, and starts the main application
/// loop.
#[tokio::main]
async fn main() {
    // Must happen before parsing, so the environment fallbacks see it.
    let dotenv = dotenvy::dotenv();

    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    match dotenv {
        Ok(path) => debug!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => error!("failed to load .env: {e}"),
    }

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
