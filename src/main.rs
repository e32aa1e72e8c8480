// Presence scrobbler
// Mirrors media player state to Discord rich presence and Last.fm

mod artwork;
mod config;
mod player;
mod presence;
mod scrobbler;
mod sync;
mod text_cleanup;

use anyhow::{Context, Result};
use artwork::{ArtworkResolver, ITunesCatalog};
use clap::{Parser, Subcommand};
use config::Config;
use player::{FeedPlayer, Player};
use presence::discord::DiscordIpc;
use presence::PresencePublisher;
use scrobbler::lastfm::LastFmClient;
use scrobbler::lastfm_auth::SystemBrowser;
use scrobbler::session_store::FileSessionStore;
use scrobbler::{EngineSettings, ScrobbleEngine, SessionStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use text_cleanup::TextCleaner;
use tokio::io::BufReader;
use tokio::sync::watch;
use tokio::task::JoinSet;

type Publisher = PresencePublisher<FeedPlayer<ITunesCatalog>, DiscordIpc>;
type Engine = ScrobbleEngine<LastFmClient, FileSessionStore, SystemBrowser>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file to use instead of the default location
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mirror player states to rich presence and Last.fm
    Run {
        /// Read player notifications from this file instead of stdin
        #[arg(short, long)]
        script: Option<PathBuf>,
    },

    /// Authorize Last.fm access in the browser
    Login,

    /// Forget the stored Last.fm session
    Logout,

    /// Show the Last.fm session status
    Status,
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if verbose {
        builder.filter_module(env!("CARGO_CRATE_NAME"), log::LevelFilter::Debug);
    }

    let style = if atty::is(atty::Stream::Stderr) {
        env_logger::WriteStyle::Auto
    } else {
        env_logger::WriteStyle::Never
    };

    builder.write_style(style).init();
}

fn profile_url(name: &str) -> String {
    format!("https://www.last.fm/user/{}", name)
}

fn build_engine(config: &Config, client: reqwest::Client) -> Result<Arc<Engine>> {
    let lastfm = &config.lastfm;
    let api = LastFmClient::new(
        client,
        lastfm.api_url.clone(),
        lastfm.auth_url.clone(),
        lastfm.api_key.clone(),
        lastfm.api_secret.clone(),
    );

    let store = Arc::new(FileSessionStore::default_location()?);
    let settings = EngineSettings {
        scrobble_threshold: config.scrobble_threshold,
        auth_grace_period: Duration::from_secs(lastfm.auth_grace_period_secs),
    };

    Ok(Arc::new(ScrobbleEngine::new(
        api,
        store,
        SystemBrowser::default(),
        TextCleaner::new(&config.cleanup),
        settings,
        lastfm.enabled,
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    match cli.command {
        Command::Run { script } => run(config, client, script).await,
        Command::Login => login(&config, client).await,
        Command::Logout => {
            build_engine(&config, client)?.logout().await;
            println!("Signed out of Last.fm");
            Ok(())
        }
        Command::Status => {
            match build_engine(&config, client)?.status().await {
                SessionStatus::SignedIn { name } => {
                    println!("Signed in to Last.fm as {} ({})", name, profile_url(&name))
                }
                _ => println!("Not signed in to Last.fm"),
            }
            Ok(())
        }
    }
}

async fn login(config: &Config, client: reqwest::Client) -> Result<()> {
    if config.lastfm.api_key.is_empty() || config.lastfm.api_secret.is_empty() {
        anyhow::bail!("Set lastfm.api_key and lastfm.api_secret in the config file first");
    }

    let engine = build_engine(config, client)?;
    let grace = Duration::from_secs(config.lastfm.auth_grace_period_secs);

    if !engine.login().await? {
        // Keep exchanging until the user approves or the token is used up
        while let SessionStatus::AwaitingUserAuth { failed_attempts } = engine.status().await {
            log::info!("Waiting for Last.fm authorization (attempt {})", failed_attempts + 1);
            tokio::time::sleep(grace).await;
            if engine.exchange_token().await {
                break;
            }
        }
    }

    match engine.status().await {
        SessionStatus::SignedIn { name } => {
            println!("Signed in to Last.fm as {} ({})", name, profile_url(&name));
            Ok(())
        }
        _ => anyhow::bail!("Last.fm authorization was not completed, run login again"),
    }
}

async fn run(config: Config, client: reqwest::Client, script: Option<PathBuf>) -> Result<()> {
    let catalog = ITunesCatalog::new(
        client.clone(),
        config.artwork.lookup_url.clone(),
        config.artwork.enabled,
    );
    let player = Arc::new(FeedPlayer::new(ArtworkResolver::new(catalog, config.artwork.size)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut consumers = JoinSet::new();
    let mut connecting = None;

    let publisher = if config.presence.enabled {
        let publisher: Arc<Publisher> = Arc::new(PresencePublisher::new(
            Arc::clone(&player),
            DiscordIpc::new(config.presence.client_id.clone()),
            config.presence.large_image.clone(),
            true,
        ));

        let connector = Arc::clone(&publisher);
        connecting = Some(tokio::spawn(async move { connector.connect().await }));
        consumers.spawn(sync::drive(
            player.subscribe(),
            shutdown_rx.clone(),
            Arc::clone(&publisher),
            |publisher: Arc<Publisher>, state| async move { publisher.on_state_change(state).await },
        ));
        Some(publisher)
    } else {
        log::info!("Rich presence is disabled");
        None
    };

    let engine = if config.lastfm.enabled {
        let engine = build_engine(&config, client)?;
        consumers.spawn(sync::drive(
            player.subscribe(),
            shutdown_rx.clone(),
            Arc::clone(&engine),
            |engine: Arc<Engine>, state| async move { engine.handle_state(state).await },
        ));
        Some(engine)
    } else {
        log::info!("Last.fm is disabled");
        None
    };

    let feed = async {
        match &script {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open player script {:?}", path))?;
                player.run_feed(BufReader::new(file)).await
            }
            None => player.run_feed(BufReader::new(tokio::io::stdin())).await,
        }
    };

    tokio::select! {
        result = feed => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted, shutting down"),
        _ = toggles(publisher, engine) => {}
    }

    // The presence connection may still be retrying
    if let Some(connecting) = connecting {
        connecting.abort();
    }

    let _ = shutdown_tx.send(true);
    while let Some(result) = consumers.join_next().await {
        if let Err(e) = result {
            log::error!("Consumer task failed: {}", e);
        }
    }

    Ok(())
}

/// SIGUSR1 toggles rich presence, SIGUSR2 toggles scrobbling
#[cfg(unix)]
async fn toggles(publisher: Option<Arc<Publisher>>, engine: Option<Arc<Engine>>) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut presence_signal, mut scrobble_signal) =
        match (signal(SignalKind::user_defined1()), signal(SignalKind::user_defined2())) {
            (Ok(presence), Ok(scrobble)) => (presence, scrobble),
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("Toggle signals unavailable: {}", e);
                return std::future::pending().await;
            }
        };

    loop {
        tokio::select! {
            _ = presence_signal.recv() => match &publisher {
                Some(publisher) => {
                    let enabled = !publisher.is_enabled();
                    log::info!("Rich presence {}", if enabled { "enabled" } else { "disabled" });
                    publisher.set_enabled(enabled).await;
                }
                None => log::warn!("Rich presence is disabled in the config file"),
            },
            _ = scrobble_signal.recv() => match &engine {
                Some(engine) if engine.is_enabled() => {
                    log::info!("Scrobbling disabled");
                    engine.set_enabled(false);
                }
                Some(engine) => match engine.status().await {
                    SessionStatus::SignedIn { .. } => {
                        log::info!("Scrobbling enabled");
                        engine.set_enabled(true);
                    }
                    _ => {
                        // Playback events keep retrying the exchange afterwards
                        log::info!("Not signed in to Last.fm, starting login");
                        let engine = Arc::clone(engine);
                        tokio::spawn(async move {
                            if let Err(e) = engine.login().await {
                                log::error!("Last.fm login failed: {:#}", e);
                            }
                        });
                    }
                },
                None => log::warn!("Last.fm is disabled in the config file"),
            },
        }
    }
}

#[cfg(not(unix))]
async fn toggles(_publisher: Option<Arc<Publisher>>, _engine: Option<Arc<Engine>>) {
    std::future::pending().await
}
