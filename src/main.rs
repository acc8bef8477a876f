use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cadence::config::Config;
use cadence::console::Console;
use cadence::expander::CatalogExpander;
use cadence::gateway::{ChannelRef, GuildId};
use cadence::manager::{RequestContext, SessionManager};
use cadence::mpd::MpdGateway;
use cadence::notify::{ConsoleNotifier, NoticeSender};
use cadence::resolver::TrackResolver;
use cadence::service::{CatalogProvider, SpotifyClient, YtDlpClient};
use cadence::session::{SessionDeps, SessionSettings};

#[derive(Debug, Parser)]
#[command(name = "cadence", version, about = "Queue Spotify and YouTube links into MPD")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Guild id the console speaks for
    #[arg(long, default_value = "console")]
    guild: String,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", Config::example_config());
        return Ok(());
    }

    // Stdout carries notices; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cadence=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    let media = Arc::new(
        YtDlpClient::new(config.media.ytdlp_path.as_deref(), &config.media.audio_format)
            .await
            .context("yt-dlp is required for playback")?,
    );

    let catalog: Option<Arc<dyn CatalogProvider>> = if config.catalog.has_credentials() {
        Some(Arc::new(SpotifyClient::new(config.catalog.clone())?))
    } else {
        warn!("No Spotify credentials configured, Spotify links will be rejected");
        None
    };

    let notices = NoticeSender::spawn(Arc::new(ConsoleNotifier));
    let deps = SessionDeps {
        resolver: Arc::new(TrackResolver::new(
            media.clone(),
            config.playback.resolve_timeout(),
        )),
        gateway: Arc::new(MpdGateway::new(&config.mpd)),
        notices,
        settings: SessionSettings::from(&config.playback),
    };
    let expander = CatalogExpander::new(catalog, media, config.catalog.page_size);
    let manager = Arc::new(SessionManager::new(deps, expander, config.playback.queue_preview));

    let ctx = RequestContext {
        guild: GuildId(cli.guild.clone()),
        voice_channel: Some(ChannelRef(format!("mpd@{}:{}", config.mpd.host, config.mpd.port))),
        text_channel: ChannelRef(cli.guild),
    };

    info!("cadence ready, type `help` for commands");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    Console::new(manager, ctx).run(stdin).await?;

    // Let the last notices reach stdout
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
