//! Marquee CLI - Playlist browser and headless player
//!
//! Features:
//! - Fetch any URL with progress reporting
//! - List the entries of a playlist document
//! - Play a playlist entry on a headless clock session

use clap::{Parser, Subcommand};
use marquee_core::{Credentials, MarqueeConfig};
use std::path::PathBuf;

mod commands;
mod output;

use output::OutputFormat;

/// Marquee CLI - Network video playlist toolkit
#[derive(Parser)]
#[command(name = "marquee")]
#[command(version)]
#[command(about = "Browse video playlists and play their streams headlessly", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Username for servers that ask for authentication
    #[arg(long, requires = "password")]
    user: Option<String>,

    /// Password for servers that ask for authentication
    #[arg(long, requires = "user")]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL
    Fetch {
        url: String,

        /// Write the body to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Refuse bodies larger than this many bytes
        #[arg(long)]
        max_size: Option<u64>,
    },

    /// List the entries of a playlist
    List {
        /// Playlist URL
        url: String,

        /// Also download every poster
        #[arg(long)]
        posters: bool,
    },

    /// Play a playlist entry on a headless session
    Play {
        /// Playlist URL
        url: String,

        /// Entry index as shown by `list`
        #[arg(short, long, default_value = "0")]
        entry: usize,

        /// Playback rate
        #[arg(short, long, default_value = "1.0")]
        rate: f32,

        /// Stop after this many seconds of wall time
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    marquee_core::init();

    let mut config = match &cli.config {
        Some(path) => MarqueeConfig::from_json_file(path)?,
        None => MarqueeConfig::default(),
    };
    if let (Some(user), Some(password)) = (cli.user, cli.password) {
        config.fetch.credentials = Some(Credentials::new(user, password));
    }

    match cli.command {
        Commands::Fetch { url, output, max_size } => {
            if max_size.is_some() {
                config.fetch.max_size = max_size;
            }
            commands::fetch(&url, output, &config).await?;
        }
        Commands::List { url, posters } => {
            commands::list(&url, posters, &config, cli.format).await?;
        }
        Commands::Play { url, entry, rate, limit } => {
            config.playback.preferred_rate = rate;
            config.playback.autoplay = true;
            commands::play(&url, entry, limit, &config).await?;
        }
    }

    Ok(())
}
