//! Command-line interface.

mod commands;
pub mod helpers;
pub mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "imgharvest")]
#[command(about = "Collect images for a topic from configured sources")]
#[command(version)]
pub struct Cli {
    /// Configuration file path (JSON or TOML)
    #[arg(short, long, env = "IMGHARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the metadata store
    #[arg(short, long, env = "IMGHARVEST_DATA")]
    data_dir: Option<PathBuf>,

    /// Resolve relative config paths against the working directory
    #[arg(long)]
    cwd: bool,

    /// Verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download images for a topic
    Scrape {
        /// What to search for (asked for when omitted)
        topic: Option<String>,

        /// Number of images to collect
        #[arg(short = 'n', long, default_value = "50")]
        count: usize,

        /// Skip URLs containing these terms (comma-separated or repeated)
        #[arg(short = 'x', long = "exclude", value_delimiter = ',')]
        exclude: Vec<String>,

        /// Only use these configured sources (repeatable)
        #[arg(short, long = "source")]
        source: Vec<String>,

        /// Root directory for images (default: ~/Pictures/imgharvest)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pixiv PHPSESSID cookie value
        #[arg(
            long,
            visible_alias = "session",
            env = "IMGHARVEST_PIXIV_SESSION",
            hide_env_values = true
        )]
        pixiv_session: Option<String>,

        /// Ignore and do not update the download history
        #[arg(long)]
        no_store: bool,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,

        /// Skip the terms-of-service prompt
        #[arg(short, long, visible_alias = "accept-terms")]
        yes: bool,
    },

    /// List configured sources and check their credentials
    Sources {
        /// Pixiv PHPSESSID cookie value
        #[arg(long, env = "IMGHARVEST_PIXIV_SESSION", hide_env_values = true)]
        pixiv_session: Option<String>,
    },

    /// Show recent downloads
    History {
        /// Only show this source
        #[arg(short, long)]
        source: Option<String>,

        /// Maximum rows to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Remove history entries whose files were deleted
    Prune {
        /// Forget a single item instead, so the next run downloads it again
        #[arg(long, num_args = 2, value_names = ["SOURCE", "KEY"])]
        forget: Option<Vec<String>>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

/// Map `-v` occurrences to a default log filter. `RUST_LOG` wins when set.
fn log_filter(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => "imgharvest=warn",
        1 => "imgharvest=info",
        2 => "imgharvest=debug",
        _ => "imgharvest=trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    let output_root = match &cli.command {
        Commands::Scrape { output, .. } => output
            .as_ref()
            .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned())),
        _ => None,
    };
    let settings = load_settings_with_options(LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
        data_dir: cli.data_dir,
        output_root,
    })
    .await?;

    match cli.command {
        Commands::Scrape {
            topic,
            count,
            exclude,
            source,
            pixiv_session,
            no_store,
            quiet,
            yes,
            ..
        } => {
            commands::cmd_scrape(
                &settings,
                commands::ScrapeOptions {
                    topic,
                    count,
                    exclude,
                    sources: source,
                    pixiv_session,
                    no_store,
                    quiet,
                    assume_yes: yes,
                },
            )
            .await
        }
        Commands::Sources { pixiv_session } => commands::cmd_sources(&settings, pixiv_session).await,
        Commands::History { source, limit } => {
            commands::cmd_history(&settings, source.as_deref(), limit).await
        }
        Commands::Prune { forget, yes } => {
            let forget = forget.and_then(|mut pair| {
                let key = pair.pop()?;
                let source = pair.pop()?;
                Some((source, key))
            });
            commands::cmd_prune(&settings, forget, yes).await
        }
    }
}
