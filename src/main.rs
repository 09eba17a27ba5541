//! parchive command line front end.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use parchive::{
    Archiver, Config, DownloadRequest, EpisodeSelector, Error, ScanMode, ShowId, SyncSummary,
    ToExitCode,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parchive")]
#[command(about = "Podcast archiver with content-addressed storage and archive reconciliation")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults apply when it does not exist)
    #[arg(short, long, global = true, default_value = "parchive.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a show from its feed URL
    AddShow {
        /// RSS feed URL
        feed_url: String,
    },

    /// Re-read a show's feed
    Sync {
        /// Show ID
        show_id: ShowId,
    },

    /// Download episodes of a show
    Download {
        /// Show ID
        show_id: ShowId,
        /// Episodes to download, e.g. "all", "5", "3-7", "1,4-6,10"
        #[arg(short, long, default_value = "all")]
        episodes: String,
        /// Plan against the stored episodes without re-reading the feed
        #[arg(long)]
        skip_sync: bool,
    },

    /// Compare the database with the files on disk
    Scan {
        /// Show ID
        show_id: ShowId,
        /// Repair the database from the disk
        #[arg(long)]
        fix: bool,
        /// With --fix, also delete orphaned files
        #[arg(long)]
        force: bool,
    },

    /// List shows or episodes
    List {
        #[command(subcommand)]
        command: ListCommands,
    },

    /// Delete shows or episodes
    Delete {
        #[command(subcommand)]
        command: DeleteCommands,
    },

    /// Record that an episode's audio was deleted on purpose
    MarkDeleted {
        /// Show ID
        show_id: ShowId,
        /// Episode number
        episode: u32,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    /// List registered shows
    Shows,
    /// List the episodes of a show
    Episodes {
        /// Show ID
        show_id: ShowId,
    },
}

#[derive(Subcommand)]
enum DeleteCommands {
    /// Delete a show and all of its episodes
    Show {
        /// Show ID
        show_id: ShowId,
        /// Also remove the show directory
        #[arg(long)]
        files: bool,
    },
    /// Delete selected episodes of a show
    Episodes {
        /// Show ID
        show_id: ShowId,
        /// Episodes to delete
        #[arg(short, long)]
        episodes: String,
        /// Also remove the archived files
        #[arg(long)]
        files: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::debug!(error = ?e, "Command failed");
            eprintln!("error [{}]: {}", e.error_code(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "parchive=debug" } else { "parchive=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<u8, Error> {
    // Flag errors are reported before touching the database
    let scan_mode = match &cli.command {
        Commands::Scan { fix, force, .. } => Some(ScanMode::from_flags(*fix, *force)?),
        _ => None,
    };

    let config = Config::from_file(&cli.config)?;
    let archiver = Archiver::new(config).await?;

    match cli.command {
        Commands::AddShow { feed_url } => {
            let summary = archiver.add_show(&feed_url).await?;
            print_sync(&summary);
        }
        Commands::Sync { show_id } => {
            let summary = archiver.sync_show(show_id).await?;
            print_sync(&summary);
        }
        Commands::Download {
            show_id,
            episodes,
            skip_sync,
        } => {
            let mut request = DownloadRequest::new(EpisodeSelector::parse(&episodes)?);
            if skip_sync {
                request = request.without_sync();
            }

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            let signal_task = tokio::spawn(async move {
                parchive::wait_for_signal().await;
                tracing::warn!("Stopping: running downloads finish, the rest are cancelled");
                trigger.cancel();
            });

            let result = archiver.download(show_id, &request, cancel).await;
            signal_task.abort();

            let report = result?;
            print!("{}", report);
            return Ok(report.exit_code());
        }
        Commands::Scan { show_id, .. } => {
            let mode = scan_mode.unwrap_or(ScanMode::ReportOnly);
            let report = archiver.scan_show(show_id, mode).await?;
            print!("{}", report);
            return Ok(report.exit_code());
        }
        Commands::List { command } => match command {
            ListCommands::Shows => {
                let shows = archiver.list_shows().await?;
                if shows.is_empty() {
                    println!("No shows registered");
                }
                for show in shows {
                    println!(
                        "{:>4}  {:<40}  synced {}  {}",
                        show.id,
                        show.title,
                        format_timestamp(show.last_synced_at),
                        show.feed_url
                    );
                }
            }
            ListCommands::Episodes { show_id } => {
                for episode in archiver.list_episodes(show_id).await? {
                    let marker = if episode.in_feed { "" } else { "  (gone from feed)" };
                    println!(
                        "{:>6}  {:<14}  {}  {}{}",
                        episode.number,
                        episode.status.as_str(),
                        format_timestamp(episode.published_at),
                        episode.title,
                        marker
                    );
                }
            }
        },
        Commands::Delete { command } => match command {
            DeleteCommands::Show { show_id, files } => {
                archiver.delete_show(show_id, files).await?;
                println!("Deleted show {}", show_id);
            }
            DeleteCommands::Episodes {
                show_id,
                episodes,
                files,
            } => {
                let selector = EpisodeSelector::parse(&episodes)?;
                let deleted = archiver.delete_episodes(show_id, &selector, files).await?;
                println!("Deleted {} episode(s) of show {}", deleted.len(), show_id);
            }
        },
        Commands::MarkDeleted { show_id, episode } => {
            archiver.mark_deleted(show_id, episode).await?;
            println!("Marked episode {} of show {} as deleted", episode, show_id);
        }
    }

    Ok(0)
}

fn print_sync(summary: &SyncSummary) {
    println!("Show {}: {}", summary.show_id, summary.title);
    println!(
        "{} added, {} updated, {} unchanged, {} no longer in feed",
        summary.added.len(),
        summary.updated.len(),
        summary.unchanged,
        summary.missing_from_feed.len()
    );
}

fn format_timestamp(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}
