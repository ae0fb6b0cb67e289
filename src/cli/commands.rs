//! CLI command definitions and handlers.
//!
//! Each subcommand is implemented as a function that takes the parsed
//! arguments and returns an `anyhow::Result<()>`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::runtime::Runtime;
use tracing::warn;

use crate::metadata::LoftyTagSource;
use crate::reconcile::Reconciler;
use crate::report::{RunReport, Severity};
use crate::{config, db};

/// Music Keeper CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Library root (overrides the config file)
    #[arg(long, global = true, env = "MUSIC_KEEPER_ROOT")]
    pub root: Option<PathBuf>,

    /// Catalog database path (overrides the config file)
    #[arg(long, global = true, env = "MUSIC_KEEPER_DB")]
    pub db: Option<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Add never-seen files to the catalog
    Add,
    /// Fully reconcile the catalog with the library filesystem
    Update,
    /// List catalog contents
    List {
        /// What to list
        #[arg(value_enum, default_value_t = ListKind::Albums)]
        kind: ListKind,
        /// Print public media URLs instead of file paths
        #[arg(long)]
        urls: bool,
    },
    /// Search artists, albums, and songs by substring
    Search {
        /// Search term (case-insensitive)
        term: String,
    },
    /// Show aggregate catalog statistics
    Stats,
    /// Show the effective configuration
    Config {
        /// Write the current configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ListKind {
    Artists,
    Albums,
    Songs,
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;

    let mut config = config::load();
    if let Some(root) = &cli.root {
        config.library.root = root.clone();
    }
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }

    match &cli.command {
        Commands::Add => cmd_sync(&rt, &config, SyncKind::Add),
        Commands::Update => cmd_sync(&rt, &config, SyncKind::Update),
        Commands::List { kind, urls } => cmd_list(&rt, &config, *kind, *urls),
        Commands::Search { term } => cmd_search(&rt, &config, term),
        Commands::Stats => cmd_stats(&rt, &config),
        Commands::Config { init } => cmd_config(&config, *init),
    }
}

#[derive(Clone, Copy)]
enum SyncKind {
    Add,
    Update,
}

// ============================================================================
// Individual command implementations
// ============================================================================

fn cmd_sync(rt: &Runtime, config: &config::Config, kind: SyncKind) -> anyhow::Result<()> {
    if config.library.root.as_os_str().is_empty() {
        anyhow::bail!("no library root configured; pass --root or set it in the config file");
    }

    rt.block_on(async {
        let pool = db::init_db(&db::db_url(Some(&config.database.path))).await?;
        let reconciler = Reconciler::new(
            pool,
            config.library.clone(),
            Arc::new(LoftyTagSource),
        );

        // Ctrl+C requests a stop between mutation steps; the catalog
        // stays consistent at the last applied change.
        let cancel = reconciler.cancel_flag();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing the current step");
                cancel.store(true, Ordering::Relaxed);
            }
        });

        let report = match kind {
            SyncKind::Add => reconciler.add().await?,
            SyncKind::Update => reconciler.update().await?,
        };
        print_report(&report);

        if report.has_errors() {
            anyhow::bail!("run finished with errors");
        }
        Ok(())
    })
}

fn print_report(report: &RunReport) {
    for line in report.lines() {
        match line.severity {
            Severity::Info => println!("{}", line.message),
            Severity::Warning => println!("WARNING: {}", line.message),
            Severity::Error => eprintln!("ERROR: {}", line.message),
        }
    }
}

fn cmd_list(rt: &Runtime, config: &config::Config, kind: ListKind, urls: bool) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = db::init_db(&db::db_url(Some(&config.database.path))).await?;
        match kind {
            ListKind::Artists => {
                for artist in db::get_all_artists(&pool).await? {
                    println!("{}", artist.display_name());
                }
            }
            ListKind::Albums => {
                for album in db::get_all_albums(&pool).await? {
                    let owner = db::get_artist(&pool, album.artist_id)
                        .await?
                        .map(|a| a.display_name())
                        .unwrap_or_default();
                    if album.year > 0 {
                        println!("{} - {} ({})", owner, album.name, album.year);
                    } else {
                        println!("{} - {}", owner, album.name);
                    }
                }
            }
            ListKind::Songs => {
                for song in db::get_all_songs(&pool).await? {
                    if urls {
                        println!(
                            "{} - {}",
                            song.title,
                            config.library.media_url_for(&song.filename)
                        );
                    } else {
                        println!("{} - {}", song.title, song.filename);
                    }
                }
            }
        }
        Ok(())
    })
}

fn cmd_search(rt: &Runtime, config: &config::Config, term: &str) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = db::init_db(&db::db_url(Some(&config.database.path))).await?;

        let artists = db::search_artists(&pool, term).await?;
        if !artists.is_empty() {
            println!("Artists:");
            for artist in artists {
                println!("  {}", artist.display_name());
            }
        }

        let albums = db::search_albums(&pool, term).await?;
        if !albums.is_empty() {
            println!("Albums:");
            for album in albums {
                println!("  {}", album.name);
            }
        }

        let songs = db::search_songs(&pool, term).await?;
        if !songs.is_empty() {
            println!("Songs:");
            for song in songs {
                println!("  {} - {}", song.title, song.filename);
            }
        }
        Ok(())
    })
}

fn cmd_stats(rt: &Runtime, config: &config::Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = db::init_db(&db::db_url(Some(&config.database.path))).await?;
        let stats = db::get_stats(&pool).await?;

        println!("Artists: {}", stats.artists);
        println!("Albums:  {}", stats.albums);
        println!("Songs:   {}", stats.songs);
        println!("Length:  {}", format_length(stats.total_length));
        println!("Size:    {:.1} MiB", stats.total_size as f64 / (1024.0 * 1024.0));
        Ok(())
    })
}

fn cmd_config(config: &config::Config, init: bool) -> anyhow::Result<()> {
    if let Some(path) = config::config_path() {
        println!("Config file: {}", path.display());
    }
    println!("Library root: {}", config.library.root.display());
    println!("Media URL:    {}", config.library.media_url);
    println!("Database:     {}", config.database.path.display());

    if init {
        config::save(config)?;
        println!("Configuration written.");
    }
    Ok(())
}

/// Render a duration in seconds as `Hh MMm SSs`.
fn format_length(total_seconds: i64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else {
        format!("{minutes}m {seconds:02}s")
    }
}
